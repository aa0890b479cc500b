//! Permission registry backed by `SQLite`.
//!
//! # Schema
//!
//! `permitted_plates` holds permits: `plate`, `active`, and an inclusive
//! `valid_from`..`valid_until` date range. `detections` is the append-only
//! detection log with a store-assigned `id`.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::{PermissionRegistry, PersistedRecord};
use crate::error::RegistryError;
use crate::normalizer::MIN_PLATE_CHARS;

/// Permit key in the character class reads are looked up with: ASCII letters
/// and digits, upper case. Punctuation and spaces are dropped.
fn permit_key(plate: &str) -> Result<String, RegistryError> {
    let key: String = plate
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if key.len() < MIN_PLATE_CHARS {
        return Err(RegistryError::Query(format!(
            "{:?} has fewer than {} plate characters",
            plate, MIN_PLATE_CHARS
        )));
    }
    Ok(key)
}

pub struct SqliteRegistry {
    conn: Mutex<Connection>,
}

impl SqliteRegistry {
    /// Open (or create) the registry database. `timeout` bounds how long a
    /// call waits on a locked database before failing.
    pub fn open(path: &Path, timeout: Duration) -> Result<Self, RegistryError> {
        let conn = Connection::open(path).map_err(|e| RegistryError::Open {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let registry = Self::with_connection(conn, timeout)?;
        info!("Opened permission registry at {:?}", path);
        Ok(registry)
    }

    pub fn open_in_memory() -> Result<Self, RegistryError> {
        let conn = Connection::open_in_memory().map_err(|e| RegistryError::Open {
            path: ":memory:".to_string(),
            message: e.to_string(),
        })?;
        Self::with_connection(conn, Duration::from_secs(1))
    }

    fn with_connection(conn: Connection, timeout: Duration) -> Result<Self, RegistryError> {
        conn.busy_timeout(timeout)
            .map_err(|e| RegistryError::Schema(e.to_string()))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn init_schema(conn: &Connection) -> Result<(), RegistryError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS permitted_plates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                plate TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                valid_from TEXT NOT NULL,
                valid_until TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_permitted_plates_plate ON permitted_plates(plate);
            CREATE TABLE IF NOT EXISTS detections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                plate TEXT NOT NULL,
                authorized INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );",
        )
        .map_err(|e| RegistryError::Schema(e.to_string()))
    }

    /// Add an active permit. `plate` is stored as ASCII upper-case letters and
    /// digits only, the form the pipeline looks up.
    pub fn grant_permit(
        &self,
        plate: &str,
        valid_from: NaiveDate,
        valid_until: NaiveDate,
    ) -> Result<i64, RegistryError> {
        if valid_until < valid_from {
            return Err(RegistryError::Query(format!(
                "permit for {} ends ({}) before it starts ({})",
                plate, valid_until, valid_from
            )));
        }
        let plate = permit_key(plate)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO permitted_plates (plate, active, valid_from, valid_until)
             VALUES (?1, 1, ?2, ?3)",
            params![plate, valid_from, valid_until],
        )?;
        let id = conn.last_insert_rowid();
        info!(plate = %plate, permit_id = id, "Granted permit {} - {}", valid_from, valid_until);
        Ok(id)
    }

    /// Deactivate every permit of `plate`. Returns the number of permits touched.
    pub fn revoke_permit(&self, plate: &str) -> Result<usize, RegistryError> {
        let plate = permit_key(plate)?;
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE permitted_plates SET active = 0 WHERE plate = ?1 AND active = 1",
            params![plate],
        )?;
        info!(plate = %plate, "Revoked {} permit(s)", changed);
        Ok(changed)
    }

    /// Latest detections, newest first.
    pub fn recent_detections(&self, limit: usize) -> Result<Vec<PersistedRecord>, RegistryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, plate, authorized, created_at FROM detections
             ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(PersistedRecord {
                id: row.get(0)?,
                plate: row.get(1)?,
                authorized: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

impl PermissionRegistry for SqliteRegistry {
    fn is_authorized(&self, plate: &str, as_of: NaiveDate) -> Result<bool, RegistryError> {
        let conn = self.conn.lock();
        let permit: Option<i64> = conn
            .query_row(
                "SELECT id FROM permitted_plates
                 WHERE plate = ?1 AND active = 1 AND ?2 BETWEEN valid_from AND valid_until
                 LIMIT 1",
                params![plate, as_of],
                |row| row.get(0),
            )
            .optional()?;
        debug!(plate = %plate, permit = ?permit, "Checked permit");
        Ok(permit.is_some())
    }

    fn record_detection(
        &self,
        plate: &str,
        authorized: bool,
        at: DateTime<Utc>,
    ) -> Result<PersistedRecord, RegistryError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO detections (plate, authorized, created_at) VALUES (?1, ?2, ?3)",
            params![plate, authorized, at],
        )?;
        let id = conn.last_insert_rowid();

        Ok(PersistedRecord {
            id,
            plate: plate.to_string(),
            authorized,
            created_at: at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::normalizer::normalize;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_permit_covers_inclusive_range() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        registry
            .grant_permit("34ABC56", date(2024, 1, 1), date(2024, 12, 31))
            .unwrap();

        assert!(registry.is_authorized("34ABC56", date(2024, 1, 1)).unwrap());
        assert!(registry.is_authorized("34ABC56", date(2024, 6, 15)).unwrap());
        assert!(registry.is_authorized("34ABC56", date(2024, 12, 31)).unwrap());
        assert!(!registry.is_authorized("34ABC56", date(2023, 12, 31)).unwrap());
        assert!(!registry.is_authorized("34ABC56", date(2025, 1, 1)).unwrap());
    }

    #[test]
    fn test_unknown_plate_is_not_authorized() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        assert!(!registry.is_authorized("11XYZ22", date(2024, 1, 1)).unwrap());
    }

    #[test]
    fn test_grant_strips_spaces() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        registry
            .grant_permit("34 ABC 56", date(2024, 1, 1), date(2024, 12, 31))
            .unwrap();
        assert!(registry.is_authorized("34ABC56", date(2024, 3, 1)).unwrap());
    }

    #[test]
    fn test_grant_stores_canonical_characters() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        registry
            .grant_permit("34-ABC-56", date(2024, 1, 1), date(2024, 12, 31))
            .unwrap();
        registry
            .grant_permit("06 ab 1234", date(2024, 1, 1), date(2024, 12, 31))
            .unwrap();

        for raw in ["34-ABC-56", "06 AB 1234"] {
            let plate = normalize(raw).unwrap();
            assert!(registry.is_authorized(&plate.text, date(2024, 3, 1)).unwrap());
        }
        assert_eq!(registry.revoke_permit("34 abc-56").unwrap(), 1);
        assert!(!registry.is_authorized("34ABC56", date(2024, 3, 1)).unwrap());
    }

    #[test]
    fn test_grant_rejects_plate_without_characters() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        for plate in ["", "--- ---", "A-1"] {
            let result = registry.grant_permit(plate, date(2024, 1, 1), date(2024, 12, 31));
            assert!(matches!(result, Err(RegistryError::Query(_))));
        }
        assert!(matches!(
            registry.revoke_permit("#"),
            Err(RegistryError::Query(_))
        ));
    }

    #[test]
    fn test_grant_rejects_inverted_range() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let result = registry.grant_permit("34ABC56", date(2024, 12, 31), date(2024, 1, 1));
        assert!(result.is_err());
    }

    #[test]
    fn test_revoked_permit_is_not_authorized() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        registry
            .grant_permit("34ABC56", date(2024, 1, 1), date(2024, 12, 31))
            .unwrap();

        assert_eq!(registry.revoke_permit("34ABC56").unwrap(), 1);
        assert!(!registry.is_authorized("34ABC56", date(2024, 6, 1)).unwrap());
        assert_eq!(registry.revoke_permit("34ABC56").unwrap(), 0);
    }

    #[test]
    fn test_record_detection_assigns_ids() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();

        let first = registry.record_detection("34ABC56", true, at).unwrap();
        let second = registry.record_detection("11XYZ22", false, at).unwrap();

        assert!(second.id > first.id);
        assert_eq!(first.plate, "34ABC56");
        assert!(first.authorized);
        assert_eq!(first.created_at, at);
    }

    #[test]
    fn test_recent_detections_newest_first() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        registry.record_detection("34ABC56", true, at).unwrap();
        registry.record_detection("11XYZ22", false, at).unwrap();
        registry.record_detection("06AB1234", false, at).unwrap();

        let records = registry.recent_detections(2).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].plate, "06AB1234");
        assert_eq!(records[1].plate, "11XYZ22");
        assert!(!records[1].authorized);
        assert_eq!(records[1].created_at, at);
    }

    #[test]
    fn test_open_file_persists_between_connections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.db");

        {
            let registry = SqliteRegistry::open(&path, Duration::from_millis(500)).unwrap();
            registry
                .grant_permit("34ABC56", date(2024, 1, 1), date(2024, 12, 31))
                .unwrap();
        }

        let registry = SqliteRegistry::open(&path, Duration::from_millis(500)).unwrap();
        assert!(registry.is_authorized("34ABC56", date(2024, 2, 1)).unwrap());
    }

    #[test]
    fn test_open_missing_directory_fails() {
        let result = SqliteRegistry::open(
            Path::new("/nonexistent/dir/registry.db"),
            Duration::from_millis(100),
        );
        assert!(matches!(result, Err(RegistryError::Open { .. })));
    }
}
