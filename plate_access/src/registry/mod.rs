//! Permission registry contract
//!
//! The registry answers "is this plate allowed today" and keeps the detection
//! log. The core only consumes this contract; [`SqliteRegistry`] is the
//! bundled implementation.

pub mod sqlite;

pub use sqlite::SqliteRegistry;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::warn;

use crate::error::RegistryError;
use crate::metrics;

/// One row of the detection log. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedRecord {
    pub id: i64,
    pub plate: String,
    pub authorized: bool,
    pub created_at: DateTime<Utc>,
}

pub trait PermissionRegistry: Send + Sync {
    /// Whether `plate` holds an active permit covering `as_of`.
    fn is_authorized(&self, plate: &str, as_of: NaiveDate) -> Result<bool, RegistryError>;

    /// Append a detection to the log and return the stored record.
    fn record_detection(
        &self,
        plate: &str,
        authorized: bool,
        at: DateTime<Utc>,
    ) -> Result<PersistedRecord, RegistryError>;
}

/// Fail-closed authorization check: any registry error reads as unauthorized.
pub fn check_authorized<R: PermissionRegistry + ?Sized>(
    registry: &R,
    plate: &str,
    as_of: NaiveDate,
) -> bool {
    match registry.is_authorized(plate, as_of) {
        Ok(authorized) => authorized,
        Err(e) => {
            metrics::count_registry_failure(metrics::OPERATION_CHECK);
            warn!(plate = %plate, "Authorization check failed, treating as unauthorized: {}", e);
            false
        }
    }
}
