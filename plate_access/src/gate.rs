//! Debounce gate
//!
//! Once an authorized detection is logged, every detection in the following
//! suppression window is dropped: it is most likely the same vehicle still in
//! frame. Unauthorized writes never open or extend the window.
//!
//! The gate may be shared between lanes (`Arc<DebounceGate>`). The lock covers
//! only the compare-and-set of the timestamp; the registry write happens
//! outside it. An authorized candidate reserves the window before writing.
//! Other candidates wait for that reservation to settle before deciding, so a
//! write that fails and gives the reservation back turns nobody away.

use std::time::{Duration, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::metrics;
use crate::normalizer::CanonicalPlate;
use crate::registry::{PermissionRegistry, PersistedRecord};

pub const DEFAULT_SUPPRESSION_WINDOW: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    Persisted(PersistedRecord),
    /// Inside the suppression window, nothing written.
    Suppressed,
    /// The registry refused the write; the gate state is unchanged.
    WriteFailed,
}

impl PersistOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, PersistOutcome::Persisted(_))
    }

    pub fn record_id(&self) -> Option<i64> {
        match self {
            PersistOutcome::Persisted(record) => Some(record.id),
            _ => None,
        }
    }
}

struct GateState {
    last_authorized: DateTime<Utc>,
    /// An authorized write holds the window and has not settled yet.
    pending: bool,
}

pub struct DebounceGate {
    window: Duration,
    state: Mutex<GateState>,
    settled: Condvar,
}

/// Window held by an authorized write in flight. Dropping it without
/// `commit` gives the window back.
struct Reservation<'a> {
    gate: &'a DebounceGate,
    previous: DateTime<Utc>,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        if !self.committed {
            state.last_authorized = self.previous;
        }
        state.pending = false;
        drop(state);
        self.gate.settled.notify_all();
    }
}

impl Default for DebounceGate {
    fn default() -> Self {
        Self::new(DEFAULT_SUPPRESSION_WINDOW)
    }
}

impl DebounceGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(GateState {
                last_authorized: DateTime::<Utc>::from(UNIX_EPOCH),
                pending: false,
            }),
            settled: Condvar::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn last_authorized(&self) -> DateTime<Utc> {
        self.state.lock().last_authorized
    }

    pub fn is_suppressed(&self, now: DateTime<Utc>) -> bool {
        self.within_window(self.state.lock().last_authorized, now)
    }

    fn within_window(&self, last_authorized: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match (now - last_authorized).to_std() {
            Ok(elapsed) => elapsed < self.window,
            // clock went backwards past the last authorized write
            Err(_) => true,
        }
    }

    /// Decide whether `plate` is written to the detection log at `now`.
    pub fn consider_persist<R: PermissionRegistry + ?Sized>(
        &self,
        registry: &R,
        plate: &CanonicalPlate,
        authorized: bool,
        now: DateTime<Utc>,
    ) -> PersistOutcome {
        let reservation = {
            let mut state = self.state.lock();
            while state.pending {
                self.settled.wait(&mut state);
            }
            if self.within_window(state.last_authorized, now) {
                debug!(plate = %plate.text, "Inside suppression window, not recording");
                metrics::count_outcome(metrics::OUTCOME_SUPPRESSED);
                return PersistOutcome::Suppressed;
            }
            if authorized {
                let previous = state.last_authorized;
                state.last_authorized = now;
                state.pending = true;
                Some(Reservation {
                    gate: self,
                    previous,
                    committed: false,
                })
            } else {
                None
            }
        };

        match registry.record_detection(&plate.text, authorized, now) {
            Ok(record) => {
                if let Some(reservation) = reservation {
                    reservation.commit();
                }
                metrics::count_outcome(metrics::OUTCOME_PERSISTED);
                if authorized {
                    metrics::set_last_authorized(now);
                    info!(
                        plate = %record.plate,
                        record_id = record.id,
                        "Authorized plate recorded, suppressing for {:?}",
                        self.window
                    );
                } else {
                    info!(plate = %record.plate, record_id = record.id, "Unauthorized plate recorded");
                }
                PersistOutcome::Persisted(record)
            }
            Err(e) => {
                drop(reservation);
                metrics::count_registry_failure(metrics::OPERATION_RECORD);
                metrics::count_outcome(metrics::OUTCOME_WRITE_FAILED);
                warn!(plate = %plate.text, authorized, "Cannot record detection: {}", e);
                PersistOutcome::WriteFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    /// Registry double that logs in memory and can be switched to fail.
    #[derive(Default)]
    struct LogOnly {
        next_id: AtomicI64,
        failing: AtomicBool,
        writes: Mutex<Vec<(String, bool, DateTime<Utc>)>>,
    }

    impl PermissionRegistry for LogOnly {
        fn is_authorized(&self, _plate: &str, _as_of: NaiveDate) -> Result<bool, RegistryError> {
            Ok(false)
        }

        fn record_detection(
            &self,
            plate: &str,
            authorized: bool,
            at: DateTime<Utc>,
        ) -> Result<PersistedRecord, RegistryError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(RegistryError::Unavailable);
            }
            self.writes.lock().push((plate.to_string(), authorized, at));
            Ok(PersistedRecord {
                id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
                plate: plate.to_string(),
                authorized,
                created_at: at,
            })
        }
    }

    fn plate(text: &str) -> CanonicalPlate {
        CanonicalPlate {
            text: text.to_string(),
            char_count: text.len(),
        }
    }

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from(UNIX_EPOCH) + chrono::Duration::milliseconds(millis)
    }

    const T: i64 = 1_000_000;

    fn gate_after_authorized_at(t: i64, registry: &LogOnly) -> DebounceGate {
        let gate = DebounceGate::default();
        let outcome = gate.consider_persist(registry, &plate("34ABC56"), true, at(t));
        assert!(outcome.is_persisted());
        gate
    }

    #[test]
    fn test_fresh_gate_starts_at_epoch() {
        let gate = DebounceGate::default();
        assert_eq!(gate.last_authorized(), DateTime::<Utc>::from(UNIX_EPOCH));
        assert_eq!(gate.window(), Duration::from_secs(15));
    }

    #[test]
    fn test_suppresses_everything_inside_window() {
        let registry = LogOnly::default();
        let gate = gate_after_authorized_at(T, &registry);

        for offset in [0, 1, 7_500, 14_999] {
            for authorized in [true, false] {
                let outcome =
                    gate.consider_persist(&registry, &plate("11XYZ22"), authorized, at(T + offset));
                assert_eq!(outcome, PersistOutcome::Suppressed);
            }
        }
        assert_eq!(gate.last_authorized(), at(T));
        assert_eq!(registry.writes.lock().len(), 1);
    }

    #[test]
    fn test_window_boundary_is_exclusive() {
        let registry = LogOnly::default();
        let gate = gate_after_authorized_at(T, &registry);

        assert!(gate.is_suppressed(at(T + 14_999)));
        assert!(!gate.is_suppressed(at(T + 15_000)));

        let outcome = gate.consider_persist(&registry, &plate("11XYZ22"), false, at(T + 15_000));
        assert!(outcome.is_persisted());
        assert_eq!(outcome.record_id(), Some(2));
    }

    #[test]
    fn test_authorized_write_moves_window() {
        let registry = LogOnly::default();
        let gate = gate_after_authorized_at(T, &registry);

        let t2 = T + 20_000;
        assert!(gate
            .consider_persist(&registry, &plate("34ABC56"), true, at(t2))
            .is_persisted());
        assert_eq!(gate.last_authorized(), at(t2));
        assert!(gate.is_suppressed(at(t2 + 14_999)));
        assert!(!gate.is_suppressed(at(t2 + 15_000)));
    }

    #[test]
    fn test_unauthorized_write_leaves_window() {
        let registry = LogOnly::default();
        let gate = gate_after_authorized_at(T, &registry);

        assert!(gate
            .consider_persist(&registry, &plate("11XYZ22"), false, at(T + 16_000))
            .is_persisted());
        assert_eq!(gate.last_authorized(), at(T));
        assert!(gate
            .consider_persist(&registry, &plate("11XYZ22"), false, at(T + 16_001))
            .is_persisted());
    }

    #[test]
    fn test_unauthorized_first_write_never_opens_window() {
        let registry = LogOnly::default();
        let gate = DebounceGate::default();

        assert!(gate
            .consider_persist(&registry, &plate("11XYZ22"), false, at(T))
            .is_persisted());
        assert!(!gate.is_suppressed(at(T)));
        assert_eq!(gate.last_authorized(), DateTime::<Utc>::from(UNIX_EPOCH));
    }

    #[test]
    fn test_failed_authorized_write_keeps_state() {
        let registry = LogOnly::default();
        let gate = gate_after_authorized_at(T, &registry);

        registry.failing.store(true, Ordering::SeqCst);
        let outcome = gate.consider_persist(&registry, &plate("34ABC56"), true, at(T + 30_000));
        assert_eq!(outcome, PersistOutcome::WriteFailed);
        assert_eq!(outcome.record_id(), None);
        assert_eq!(gate.last_authorized(), at(T));

        registry.failing.store(false, Ordering::SeqCst);
        assert!(gate
            .consider_persist(&registry, &plate("11XYZ22"), false, at(T + 30_001))
            .is_persisted());
    }

    #[test]
    fn test_clock_before_last_authorized_is_suppressed() {
        let registry = LogOnly::default();
        let gate = gate_after_authorized_at(T, &registry);
        assert!(gate.is_suppressed(at(T - 60_000)));
    }

    #[test]
    fn test_custom_window() {
        let registry = LogOnly::default();
        let gate = DebounceGate::new(Duration::from_secs(2));
        assert!(gate
            .consider_persist(&registry, &plate("34ABC56"), true, at(T))
            .is_persisted());
        assert!(gate.is_suppressed(at(T + 1_999)));
        assert!(!gate.is_suppressed(at(T + 2_000)));
    }

    /// Holds authorized writes until released, then fails or succeeds.
    struct HeldWrite {
        entered: Barrier,
        release: Barrier,
        fail_authorized: bool,
        log: LogOnly,
    }

    impl HeldWrite {
        fn new(fail_authorized: bool) -> Self {
            Self {
                entered: Barrier::new(2),
                release: Barrier::new(2),
                fail_authorized,
                log: LogOnly::default(),
            }
        }
    }

    impl PermissionRegistry for HeldWrite {
        fn is_authorized(&self, _plate: &str, _as_of: NaiveDate) -> Result<bool, RegistryError> {
            Ok(false)
        }

        fn record_detection(
            &self,
            plate: &str,
            authorized: bool,
            at: DateTime<Utc>,
        ) -> Result<PersistedRecord, RegistryError> {
            if authorized {
                self.entered.wait();
                self.release.wait();
                if self.fail_authorized {
                    return Err(RegistryError::Unavailable);
                }
            }
            self.log.record_detection(plate, authorized, at)
        }
    }

    /// Lane A writes an authorized plate at `T` and is held inside the
    /// registry while lane B offers an unauthorized plate at `T + 1s`.
    fn two_lanes(fail_authorized: bool) -> (PersistOutcome, PersistOutcome, DateTime<Utc>, usize) {
        let registry = Arc::new(HeldWrite::new(fail_authorized));
        let gate = Arc::new(DebounceGate::default());

        let lane_a = {
            let (registry, gate) = (registry.clone(), gate.clone());
            thread::spawn(move || gate.consider_persist(&*registry, &plate("34ABC56"), true, at(T)))
        };
        registry.entered.wait();

        let lane_b = {
            let (registry, gate) = (registry.clone(), gate.clone());
            thread::spawn(move || {
                gate.consider_persist(&*registry, &plate("11XYZ22"), false, at(T + 1_000))
            })
        };
        thread::sleep(std::time::Duration::from_millis(50));
        registry.release.wait();

        let a = lane_a.join().unwrap();
        let b = lane_b.join().unwrap();
        let writes = registry.log.writes.lock().len();
        (a, b, gate.last_authorized(), writes)
    }

    #[test]
    fn test_failed_write_in_other_lane_does_not_suppress() {
        let (a, b, last_authorized, writes) = two_lanes(true);
        assert_eq!(a, PersistOutcome::WriteFailed);
        assert!(b.is_persisted());
        assert_eq!(last_authorized, DateTime::<Utc>::from(UNIX_EPOCH));
        assert_eq!(writes, 1);
    }

    #[test]
    fn test_committed_write_in_other_lane_suppresses() {
        let (a, b, last_authorized, writes) = two_lanes(false);
        assert!(a.is_persisted());
        assert_eq!(b, PersistOutcome::Suppressed);
        assert_eq!(last_authorized, at(T));
        assert_eq!(writes, 1);
    }
}
