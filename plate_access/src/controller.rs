//! Admission of raw OCR reads: normalize, authorize, debounce, persist.

use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;
use tracing::debug;

use crate::gate::{DebounceGate, PersistOutcome};
use crate::metrics;
use crate::normalizer::{self, CanonicalPlate};
use crate::pipeline::{PlateRead, RegionReport};
use crate::registry::{self, PermissionRegistry};

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Too few characters survived normalization. Nothing reaches the registry.
    Rejected,
    Decided {
        plate: CanonicalPlate,
        authorized: bool,
        outcome: PersistOutcome,
    },
}

impl Admission {
    pub fn plate(&self) -> Option<&CanonicalPlate> {
        match self {
            Admission::Rejected => None,
            Admission::Decided { plate, .. } => Some(plate),
        }
    }

    pub fn is_authorized(&self) -> bool {
        matches!(self, Admission::Decided { authorized: true, .. })
    }

    pub fn is_persisted(&self) -> bool {
        match self {
            Admission::Rejected => false,
            Admission::Decided { outcome, .. } => outcome.is_persisted(),
        }
    }
}

/// Serializable summary, used for logs and annotation labels.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionSummary {
    pub plate: Option<String>,
    pub authorized: bool,
    pub record_id: Option<i64>,
}

impl From<&Admission> for AdmissionSummary {
    fn from(admission: &Admission) -> Self {
        match admission {
            Admission::Rejected => Self {
                plate: None,
                authorized: false,
                record_id: None,
            },
            Admission::Decided {
                plate,
                authorized,
                outcome,
            } => Self {
                plate: Some(plate.text.clone()),
                authorized: *authorized,
                record_id: outcome.record_id(),
            },
        }
    }
}

/// Ties the registry and the shared debounce gate together.
pub struct AccessController<R: ?Sized> {
    registry: Arc<R>,
    gate: Arc<DebounceGate>,
}

impl<R: ?Sized> Clone for AccessController<R> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            gate: Arc::clone(&self.gate),
        }
    }
}

impl<R: PermissionRegistry + ?Sized> AccessController<R> {
    pub fn new(registry: Arc<R>, gate: Arc<DebounceGate>) -> Self {
        Self { registry, gate }
    }

    pub fn gate(&self) -> &DebounceGate {
        &self.gate
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn admit(&self, raw_text: &str, now: DateTime<Utc>) -> Admission {
        let Some(plate) = normalizer::normalize(raw_text) else {
            debug!(raw = %raw_text, "No admissible plate in read");
            metrics::count_outcome(metrics::OUTCOME_REJECTED);
            return Admission::Rejected;
        };

        let authorized = registry::check_authorized(&*self.registry, &plate.text, as_of(now));
        let outcome = self
            .gate
            .consider_persist(&*self.registry, &plate, authorized, now);

        Admission::Decided {
            plate,
            authorized,
            outcome,
        }
    }

    /// Admit every read of one frame, in order, against the same gate.
    pub fn admit_all(&self, reads: Vec<PlateRead>, now: DateTime<Utc>) -> Vec<RegionReport> {
        reads
            .into_iter()
            .map(|read| {
                let admission = self.admit(&read.raw_text, now);
                RegionReport {
                    detection: read.detection,
                    raw_text: read.raw_text,
                    admission,
                }
            })
            .collect()
    }
}

/// Permits are dated in the local calendar.
fn as_of(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&Local).date_naive()
}
