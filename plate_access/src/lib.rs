//! Plate access core
//!
//! Turns raw OCR reads of license plates into access decisions and a
//! deduplicated detection log. Detection, OCR and frame handling live in
//! `plate_access_detector`; this crate only sees their results.

pub mod config;
pub mod controller;
pub mod error;
pub mod gate;
pub mod metrics;
pub mod normalizer;
pub mod pipeline;
pub mod registry;

pub use controller::{AccessController, Admission, AdmissionSummary};
pub use error::{ConfigError, RegistryError, VisionError};
pub use gate::{DebounceGate, PersistOutcome};
pub use normalizer::{normalize, CanonicalPlate};
pub use pipeline::{
    Detection, PlateDetector, PlateRead, PlateReader, RecognitionPipeline, Region, RegionReport,
};
pub use registry::{check_authorized, PermissionRegistry, PersistedRecord, SqliteRegistry};
