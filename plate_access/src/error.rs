//! Error types shared by the access core and its adapters

use thiserror::Error;

/// Failures of the permission registry.
///
/// None of these abort the frame loop: lookups fail closed and failed writes
/// are dropped by the gate. Only `Open`/`Schema` at startup are fatal.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Cannot open registry at {path}: {message}")]
    Open { path: String, message: String },

    #[error("Registry schema error: {0}")]
    Schema(String),

    #[error("Registry query failed: {0}")]
    Query(String),

    #[error("Registry connection unavailable")]
    Unavailable,
}

impl From<rusqlite::Error> for RegistryError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::DatabaseBusy
                    || code.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                RegistryError::Unavailable
            }
            other => RegistryError::Query(other.to_string()),
        }
    }
}

/// Failures raised by detector and OCR collaborators.
#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Detector error: {0}")]
    Detector(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error("Source error: {0}")]
    Source(String),
}

/// Failures while loading or saving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}
