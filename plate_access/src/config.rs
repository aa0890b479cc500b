//! Application Configuration
//!
//! Source, model, registry and gate settings stored in TOML format. Every
//! section has defaults so a partial file is enough.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::gate::DEFAULT_SUPPRESSION_WINDOW;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub detector: DetectorConfig,
    pub ocr: OcrConfig,
    pub registry: RegistryConfig,
    pub gate: GateConfig,
    pub graph: GraphConfig,
    pub output: OutputConfig,
    pub profiling: ProfilingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Camera,
    Video,
    Image,
}

/// Frame acquisition settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Camera device index (camera only)
    pub camera_index: i32,
    /// Video or image file (video and image only)
    pub path: Option<PathBuf>,
    /// Frame rate cap
    pub fps: u64,
    pub frame_width: i32,
    pub frame_height: i32,
    /// Restart the video when it ends
    pub loop_video: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Camera,
            camera_index: 0,
            path: None,
            fps: 20,
            frame_width: 640,
            frame_height: 480,
            loop_video: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Yolov5,
    #[default]
    Yolov8,
}

/// Plate detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// ONNX export of the plate model
    pub model_path: PathBuf,
    pub model_family: ModelFamily,
    /// Square network input size in pixels
    pub input_size: i32,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub use_gpu: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/plate_best.onnx"),
            model_family: ModelFamily::Yolov8,
            input_size: 640,
            confidence_threshold: 0.25,
            nms_threshold: 0.4,
            use_gpu: false,
        }
    }
}

/// Tesseract settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub data_path: PathBuf,
    pub language: String,
    pub char_whitelist: String,
    pub page_seg_mode: u32,
    /// Fraction trimmed from the plate box before reading: left, top, right, bottom
    pub crop_margins: [f32; 4],
    /// Sharpen the crop before reading
    pub deblur: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("models"),
            language: "licence".to_string(),
            char_whitelist: "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 ".to_string(),
            page_seg_mode: 7,
            crop_margins: [0.10, 0.12, 0.02, 0.12],
            deblur: false,
        }
    }
}

/// Permission registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub database_path: PathBuf,
    /// Longest wait on a busy registry before the call counts as failed
    pub timeout_ms: u64,
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("plates.db"),
            timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub suppression_window_secs: f64,
}

impl GateConfig {
    pub fn suppression_window(&self) -> Duration {
        Duration::try_from_secs_f64(self.suppression_window_secs)
            .unwrap_or(DEFAULT_SUPPRESSION_WINDOW)
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            suppression_window_secs: 15.0,
        }
    }
}

/// Node buffering for the processing graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Block producers instead of dropping frames when a node is busy
    pub block_channel_full: bool,
    pub channel_buffer_size: usize,
    pub process_buffer_size: usize,
    /// Stop after this many seconds; run until the source ends otherwise
    pub run_for_secs: Option<u64>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            block_channel_full: false,
            channel_buffer_size: 1,
            process_buffer_size: 1,
            run_for_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Annotated images and video land here
    pub directory: PathBuf,
    pub save_video: bool,
    /// Prometheus text dump written on shutdown
    pub metrics_path: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("results"),
            save_video: false,
            metrics_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilingConfig {
    /// Pyroscope server; profiling is off when unset
    pub server_url: Option<String>,
    pub application_name: String,
    pub sample_rate: u32,
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            application_name: "plate_access".to_string(),
            sample_rate: 100,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.kind != SourceKind::Camera && self.source.path.is_none() {
            return Err(ConfigError::Invalid(format!(
                "source.path is required for {:?} sources",
                self.source.kind
            )));
        }
        if self.source.fps == 0 {
            return Err(ConfigError::Invalid("source.fps must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(ConfigError::Invalid(
                "detector.confidence_threshold must be within 0.0 - 1.0".to_string(),
            ));
        }
        if !self.gate.suppression_window_secs.is_finite() || self.gate.suppression_window_secs < 0.0
        {
            return Err(ConfigError::Invalid(
                "gate.suppression_window_secs must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
