//! Recognition pipeline
//!
//! Per frame: detect plate regions, read each region, then admit the reads in
//! detector order. Detector and OCR are collaborators behind
//! [`PlateDetector`] and [`PlateReader`]; their failures are contained here
//! and never reach the admission logic.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::controller::{AccessController, Admission};
use crate::error::VisionError;
use crate::registry::PermissionRegistry;

/// Axis-aligned region in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub region: Region,
    pub confidence: f32,
}

/// A detected region and what the OCR made of it (possibly empty).
#[derive(Debug, Clone, PartialEq)]
pub struct PlateRead {
    pub detection: Detection,
    pub raw_text: String,
}

/// Outcome for one region of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionReport {
    pub detection: Detection,
    pub raw_text: String,
    pub admission: Admission,
}

pub trait PlateDetector<F> {
    /// Regions above the detector's confidence threshold.
    fn detect(&mut self, frame: &F) -> Result<Vec<Detection>, VisionError>;
}

pub trait PlateReader<F> {
    fn read(&mut self, frame: &F, region: &Region) -> Result<String, VisionError>;
}

/// Read every detection; an OCR failure becomes an empty read.
pub fn read_plates<F, O: PlateReader<F> + ?Sized>(
    reader: &mut O,
    frame: &F,
    detections: Vec<Detection>,
) -> Vec<PlateRead> {
    detections
        .into_iter()
        .map(|detection| {
            let raw_text = match reader.read(frame, &detection.region) {
                Ok(text) => text.trim().to_string(),
                Err(e) => {
                    warn!(region = ?detection.region, "OCR failed, treating as empty read: {}", e);
                    String::new()
                }
            };
            PlateRead {
                detection,
                raw_text,
            }
        })
        .collect()
}

pub struct RecognitionPipeline<D, O, R: ?Sized> {
    detector: D,
    reader: O,
    controller: AccessController<R>,
}

impl<D, O, R: PermissionRegistry + ?Sized> RecognitionPipeline<D, O, R> {
    pub fn new(detector: D, reader: O, controller: AccessController<R>) -> Self {
        Self {
            detector,
            reader,
            controller,
        }
    }

    pub fn controller(&self) -> &AccessController<R> {
        &self.controller
    }

    pub fn process_frame<F>(&mut self, frame: &F, now: DateTime<Utc>) -> Vec<RegionReport>
    where
        D: PlateDetector<F>,
        O: PlateReader<F>,
    {
        let detections = match self.detector.detect(frame) {
            Ok(detections) => detections,
            Err(e) => {
                warn!("Detector failed, skipping frame: {}", e);
                return Vec::new();
            }
        };

        let reads = read_plates(&mut self.reader, frame, detections);
        self.controller.admit_all(reads, now)
    }
}
