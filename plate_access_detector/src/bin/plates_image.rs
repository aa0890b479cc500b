use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use opencv::core::Vector;
use opencv::imgcodecs::imwrite;
use plate_access::{AccessController, AdmissionSummary, DebounceGate, RecognitionPipeline};
use plate_access_detector::plate_detection::bounding_box_render::annotate;
use plate_access_detector::plate_detection::dnn_ocr::{DnnOcrReader, GreyFrameReader};
use plate_access_detector::plate_detection::object_detector::ObjectDetector;
use plate_access_detector::plate_detection::video_reader::read_image;
use plate_access_detector::setup;
use tracing::{info, warn};

/// Recognize plates on still images and write annotated copies.
#[derive(Parser, Debug)]
#[command(name = "plates_image")]
struct Args {
    #[arg(short, long, default_value = "plate_access.toml")]
    config: PathBuf,

    /// Images to process; the configured source path when empty
    images: Vec<PathBuf>,
}

fn main() -> Result<()> {
    setup::init_tracing();
    let args = Args::parse();
    let config = setup::load_config(&args.config)?;

    let images = if args.images.is_empty() {
        config.source.path.iter().cloned().collect()
    } else {
        args.images
    };
    if images.is_empty() {
        bail!("No image given");
    }

    let registry = setup::open_registry(&config.registry)?;
    let gate = Arc::new(DebounceGate::new(config.gate.suppression_window()));
    let mut pipeline = RecognitionPipeline::new(
        ObjectDetector::plate_detector(&config.detector)?,
        GreyFrameReader(DnnOcrReader::new(&config.ocr)?),
        AccessController::new(registry, gate),
    );
    std::fs::create_dir_all(&config.output.directory)?;

    for path in images {
        let mut image = match read_image(&path) {
            Ok(image) => image,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        let reports = pipeline.process_frame(&image, Utc::now());
        for report in &reports {
            let summary = AdmissionSummary::from(&report.admission);
            info!(
                image = %path.display(),
                raw = %report.raw_text,
                plate = summary.plate.as_deref().unwrap_or_default(),
                authorized = summary.authorized,
                record = summary.record_id,
                "Plate at {:?} ({:.2})",
                report.detection.region,
                report.detection.confidence
            );
        }

        annotate(&mut image, &reports)?;
        let file_name = path
            .file_name()
            .with_context(|| format!("{} has no file name", path.display()))?;
        let output = config
            .output
            .directory
            .join(format!("result_{}", file_name.to_string_lossy()));
        imwrite(&output.to_string_lossy(), &image, &Vector::new())?;
        info!("{} plate(s), annotated image at {}", reports.len(), output.display());
    }

    setup::write_metrics(&config.output)?;
    Ok(())
}
