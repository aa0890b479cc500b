use std::path::Path;

use opencv::core::Point;
use opencv::core::Scalar;
use opencv::core::Size;
use opencv::imgproc::put_text;
use opencv::imgproc::FONT_HERSHEY_PLAIN;
use opencv::imgproc::LINE_8;
use opencv::imgproc::{rectangle, LineTypes};
use opencv::prelude::Mat;

use opencv::videoio::VideoWriter;
use opencv::videoio::VideoWriterTrait;
use plate_access::{Admission, RegionReport};
use rusted_pipe::channels::read_channel::InputGenerator;
use rusted_pipe::channels::typed_read_channel::ReadChannel2;
use rusted_pipe::graph::processor::TerminalProcessor;
use rusted_pipe::RustedPipeError;
use tracing::{debug, info, warn};

use super::to_rect;
use crate::utils::{fps_label, FpsMeter};

const HEADER_HEIGHT_PX: i32 = 20;
const THICKNESS_PX: i32 = 2;

/// BGR colour of the box drawn around a plate.
fn admission_color(admission: &Admission) -> Scalar {
    match admission {
        Admission::Rejected => Scalar::from((200.0, 200.0, 200.0)),
        Admission::Decided {
            authorized: true, ..
        } => Scalar::from((0.0, 255.0, 0.0)),
        Admission::Decided { .. } => Scalar::from((0.0, 0.0, 255.0)),
    }
}

fn admission_label(report: &RegionReport) -> String {
    match report.admission.plate() {
        Some(plate) => plate.text.clone(),
        None => format!("plate {:.2}", report.detection.confidence),
    }
}

/// Draw every report on the frame.
pub fn annotate(image: &mut Mat, reports: &[RegionReport]) -> opencv::Result<()> {
    for report in reports {
        let color = admission_color(&report.admission);
        let bbox = to_rect(&report.detection.region);
        let header = opencv::core::Rect::new(
            bbox.x,
            (bbox.y - HEADER_HEIGHT_PX).max(0),
            bbox.width,
            HEADER_HEIGHT_PX,
        );

        rectangle(image, header, color, -1, LineTypes::LINE_4 as i32, 0)?;
        rectangle(
            image,
            bbox,
            color,
            THICKNESS_PX,
            LineTypes::LINE_4 as i32,
            0,
        )?;
        put_text(
            image,
            &admission_label(report),
            Point::new(header.x + 2, header.y + HEADER_HEIGHT_PX - 4),
            FONT_HERSHEY_PLAIN,
            1.2,
            Scalar::from((0.0, 0.0, 0.0)),
            THICKNESS_PX,
            LINE_8,
            false,
        )?;
    }
    Ok(())
}

/// Draw the frame rate in the top-left corner.
pub fn draw_fps(image: &mut Mat, fps: f64) -> opencv::Result<()> {
    put_text(
        image,
        &fps_label(fps),
        Point::new(10, 30),
        FONT_HERSHEY_PLAIN,
        2.0,
        Scalar::from((0.0, 255.0, 0.0)),
        THICKNESS_PX,
        LINE_8,
        false,
    )
}

pub struct BoundingBoxRender {
    writer: Option<VideoWriter>,
    fps_meter: FpsMeter,
    fps: f64,
}

impl BoundingBoxRender {
    pub fn with_save_to_file(path: &Path, fps: f64, frame_size: Size) -> opencv::Result<Self> {
        let writer = VideoWriter::new(
            &path.to_string_lossy(),
            VideoWriter::fourcc('M', 'J', 'P', 'G')?,
            fps,
            frame_size,
            true,
        )?;
        info!("Saving annotated video to {}", path.display());
        Ok(Self {
            writer: Some(writer),
            fps_meter: FpsMeter::default(),
            fps: 0.0,
        })
    }

    pub fn default() -> Self {
        Self {
            writer: None,
            fps_meter: FpsMeter::default(),
            fps: 0.0,
        }
    }
}

impl Drop for BoundingBoxRender {
    fn drop(&mut self) {
        debug!("Dropping BoundingBoxRender");
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.release() {
                warn!("Cannot close annotated video: {}", e);
            }
        }
    }
}

impl TerminalProcessor for BoundingBoxRender {
    type INPUT = ReadChannel2<Vec<RegionReport>, Mat>;
    fn handle(
        &mut self,
        mut input: <Self::INPUT as InputGenerator>::INPUT,
    ) -> Result<(), RustedPipeError> {
        let Some(mut image) = input.c2_owned() else {
            debug!("Skipping inferred data with no image");
            return Ok(());
        };
        debug!("Render Image {}", image.version.timestamp_ns);

        let reports = input.c1_owned().map(|packet| packet.data).unwrap_or_default();
        if let Some(fps) = self.fps_meter.tick() {
            self.fps = fps;
        }
        if let Err(e) = annotate(&mut image.data, &reports)
            .and_then(|_| draw_fps(&mut image.data, self.fps))
        {
            warn!("Cannot annotate frame {}: {}", image.version.timestamp_ns, e);
        }

        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.write(&image.data) {
                warn!("Cannot write annotated frame: {}", e);
            }
        }

        Ok(())
    }
}

unsafe impl Send for BoundingBoxRender {}
unsafe impl Sync for BoundingBoxRender {}
