use std::path::{Path, PathBuf};

use crossbeam::channel::{unbounded, Receiver, Sender};
use opencv::core::Size;

use opencv::imgcodecs::{imread, IMREAD_COLOR};
use opencv::imgproc::resize;
use opencv::imgproc::INTER_LINEAR;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;

use opencv::prelude::{VideoCaptureTrait, VideoCaptureTraitConst};
use opencv::videoio::VideoCapture;

use opencv::videoio::CAP_ANY;
use plate_access::config::SourceConfig;
use plate_access::VisionError;
use rusted_pipe::channels::typed_write_channel::WriteChannel1;
use rusted_pipe::graph::processor::ProcessorWriter;
use rusted_pipe::graph::processor::SourceProcessor;
use rusted_pipe::DataVersion;
use rusted_pipe::RustedPipeError;
use tracing::{debug, info, warn};

use crate::utils::FpsLimiter;

enum Input {
    Camera(i32),
    File(PathBuf),
}

impl Input {
    fn open(&self) -> Result<VideoCapture, VisionError> {
        let capture = match self {
            Input::Camera(index) => VideoCapture::new(*index, CAP_ANY),
            Input::File(path) => VideoCapture::from_file(&path.to_string_lossy(), CAP_ANY),
        }
        .map_err(|e| VisionError::Source(e.to_string()))?;

        let opened = capture
            .is_opened()
            .map_err(|e| VisionError::Source(e.to_string()))?;
        if !opened {
            return Err(VisionError::Source(format!("Cannot open {}", self)));
        }
        Ok(capture)
    }
}

impl std::fmt::Display for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Input::Camera(index) => write!(f, "camera {}", index),
            Input::File(path) => write!(f, "{}", path.display()),
        }
    }
}

pub struct VideoReader {
    input: Input,
    capture: VideoCapture,
    frame_size: Size,
    fps_limiter: FpsLimiter,
    do_loop: bool,
    done_sender: Sender<bool>,
    done_receiver: Receiver<bool>,
}

impl VideoReader {
    fn open(input: Input, config: &SourceConfig, do_loop: bool) -> Result<Self, VisionError> {
        let capture = input.open()?;
        info!("Reading frames from {} at {} fps", input, config.fps);
        let (done_sender, done_receiver) = unbounded();
        Ok(Self {
            input,
            capture,
            frame_size: Size::new(config.frame_width, config.frame_height),
            fps_limiter: FpsLimiter::new(config.fps),
            do_loop,
            done_sender,
            done_receiver,
        })
    }

    pub fn camera(index: i32, config: &SourceConfig) -> Result<Self, VisionError> {
        Self::open(Input::Camera(index), config, false)
    }

    pub fn from_file(path: &Path, config: &SourceConfig) -> Result<Self, VisionError> {
        Self::open(Input::File(path.to_path_buf()), config, config.loop_video)
    }

    /// Fires once when the stream runs out of frames.
    pub fn get_done_event(&self) -> Receiver<bool> {
        self.done_receiver.clone()
    }

    fn end_of_stream(&self) -> RustedPipeError {
        info!("End of stream on {}", self.input);
        // Nobody listening is fine
        let _ = self.done_sender.send(true);
        RustedPipeError::EndOfStream()
    }

    fn grab(&mut self) -> opencv::Result<Option<Mat>> {
        let mut image = Mat::default();
        let grabbed = self.capture.read(&mut image)?;
        if !grabbed || image.empty() {
            return Ok(None);
        }
        Ok(Some(image))
    }
}

impl SourceProcessor for VideoReader {
    type OUTPUT = WriteChannel1<Mat>;
    fn handle(&mut self, mut output: ProcessorWriter<Self::OUTPUT>) -> Result<(), RustedPipeError> {
        let mut image = match self.grab() {
            Ok(image) => image,
            Err(e) => {
                warn!("Cannot read frame from {}: {}", self.input, e);
                None
            }
        };

        if image.is_none() && self.do_loop {
            debug!("Restarting {}", self.input);
            match self.input.open() {
                Ok(capture) => {
                    self.capture = capture;
                    image = self.grab().ok().flatten();
                }
                Err(e) => warn!("Cannot reopen {}: {}", self.input, e),
            }
        }

        let Some(image) = image else {
            return Err(self.end_of_stream());
        };

        let mut image_resized = Mat::default();
        if let Err(e) = resize(
            &image,
            &mut image_resized,
            self.frame_size,
            0.0,
            0.0,
            INTER_LINEAR,
        ) {
            warn!("Cannot resize frame: {}", e);
            return Ok(());
        }
        let frame_ts = DataVersion::from_now();
        debug!("Frame {}", frame_ts.timestamp_ns);
        output
            .writer
            .c1()
            .write(image_resized, &frame_ts)
            .expect("Cannot write to output buffer");

        self.fps_limiter.wait();
        Ok(())
    }
}

unsafe impl Send for VideoReader {}
unsafe impl Sync for VideoReader {}

/// Load a single colour image.
pub fn read_image(path: &Path) -> Result<Mat, VisionError> {
    let image = imread(&path.to_string_lossy(), IMREAD_COLOR)
        .map_err(|e| VisionError::Source(e.to_string()))?;
    if image.empty() {
        return Err(VisionError::Source(format!(
            "Cannot decode image {}",
            path.display()
        )));
    }
    Ok(image)
}
