use leptess::tesseract;
use leptess::tesseract::TessApi;
use opencv::core::Point;
use opencv::core::Rect;

use opencv::imgproc::cvt_color;

use opencv::imgproc::COLOR_BGR2GRAY;

use opencv::imgproc::filter_2d;
use opencv::prelude::Mat;

use opencv::prelude::MatTraitConst;

use opencv::prelude::MatTraitManual;
use plate_access::config::OcrConfig;
use plate_access::pipeline::read_plates;
use plate_access::{Detection, PlateRead, PlateReader, Region, VisionError};
use rusted_pipe::channels::typed_read_channel::ReadChannel2;
use rusted_pipe::channels::typed_write_channel::WriteChannel1;
use rusted_pipe::graph::processor::Processor;
use rusted_pipe::graph::processor::ProcessorWriter;
use rusted_pipe::packet::typed::ReadChannel2PacketSet;
use rusted_pipe::RustedPipeError;
use std::ffi::CString;
use tracing::{debug, info};

use super::to_rect;

pub struct DnnOcrReader {
    ocr: TessApi,
    crop_margins: [f32; 4],
    deblur: bool,
}

fn ocr_error<E: std::fmt::Debug>(context: &str) -> impl FnOnce(E) -> VisionError + '_ {
    move |e| VisionError::Ocr(format!("{}: {:?}", context, e))
}

fn c_string(value: &str) -> Result<CString, VisionError> {
    CString::new(value).map_err(ocr_error("Invalid tesseract setting"))
}

impl DnnOcrReader {
    pub fn new(config: &OcrConfig) -> Result<Self, VisionError> {
        let data_path = config.data_path.to_str().ok_or_else(|| {
            VisionError::Ocr(format!("OCR data path {:?} is not valid UTF-8", config.data_path))
        })?;
        let mut api = tesseract::TessApi::new(Some(data_path), &config.language)
            .map_err(ocr_error("Cannot initialise tesseract"))?;

        api.raw
            .set_variable(
                &c_string("tessedit_char_whitelist")?,
                &c_string(&config.char_whitelist)?,
            )
            .map_err(ocr_error("Cannot set character whitelist"))?;
        api.raw
            .set_variable(
                &c_string("tessedit_pageseg_mode")?,
                &c_string(&config.page_seg_mode.to_string())?,
            )
            .map_err(ocr_error("Cannot set page segmentation mode"))?;

        info!(
            "Tesseract ready with '{}' from {}",
            config.language, data_path
        );

        Ok(Self {
            ocr: api,
            crop_margins: config.crop_margins,
            deblur: config.deblur,
        })
    }

    /// Shrink the plate box to the character area, clamped to the image.
    fn text_area(&self, image: &Mat, rect: &Rect) -> Option<Rect> {
        let [left, top, right, bottom] = self.crop_margins;
        let x = rect.x + (rect.width as f32 * left) as i32;
        let y = rect.y + (rect.height as f32 * top) as i32;
        let width = rect.width - (rect.width as f32 * (left + right)) as i32;
        let height = rect.height - (rect.height as f32 * (top + bottom)) as i32;

        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = (x + width).min(image.cols());
        let y1 = (y + height).min(image.rows());
        if x1 - x0 < 2 || y1 - y0 < 2 {
            return None;
        }
        Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
    }

    fn reshape_plate(&self, image: &Mat, rect: Rect) -> opencv::Result<Mat> {
        let cropped = image.apply_1(rect)?;
        if self.deblur {
            let mut processed = Mat::default();
            let kernel = Mat::from_slice_2d(&[[-1, -1, -1], [-1, 9, -1], [-1, -1, -1]])?;

            filter_2d(
                &cropped,
                &mut processed,
                -1,
                &kernel,
                Point::new(-1, -1),
                0.0,
                opencv::core::BORDER_DEFAULT,
            )?;

            Ok(processed)
        } else {
            // Make it contiguous
            cropped.try_clone()
        }
    }
}

impl PlateReader<Mat> for DnnOcrReader {
    /// `frame` must be single-channel grey.
    fn read(&mut self, frame: &Mat, region: &Region) -> Result<String, VisionError> {
        let Some(area) = self.text_area(frame, &to_rect(region)) else {
            return Ok(String::new());
        };
        let mut cropped = self
            .reshape_plate(frame, area)
            .map_err(ocr_error("Cannot crop plate"))?;

        let cols = cropped.cols();
        let rows = cropped.rows();
        let bytes = cropped
            .data_bytes_mut()
            .map_err(ocr_error("Plate crop is not contiguous"))?;
        self.ocr
            .raw
            .set_image(bytes, cols, rows, 1, cols)
            .map_err(ocr_error("Cannot hand plate to tesseract"))?;
        let text = self
            .ocr
            .get_utf8_text()
            .map_err(ocr_error("Cannot decode tesseract output"))?;

        debug!(region = ?region, "OCR {:?}", text.trim());
        Ok(text.trim().to_string())
    }
}

pub fn to_grey(image: &Mat) -> opencv::Result<Mat> {
    let mut grey = Mat::default();
    cvt_color(image, &mut grey, COLOR_BGR2GRAY, 0)?;
    Ok(grey)
}

/// Reads plates straight off a colour frame.
pub struct GreyFrameReader(pub DnnOcrReader);

impl PlateReader<Mat> for GreyFrameReader {
    fn read(&mut self, frame: &Mat, region: &Region) -> Result<String, VisionError> {
        let grey = to_grey(frame).map_err(ocr_error("Cannot convert frame to grey"))?;
        self.0.read(&grey, region)
    }
}

unsafe impl Send for DnnOcrReader {}
unsafe impl Sync for DnnOcrReader {}

impl Processor for DnnOcrReader {
    type INPUT = ReadChannel2<Mat, Vec<Detection>>;
    type OUTPUT = WriteChannel1<Vec<PlateRead>>;
    fn handle(
        &mut self,
        mut input: ReadChannel2PacketSet<Mat, Vec<Detection>>,
        mut output: ProcessorWriter<Self::OUTPUT>,
    ) -> Result<(), RustedPipeError> {
        let (Some(image_packet), Some(plates)) = (input.c1_owned(), input.c2_owned()) else {
            debug!("Skipping OCR on incomplete packet set");
            return Ok(());
        };
        debug!("OCR Image {}", image_packet.version.timestamp_ns);

        let reads = match to_grey(&image_packet.data) {
            Ok(grey) => read_plates(self, &grey, plates.data),
            Err(e) => {
                tracing::warn!("Cannot convert frame to grey: {}", e);
                read_plates(self, &Mat::default(), plates.data)
            }
        };

        output
            .writer
            .c1()
            .write(reads, &image_packet.version)
            .expect("Cannot write to output buffer");

        Ok(())
    }
}
