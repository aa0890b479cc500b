use opencv::core::Rect;
use opencv::core::Scalar;
use opencv::core::Size;
use opencv::core::Vector;

use opencv::core::CV_32F;
use opencv::dnn;
use opencv::dnn::blob_from_image;
use opencv::dnn::nms_boxes;

use opencv::dnn::Net;
use opencv::dnn::DNN_BACKEND_CUDA;
use opencv::dnn::DNN_BACKEND_OPENCV;

use opencv::dnn::DNN_TARGET_CPU;
use opencv::dnn::DNN_TARGET_CUDA;

use opencv::prelude::Mat;

use opencv::prelude::MatTraitConst;

use opencv::prelude::NetTrait;
use opencv::prelude::NetTraitConst;
use plate_access::config::{DetectorConfig, ModelFamily};
use plate_access::{Detection, PlateDetector, VisionError};
use rusted_pipe::channels::read_channel::InputGenerator;
use rusted_pipe::channels::typed_read_channel::ReadChannel1;
use rusted_pipe::channels::typed_write_channel::WriteChannel1;
use rusted_pipe::graph::processor::Processor;
use rusted_pipe::graph::processor::ProcessorWriter;
use rusted_pipe::RustedPipeError;
use tracing::{debug, info, warn};

use super::to_region;

pub struct ObjectDetector {
    classifier: Net,
    input_size: i32,
    nms_threshold: f32,
    post_processor: Box<dyn YoloProcessor>,
}

/// Candidate boxes and scores, before non-maximum suppression.
#[derive(Default)]
struct Candidates {
    boxes: Vector<Rect>,
    scores: Vector<f32>,
}

trait YoloProcessor {
    fn candidates(&self, img_rows: i32, img_cols: i32, outputs: &Vector<Mat>)
        -> opencv::Result<Candidates>;

    fn score_threshold(&self) -> f32;
}

/// Grid cells over the three detection strides of a square input.
fn grid_cells(input_size: i32) -> i32 {
    [8, 16, 32]
        .iter()
        .map(|stride| (input_size / stride) * (input_size / stride))
        .sum()
}

/// YOLOv5 export: `[1, anchors, 5 + classes]`, three anchors per cell.
struct YoloProcessorV5 {
    input_size: i32,
    threshold: f32,
}

impl YoloProcessor for YoloProcessorV5 {
    fn candidates(
        &self,
        img_rows: i32,
        img_cols: i32,
        outputs: &Vector<Mat>,
    ) -> opencv::Result<Candidates> {
        let mut candidates = Candidates::default();

        let x_factor = img_cols as f32 / self.input_size as f32;
        let y_factor = img_rows as f32 / self.input_size as f32;

        for data in outputs {
            for j in 0..grid_cells(self.input_size) * 3 {
                let objectness: f32 = *data.at_3d(0, j, 4)?;
                if objectness < self.threshold {
                    continue;
                }
                // single-class plate model
                let class_score: f32 = *data.at_3d(0, j, 5)?;
                let score = objectness * class_score;
                if score >= self.threshold {
                    let cx: f32 = *data.at_3d(0, j, 0)?;
                    let cy: f32 = *data.at_3d(0, j, 1)?;
                    let w: f32 = *data.at_3d(0, j, 2)?;
                    let h: f32 = *data.at_3d(0, j, 3)?;
                    let left = (cx - 0.5 * w) * x_factor;
                    let top = (cy - 0.5 * h) * y_factor;
                    let width = w * x_factor;
                    let height = h * y_factor;

                    candidates.scores.push(score);
                    candidates.boxes.push(Rect::new(
                        left as i32,
                        top as i32,
                        width as i32,
                        height as i32,
                    ));
                }
            }
        }

        Ok(candidates)
    }

    fn score_threshold(&self) -> f32 {
        self.threshold
    }
}

/// YOLOv8 export: `[1, 4 + classes, anchors]`, anchor-free, no objectness.
struct YoloProcessorV8 {
    input_size: i32,
    threshold: f32,
}

impl YoloProcessor for YoloProcessorV8 {
    fn candidates(
        &self,
        img_rows: i32,
        img_cols: i32,
        outputs: &Vector<Mat>,
    ) -> opencv::Result<Candidates> {
        let mut candidates = Candidates::default();

        let x_factor = img_cols as f32 / self.input_size as f32;
        let y_factor = img_rows as f32 / self.input_size as f32;

        for data in outputs {
            for j in 0..grid_cells(self.input_size) {
                // single-class plate model
                let score: f32 = *data.at_3d(0, 4, j)?;
                if score >= self.threshold {
                    let cx: f32 = *data.at_3d(0, 0, j)?;
                    let cy: f32 = *data.at_3d(0, 1, j)?;
                    let w: f32 = *data.at_3d(0, 2, j)?;
                    let h: f32 = *data.at_3d(0, 3, j)?;

                    candidates.scores.push(score);
                    candidates.boxes.push(Rect::new(
                        ((cx - 0.5 * w) * x_factor) as i32,
                        ((cy - 0.5 * h) * y_factor) as i32,
                        (w * x_factor) as i32,
                        (h * y_factor) as i32,
                    ));
                }
            }
        }

        Ok(candidates)
    }

    fn score_threshold(&self) -> f32 {
        self.threshold
    }
}

impl ObjectDetector {
    pub fn plate_detector(config: &DetectorConfig) -> Result<Self, VisionError> {
        let model_path = config.model_path.to_str().ok_or_else(|| {
            VisionError::Detector(format!("Model path {:?} is not valid UTF-8", config.model_path))
        })?;
        if !config.model_path.exists() {
            return Err(VisionError::Detector(format!(
                "Plate model not found at {}",
                model_path
            )));
        }

        let mut classifier = dnn::read_net_from_onnx(model_path)
            .map_err(|e| VisionError::Detector(format!("Cannot load {}: {}", model_path, e)))?;

        let backend = if config.use_gpu {
            classifier
                .set_preferable_backend(DNN_BACKEND_CUDA)
                .and_then(|_| classifier.set_preferable_target(DNN_TARGET_CUDA))
        } else {
            classifier
                .set_preferable_backend(DNN_BACKEND_OPENCV)
                .and_then(|_| classifier.set_preferable_target(DNN_TARGET_CPU))
        };
        backend.map_err(|e| VisionError::Detector(e.to_string()))?;

        let post_processor: Box<dyn YoloProcessor> = match config.model_family {
            ModelFamily::Yolov5 => Box::new(YoloProcessorV5 {
                input_size: config.input_size,
                threshold: config.confidence_threshold,
            }),
            ModelFamily::Yolov8 => Box::new(YoloProcessorV8 {
                input_size: config.input_size,
                threshold: config.confidence_threshold,
            }),
        };

        info!(
            "Loaded {:?} plate model from {} (input {}px, gpu: {})",
            config.model_family, model_path, config.input_size, config.use_gpu
        );

        Ok(ObjectDetector {
            classifier,
            input_size: config.input_size,
            nms_threshold: config.nms_threshold,
            post_processor,
        })
    }

    fn infer(&mut self, image: &Mat) -> opencv::Result<Vec<Detection>> {
        let mut blob = blob_from_image(
            image,
            1.0 / 255.0,
            Size::new(self.input_size, self.input_size),
            Scalar::default(),
            true,
            false,
            CV_32F,
        )?;

        // Set the input of the network
        self.classifier
            .set_input(&mut blob, "", 1.0, Scalar::default())?;

        let output_names = self.classifier.get_unconnected_out_layers_names()?;
        let mut output_values = Vector::<Mat>::default();
        self.classifier.forward(&mut output_values, &output_names)?;

        let candidates =
            self.post_processor
                .candidates(image.rows(), image.cols(), &output_values)?;

        let mut indices = Vector::<i32>::default();
        nms_boxes(
            &candidates.boxes,
            &candidates.scores,
            self.post_processor.score_threshold(),
            self.nms_threshold,
            &mut indices,
            1.0,
            0,
        )?;

        let mut detections = Vec::with_capacity(indices.len());
        for i in indices {
            let rect = candidates.boxes.get(i as usize)?;
            detections.push(Detection {
                region: to_region(&rect),
                confidence: candidates.scores.get(i as usize)?,
            });
        }
        Ok(detections)
    }
}

impl PlateDetector<Mat> for ObjectDetector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<Detection>, VisionError> {
        self.infer(frame)
            .map_err(|e| VisionError::Detector(e.to_string()))
    }
}

unsafe impl Send for ObjectDetector {}
unsafe impl Sync for ObjectDetector {}

impl Processor for ObjectDetector {
    type OUTPUT = WriteChannel1<Vec<Detection>>;
    type INPUT = ReadChannel1<Mat>;
    fn handle(
        &mut self,
        input: <Self::INPUT as InputGenerator>::INPUT,
        mut output: ProcessorWriter<Self::OUTPUT>,
    ) -> Result<(), RustedPipeError> {
        let Some(image_packet) = input.c1() else {
            return Ok(());
        };
        debug!("Plate detection {}", image_packet.version.timestamp_ns);

        let detections = match self.detect(&image_packet.data) {
            Ok(detections) => detections,
            Err(e) => {
                warn!("Plate detection failed on frame {}: {}", image_packet.version.timestamp_ns, e);
                Vec::new()
            }
        };

        output
            .writer
            .c1()
            .write(detections, &image_packet.version)
            .expect("Cannot write to output buffer");
        Ok(())
    }
}
