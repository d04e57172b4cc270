//! YOLOv8 object detection over ONNX Runtime.
//!
//! Loads a pretrained yolov8 model, runs inference per frame, and returns
//! bounding boxes with class id + confidence for every COCO class after NMS.
//! The pipeline only distinguishes the "person" class (id 0) when deciding
//! alerts; all other classes are still detected and drawn.
//!
//! The detector sits behind the [`ObjectDetector`] trait so tests can swap in
//! a scripted implementation without a real model.

use anyhow::{Context, Result};
use fast_image_resize as fr;
use ort::session::Session;
use ort::value::Tensor;
use rayon::prelude::*;
use std::path::Path;

use crate::video::RgbFrame;

// ── Constants ────────────────────────────────────────────────────────────────

/// YOLOv8 input size (square).
const YOLO_SIZE: u32 = 640;
/// COCO class index for "person", the only class that can raise an alert.
pub const PERSON_CLASS: usize = 0;
/// Default confidence threshold for detections.
pub const DEFAULT_CONF_THRESHOLD: f32 = 0.25;
/// IoU threshold for NMS.
const IOU_THRESHOLD: f32 = 0.45;

/// COCO class table (80 classes).  Index 0 is the distinguished person class.
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Display name for a class id; ids outside the table fall back to a generic
/// label rather than panicking.
pub fn class_name(class_id: usize) -> &'static str {
    COCO_CLASSES.get(class_id).copied().unwrap_or("object")
}

// ── Public types ─────────────────────────────────────────────────────────────

/// Axis-aligned bounding box in pixel coordinates of the original frame.
/// `x1 <= x2` and `y1 <= y2` are expected but not validated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
    /// IoU (intersection over union) with another box.
    pub fn iou(&self, other: &BBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        let union = self.width() * self.height() + other.width() * other.height() - inter;
        inter / union
    }
}

/// One object localisation + classification result for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub class_id: usize,
    pub confidence: f32,
}

impl Detection {
    pub fn is_person(&self) -> bool {
        self.class_id == PERSON_CLASS
    }
}

// ── Detector capability ──────────────────────────────────────────────────────

/// Black-box detection capability: one synchronous call per frame.
pub trait ObjectDetector {
    fn detect(&mut self, frame: &RgbFrame) -> Result<Vec<Detection>>;
}

// ── YOLOv8 implementation ────────────────────────────────────────────────────

/// Wraps a YOLOv8 ONNX session.
pub struct YoloDetector {
    session: Session,
    conf_threshold: f32,
    resizer: fr::Resizer,
    resize_buf: Vec<u8>,
}

impl YoloDetector {
    /// Load a YOLOv8 ONNX model from `model_path`.
    pub fn load<P: AsRef<Path>>(model_path: P, conf_threshold: f32) -> Result<Self> {
        let session = build_ort_session(model_path.as_ref())?;
        Ok(Self {
            session,
            conf_threshold,
            resizer: fr::Resizer::new(),
            resize_buf: vec![0u8; (YOLO_SIZE * YOLO_SIZE * 3) as usize],
        })
    }

    fn preprocess(&mut self, frame: &RgbFrame) -> Result<ort::value::DynValue> {
        let src =
            fr::images::ImageRef::new(frame.width, frame.height, &frame.data, fr::PixelType::U8x3)
                .context("invalid source frame for resize")?;

        let mut dst = fr::images::Image::from_vec_u8(
            YOLO_SIZE,
            YOLO_SIZE,
            std::mem::take(&mut self.resize_buf),
            fr::PixelType::U8x3,
        )
        .context("invalid resize destination buffer")?;

        let options = fr::ResizeOptions::new()
            .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
        self.resizer
            .resize(&src, &mut dst, Some(&options))
            .context("frame downscale to model input size failed")?;

        self.resize_buf = dst.into_vec();
        let rgb = &self.resize_buf;

        // Interleaved RGB → planar NCHW float, [1, 3, 640, 640], /255.
        // One rayon task per colour plane.
        let plane_len = (YOLO_SIZE * YOLO_SIZE) as usize;
        let mut planes = vec![0f32; 3 * plane_len];
        planes
            .par_chunks_exact_mut(plane_len)
            .enumerate()
            .for_each(|(channel, plane)| {
                for (px, out) in plane.iter_mut().enumerate() {
                    *out = f32::from(rgb[px * 3 + channel]) / 255.0;
                }
            });

        let shape = [1usize, 3, YOLO_SIZE as usize, YOLO_SIZE as usize];
        Ok(Tensor::from_array((shape, planes.into_boxed_slice()))
            .context("failed to build model input tensor")?
            .into_dyn())
    }
}

impl ObjectDetector for YoloDetector {
    /// Run inference on `frame` and return detections (in original frame
    /// pixel coordinates) for all classes after NMS.
    fn detect(&mut self, frame: &RgbFrame) -> Result<Vec<Detection>> {
        let input_tensor = self.preprocess(frame)?;

        let outputs = self
            .session
            .run(ort::inputs!["images" => input_tensor])
            .context("model inference failed")?;

        // Output shape is [1, 84, 8400].
        let (_shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .context("model output is not an f32 tensor")?;

        // Rows 0..4 are cx, cy, w, h; rows 4..84 are per-class scores.  The
        // tensor is row-major, so row r of proposal p sits at r * stride + p.
        let stride = 8400usize;
        let sx = frame.width as f32 / YOLO_SIZE as f32;
        let sy = frame.height as f32 / YOLO_SIZE as f32;
        let conf_threshold = self.conf_threshold;

        let candidates: Vec<Detection> = (0..stride)
            .into_par_iter()
            .filter_map(|p| {
                let row = |r: usize| data[r * stride + p];

                let (class_id, confidence) = (0..COCO_CLASSES.len())
                    .map(|c| (c, row(4 + c)))
                    .max_by(|a, b| a.1.total_cmp(&b.1))?;
                if confidence < conf_threshold {
                    return None;
                }

                let (cx, cy) = (row(0), row(1));
                let (half_w, half_h) = (row(2) / 2.0, row(3) / 2.0);

                // Centre box from 640-space back to frame pixels, clamped.
                Some(Detection {
                    bbox: BBox {
                        x1: ((cx - half_w) * sx).max(0.0),
                        y1: ((cy - half_h) * sy).max(0.0),
                        x2: ((cx + half_w) * sx).min(frame.width as f32),
                        y2: ((cy + half_h) * sy).min(frame.height as f32),
                    },
                    class_id,
                    confidence,
                })
            })
            .collect();

        Ok(nms(candidates, IOU_THRESHOLD))
    }
}

fn build_ort_session(model_path: &Path) -> Result<Session> {
    Session::builder()
        .context("could not create ONNX Runtime session builder")?
        .with_intra_threads(num_cpus().max(1))
        .context("could not configure ONNX Runtime threading")?
        .commit_from_file(model_path)
        .with_context(|| format!("failed to load ONNX model: {}", model_path.display()))
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

// ── Non-Maximum Suppression ──────────────────────────────────────────────────

/// Greedy class-aware NMS: sort by confidence descending, suppress
/// overlapping boxes of the same class.
fn nms(mut detections: Vec<Detection>, iou_thresh: f32) -> Vec<Detection> {
    detections.sort_unstable_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        kept.push(detections[i]);
        for j in (i + 1)..detections.len() {
            if detections[i].class_id == detections[j].class_id
                && detections[i].bbox.iou(&detections[j].bbox) > iou_thresh
            {
                suppressed[j] = true;
            }
        }
    }

    kept
}
