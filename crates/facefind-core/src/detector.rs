//! SCRFD face detectors via ONNX Runtime.
//!
//! All supported backends are SCRFD exports of different capacity. They share
//! the 3-stride anchor-free output layout, so one decoder serves them all.

use crate::types::BoundingBox;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Default confidence for enforced detection.
pub const DEFAULT_CONFIDENCE: f32 = 0.5;
/// Default confidence for best-effort detection.
pub const RELAXED_CONFIDENCE: f32 = 0.2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("unknown detector backend: {0}")]
    UnknownBackend(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Detector model variants, most accurate first.
///
/// All three are SCRFD exports of different sizes; any face detector that
/// yields boxes and five landmarks can take a slot in the priority list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetectorBackend {
    #[serde(rename = "scrfd_10g")]
    Scrfd10g,
    #[serde(rename = "scrfd_2.5g")]
    Scrfd2_5g,
    #[serde(rename = "scrfd_500m")]
    Scrfd500m,
}

impl DetectorBackend {
    pub const ALL: [DetectorBackend; 3] = [Self::Scrfd10g, Self::Scrfd2_5g, Self::Scrfd500m];
    pub const DEFAULT_PRIORITY: [DetectorBackend; 3] = Self::ALL;

    pub fn name(self) -> &'static str {
        match self {
            Self::Scrfd10g => "scrfd_10g",
            Self::Scrfd2_5g => "scrfd_2.5g",
            Self::Scrfd500m => "scrfd_500m",
        }
    }

    /// File name of the ONNX model inside the model directory.
    pub fn model_file(self) -> &'static str {
        match self {
            Self::Scrfd10g => "det_10g.onnx",
            Self::Scrfd2_5g => "det_2.5g.onnx",
            Self::Scrfd500m => "det_500m.onnx",
        }
    }
}

impl fmt::Display for DetectorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DetectorBackend {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|b| b.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| DetectorError::UnknownBackend(wanted.to_string()))
    }
}

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl LetterboxInfo {
    fn unletterbox(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// Raw per-stride tensors, borrowed from the session outputs.
struct StrideOutputs<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    backend: DetectorBackend,
    /// Per-stride output indices [(score, bbox, kps)] for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the model for `backend` from `model_dir`.
    pub fn load(model_dir: &Path, backend: DetectorBackend) -> Result<Self, DetectorError> {
        let model_path = model_dir.join(backend.model_file());
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(&model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::debug!(
            backend = %backend,
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "{backend} requires 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        Ok(Self {
            session,
            backend,
            stride_indices: discover_output_indices(&output_names),
        })
    }

    /// Detect faces scoring above `confidence`, sorted most confident first.
    pub fn detect(
        &mut self,
        image: &RgbImage,
        confidence: f32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };

            let tensors = StrideOutputs {
                scores: extract(score_idx, "scores")?,
                bboxes: extract(bbox_idx, "bboxes")?,
                kps: extract(kps_idx, "kps")?,
            };
            candidates.extend(decode_stride(&tensors, stride, &letterbox, confidence));
        }

        let faces = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::debug!(backend = %self.backend, faces = faces.len(), confidence, "detection complete");
        Ok(faces)
    }
}

/// Letterbox an RGB image into the 640x640 NCHW tensor SCRFD expects.
fn preprocess(image: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = (image.width() as f32, image.height() as f32);
    let scale = (SCRFD_INPUT_SIZE as f32 / width).min(SCRFD_INPUT_SIZE as f32 / height);

    let new_w = ((width * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let new_h = ((height * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let pad_x = (SCRFD_INPUT_SIZE as u32 - new_w) / 2;
    let pad_y = (SCRFD_INPUT_SIZE as u32 - new_h) / 2;

    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    // Padding is left at zero, which is what SCRFD_MEAN normalizes to.
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + pad_x) as usize;
        let ty = (y + pad_y) as usize;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    let letterbox = LetterboxInfo {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    };
    (tensor, letterbox)
}

/// Map SCRFD output tensors to stride slots.
///
/// Named exports ("score_8", "bbox_16", "kps_32", ...) are matched by name.
/// Anything else uses the standard positional layout:
///   [0-2] = scores, [3-5] = bboxes, [6-8] = kps (strides 8, 16, 32)
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let mut indices = [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        match (find("score", stride), find("bbox", stride), find("kps", stride)) {
            (Some(s), Some(b), Some(k)) => indices[slot] = (s, b, k),
            _ => {
                tracing::debug!(?names, "SCRFD output names not recognized, using positional mapping");
                return [(0, 3, 6), (1, 4, 7), (2, 5, 8)];
            }
        }
    }
    indices
}

/// Decode detections for a single stride level back into original image space.
fn decode_stride(
    tensors: &StrideOutputs<'_>,
    stride: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = tensors.scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }

        let Some(offsets) = tensors.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid) as f32 * step;
        let anchor_y = (cell / grid) as f32 * step;

        let (x1, y1) = letterbox.unletterbox(anchor_x - offsets[0] * step, anchor_y - offsets[1] * step);
        let (x2, y2) = letterbox.unletterbox(anchor_x + offsets[2] * step, anchor_y + offsets[3] * step);

        let landmarks = tensors.kps.get(idx * 10..idx * 10 + 10).map(|kps| {
            std::array::from_fn(|i| {
                letterbox.unletterbox(anchor_x + kps[i * 2] * step, anchor_y + kps[i * 2 + 1] * step)
            })
        });

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Greedy non-maximum suppression; output is sorted by confidence.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for candidate in detections {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let inter_w = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let inter_h = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter_area = inter_w * inter_h;
    let union_area = a.width * a.height + b.width * b.height - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
