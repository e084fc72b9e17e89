//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional face embeddings from 112×112 RGB face crops,
//! using the w600k_r50 ArcFace model.

use crate::alignment::ALIGNED_SIZE;
use crate::types::Embedding;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// ArcFace normalization differs from SCRFD (std 127.5, not 128.0).
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
pub const ARCFACE_EMBEDDING_DIM: usize = 512;
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}; download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face crop must be {expected}x{expected}, got {width}x{height}")]
    BadCropSize { expected: u32, width: u32, height: u32 },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace model from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, RecognizerError> {
        let model_path = model_dir.join(ARCFACE_MODEL_FILE);
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(&model_path)?;

        tracing::debug!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Embed a 112×112 face crop; the result is L2-normalized.
    pub fn extract(&mut self, face: &RgbImage) -> Result<Embedding, RecognizerError> {
        let input = preprocess(face)?;
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::l2_normalized(raw.to_vec()))
    }
}

/// Convert an RGB crop into a normalized NCHW float tensor.
fn preprocess(face: &RgbImage) -> Result<Array4<f32>, RecognizerError> {
    if face.dimensions() != (ALIGNED_SIZE, ALIGNED_SIZE) {
        return Err(RecognizerError::BadCropSize {
            expected: ALIGNED_SIZE,
            width: face.width(),
            height: face.height(),
        });
    }

    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in face.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
        }
    }
    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_preprocess_output_shape() {
        let face = RgbImage::from_pixel(112, 112, Rgb([128, 128, 128]));
        let tensor = preprocess(&face).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_preprocess_normalization_per_channel() {
        let face = RgbImage::from_pixel(112, 112, Rgb([255, 128, 0]));
        let tensor = preprocess(&face).unwrap();
        assert!((tensor[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 5]] - (128.0 - ARCFACE_MEAN) / ARCFACE_STD).abs() < 1e-6);
        assert!((tensor[[0, 2, 5, 5]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_rejects_wrong_size() {
        let face = RgbImage::new(100, 112);
        assert!(matches!(
            preprocess(&face),
            Err(RecognizerError::BadCropSize { width: 100, height: 112, .. })
        ));
    }

    #[test]
    fn test_load_missing_model() {
        let dir = std::env::temp_dir().join("facefind-no-such-model-dir");
        assert!(matches!(
            FaceRecognizer::load(&dir),
            Err(RecognizerError::ModelNotFound(_))
        ));
    }
}
