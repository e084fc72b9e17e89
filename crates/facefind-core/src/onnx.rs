//! ONNX Runtime implementation of [`EmbeddingProvider`].

use crate::alignment;
use crate::detector::{DetectorBackend, FaceDetector, DEFAULT_CONFIDENCE, RELAXED_CONFIDENCE};
use crate::provider::{DetectionMode, EmbeddingProvider, ExtractionRequest, ProviderError};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Confidence thresholds used by the two detection modes.
#[derive(Debug, Clone, Copy)]
pub struct DetectionThresholds {
    pub enforced: f32,
    pub best_effort: f32,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            enforced: DEFAULT_CONFIDENCE,
            best_effort: RELAXED_CONFIDENCE,
        }
    }
}

/// SCRFD detection + ArcFace recognition.
///
/// The recognizer is loaded up front. Detectors are loaded the first time a
/// strategy asks for them, so a missing detector model only fails that strategy.
pub struct OnnxProvider {
    model_dir: PathBuf,
    thresholds: DetectionThresholds,
    recognizer: FaceRecognizer,
    detectors: HashMap<DetectorBackend, FaceDetector>,
    decoded: Option<(PathBuf, Rc<RgbImage>)>,
}

impl OnnxProvider {
    pub fn load(
        model_dir: impl Into<PathBuf>,
        thresholds: DetectionThresholds,
    ) -> Result<Self, RecognizerError> {
        let model_dir = model_dir.into();
        let recognizer = FaceRecognizer::load(&model_dir)?;
        tracing::info!(model_dir = %model_dir.display(), "ArcFace recognizer loaded");

        Ok(Self {
            model_dir,
            thresholds,
            recognizer,
            detectors: HashMap::new(),
            decoded: None,
        })
    }

    fn detector(&mut self, backend: DetectorBackend) -> Result<&mut FaceDetector, ProviderError> {
        match self.detectors.entry(backend) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => {
                let detector = FaceDetector::load(&self.model_dir, backend)?;
                tracing::info!(backend = %backend, "detector loaded");
                Ok(slot.insert(detector))
            }
        }
    }

    /// Decode `path`, reusing the previous decode when the path repeats.
    fn load_image(&mut self, path: &Path) -> Result<Rc<RgbImage>, ProviderError> {
        if let Some((cached, image)) = &self.decoded {
            if cached == path {
                return Ok(Rc::clone(image));
            }
        }

        let image = image::open(path)
            .map_err(|e| ProviderError::ImageDecode {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
            .to_rgb8();
        let image = Rc::new(image);
        tracing::debug!(
            path = %path.display(),
            width = image.width(),
            height = image.height(),
            "image decoded"
        );

        self.decoded = Some((path.to_path_buf(), Rc::clone(&image)));
        Ok(image)
    }

    fn embed_faces(
        &mut self,
        image: &RgbImage,
        faces: &[BoundingBox],
        align: bool,
    ) -> Result<Vec<Embedding>, ProviderError> {
        let mut embeddings = Vec::with_capacity(faces.len());
        for face in faces {
            let crop = match (align, face.landmarks.as_ref()) {
                (true, Some(landmarks)) => alignment::align_face(image, landmarks),
                _ => match alignment::crop_face(image, face) {
                    Some(crop) => crop,
                    None => continue,
                },
            };
            embeddings.push(self.recognizer.extract(&crop)?);
        }
        Ok(embeddings)
    }
}

impl EmbeddingProvider for OnnxProvider {
    fn represent(
        &mut self,
        image_path: &Path,
        request: &ExtractionRequest,
    ) -> Result<Vec<Embedding>, ProviderError> {
        let image = self.load_image(image_path)?;

        let (backend, confidence, enforce) = match request.detection {
            DetectionMode::Enforced(b) => (b, self.thresholds.enforced, true),
            DetectionMode::BestEffort(b) => (b, self.thresholds.best_effort, false),
            DetectionMode::Skip => {
                let face = alignment::whole_image(&image);
                return Ok(vec![self.recognizer.extract(&face)?]);
            }
        };

        let faces = self.detector(backend)?.detect(&image, confidence)?;
        if faces.is_empty() {
            if enforce {
                return Err(ProviderError::NoFaceDetected);
            }
            tracing::debug!(backend = %backend, "no face at relaxed confidence; using whole image");
            let face = alignment::whole_image(&image);
            return Ok(vec![self.recognizer.extract(&face)?]);
        }

        self.embed_faces(&image, &faces, request.align)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_without_recognizer_model_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = OnnxProvider::load(dir.path(), DetectionThresholds::default());
        assert!(matches!(result, Err(RecognizerError::ModelNotFound(p)) if p.ends_with("w600k_r50.onnx")));
    }

    #[test]
    fn test_default_thresholds_relax_for_best_effort() {
        let t = DetectionThresholds::default();
        assert!(t.best_effort < t.enforced);
    }
}
