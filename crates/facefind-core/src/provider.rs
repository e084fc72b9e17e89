//! The embedding capability the fallback extractor drives.

use crate::detector::{DetectorBackend, DetectorError};
use crate::recognizer::RecognizerError;
use crate::types::Embedding;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("cannot decode image {path}: {reason}")]
    ImageDecode { path: String, reason: String },
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("no face detected")]
    NoFaceDetected,
}

/// How faces are located before embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
    /// Fail with `NoFaceDetected` unless the backend confidently finds a face.
    Enforced(DetectorBackend),
    /// Accept low-confidence detections; fall back to the whole image.
    BestEffort(DetectorBackend),
    /// Treat the whole image as the face region.
    Skip,
}

/// One call into an [`EmbeddingProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub detection: DetectionMode,
    /// Rotate and scale each face onto the canonical landmark template first.
    pub align: bool,
}

/// Produces face embeddings for an image.
///
/// Returned embeddings are ordered by detection confidence, most confident first.
pub trait EmbeddingProvider {
    fn represent(
        &mut self,
        image: &Path,
        request: &ExtractionRequest,
    ) -> Result<Vec<Embedding>, ProviderError>;
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for &mut P {
    fn represent(
        &mut self,
        image: &Path,
        request: &ExtractionRequest,
    ) -> Result<Vec<Embedding>, ProviderError> {
        (**self).represent(image, request)
    }
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<P> {
    fn represent(
        &mut self,
        image: &Path,
        request: &ExtractionRequest,
    ) -> Result<Vec<Embedding>, ProviderError> {
        (**self).represent(image, request)
    }
}
