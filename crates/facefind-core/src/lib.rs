//! facefind-core: find the indexed photos a selfie's face appears in.
//!
//! Embeddings come from SCRFD detection and ArcFace recognition via ONNX
//! Runtime, driven through a strict-to-permissive fallback plan. Records
//! live in an append-only JSON store and are matched by cosine distance.

pub mod alignment;
pub mod detector;
pub mod extractor;
pub mod matcher;
pub mod onnx;
pub mod provider;
pub mod recognizer;
pub mod store;
pub mod types;

pub use detector::DetectorBackend;
pub use extractor::{escalation_plan, FallbackExtractor, Strategy};
pub use matcher::{MatchEngine, MatchError};
pub use onnx::{DetectionThresholds, OnnxProvider};
pub use provider::{DetectionMode, EmbeddingProvider, ExtractionRequest, ProviderError};
pub use store::{FaceStore, StoreError};
pub use types::{BoundingBox, Embedding, FaceRecord};

/// Default directory for ONNX model files: `$XDG_DATA_HOME/facefind/models`.
pub fn default_model_dir() -> std::path::PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        })
        .join("facefind/models")
}
