//! Wires extraction, storage and matching into the `index`, `search` and
//! `stats` commands, producing one JSON response object per invocation.

use facefind_core::{
    EmbeddingProvider, FaceRecord, FaceStore, FallbackExtractor, MatchEngine, MatchError,
    StoreError,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

pub const NO_FACE_IN_SELFIE: &str = "No face detected in selfie.";

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Skipped,
}

/// The single JSON object written to stdout.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Status { status: Status, message: String },
    Matches { matches: Vec<String> },
    Stats { records: usize, photos: usize },
    Error { error: String },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serializing response: {e}"}}"#))
    }
}

/// Runs commands against one extractor and match engine.
pub struct Dispatcher<P> {
    extractor: FallbackExtractor<P>,
    engine: MatchEngine,
}

impl<P: EmbeddingProvider> Dispatcher<P> {
    pub fn new(extractor: FallbackExtractor<P>, engine: MatchEngine) -> Self {
        Self { extractor, engine }
    }

    /// Extract every face in `image` and append one record per face.
    pub fn index(&mut self, store: &Path, image: &Path) -> Result<Response, DispatchError> {
        let embeddings = self.extractor.extract(image);
        if embeddings.is_empty() {
            return Ok(Response::Status {
                status: Status::Skipped,
                message: "No faces found".into(),
            });
        }

        for embedding in &embeddings {
            self.engine.check_dimension(embedding.dim())?;
        }

        let filename = file_name(image);
        let records: Vec<FaceRecord> = embeddings
            .iter()
            .map(|e| FaceRecord::new(filename.clone(), e))
            .collect();
        FaceStore::new(store).append(&records)?;

        Ok(Response::Status {
            status: Status::Success,
            message: format!("Indexed {} faces from image", records.len()),
        })
    }

    /// Match the primary face of `image` against every stored record.
    pub fn search(&mut self, store: &Path, image: &Path) -> Result<Response, DispatchError> {
        let embeddings = self.extractor.extract(image);
        let Some(probe) = embeddings.first() else {
            return Ok(Response::error(NO_FACE_IN_SELFIE));
        };

        let store = FaceStore::new(store);
        if !store.exists() {
            tracing::info!(store = %store.path().display(), "store does not exist; no matches");
            self.engine.check_dimension(probe.dim())?;
            return Ok(Response::Matches { matches: vec![] });
        }

        let records = store.load();
        if tracing::enabled!(tracing::Level::DEBUG) {
            for (filename, distance) in self.engine.nearest(probe, &records)? {
                tracing::debug!(%filename, distance, "nearest face");
            }
        }

        let matches: BTreeSet<String> = self.engine.query(probe, &records)?;
        Ok(Response::Matches {
            matches: matches.into_iter().collect(),
        })
    }
}

/// Record and distinct photo counts. Never touches the models.
pub fn stats(store: &Path) -> Response {
    let records = FaceStore::new(store).load();
    let photos: BTreeSet<&str> = records.iter().map(|r| r.filename.as_str()).collect();
    Response::Stats {
        records: records.len(),
        photos: photos.len(),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
