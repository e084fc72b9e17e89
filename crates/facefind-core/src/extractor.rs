//! Multi-strategy face embedding extraction.
//!
//! Detectors disagree on hard images (extreme angles, occlusion, low
//! resolution). The extractor walks an ordered plan from strict to
//! permissive and returns the first strategy that yields any embedding.

use crate::detector::DetectorBackend;
use crate::provider::{DetectionMode, EmbeddingProvider, ExtractionRequest, ProviderError};
use crate::types::Embedding;
use std::path::Path;

/// A named step in the extraction plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategy {
    pub name: String,
    pub request: ExtractionRequest,
}

impl Strategy {
    fn new(name: String, detection: DetectionMode) -> Self {
        Self {
            name,
            request: ExtractionRequest {
                detection,
                align: true,
            },
        }
    }
}

/// Build the escalation plan for a detector priority list.
///
/// 1. enforced detection with each backend, in priority order
/// 2. best-effort detection with the last (most permissive) backend
/// 3. detection skipped entirely
pub fn escalation_plan(priority: &[DetectorBackend]) -> Vec<Strategy> {
    let mut plan: Vec<Strategy> = priority
        .iter()
        .map(|&backend| Strategy::new(backend.name().to_string(), DetectionMode::Enforced(backend)))
        .collect();

    if let Some(&last) = priority.last() {
        plan.push(Strategy::new(
            format!("{}+best-effort", last.name()),
            DetectionMode::BestEffort(last),
        ));
    }
    plan.push(Strategy::new("skip".to_string(), DetectionMode::Skip));
    plan
}

/// Drives an [`EmbeddingProvider`] through the escalation plan.
pub struct FallbackExtractor<P> {
    provider: P,
    plan: Vec<Strategy>,
}

impl<P: EmbeddingProvider> FallbackExtractor<P> {
    pub fn new(provider: P, detector_priority: &[DetectorBackend]) -> Self {
        Self::with_plan(provider, escalation_plan(detector_priority))
    }

    pub fn with_plan(provider: P, plan: Vec<Strategy>) -> Self {
        Self { provider, plan }
    }

    pub fn into_provider(self) -> P {
        self.provider
    }

    /// Extract every face embedding from `image`.
    ///
    /// Provider errors are absorbed; an empty result means no face was found
    /// by any strategy. An undecodable image ends the plan at once.
    pub fn extract(&mut self, image: &Path) -> Vec<Embedding> {
        for strategy in &self.plan {
            match self.provider.represent(image, &strategy.request) {
                Ok(embeddings) if !embeddings.is_empty() => {
                    tracing::info!(
                        strategy = %strategy.name,
                        faces = embeddings.len(),
                        image = %image.display(),
                        "embeddings extracted"
                    );
                    return embeddings;
                }
                Ok(_) => {
                    tracing::debug!(strategy = %strategy.name, "strategy produced no embeddings");
                }
                Err(e @ ProviderError::ImageDecode { .. }) => {
                    tracing::warn!(strategy = %strategy.name, error = %e, "image unreadable; skipping remaining strategies");
                    return Vec::new();
                }
                Err(e) => {
                    tracing::debug!(strategy = %strategy.name, error = %e, "strategy failed");
                }
            }
        }

        tracing::info!(image = %image.display(), "no face found by any strategy");
        Vec::new()
    }
}
