//! Threshold-based cosine matching over the full face store.

use crate::types::{Embedding, FaceRecord};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Default cosine distance below which two faces are the same person.
pub const DEFAULT_DISTANCE_THRESHOLD: f64 = 0.5;

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Compares a probe embedding against every stored face record.
///
/// The scan is linear and never terminates early. A record matches when
/// its cosine distance to the probe is strictly below `threshold`.
#[derive(Debug, Clone)]
pub struct MatchEngine {
    threshold: f64,
    dimension: usize,
}

impl MatchEngine {
    pub fn new(threshold: f64, dimension: usize) -> Self {
        Self {
            threshold,
            dimension,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Fail with `DimensionMismatch` unless `len` equals the configured dimension.
    pub fn check_dimension(&self, len: usize) -> Result<(), MatchError> {
        if len != self.dimension {
            return Err(MatchError::DimensionMismatch {
                expected: self.dimension,
                actual: len,
            });
        }
        Ok(())
    }

    /// Return the distinct filenames with at least one record within threshold.
    pub fn query(
        &self,
        probe: &Embedding,
        records: &[FaceRecord],
    ) -> Result<BTreeSet<String>, MatchError> {
        self.check_dimension(probe.dim())?;

        let mut matches = BTreeSet::new();
        for record in records {
            self.check_dimension(record.embedding.len())?;
            let distance = probe.distance(&record.embedding);
            if distance < self.threshold {
                matches.insert(record.filename.clone());
            }
        }

        tracing::debug!(
            records = records.len(),
            matches = matches.len(),
            threshold = self.threshold,
            "match scan complete"
        );

        Ok(matches)
    }

    /// Smallest distance per filename, regardless of threshold.
    pub fn nearest(
        &self,
        probe: &Embedding,
        records: &[FaceRecord],
    ) -> Result<BTreeMap<String, f64>, MatchError> {
        self.check_dimension(probe.dim())?;

        let mut best: BTreeMap<String, f64> = BTreeMap::new();
        for record in records {
            self.check_dimension(record.embedding.len())?;
            let distance = probe.distance(&record.embedding);
            best.entry(record.filename.clone())
                .and_modify(|d| *d = d.min(distance))
                .or_insert(distance);
        }
        Ok(best)
    }
}

impl Default for MatchEngine {
    fn default() -> Self {
        Self::new(DEFAULT_DISTANCE_THRESHOLD, 512)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, values: Vec<f32>) -> FaceRecord {
        FaceRecord {
            filename: name.into(),
            embedding: values,
        }
    }

    #[test]
    fn test_distance_at_threshold_is_not_a_match() {
        // Orthogonal vectors: distance is exactly 1.0.
        let engine = MatchEngine::new(1.0, 2);
        let probe = Embedding::new(vec![1.0, 0.0]);
        let records = vec![record("a.jpg", vec![0.0, 1.0])];

        let matches = engine.query(&probe, &records).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_non_orthogonal_pair_at_threshold_is_not_a_match() {
        // [1,1,0] vs [1,0,1]: cosine distance is exactly 0.5.
        let engine = MatchEngine::new(0.5, 3);
        let probe = Embedding::new(vec![1.0, 1.0, 0.0]);
        let records = vec![record("boundary.jpg", vec![1.0, 0.0, 1.0])];

        assert!(engine.query(&probe, &records).unwrap().is_empty());
        let nearest = engine.nearest(&probe, &records).unwrap();
        assert_eq!(nearest["boundary.jpg"], 0.5);
    }

    #[test]
    fn test_distance_just_below_threshold_matches() {
        let engine = MatchEngine::new(1.0 + 1e-4, 2);
        let probe = Embedding::new(vec![1.0, 0.0]);
        let records = vec![record("a.jpg", vec![0.0, 1.0])];

        let matches = engine.query(&probe, &records).unwrap();
        assert!(matches.contains("a.jpg"));
    }

    #[test]
    fn test_zero_distance_with_zero_threshold_is_not_a_match() {
        let engine = MatchEngine::new(0.0, 2);
        let probe = Embedding::new(vec![1.0, 0.0]);
        let records = vec![record("a.jpg", vec![2.0, 0.0])];

        assert!(engine.query(&probe, &records).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_filenames_reported_once() {
        let engine = MatchEngine::new(0.5, 2);
        let probe = Embedding::new(vec![1.0, 0.0]);
        let records = vec![
            record("group.jpg", vec![1.0, 0.1]),
            record("group.jpg", vec![0.9, 0.0]),
            record("other.jpg", vec![0.0, 1.0]),
        ];

        let matches = engine.query(&probe, &records).unwrap();
        assert_eq!(matches.len(), 1);
        assert!(matches.contains("group.jpg"));
    }

    #[test]
    fn test_scan_visits_every_record() {
        // The only match is the last record.
        let engine = MatchEngine::new(0.5, 3);
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let records = vec![
            record("decoy1.jpg", vec![0.0, 1.0, 0.0]),
            record("decoy2.jpg", vec![0.0, 0.0, 1.0]),
            record("match.jpg", vec![1.0, 0.0, 0.0]),
        ];

        let matches = engine.query(&probe, &records).unwrap();
        assert_eq!(matches.into_iter().collect::<Vec<_>>(), vec!["match.jpg"]);
    }

    #[test]
    fn test_empty_store_yields_no_matches() {
        let engine = MatchEngine::new(0.5, 2);
        let probe = Embedding::new(vec![1.0, 0.0]);
        assert!(engine.query(&probe, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_probe_dimension_mismatch_is_fatal() {
        let engine = MatchEngine::new(0.5, 3);
        let probe = Embedding::new(vec![1.0, 0.0]);
        let err = engine.query(&probe, &[]).unwrap_err();
        assert_eq!(
            err,
            MatchError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn test_record_dimension_mismatch_is_fatal() {
        let engine = MatchEngine::new(0.5, 2);
        let probe = Embedding::new(vec![1.0, 0.0]);
        let records = vec![
            record("ok.jpg", vec![1.0, 0.0]),
            record("bad.jpg", vec![1.0, 0.0, 0.0]),
        ];

        let err = engine.query(&probe, &records).unwrap_err();
        assert_eq!(
            err,
            MatchError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn test_nearest_keeps_best_distance_per_file() {
        let engine = MatchEngine::new(0.5, 2);
        let probe = Embedding::new(vec![1.0, 0.0]);
        let records = vec![
            record("group.jpg", vec![0.0, 1.0]),
            record("group.jpg", vec![1.0, 0.0]),
        ];

        let nearest = engine.nearest(&probe, &records).unwrap();
        assert_eq!(nearest.len(), 1);
        assert!(nearest["group.jpg"].abs() < 1e-6);
    }
}
