use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace w600k_r50).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Build an embedding from raw model output, scaled to unit length.
    ///
    /// A zero vector is kept as-is.
    pub fn l2_normalized(raw: Vec<f32>) -> Self {
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity against another vector of the same length.
    ///
    /// Returns a value in [-1, 1]. A zero-norm operand yields 0.0.
    /// Callers are responsible for checking dimensions; extra trailing
    /// components of the longer vector are ignored.
    ///
    /// Accumulates in f64 so a pair exactly on a distance threshold stays
    /// on it instead of rounding below.
    pub fn similarity(&self, other: &[f32]) -> f64 {
        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;

        for (&a, &b) in self.values.iter().zip(other.iter()) {
            let (a, b) = (f64::from(a), f64::from(b));
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = (norm_a * norm_b).sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Cosine distance `1 - similarity`, in [0, 2].
    pub fn distance(&self, other: &[f32]) -> f64 {
        1.0 - self.similarity(other)
    }
}

/// One detected face from one indexed photo.
///
/// Serialized as `{"filename": ..., "embedding": [...]}`. Group photos
/// produce several records sharing a filename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub filename: String,
    pub embedding: Vec<f32>,
}

impl FaceRecord {
    pub fn new(filename: impl Into<String>, embedding: &Embedding) -> Self {
        Self {
            filename: filename.into(),
            embedding: embedding.values.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        assert!(a.similarity(&[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_distance_opposite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        assert!((a.distance(&[-1.0, 0.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_ignores_magnitude() {
        let a = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.distance(&[2.0, 0.0]), 0.0);
    }

    #[test]
    fn test_distance_exact_for_non_orthogonal_pair() {
        // cos = 1 / (sqrt(2) * sqrt(2)) = 0.5 exactly.
        let a = Embedding::new(vec![1.0, 1.0, 0.0]);
        assert_eq!(a.distance(&[1.0, 0.0, 1.0]), 0.5);
    }

    #[test]
    fn test_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        assert_eq!(a.similarity(&[1.0, 0.0]), 0.0);
        assert_eq!(a.distance(&[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_l2_normalized_unit_length() {
        let e = Embedding::l2_normalized(vec![3.0, 4.0]);
        assert!((e.values[0] - 0.6).abs() < 1e-6);
        assert!((e.values[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalized_zero_vector_untouched() {
        let e = Embedding::l2_normalized(vec![0.0, 0.0, 0.0]);
        assert_eq!(e.values, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_face_record_json_shape() {
        let record = FaceRecord::new("group.jpg", &Embedding::new(vec![0.5, -0.25]));
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"filename":"group.jpg","embedding":[0.5,-0.25]}"#);
    }
}
