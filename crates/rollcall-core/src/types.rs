use serde::{Deserialize, Serialize};
use std::fmt;

/// Dimensionality of every face embedding in the gallery (ArcFace w600k_r50).
pub const EMBEDDING_DIM: usize = 512;

/// Canonical name of one known person.
///
/// Built from a raw folder or display name by dropping every character that
/// is not an ASCII letter or a space, then uppercasing. Normalizing an
/// already-normalized label is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityLabel(String);

impl IdentityLabel {
    pub fn normalize(raw: &str) -> Self {
        let label: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphabetic() || *c == ' ')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        Self(label)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

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

/// Face embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Zero vectors compare as 0.0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One face returned by the detect-and-embed capability.
///
/// `embedding` is `None` when the face was located but could not be embedded
/// (e.g. the detector returned no landmarks for alignment).
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Option<Embedding>,
}

/// Square detector input size, in pixels. Larger sizes find smaller faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetSize(pub u32);

impl fmt::Display for DetSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{0}x{0}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_digits_and_punctuation() {
        let label = IdentityLabel::normalize("jane_doe-2 (cs101)");
        assert_eq!(label.as_str(), "JANEDOE CS");
    }

    #[test]
    fn test_normalize_preserves_spaces() {
        let label = IdentityLabel::normalize("Jane  Doe");
        assert_eq!(label.as_str(), "JANE  DOE");
    }

    #[test]
    fn test_normalize_idempotent() {
        for raw in ["Jane Doe", "o'brien 3rd", "ÉLODIE martin", "", "123", "  a_b  "] {
            let once = IdentityLabel::normalize(raw);
            let twice = IdentityLabel::normalize(once.as_str());
            assert_eq!(once, twice, "input {raw:?}");
        }
    }

    #[test]
    fn test_normalize_drops_non_ascii_letters() {
        assert_eq!(IdentityLabel::normalize("Zoë").as_str(), "ZO");
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_det_size_display() {
        assert_eq!(DetSize(640).to_string(), "640x640");
    }
}
