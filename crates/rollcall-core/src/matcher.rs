//! Nearest-neighbor identity matching over the gallery.
//!
//! The index is an exhaustive scan over the gallery rows. Cosine distance
//! is the primary metric; a gallery that cannot be indexed under cosine
//! (a zero-norm row) is indexed under Euclidean distance instead.
//!
//! Ties are broken by insertion order: a row replaces the current best
//! only when it is strictly nearer, so the lowest index wins.

use crate::gallery::Gallery;
use crate::types::IdentityLabel;
use ndarray::{Array2, ArrayView1, Axis};
use thiserror::Error;

/// Minimum similarity for a positive identification (exclusive).
pub const SIMILARITY_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug, PartialEq)]
pub enum MatcherError {
    #[error("gallery is empty")]
    EmptyGallery,
    #[error("{embeddings} embeddings but {labels} labels")]
    LabelMismatch { embeddings: usize, labels: usize },
    #[error("gallery row {0} is not finite")]
    NonFinite(usize),
    #[error("gallery row {0} has zero norm; cosine distance undefined")]
    ZeroNorm(usize),
    #[error("query has {actual} dimensions, index has {expected}")]
    Dimension { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Cosine,
    Euclidean,
}

/// Closest gallery row to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub label: IdentityLabel,
    pub distance: f32,
    /// `1 - distance`; for cosine this is the cosine similarity.
    pub similarity: f32,
}

/// Result of matching a probe embedding against the gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    pub neighbor: Neighbor,
}

impl MatchResult {
    /// Matched identity, if the similarity cleared the threshold.
    pub fn identity(&self) -> Option<&IdentityLabel> {
        self.matched.then_some(&self.neighbor.label)
    }
}

/// Whether `similarity` identifies the neighbor. Strictly greater than `threshold`.
pub fn is_match(similarity: f32, threshold: f32) -> bool {
    similarity > threshold
}

pub struct IdentityMatcher {
    metric: Metric,
    /// Unit-normalized rows under cosine, raw rows under Euclidean.
    rows: Array2<f32>,
    labels: Vec<IdentityLabel>,
    threshold: f32,
}

impl IdentityMatcher {
    /// Build an index with the given metric.
    pub fn build(
        embeddings: &Array2<f32>,
        labels: &[IdentityLabel],
        metric: Metric,
        threshold: f32,
    ) -> Result<Self, MatcherError> {
        let n = embeddings.nrows();
        if n == 0 {
            return Err(MatcherError::EmptyGallery);
        }
        if n != labels.len() {
            return Err(MatcherError::LabelMismatch {
                embeddings: n,
                labels: labels.len(),
            });
        }
        if let Some(i) = embeddings
            .axis_iter(Axis(0))
            .position(|row| row.iter().any(|v| !v.is_finite()))
        {
            return Err(MatcherError::NonFinite(i));
        }

        let rows = match metric {
            Metric::Euclidean => embeddings.clone(),
            Metric::Cosine => {
                let mut rows = embeddings.clone();
                for (i, mut row) in rows.axis_iter_mut(Axis(0)).enumerate() {
                    let norm = row.dot(&row).sqrt();
                    if norm <= 0.0 || !norm.is_finite() {
                        return Err(MatcherError::ZeroNorm(i));
                    }
                    row.mapv_inplace(|v| v / norm);
                }
                rows
            }
        };

        Ok(Self {
            metric,
            rows,
            labels: labels.to_vec(),
            threshold,
        })
    }

    /// Build under cosine distance, falling back to Euclidean when the
    /// gallery cannot be indexed under cosine.
    pub fn prepare(gallery: &Gallery, threshold: f32) -> Result<Self, MatcherError> {
        match Self::build(&gallery.embeddings, &gallery.labels, Metric::Cosine, threshold) {
            Ok(m) => {
                tracing::info!(faces = gallery.len(), "matcher built with cosine distance");
                Ok(m)
            }
            Err(e @ (MatcherError::ZeroNorm(_) | MatcherError::NonFinite(_))) => {
                tracing::warn!(error = %e, "cosine index failed; switching to euclidean distance");
                let m = Self::build(&gallery.embeddings, &gallery.labels, Metric::Euclidean, threshold)?;
                tracing::info!(faces = gallery.len(), "matcher built with euclidean distance");
                Ok(m)
            }
            Err(e) => Err(e),
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Nearest gallery row to `query`.
    pub fn nearest(&self, query: &[f32]) -> Result<Neighbor, MatcherError> {
        let dim = self.rows.ncols();
        if query.len() != dim {
            return Err(MatcherError::Dimension {
                expected: dim,
                actual: query.len(),
            });
        }
        let query = ArrayView1::from(query);

        let distances: Vec<f32> = match self.metric {
            Metric::Cosine => {
                let norm = query.dot(&query).sqrt();
                self.rows
                    .axis_iter(Axis(0))
                    .map(|row| {
                        let cos = if norm > 0.0 { row.dot(&query) / norm } else { 0.0 };
                        1.0 - cos
                    })
                    .collect()
            }
            Metric::Euclidean => self
                .rows
                .axis_iter(Axis(0))
                .map(|row| {
                    row.iter()
                        .zip(query.iter())
                        .map(|(a, b)| (a - b).powi(2))
                        .sum::<f32>()
                        .sqrt()
                })
                .collect(),
        };

        let mut best = 0usize;
        for (i, &d) in distances.iter().enumerate().skip(1) {
            if d < distances[best] {
                best = i;
            }
        }

        let distance = distances[best];
        Ok(Neighbor {
            index: best,
            label: self.labels[best].clone(),
            distance,
            similarity: 1.0 - distance,
        })
    }

    /// Nearest neighbor plus the threshold decision.
    pub fn identify(&self, query: &[f32]) -> Result<MatchResult, MatcherError> {
        let neighbor = self.nearest(query)?;
        Ok(MatchResult {
            matched: is_match(neighbor.similarity, self.threshold),
            neighbor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn labels(names: &[&str]) -> Vec<IdentityLabel> {
        names.iter().map(|n| IdentityLabel::normalize(n)).collect()
    }

    #[test]
    fn test_nearest_picks_most_similar() {
        let gallery = array![[0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0]];
        let m = IdentityMatcher::build(&gallery, &labels(&["a", "b", "c"]), Metric::Cosine, 0.6)
            .unwrap();

        let n = m.nearest(&[2.0, 0.1, 0.0]).unwrap();
        assert_eq!(n.index, 2);
        assert_eq!(n.label.as_str(), "C");
        assert!(n.similarity > 0.99);
    }

    #[test]
    fn test_similarity_is_one_minus_cosine_distance() {
        let gallery = array![[1.0, 0.0]];
        let m = IdentityMatcher::build(&gallery, &labels(&["a"]), Metric::Cosine, 0.6).unwrap();
        let n = m.nearest(&[0.85, (1.0f32 - 0.85 * 0.85).sqrt()]).unwrap();
        assert!((n.similarity - 0.85).abs() < 1e-5);
        assert!((n.distance - 0.15).abs() < 1e-5);
    }

    #[test]
    fn test_tie_breaks_to_lowest_index() {
        let gallery = array![[1.0, 0.0], [0.0, 1.0], [1.0, 0.0]];
        let m = IdentityMatcher::build(&gallery, &labels(&["x", "y", "z"]), Metric::Cosine, 0.6)
            .unwrap();
        let n = m.nearest(&[1.0, 1.0]).unwrap();
        assert_eq!(n.index, 0);
        assert_eq!(n.label.as_str(), "X");
    }

    #[test]
    fn test_threshold_is_strict() {
        assert!(!is_match(0.6, SIMILARITY_THRESHOLD));
        assert!(is_match(0.6000001, SIMILARITY_THRESHOLD));
        assert!(!is_match(0.4, SIMILARITY_THRESHOLD));
    }

    #[test]
    fn test_identify_below_threshold_is_unmatched() {
        let gallery = array![[1.0, 0.0]];
        let m = IdentityMatcher::build(&gallery, &labels(&["a"]), Metric::Cosine, 0.6).unwrap();
        let r = m.identify(&[0.4, (1.0f32 - 0.16).sqrt()]).unwrap();
        assert!(!r.matched);
        assert!(r.identity().is_none());
    }

    #[test]
    fn test_identify_above_threshold_is_matched() {
        let gallery = array![[1.0, 0.0]];
        let m = IdentityMatcher::build(&gallery, &labels(&["a"]), Metric::Cosine, 0.6).unwrap();
        let r = m.identify(&[1.0, 0.1]).unwrap();
        assert_eq!(r.identity().map(|l| l.as_str()), Some("A"));
    }

    #[test]
    fn test_zero_row_falls_back_to_euclidean() {
        let gallery = Gallery {
            embeddings: array![[0.0, 0.0], [1.0, 0.0]],
            labels: labels(&["zero", "one"]),
            processed: Default::default(),
        };
        let m = IdentityMatcher::prepare(&gallery, 0.6).unwrap();
        assert_eq!(m.metric(), Metric::Euclidean);

        let n = m.nearest(&[0.9, 0.0]).unwrap();
        assert_eq!(n.label.as_str(), "ONE");
        assert!((n.similarity - 0.9).abs() < 1e-5);
    }

    #[test]
    fn test_prepare_uses_cosine_when_possible() {
        let gallery = Gallery {
            embeddings: array![[1.0, 0.0]],
            labels: labels(&["a"]),
            processed: Default::default(),
        };
        assert_eq!(IdentityMatcher::prepare(&gallery, 0.6).unwrap().metric(), Metric::Cosine);
    }

    #[test]
    fn test_empty_gallery_rejected() {
        let gallery = Array2::<f32>::zeros((0, 4));
        let result = IdentityMatcher::build(&gallery, &[], Metric::Cosine, 0.6);
        assert!(matches!(result, Err(MatcherError::EmptyGallery)));
    }

    #[test]
    fn test_label_mismatch_rejected() {
        let gallery = array![[1.0, 0.0]];
        let result = IdentityMatcher::build(&gallery, &labels(&["a", "b"]), Metric::Cosine, 0.6);
        assert!(matches!(result, Err(MatcherError::LabelMismatch { .. })));
    }

    #[test]
    fn test_query_dimension_checked() {
        let gallery = array![[1.0, 0.0]];
        let m = IdentityMatcher::build(&gallery, &labels(&["a"]), Metric::Cosine, 0.6).unwrap();
        assert_eq!(
            m.nearest(&[1.0, 0.0, 0.0]),
            Err(MatcherError::Dimension { expected: 2, actual: 3 })
        );
    }
}
