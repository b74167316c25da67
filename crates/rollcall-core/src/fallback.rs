//! Detection retried at increasing input resolutions.
//!
//! Small or distant faces can be missed at the smallest detector input
//! size. The ladder tries each size in order and stops at the first one
//! that finds any face, so easy images only pay for one pass.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::types::{DetSize, DetectedFace};
use image::RgbImage;

/// Default detection sizes, fastest first.
pub const DEFAULT_DET_SIZES: [DetSize; 3] = [DetSize(640), DetSize(800), DetSize(1024)];

/// Ordered list of detector input sizes.
#[derive(Debug, Clone)]
pub struct DetectionLadder {
    sizes: Vec<DetSize>,
}

impl Default for DetectionLadder {
    fn default() -> Self {
        Self {
            sizes: DEFAULT_DET_SIZES.to_vec(),
        }
    }
}

impl DetectionLadder {
    /// Build a ladder from the given sizes, sorted ascending and de-duplicated.
    /// An empty list yields the default ladder.
    pub fn new(mut sizes: Vec<DetSize>) -> Self {
        if sizes.is_empty() {
            return Self::default();
        }
        sizes.sort_by_key(|s| s.0);
        sizes.dedup();
        Self { sizes }
    }

    pub fn sizes(&self) -> &[DetSize] {
        &self.sizes
    }

    /// Return the faces from the first size that detects at least one,
    /// or an empty list when every size comes back empty.
    ///
    /// An analyzer error at any rung aborts the ladder for this image.
    pub fn detect<A: FaceAnalyzer + ?Sized>(
        &self,
        analyzer: &mut A,
        image: &RgbImage,
    ) -> Result<Vec<DetectedFace>, AnalyzerError> {
        for &size in &self.sizes {
            tracing::debug!(det_size = %size, "trying detection size");
            let faces = analyzer.detect_and_embed(image, size)?;
            if !faces.is_empty() {
                tracing::info!(det_size = %size, count = faces.len(), "faces detected");
                return Ok(faces);
            }
            tracing::debug!(det_size = %size, "no faces at this size, trying next");
        }

        tracing::warn!(
            sizes = ?self.sizes.iter().map(|s| s.0).collect::<Vec<_>>(),
            "no faces detected at any detection size"
        );
        Ok(Vec::new())
    }
}
