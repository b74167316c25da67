//! Seam for the external face detect-and-embed capability.

use crate::types::{DetSize, DetectedFace};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("unsupported detection size {0}")]
    UnsupportedSize(DetSize),
}

/// Detects faces in an RGB image and embeds each one.
///
/// Implementations are constructed once and passed by `&mut` into the
/// gallery builder and the attendance pipeline.
pub trait FaceAnalyzer {
    /// Run detection at `det_size`, returning faces sorted by confidence.
    fn detect_and_embed(
        &mut self,
        image: &RgbImage,
        det_size: DetSize,
    ) -> Result<Vec<DetectedFace>, AnalyzerError>;
}
