use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use image::RgbImage;
use rollcall_core::{AnalyzerError, DetSize, DetectedFace, FaceAnalyzer};
use std::path::{Path, PathBuf};

/// SCRFD detection model file name inside the model directory.
pub const DETECTOR_MODEL: &str = "det_10g.onnx";
/// ArcFace recognition model file name inside the model directory.
pub const RECOGNIZER_MODEL: &str = "w600k_r50.onnx";

impl From<DetectorError> for AnalyzerError {
    fn from(e: DetectorError) -> Self {
        match e {
            DetectorError::ModelNotFound(path) => AnalyzerError::ModelNotFound(path),
            other => AnalyzerError::InferenceFailed(other.to_string()),
        }
    }
}

impl From<RecognizerError> for AnalyzerError {
    fn from(e: RecognizerError) -> Self {
        match e {
            RecognizerError::ModelNotFound(path) => AnalyzerError::ModelNotFound(path),
            other => AnalyzerError::InferenceFailed(other.to_string()),
        }
    }
}

/// Detect-and-embed backed by SCRFD + ArcFace ONNX sessions.
///
/// Both sessions are loaded once; every detection size reuses them.
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceAnalyzer {
    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, AnalyzerError> {
        let detector = FaceDetector::load(&model_path(model_dir, DETECTOR_MODEL))?;
        let recognizer = FaceRecognizer::load(&model_path(model_dir, RECOGNIZER_MODEL))?;
        tracing::info!(dir = %model_dir.display(), "face analyzer ready");
        Ok(Self { detector, recognizer })
    }
}

fn model_path(dir: &Path, file: &str) -> PathBuf {
    dir.join(file)
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn detect_and_embed(
        &mut self,
        image: &RgbImage,
        det_size: DetSize,
    ) -> Result<Vec<DetectedFace>, AnalyzerError> {
        let boxes = self.detector.detect(image, det_size.0 as usize).map_err(|e| match e {
            DetectorError::InvalidInputSize(_) => AnalyzerError::UnsupportedSize(det_size),
            other => other.into(),
        })?;

        let faces = boxes
            .into_iter()
            .map(|bbox| {
                let embedding = match self.recognizer.extract(image, &bbox) {
                    Ok(e) => Some(e),
                    Err(e) => {
                        tracing::warn!(error = %e, confidence = bbox.confidence, "face not embedded");
                        None
                    }
                };
                DetectedFace { bbox, embedding }
            })
            .collect();

        Ok(faces)
    }
}
