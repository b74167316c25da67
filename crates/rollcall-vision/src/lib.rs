//! rollcall-vision: Face detection and recognition engine.
//!
//! Uses SCRFD for face detection and ArcFace for face recognition,
//! both running via ONNX Runtime for CPU inference, exposed through
//! [`rollcall_core::FaceAnalyzer`].

pub mod alignment;
pub mod analyzer;
pub mod detector;
pub mod recognizer;

pub use analyzer::{OnnxFaceAnalyzer, DETECTOR_MODEL, RECOGNIZER_MODEL};
pub use detector::{DetectorError, FaceDetector};
pub use recognizer::{FaceRecognizer, RecognizerError};
