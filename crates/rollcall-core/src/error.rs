use crate::analyzer::AnalyzerError;
use crate::ledger::LedgerError;
use thiserror::Error;

/// Failure confined to a single image. The surrounding batch always continues.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("detector failed: {0}")]
    Detector(#[from] AnalyzerError),
    #[error("face has no embedding")]
    MissingEmbedding,
    #[error("embedding has {actual} dimensions, expected {expected}")]
    Dimension { expected: usize, actual: usize },
    #[error("archive failed: {0}")]
    Archive(std::io::Error),
    #[error("ledger write failed: {0}")]
    Ledger(#[from] LedgerError),
}
