//! rollcall-core: Attendance from group photos.
//!
//! Builds a gallery of reference face embeddings, matches faces found in
//! incoming photos against it, and keeps a once-per-day attendance ledger.
//! Face detection and embedding sit behind the [`FaceAnalyzer`] trait.

pub mod analyzer;
pub mod clock;
pub mod error;
pub mod fallback;
pub mod gallery;
pub mod ledger;
pub mod matcher;
pub mod pipeline;
pub mod store;
pub mod types;

mod persist;

pub use analyzer::{AnalyzerError, FaceAnalyzer};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::ImageError;
pub use fallback::{DetectionLadder, DEFAULT_DET_SIZES};
pub use gallery::{BuildSummary, Gallery, GalleryBuilder, GalleryError};
pub use ledger::{AttendanceLedger, AttendanceRecord, LedgerError, MarkOutcome};
pub use matcher::{IdentityMatcher, MatchResult, MatcherError, Metric, Neighbor, SIMILARITY_THRESHOLD};
pub use pipeline::{AttendancePipeline, PipelineConfig, PipelineError, RunSummary};
pub use store::{EmbeddingStore, StoreError};
pub use types::{BoundingBox, DetSize, DetectedFace, Embedding, IdentityLabel, EMBEDDING_DIM};
