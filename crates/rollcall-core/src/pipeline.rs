//! Attendance run: match every incoming photo against the gallery,
//! mark recognized identities, then archive the photo under today's date.
//!
//! Images are handled strictly one at a time. A failure in one image is
//! logged and the run moves on; only a missing or empty gallery stops a
//! run, and it does so before any image is touched.

use crate::analyzer::FaceAnalyzer;
use crate::clock::Clock;
use crate::error::ImageError;
use crate::fallback::DetectionLadder;
use crate::gallery::Gallery;
use crate::ledger::{AttendanceLedger, LedgerError, MarkOutcome};
use crate::matcher::{IdentityMatcher, MatcherError, SIMILARITY_THRESHOLD};
use crate::store::{EmbeddingStore, StoreError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no embedding store at {0}; run `rollcall enroll` first")]
    MissingGallery(String),
    #[error("embedding store has no faces; attendance processing aborted")]
    EmptyGallery,
    #[error("store: {0}")]
    Store(StoreError),
    #[error("matcher: {0}")]
    Matcher(#[from] MatcherError),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("scan failed: {0}")]
    Walk(#[from] walkdir::Error),
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Missing(path) => Self::MissingGallery(path),
            other => Self::Store(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub store_path: PathBuf,
    pub incoming_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub threshold: f32,
    pub ladder: DetectionLadder,
}

impl PipelineConfig {
    pub fn new(root: &Path) -> Self {
        Self {
            store_path: root.join("encodings.json"),
            incoming_dir: root.join("uploaded_group_images"),
            processed_dir: root.join("processed"),
            ledger_path: root.join("attendance.csv"),
            threshold: SIMILARITY_THRESHOLD,
            ladder: DetectionLadder::default(),
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Images read from the incoming folder.
    pub images: usize,
    /// Images moved into the archive.
    pub archived: usize,
    /// Images left in place because of an error.
    pub skipped: usize,
    pub faces: usize,
    pub missing_embeddings: usize,
    /// Faces whose embedding the matcher rejected (e.g. wrong dimension).
    pub invalid_embeddings: usize,
    pub unmatched: usize,
    pub marked: usize,
    pub already_present: usize,
}

pub struct AttendancePipeline<C: Clock> {
    matcher: IdentityMatcher,
    ledger: AttendanceLedger,
    ladder: DetectionLadder,
    incoming_dir: PathBuf,
    processed_dir: PathBuf,
    clock: C,
}

impl<C: Clock> AttendancePipeline<C> {
    /// Load the gallery and ledger and build the matcher.
    ///
    /// Fails when the store is missing or holds no embeddings.
    pub fn prepare(config: &PipelineConfig, clock: C) -> Result<Self, PipelineError> {
        let store = EmbeddingStore::load_required(&config.store_path)?;
        if store.is_empty() {
            return Err(PipelineError::EmptyGallery);
        }
        tracing::info!(faces = store.len(), "loaded embeddings");

        let gallery = Gallery::from_store(&store);
        let matcher = IdentityMatcher::prepare(&gallery, config.threshold)?;
        let ledger = AttendanceLedger::load(&config.ledger_path)?;

        Ok(Self {
            matcher,
            ledger,
            ladder: config.ladder.clone(),
            incoming_dir: config.incoming_dir.clone(),
            processed_dir: config.processed_dir.clone(),
            clock,
        })
    }

    pub fn matcher(&self) -> &IdentityMatcher {
        &self.matcher
    }

    pub fn ledger(&self) -> &AttendanceLedger {
        &self.ledger
    }

    /// Process every file currently in the incoming folder.
    pub fn run<A: FaceAnalyzer + ?Sized>(
        &mut self,
        analyzer: &mut A,
    ) -> Result<RunSummary, PipelineError> {
        let today = self.clock.now().date();
        let archive_dir = self.processed_dir.join(today.format("%Y-%m-%d").to_string());
        std::fs::create_dir_all(&archive_dir)?;
        tracing::info!(%today, dir = %archive_dir.display(), "archive directory ready");

        let mut summary = RunSummary::default();
        for path in incoming_files(&self.incoming_dir)? {
            summary.images += 1;
            tracing::info!(path = %path.display(), "processing image");

            match self.process_image(&mut *analyzer, &path, &archive_dir, &mut summary) {
                Ok(()) => summary.archived += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping image");
                    summary.skipped += 1;
                }
            }
        }

        tracing::info!(
            images = summary.images,
            archived = summary.archived,
            skipped = summary.skipped,
            marked = summary.marked,
            "attendance processing completed"
        );
        Ok(summary)
    }

    /// Detect, match and mark one image, then archive it.
    ///
    /// The image stays in the incoming folder when it cannot be decoded,
    /// the detector fails, or a ledger write fails, so the next run retries it.
    fn process_image<A: FaceAnalyzer + ?Sized>(
        &mut self,
        analyzer: &mut A,
        path: &Path,
        archive_dir: &Path,
        summary: &mut RunSummary,
    ) -> Result<(), ImageError> {
        let image = image::open(path)?.to_rgb8();
        let faces = self.ladder.detect(analyzer, &image)?;

        if faces.is_empty() {
            tracing::warn!(path = %path.display(), "no faces detected; archiving");
            return archive(path, archive_dir);
        }

        for face in faces {
            summary.faces += 1;
            let Some(embedding) = face.embedding else {
                let e = ImageError::MissingEmbedding;
                tracing::warn!(error = %e, "skipping face");
                summary.missing_embeddings += 1;
                continue;
            };

            let result = match self.matcher.identify(&embedding.values) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "embedding rejected by matcher; skipping face");
                    summary.invalid_embeddings += 1;
                    continue;
                }
            };

            let Some(identity) = result.identity() else {
                tracing::debug!(
                    nearest = %result.neighbor.label,
                    similarity = result.neighbor.similarity,
                    "no match above threshold"
                );
                summary.unmatched += 1;
                continue;
            };

            tracing::info!(
                %identity,
                similarity = %format!("{:.4}", result.neighbor.similarity),
                "match found"
            );
            let now = self.clock.now();
            match self.ledger.mark(identity, now.date(), now.time())? {
                MarkOutcome::Marked => summary.marked += 1,
                MarkOutcome::AlreadyPresent => summary.already_present += 1,
            }
        }

        archive(path, archive_dir)
    }
}

/// Regular files directly inside `dir`, in file-name order.
fn incoming_files(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Move `path` into `archive_dir`, keeping its file name.
fn archive(path: &Path, archive_dir: &Path) -> Result<(), ImageError> {
    let Some(name) = path.file_name() else {
        return Err(ImageError::Archive(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} has no file name", path.display()),
        )));
    };
    let dest = archive_dir.join(name);
    if std::fs::rename(path, &dest).is_err() {
        // Cross-device moves cannot rename; copy then remove.
        std::fs::copy(path, &dest).map_err(ImageError::Archive)?;
        std::fs::remove_file(path).map_err(ImageError::Archive)?;
    }
    tracing::debug!(from = %path.display(), to = %dest.display(), "archived image");
    Ok(())
}
