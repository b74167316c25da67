//! Incremental gallery builder.
//!
//! Scans `<root>/<identity>/<image>`, embeds only images whose key is not
//! yet recorded in the store, and rewrites the store once at the end.

use crate::analyzer::FaceAnalyzer;
use crate::error::ImageError;
use crate::store::{EmbeddingStore, SourceKey, StoreError};
use crate::types::{DetSize, Embedding, IdentityLabel, EMBEDDING_DIM};
use ndarray::Array2;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery directory not found: {0}")]
    MissingRoot(String),
    #[error("scan failed: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// In-memory gallery ready for matching.
#[derive(Debug, Clone)]
pub struct Gallery {
    /// `N × EMBEDDING_DIM`, one row per reference face.
    pub embeddings: Array2<f32>,
    /// Identity of each row in `embeddings`.
    pub labels: Vec<IdentityLabel>,
    pub processed: BTreeSet<SourceKey>,
}

impl Gallery {
    pub fn from_store(store: &EmbeddingStore) -> Self {
        Self {
            embeddings: store.embedding_matrix(),
            labels: store.names.clone(),
            processed: store.files.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// What one build run did.
#[derive(Debug, Clone, Default)]
pub struct BuildSummary {
    /// Images found under the gallery root.
    pub scanned: usize,
    /// Images not seen by any earlier run.
    pub new_images: usize,
    /// New embeddings per identity.
    pub embedded: BTreeMap<IdentityLabel, usize>,
    /// Images recorded as processed without yielding an embedding.
    pub faceless: usize,
    /// Images skipped because of an error; they are retried next run.
    pub failed: usize,
}

pub struct GalleryBuilder {
    root: PathBuf,
    store_path: PathBuf,
    det_size: DetSize,
}

impl GalleryBuilder {
    pub fn new(root: impl Into<PathBuf>, store_path: impl Into<PathBuf>, det_size: DetSize) -> Self {
        Self {
            root: root.into(),
            store_path: store_path.into(),
            det_size,
        }
    }

    /// Embed every reference image not yet in the store and persist the result.
    ///
    /// Per-image failures are logged and skipped. When nothing is new the
    /// store is returned as loaded and the analyzer is never called.
    pub fn build<A: FaceAnalyzer + ?Sized>(
        &self,
        analyzer: &mut A,
    ) -> Result<(Gallery, BuildSummary), GalleryError> {
        let mut store = EmbeddingStore::load_or_default(&self.store_path)?;
        tracing::info!(faces = store.len(), files = store.files.len(), "loaded cached embeddings");

        let current = scan_sources(&self.root)?;
        let new_keys: Vec<&(SourceKey, PathBuf)> =
            current.iter().filter(|(key, _)| !store.is_processed(key)).collect();

        let mut summary = BuildSummary {
            scanned: current.len(),
            new_images: new_keys.len(),
            ..Default::default()
        };
        tracing::info!(total = summary.scanned, new = summary.new_images, "scanned gallery");

        if new_keys.is_empty() {
            tracing::info!("no new images; using cached embeddings");
            return Ok((Gallery::from_store(&store), summary));
        }

        for (key, path) in new_keys {
            let identity = identity_of(key);
            tracing::debug!(path = %path.display(), %identity, "processing reference image");

            match self.embed_first_face(&mut *analyzer, path) {
                Ok(Some(embedding)) => {
                    store.push(key.clone(), identity.clone(), embedding);
                    *summary.embedded.entry(identity).or_default() += 1;
                }
                Ok(None) => {
                    tracing::warn!(path = %path.display(), "no usable face detected; marking processed");
                    store.mark_processed(key.clone());
                    summary.faceless += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping reference image");
                    summary.failed += 1;
                }
            }
        }

        store.save(&self.store_path)?;

        for (identity, count) in &summary.embedded {
            tracing::info!(%identity, count, "embedded new reference images");
        }

        Ok((Gallery::from_store(&store), summary))
    }

    /// Embedding of the first detected face, or `None` when the image
    /// holds no face or the first face could not be embedded.
    fn embed_first_face<A: FaceAnalyzer + ?Sized>(
        &self,
        analyzer: &mut A,
        path: &Path,
    ) -> Result<Option<Embedding>, ImageError> {
        let image = image::open(path)?.to_rgb8();
        let faces = analyzer.detect_and_embed(&image, self.det_size)?;

        let Some(face) = faces.into_iter().next() else {
            return Ok(None);
        };
        let Some(embedding) = face.embedding else {
            return Ok(None);
        };
        if embedding.dim() != EMBEDDING_DIM {
            return Err(ImageError::Dimension {
                expected: EMBEDDING_DIM,
                actual: embedding.dim(),
            });
        }
        Ok(Some(embedding))
    }
}

/// List `(key, path)` for every file one level below an identity folder,
/// in file-name order.
fn scan_sources(root: &Path) -> Result<Vec<(SourceKey, PathBuf)>, GalleryError> {
    if !root.is_dir() {
        return Err(GalleryError::MissingRoot(root.display().to_string()));
    }

    let mut sources = Vec::new();
    for entry in WalkDir::new(root).min_depth(2).max_depth(2).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let parts: Vec<&str> = rel.iter().filter_map(|c| c.to_str()).collect();
        let key = match parts.as_slice() {
            [person, file] => format!("{person}/{file}"),
            _ => {
                tracing::warn!(path = %entry.path().display(), "skipping non-UTF-8 path");
                continue;
            }
        };
        sources.push((key, entry.into_path()));
    }
    Ok(sources)
}

fn identity_of(key: &str) -> IdentityLabel {
    let folder = key.split('/').next().unwrap_or_default();
    let identity = IdentityLabel::normalize(folder);
    tracing::debug!(folder, %identity, "normalized identity");
    identity
}
