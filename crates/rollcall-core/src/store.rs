//! Persisted gallery of reference embeddings.
//!
//! Stored as one JSON object holding parallel `embeddings` / `names` arrays
//! plus the set of source image keys already processed. Every embedding has
//! its key recorded; a key may be recorded without an embedding when its
//! image held no detectable face.

use crate::persist::write_atomic;
use crate::types::{Embedding, IdentityLabel, EMBEDDING_DIM};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

const STORE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("embedding store not found: {0}; run `rollcall enroll` first")]
    Missing(String),
    #[error("embedding store is corrupt: {0}")]
    Corrupt(String),
    #[error("unsupported embedding store version {0}")]
    UnsupportedVersion(u32),
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Relative path of a reference image: `<identity folder>/<file name>`.
pub type SourceKey = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingStore {
    #[serde(default = "current_version")]
    pub version: u32,
    pub embeddings: Vec<Embedding>,
    pub names: Vec<IdentityLabel>,
    pub files: BTreeSet<SourceKey>,
}

fn current_version() -> u32 {
    STORE_VERSION
}

impl Default for EmbeddingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingStore {
    pub fn new() -> Self {
        Self {
            version: STORE_VERSION,
            embeddings: Vec::new(),
            names: Vec::new(),
            files: BTreeSet::new(),
        }
    }

    /// Load the store, treating a missing or zero-length file as empty.
    pub fn load_or_default(path: &Path) -> Result<Self, StoreError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > 0 => Self::read(path),
            Ok(_) => Ok(Self::new()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load the store, failing when the file does not exist.
    pub fn load_required(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::Missing(path.display().to_string()));
        }
        Self::load_or_default(path)
    }

    fn read(path: &Path) -> Result<Self, StoreError> {
        let bytes = std::fs::read(path)?;
        let store: Self = serde_json::from_slice(&bytes)?;
        store.validate()?;
        tracing::debug!(
            path = %path.display(),
            faces = store.len(),
            files = store.files.len(),
            "loaded embedding store"
        );
        Ok(store)
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.version != STORE_VERSION {
            return Err(StoreError::UnsupportedVersion(self.version));
        }
        if self.embeddings.len() != self.names.len() {
            return Err(StoreError::Corrupt(format!(
                "{} embeddings but {} names",
                self.embeddings.len(),
                self.names.len()
            )));
        }
        if let Some((i, e)) = self
            .embeddings
            .iter()
            .enumerate()
            .find(|(_, e)| e.dim() != EMBEDDING_DIM)
        {
            return Err(StoreError::Corrupt(format!(
                "embedding {i} has {} dimensions, expected {EMBEDDING_DIM}",
                e.dim()
            )));
        }
        Ok(())
    }

    /// Write the whole store atomically.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_vec(self)?;
        write_atomic(path, |w| w.write_all(&json))?;
        tracing::info!(path = %path.display(), faces = self.len(), "saved embedding store");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn is_processed(&self, key: &str) -> bool {
        self.files.contains(key)
    }

    /// Record an embedded reference face and mark its source processed.
    pub fn push(&mut self, key: SourceKey, label: IdentityLabel, embedding: Embedding) {
        self.embeddings.push(embedding);
        self.names.push(label);
        self.files.insert(key);
    }

    /// Mark a source processed without contributing an embedding.
    pub fn mark_processed(&mut self, key: SourceKey) {
        self.files.insert(key);
    }

    /// Embeddings as an `N × EMBEDDING_DIM` matrix; `0 × EMBEDDING_DIM` when empty.
    pub fn embedding_matrix(&self) -> Array2<f32> {
        let mut matrix = Array2::<f32>::zeros((self.embeddings.len(), EMBEDDING_DIM));
        for (mut row, e) in matrix.rows_mut().into_iter().zip(&self.embeddings) {
            for (dst, src) in row.iter_mut().zip(&e.values) {
                *dst = *src;
            }
        }
        matrix
    }
}
