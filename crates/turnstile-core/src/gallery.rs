//! Enrolled embeddings, held in memory and mirrored to durable storage.
//!
//! [`EmbeddingStore`] is the only writer. Every mutation is persisted through
//! the [`EmbeddingBackend`] before the in-memory gallery changes, so a failed
//! write leaves matching state exactly as it was on disk.

use crate::error::{EnrollError, StoreError};
use crate::types::{Embedding, IdentityId};
use serde::Serialize;
use std::collections::BTreeMap;

/// Identity → normalized reference embeddings, iterated in ascending id order.
pub type Gallery = BTreeMap<IdentityId, Vec<Embedding>>;

/// Durable storage for the embedding gallery.
///
/// `replace` and `delete` must be all-or-nothing: after an error, readers
/// see either the previous set or the new one, never a mix.
pub trait EmbeddingBackend {
    /// Read every stored vector, unvalidated.
    fn load_all(&mut self) -> Result<Vec<(IdentityId, Vec<Vec<f32>>)>, StoreError>;
    fn replace(&mut self, identity: IdentityId, embeddings: &[Embedding]) -> Result<(), StoreError>;
    fn delete(&mut self, identity: IdentityId) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GalleryStats {
    pub identities: usize,
    pub embeddings: usize,
    pub avg_embeddings_per_identity: f32,
}

pub struct EmbeddingStore<B> {
    backend: B,
    dimension: usize,
    gallery: Gallery,
}

impl<B: EmbeddingBackend> EmbeddingStore<B> {
    /// Load the persisted gallery. Corrupt or malformed vectors are dropped
    /// individually; identities left with nothing valid are skipped.
    pub fn open(mut backend: B, dimension: usize) -> Result<Self, StoreError> {
        let gallery = load_gallery(&mut backend, dimension)?;
        tracing::info!(
            identities = gallery.len(),
            dimension,
            "embedding store loaded"
        );
        Ok(Self {
            backend,
            dimension,
            gallery,
        })
    }

    /// Re-read the gallery from storage. On failure the previous in-memory
    /// gallery stays in use.
    pub fn reload(&mut self) -> Result<usize, StoreError> {
        match load_gallery(&mut self.backend, self.dimension) {
            Ok(gallery) => {
                self.gallery = gallery;
                tracing::info!(identities = self.gallery.len(), "embedding store reloaded");
                Ok(self.gallery.len())
            }
            Err(e) => {
                tracing::error!(error = %e, "reload failed; keeping last loaded gallery");
                Err(e)
            }
        }
    }

    /// Replace an identity's embeddings wholesale. Returns the number kept.
    pub fn upsert(&mut self, identity: IdentityId, raw: &[Vec<f32>]) -> Result<usize, EnrollError> {
        let embeddings = normalize_all(identity, raw, self.dimension);
        if embeddings.is_empty() {
            return Err(EnrollError::EmptyEmbeddingSet(identity));
        }

        self.backend.replace(identity, &embeddings)?;

        let kept = embeddings.len();
        self.gallery.insert(identity, embeddings);
        tracing::info!(
            identity,
            kept,
            dropped = raw.len() - kept,
            "embeddings stored"
        );
        Ok(kept)
    }

    /// Delete an identity's embeddings. Returns whether it was enrolled.
    pub fn remove(&mut self, identity: IdentityId) -> Result<bool, StoreError> {
        self.backend.delete(identity)?;
        let existed = self.gallery.remove(&identity).is_some();
        if existed {
            tracing::info!(identity, "embeddings removed");
        }
        Ok(existed)
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn stats(&self) -> GalleryStats {
        let identities = self.gallery.len();
        let embeddings: usize = self.gallery.values().map(Vec::len).sum();
        GalleryStats {
            identities,
            embeddings,
            avg_embeddings_per_identity: if identities > 0 {
                embeddings as f32 / identities as f32
            } else {
                0.0
            },
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

fn load_gallery<B: EmbeddingBackend>(backend: &mut B, dimension: usize) -> Result<Gallery, StoreError> {
    let mut gallery = Gallery::new();
    for (identity, raw) in backend.load_all()? {
        let embeddings = normalize_all(identity, &raw, dimension);
        if embeddings.is_empty() {
            tracing::warn!(identity, "no usable embeddings stored; identity skipped");
            continue;
        }
        gallery.insert(identity, embeddings);
    }
    Ok(gallery)
}

fn normalize_all(identity: IdentityId, raw: &[Vec<f32>], dimension: usize) -> Vec<Embedding> {
    raw.iter()
        .filter_map(|v| match Embedding::normalize(v, dimension) {
            Ok(e) => Some(e),
            Err(err) => {
                tracing::warn!(identity, error = %err, "dropping invalid embedding");
                None
            }
        })
        .collect()
}
