//! SQLite backend for the embedding gallery.
//!
//! One row per reference embedding, stored as a little-endian f32 blob
//! (4 × N bytes). An identity's set is replaced inside a single
//! transaction, so a crash mid-write leaves the previous set intact.

use crate::db;
use crate::error::StorageError;
use rusqlite::{params, Connection};
use std::path::Path;
use turnstile_core::{Embedding, EmbeddingBackend, IdentityId, StoreError};

fn embedding_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

pub struct SqliteEmbeddings {
    conn: Connection,
}

impl SqliteEmbeddings {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Ok(Self {
            conn: db::open(path.as_ref())?,
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Ok(Self {
            conn: db::open_in_memory()?,
        })
    }

    fn read_all(&self) -> Result<Vec<(IdentityId, Vec<Vec<f32>>)>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT identity_id, position, vector
             FROM embeddings
             ORDER BY identity_id ASC, position ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let identity: IdentityId = row.get(0)?;
            let position: i64 = row.get(1)?;
            let blob: Vec<u8> = row.get(2)?;
            Ok((identity, position, blob))
        })?;

        let mut out: Vec<(IdentityId, Vec<Vec<f32>>)> = Vec::new();
        for row in rows {
            let (identity, position, blob) = row?;
            let Some(values) = bytes_to_embedding(&blob) else {
                tracing::warn!(identity, position, len = blob.len(), "corrupt embedding blob skipped");
                continue;
            };
            match out.last_mut() {
                Some((last, vectors)) if *last == identity => vectors.push(values),
                _ => out.push((identity, vec![values])),
            }
        }
        Ok(out)
    }

    fn write(&mut self, identity: IdentityId, embeddings: &[Embedding]) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM embeddings WHERE identity_id = ?1", params![identity])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO embeddings (identity_id, position, vector) VALUES (?1, ?2, ?3)",
            )?;
            for (position, embedding) in embeddings.iter().enumerate() {
                stmt.execute(params![
                    identity,
                    position as i64,
                    embedding_to_bytes(embedding.values())
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl EmbeddingBackend for SqliteEmbeddings {
    fn load_all(&mut self) -> Result<Vec<(IdentityId, Vec<Vec<f32>>)>, StoreError> {
        Ok(self.read_all()?)
    }

    fn replace(&mut self, identity: IdentityId, embeddings: &[Embedding]) -> Result<(), StoreError> {
        Ok(self.write(identity, embeddings)?)
    }

    fn delete(&mut self, identity: IdentityId) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM embeddings WHERE identity_id = ?1", params![identity])
            .map_err(StorageError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_core::EmbeddingStore;

    fn emb(raw: &[f32]) -> Embedding {
        Embedding::normalize(raw, raw.len()).unwrap()
    }

    #[test]
    fn test_replace_and_load() {
        let mut backend = SqliteEmbeddings::open_in_memory().unwrap();
        backend.replace(3, &[emb(&[1.0, 0.0]), emb(&[0.0, 1.0])]).unwrap();
        backend.replace(1, &[emb(&[3.0, 4.0])]).unwrap();

        let all = backend.load_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, 1);
        assert!((all[0].1[0][0] - 0.6).abs() < 1e-6);
        assert_eq!(all[1].0, 3);
        assert_eq!(all[1].1, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_replace_is_wholesale() {
        let mut backend = SqliteEmbeddings::open_in_memory().unwrap();
        backend
            .replace(3, &[emb(&[1.0, 0.0]), emb(&[0.0, 1.0]), emb(&[1.0, 1.0])])
            .unwrap();
        backend.replace(3, &[emb(&[0.0, 1.0])]).unwrap();
        let all = backend.load_all().unwrap();
        assert_eq!(all[0].1.len(), 1);
    }

    #[test]
    fn test_delete_absent_is_ok() {
        let mut backend = SqliteEmbeddings::open_in_memory().unwrap();
        backend.delete(12).unwrap();
        backend.replace(12, &[emb(&[1.0, 0.0])]).unwrap();
        backend.delete(12).unwrap();
        assert!(backend.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_rows_do_not_abort_load() {
        let backend = SqliteEmbeddings::open_in_memory().unwrap();
        backend
            .conn
            .execute(
                "INSERT INTO embeddings (identity_id, position, vector) VALUES (1, 0, ?1)",
                params![vec![0u8; 5]],
            )
            .unwrap();
        backend
            .conn
            .execute(
                "INSERT INTO embeddings (identity_id, position, vector) VALUES (1, 1, ?1)",
                params![embedding_to_bytes(&[1.0, 0.0])],
            )
            .unwrap();
        // Wrong dimensionality survives the backend but not the store.
        backend
            .conn
            .execute(
                "INSERT INTO embeddings (identity_id, position, vector) VALUES (1, 2, ?1)",
                params![embedding_to_bytes(&[1.0, 0.0, 0.0])],
            )
            .unwrap();

        let store = EmbeddingStore::open(backend, 2).unwrap();
        assert_eq!(store.gallery()[&1].len(), 1);
    }
}
