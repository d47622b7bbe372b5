use std::fmt::Display;
use zbus::interface;

use crate::engine::EngineHandle;

pub const BUS_NAME: &str = "io.turnstile.Access1";
pub const OBJECT_PATH: &str = "/io/turnstile/Access1";

/// D-Bus interface for the Turnstile access daemon.
///
/// Bus name: io.turnstile.Access1
/// Object path: /io/turnstile/Access1
///
/// Embeddings travel as `aad` (D-Bus has no single-precision type).
pub struct AccessService {
    engine: EngineHandle,
    db_path: String,
    closing_time: String,
}

impl AccessService {
    pub fn new(engine: EngineHandle, db_path: String, closing_time: String) -> Self {
        Self {
            engine,
            db_path,
            closing_time,
        }
    }
}

fn failed(e: impl Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

fn to_f32(embeddings: Vec<Vec<f64>>) -> Vec<Vec<f32>> {
    embeddings
        .into_iter()
        .map(|v| v.into_iter().map(|x| x as f32).collect())
        .collect()
}

fn to_json(value: &impl serde::Serialize) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(failed)
}

#[interface(name = "io.turnstile.Access1")]
impl AccessService {
    /// Run one frame's face embeddings through matching and access decisions.
    /// Returns `{"matches": [...], "outcomes": [...]}` as JSON.
    async fn submit_frame(&self, embeddings: Vec<Vec<f64>>) -> zbus::fdo::Result<String> {
        let report = self
            .engine
            .submit_frame(to_f32(embeddings))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "frame processing failed");
                failed(e)
            })?;
        to_json(&report)
    }

    /// Decide on a confirmed recognition. A negative identity means an
    /// unknown face.
    async fn process_recognition(&self, identity: i64, score: f64) -> zbus::fdo::Result<String> {
        let identity = (identity >= 0).then_some(identity);
        let outcome = self
            .engine
            .process_recognition(identity, score as f32)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "access decision failed");
                failed(e)
            })?;
        to_json(&outcome)
    }

    /// Replace an identity's reference embeddings. Returns how many were kept.
    async fn enroll(&self, identity: i64, embeddings: Vec<Vec<f64>>) -> zbus::fdo::Result<u32> {
        tracing::info!(identity, count = embeddings.len(), "enroll requested");
        let kept = self
            .engine
            .enroll(identity, to_f32(embeddings))
            .await
            .map_err(failed)?;
        Ok(kept as u32)
    }

    /// Remove an identity's embeddings. Returns whether it was enrolled.
    async fn remove(&self, identity: i64) -> zbus::fdo::Result<bool> {
        tracing::info!(identity, "remove requested");
        self.engine.remove(identity).await.map_err(failed)
    }

    /// Re-read the embedding gallery from the database.
    async fn reload(&self) -> zbus::fdo::Result<u32> {
        let identities = self.engine.reload().await.map_err(failed)?;
        Ok(identities as u32)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(failed)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "database": self.db_path,
            "closing_time": self.closing_time,
            "engine": status,
        })
        .to_string())
    }
}
