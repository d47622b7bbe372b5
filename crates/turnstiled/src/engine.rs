use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use turnstile_core::{
    AccessEngine, EngineStatus, EnrollError, IdentityId, MatchResult, Outcome, StoreError,
};
use turnstile_store::{Config, SqliteAccessLog, SqliteEmbeddings, StorageError};

type Engine = AccessEngine<SqliteEmbeddings, SqliteAccessLog>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Access(#[from] turnstile_core::EngineError),
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Per-face matches of one submitted frame and the events they produced.
///
/// `error` is set when an access event could not be written; `outcomes`
/// still lists every event of the frame that was.
#[derive(Debug, Serialize)]
pub struct FrameReport {
    pub matches: Vec<MatchResult>,
    pub outcomes: Vec<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    SubmitFrame {
        embeddings: Vec<Vec<f32>>,
        reply: oneshot::Sender<Result<FrameReport, EngineError>>,
    },
    ProcessRecognition {
        identity: Option<IdentityId>,
        score: f32,
        reply: oneshot::Sender<Result<Outcome, EngineError>>,
    },
    Enroll {
        identity: IdentityId,
        embeddings: Vec<Vec<f32>>,
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    Remove {
        identity: IdentityId,
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
    Reload {
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<Result<EngineStatus, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Match every face embedding of one frame and run the access pipeline.
    pub async fn submit_frame(&self, embeddings: Vec<Vec<f32>>) -> Result<FrameReport, EngineError> {
        self.request(|reply| EngineRequest::SubmitFrame { embeddings, reply })
            .await
    }

    /// Decide on an already-confirmed recognition (`None` = unknown face).
    pub async fn process_recognition(
        &self,
        identity: Option<IdentityId>,
        score: f32,
    ) -> Result<Outcome, EngineError> {
        self.request(|reply| EngineRequest::ProcessRecognition {
            identity,
            score,
            reply,
        })
        .await
    }

    pub async fn enroll(&self, identity: IdentityId, embeddings: Vec<Vec<f32>>) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::Enroll {
            identity,
            embeddings,
            reply,
        })
        .await
    }

    pub async fn remove(&self, identity: IdentityId) -> Result<bool, EngineError> {
        self.request(|reply| EngineRequest::Remove { identity, reply })
            .await
    }

    pub async fn reload(&self) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::Reload { reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the database and loads the embedding gallery synchronously, so
/// the daemon fails fast at startup if storage is unusable. All
/// recognition state lives on that thread; requests are served in order.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let embeddings = SqliteEmbeddings::open(&config.db_path)?;
    let log = SqliteAccessLog::open(&config.db_path)?;
    let mut engine = Engine::open(config.engine.clone(), embeddings, log)?;

    let status = engine.status();
    tracing::info!(
        db = %config.db_path.display(),
        identities = status.gallery.identities,
        embeddings = status.gallery.embeddings,
        threshold = status.recognition_threshold,
        "engine ready"
    );

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("turnstile-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                handle_request(&mut engine, req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn handle_request(engine: &mut Engine, req: EngineRequest) {
    match req {
        EngineRequest::SubmitFrame { embeddings, reply } => {
            let _ = reply.send(Ok(run_frame(engine, &embeddings)));
        }
        EngineRequest::ProcessRecognition {
            identity,
            score,
            reply,
        } => {
            let result = engine
                .process_recognition(identity, score)
                .map_err(EngineError::from);
            let _ = reply.send(result);
        }
        EngineRequest::Enroll {
            identity,
            embeddings,
            reply,
        } => {
            let result = engine.enroll(identity, &embeddings).map_err(EngineError::from);
            let _ = reply.send(result);
        }
        EngineRequest::Remove { identity, reply } => {
            let _ = reply.send(engine.remove(identity).map_err(EngineError::from));
        }
        EngineRequest::Reload { reply } => {
            let _ = reply.send(engine.reload().map_err(EngineError::from));
        }
        EngineRequest::Status { reply } => {
            let _ = reply.send(Ok(engine.status()));
        }
    }
}

fn run_frame(engine: &mut Engine, embeddings: &[Vec<f32>]) -> FrameReport {
    let matches: Vec<MatchResult> = embeddings.iter().map(|e| engine.identify(e)).collect();
    let (outcomes, error) = match engine.process_frame(&matches) {
        Ok(outcomes) => (outcomes, None),
        Err(e) => {
            tracing::error!(error = %e, "frame events partially logged");
            (e.logged, Some(e.source.to_string()))
        }
    };
    tracing::debug!(
        faces = matches.len(),
        recognized = matches.iter().filter(|m| m.is_match()).count(),
        events = outcomes.len(),
        "frame processed"
    );
    FrameReport {
        matches,
        outcomes,
        error,
    }
}
