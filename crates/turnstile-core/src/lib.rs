//! turnstile-core — Identity matching and access decision engine.
//!
//! Turns per-frame face embeddings into identities (top-k cosine matching
//! against an enrolled gallery), confirms them over consecutive frames, and
//! decides entry/exit events that are appended to the access log.

pub mod access_log;
pub mod config;
pub mod decision;
pub mod detector;
pub mod engine;
pub mod error;
pub mod gallery;
pub mod matcher;
pub mod stability;
pub mod throttle;
pub mod types;

pub use access_log::{AccessLog, ProfileDirectory};
pub use config::EngineConfig;
pub use decision::{parse_timestamp, AccessDecider, Decision, UnparseableTimestamp, TIMESTAMP_FORMAT};
pub use detector::{ExtractionError, FaceDetector, FaceEmbedder};
pub use engine::{AccessEngine, EngineStatus, FaceMatch, FrameError, Outcome};
pub use error::{EngineError, EnrollError, StoreError};
pub use gallery::{EmbeddingBackend, EmbeddingStore, Gallery, GalleryStats};
pub use matcher::{Matcher, TopKMatcher};
pub use stability::StabilityTracker;
pub use throttle::UnknownThrottle;
pub use types::{
    AccessEvent, BoundingBox, Embedding, EventKind, Frame, IdentityId, InvalidEmbedding, LastEvent,
    MatchResult, Profile,
};
