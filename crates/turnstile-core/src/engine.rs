//! Frame-to-event pipeline: Matcher → StabilityTracker → AccessDecider → log.
//!
//! [`AccessEngine`] owns every piece of mutable recognition state and is
//! driven synchronously from one thread, one frame at a time. Matching and
//! stability tracking never fail outward; only persistence errors are
//! returned.

use crate::access_log::{AccessLog, ProfileDirectory};
use crate::config::EngineConfig;
use crate::decision::{AccessDecider, Decision};
use crate::detector::{FaceDetector, FaceEmbedder};
use crate::error::{EngineError, EnrollError, StoreError};
use crate::gallery::{EmbeddingBackend, EmbeddingStore, GalleryStats};
use crate::matcher::TopKMatcher;
use crate::stability::StabilityTracker;
use crate::throttle::UnknownThrottle;
use crate::types::{AccessEvent, BoundingBox, EventKind, Frame, IdentityId, MatchResult, Profile};
use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use thiserror::Error;

/// What a recognition turned into, for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Entry(AccessEvent),
    Exit(AccessEvent),
    /// Recognized, but the identity is deactivated.
    Denied(AccessEvent),
    UnknownLogged(AccessEvent),
    /// No new event. The UI must not suggest a new action happened.
    Suppressed { identity: Option<IdentityId> },
}

impl Outcome {
    pub fn event(&self) -> Option<&AccessEvent> {
        match self {
            Outcome::Entry(e) | Outcome::Exit(e) | Outcome::Denied(e) | Outcome::UnknownLogged(e) => Some(e),
            Outcome::Suppressed { .. } => None,
        }
    }
}

/// A frame that hit a persistence failure. `logged` holds the outcomes of
/// the same frame whose events were appended.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{source} ({} other event(s) logged)", .logged.len())]
pub struct FrameError {
    pub logged: Vec<Outcome>,
    #[source]
    pub source: EngineError,
}

/// One detected face and its match.
#[derive(Debug, Clone, Serialize)]
pub struct FaceMatch {
    pub face: BoundingBox,
    pub result: MatchResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub gallery: GalleryStats,
    pub recognition_threshold: f32,
    pub confirmation_frames: u32,
    pub reentry_window_secs: u64,
    pub unknown_log_interval_secs: u64,
    pub top_k: usize,
    pub embedding_dim: usize,
}

pub struct AccessEngine<B, L> {
    config: EngineConfig,
    store: EmbeddingStore<B>,
    matcher: TopKMatcher,
    tracker: StabilityTracker,
    decider: AccessDecider,
    throttle: UnknownThrottle,
    log: L,
}

impl<B, L> AccessEngine<B, L>
where
    B: EmbeddingBackend,
    L: AccessLog + ProfileDirectory,
{
    /// Load the embedding gallery and assemble the pipeline.
    pub fn open(config: EngineConfig, backend: B, log: L) -> Result<Self, StoreError> {
        let config = config.sanitized();
        let store = EmbeddingStore::open(backend, config.embedding_dim)?;
        Ok(Self {
            matcher: TopKMatcher::new(config.top_k),
            tracker: StabilityTracker::new(config.confirmation_frames),
            decider: AccessDecider::new(config.reentry_window()),
            throttle: UnknownThrottle::new(config.unknown_log_interval()),
            config,
            store,
            log,
        })
    }

    /// Detect every face in `frame` and match each one. Detector and
    /// embedder failures read as "no one recognized".
    pub fn recognize<D, E>(&self, frame: &Frame, detector: &mut D, embedder: &mut E) -> Vec<FaceMatch>
    where
        D: FaceDetector,
        E: FaceEmbedder,
    {
        let faces = match detector.detect(frame) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(sequence = frame.sequence, error = %e, "detection failed");
                return Vec::new();
            }
        };

        faces
            .into_iter()
            .map(|face| {
                let result = match embedder.embed(frame, &face) {
                    Ok(raw) => self.identify(&raw),
                    Err(e) => {
                        tracing::warn!(sequence = frame.sequence, error = %e, "embedding failed");
                        MatchResult::Unmatched { score: 0.0 }
                    }
                };
                FaceMatch { face, result }
            })
            .collect()
    }

    /// Match one raw embedding and attach the identity's profile.
    pub fn identify(&self, raw: &[f32]) -> MatchResult {
        let result = self.matcher.identify(
            raw,
            self.config.embedding_dim,
            self.store.gallery(),
            self.config.recognition_threshold,
        );
        match result {
            MatchResult::Matched { identity, score, .. } => MatchResult::Matched {
                identity,
                score,
                profile: self.lookup_profile(identity),
            },
            unmatched => unmatched,
        }
    }

    pub fn process_frame(&mut self, results: &[MatchResult]) -> Result<Vec<Outcome>, FrameError> {
        self.process_frame_at(results, Local::now().naive_local())
    }

    /// Advance the stability tracker with one frame of results and act on
    /// every identity confirmed by it. Any unmatched face in the frame is
    /// offered to the unknown throttle once; throttled unknowns are not
    /// reported.
    ///
    /// A failed append does not stop the frame: the remaining identities
    /// are still processed, the failed identity must be confirmed again, and
    /// the error carries every outcome that was logged.
    pub fn process_frame_at(
        &mut self,
        results: &[MatchResult],
        now: NaiveDateTime,
    ) -> Result<Vec<Outcome>, FrameError> {
        let threshold = self.config.recognition_threshold;
        let observations: Vec<(Option<IdentityId>, f32)> =
            results.iter().map(|r| (r.identity(), r.score())).collect();

        let mut outcomes = Vec::new();
        let mut failure = None;
        for (identity, score) in self.tracker.observe_frame(&observations, threshold) {
            tracing::debug!(identity, score, "recognition confirmed");
            match self.process_recognition_at(Some(identity), score, now) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    self.tracker.forget(identity);
                    failure.get_or_insert(e);
                }
            }
        }

        let best_unknown = results
            .iter()
            .filter(|r| !r.is_match() || r.score() < threshold)
            .map(MatchResult::score)
            .reduce(f32::max);
        if let Some(score) = best_unknown {
            match self.process_recognition_at(None, score, now) {
                Ok(Outcome::Suppressed { .. }) => {}
                Ok(logged) => outcomes.push(logged),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            None => Ok(outcomes),
            Some(source) => Err(FrameError {
                logged: outcomes,
                source,
            }),
        }
    }

    pub fn process_recognition(
        &mut self,
        identity: Option<IdentityId>,
        score: f32,
    ) -> Result<Outcome, EngineError> {
        self.process_recognition_at(identity, score, Local::now().naive_local())
    }

    /// Turn a confirmed recognition (or an unknown face, when `identity` is
    /// `None`) into at most one logged event. The event is appended before
    /// it is returned.
    pub fn process_recognition_at(
        &mut self,
        identity: Option<IdentityId>,
        score: f32,
        now: NaiveDateTime,
    ) -> Result<Outcome, EngineError> {
        let Some(identity) = identity else {
            if !self.throttle.should_log_unknown(now) {
                return Ok(Outcome::Suppressed { identity: None });
            }
            let event = self.record(None, EventKind::Unknown, now, score)?;
            tracing::info!(score, "unknown face logged");
            return Ok(Outcome::UnknownLogged(event));
        };

        if let Some(profile) = self.lookup_profile(identity) {
            if !profile.active {
                return self.deny(&profile, score, now);
            }
        }

        let last = self
            .log
            .last_event_for(identity, &EventKind::PRESENCE)
            .map_err(EngineError::Log)?;

        match self.decider.decide(now, last.as_ref()) {
            Decision::Suppressed => {
                tracing::debug!(identity, score, "recognized again within re-entry window; not logged");
                Ok(Outcome::Suppressed { identity: Some(identity) })
            }
            Decision::Entry => {
                let event = self.record(Some(identity), EventKind::Entry, now, score)?;
                tracing::info!(identity, score, "entry recorded");
                Ok(Outcome::Entry(event))
            }
            Decision::Exit => {
                let event = self.record(Some(identity), EventKind::Exit, now, score)?;
                tracing::info!(identity, score, "exit recorded");
                Ok(Outcome::Exit(event))
            }
        }
    }

    fn deny(&mut self, profile: &Profile, score: f32, now: NaiveDateTime) -> Result<Outcome, EngineError> {
        let identity = profile.id;
        let last = self
            .log
            .last_event_for(identity, &[EventKind::Denied])
            .map_err(EngineError::Log)?;

        if self.decider.decide(now, last.as_ref()) == Decision::Suppressed {
            return Ok(Outcome::Suppressed { identity: Some(identity) });
        }

        let event = self.record(Some(identity), EventKind::Denied, now, score)?;
        tracing::info!(identity, name = %profile.display_name(), score, "access denied: identity deactivated");
        Ok(Outcome::Denied(event))
    }

    fn record(
        &mut self,
        identity: Option<IdentityId>,
        kind: EventKind,
        now: NaiveDateTime,
        score: f32,
    ) -> Result<AccessEvent, EngineError> {
        let event = AccessEvent {
            identity,
            kind,
            timestamp: now,
            confidence: Some(score),
        };
        if let Err(e) = self.log.append(&event) {
            tracing::error!(?identity, %kind, error = %e, "failed to append access event");
            return Err(EngineError::Log(e));
        }
        Ok(event)
    }

    fn lookup_profile(&self, identity: IdentityId) -> Option<Profile> {
        match self.log.profile(identity) {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(identity, error = %e, "profile lookup failed");
                None
            }
        }
    }

    /// Replace an identity's reference embeddings.
    pub fn enroll(&mut self, identity: IdentityId, raw: &[Vec<f32>]) -> Result<usize, EnrollError> {
        self.store.upsert(identity, raw)
    }

    pub fn remove(&mut self, identity: IdentityId) -> Result<bool, StoreError> {
        self.store.remove(identity)
    }

    /// Re-read the gallery; the last loaded gallery stays in use on failure.
    pub fn reload(&mut self) -> Result<usize, StoreError> {
        self.store.reload()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            gallery: self.store.stats(),
            recognition_threshold: self.config.recognition_threshold,
            confirmation_frames: self.config.confirmation_frames,
            reentry_window_secs: self.config.reentry_window_secs,
            unknown_log_interval_secs: self.config.unknown_log_interval_secs,
            top_k: self.config.top_k,
            embedding_dim: self.config.embedding_dim,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &EmbeddingStore<B> {
        &self.store
    }

    pub fn tracker(&self) -> &StabilityTracker {
        &self.tracker
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut L {
        &mut self.log
    }
}
