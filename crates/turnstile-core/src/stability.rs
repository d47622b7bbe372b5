//! Consecutive-frame confirmation of per-frame match results.

use crate::types::IdentityId;
use std::collections::HashMap;

/// Per-identity streak counter.
///
/// A streak grows by one for every frame in which the identity matches at or
/// above the threshold and resets when it is absent or falls below. The frame
/// on which a streak reaches `confirmation_frames` is the only one reported
/// as confirmed; the streak keeps counting past that point, so a person who
/// stays in view triggers once.
#[derive(Debug, Clone)]
pub struct StabilityTracker {
    confirmation_frames: u32,
    streaks: HashMap<IdentityId, u32>,
}

impl StabilityTracker {
    pub fn new(confirmation_frames: u32) -> Self {
        Self {
            confirmation_frames: confirmation_frames.max(1),
            streaks: HashMap::new(),
        }
    }

    /// Feed one observation. Returns true on the confirming frame only.
    pub fn observe(&mut self, identity: Option<IdentityId>, score: f32, threshold: f32) -> bool {
        let Some(identity) = identity else {
            return false;
        };

        if score < threshold {
            self.streaks.remove(&identity);
            return false;
        }

        let streak = self.streaks.entry(identity).or_insert(0);
        *streak = streak.saturating_add(1);
        *streak == self.confirmation_frames
    }

    /// Observe every face of one frame, then reset identities that were not
    /// in it. Returns the identities confirmed on this frame with their score.
    pub fn observe_frame(
        &mut self,
        observations: &[(Option<IdentityId>, f32)],
        threshold: f32,
    ) -> Vec<(IdentityId, f32)> {
        let mut confirmed = Vec::new();
        let mut seen = Vec::with_capacity(observations.len());

        for &(identity, score) in observations {
            if self.observe(identity, score, threshold) {
                if let Some(id) = identity {
                    confirmed.push((id, score));
                }
            }
            if let Some(id) = identity {
                if score >= threshold {
                    seen.push(id);
                }
            }
        }

        self.retain_seen(&seen);
        confirmed
    }

    /// Reset every identity not in `seen`.
    pub fn retain_seen(&mut self, seen: &[IdentityId]) {
        self.streaks.retain(|id, _| seen.contains(id));
    }

    /// Drop one identity's streak, so it has to be confirmed again.
    pub fn forget(&mut self, identity: IdentityId) {
        self.streaks.remove(&identity);
    }

    pub fn streak(&self, identity: IdentityId) -> u32 {
        self.streaks.get(&identity).copied().unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.streaks.clear();
    }
}

impl Default for StabilityTracker {
    fn default() -> Self {
        Self::new(5)
    }
}
