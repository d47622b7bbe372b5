use serde::Deserialize;
use std::time::Duration;

/// Tunables for matching and access decisions.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum top-k averaged cosine similarity for a positive match.
    pub recognition_threshold: f32,
    /// Consecutive matching frames required before a decision is made.
    pub confirmation_frames: u32,
    /// Repeated recognitions closer than this are the same physical presence.
    pub reentry_window_secs: u64,
    /// Minimum spacing between two logged unknown-face events.
    pub unknown_log_interval_secs: u64,
    /// Number of best per-identity similarities averaged into its score.
    pub top_k: usize,
    /// Required embedding length.
    pub embedding_dim: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recognition_threshold: 0.6,
            confirmation_frames: 5,
            reentry_window_secs: 60,
            unknown_log_interval_secs: 10,
            top_k: 5,
            embedding_dim: 512,
        }
    }
}

impl EngineConfig {
    /// Clamp counts that make no sense at zero.
    pub fn sanitized(mut self) -> Self {
        if self.top_k == 0 {
            tracing::warn!("top_k = 0 is not usable; using 1");
            self.top_k = 1;
        }
        if self.confirmation_frames == 0 {
            tracing::warn!("confirmation_frames = 0 is not usable; using 1");
            self.confirmation_frames = 1;
        }
        if self.embedding_dim == 0 {
            tracing::warn!("embedding_dim = 0 is not usable; using 512");
            self.embedding_dim = 512;
        }
        self
    }

    pub fn reentry_window(&self) -> Duration {
        Duration::from_secs(self.reentry_window_secs)
    }

    pub fn unknown_log_interval(&self) -> Duration {
        Duration::from_secs(self.unknown_log_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.recognition_threshold, 0.6);
        assert_eq!(c.confirmation_frames, 5);
        assert_eq!(c.reentry_window(), Duration::from_secs(60));
        assert_eq!(c.unknown_log_interval(), Duration::from_secs(10));
        assert_eq!(c.top_k, 5);
        assert_eq!(c.embedding_dim, 512);
    }

    #[test]
    fn test_sanitized_clamps_zero_counts() {
        let c = EngineConfig {
            top_k: 0,
            confirmation_frames: 0,
            embedding_dim: 0,
            ..EngineConfig::default()
        }
        .sanitized();
        assert_eq!(c.top_k, 1);
        assert_eq!(c.confirmation_frames, 1);
        assert_eq!(c.embedding_dim, 512);
    }
}
