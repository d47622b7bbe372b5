//! Entry/exit state machine.
//!
//! The state for an identity is never held in memory: it is derived from the
//! identity's last entry/exit event in the access log on every decision, so
//! restarts cannot make it stale.
//!
//! # Availability bias
//!
//! A last event whose timestamp cannot be parsed decides `Entry`. A corrupt
//! history row must never keep someone out; the price is that such a row can
//! produce an entry where an exit was due.

use crate::types::{EventKind, LastEvent};
use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Format used when writing access-log timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug, Clone, PartialEq)]
#[error("unparseable timestamp: {0:?}")]
pub struct UnparseableTimestamp(pub String);

/// Parse a stored access-log timestamp.
///
/// Accepts ISO-8601 with a `T` separator (optional fraction), the
/// space-separated log format, and RFC 3339 with an offset, which is reduced
/// to the naive local time it names.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, UnparseableTimestamp> {
    let s = raw.trim();
    if let Ok(dt) = s.parse::<NaiveDateTime>() {
        return Ok(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT) {
        return Ok(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_local());
    }
    Err(UnparseableTimestamp(raw.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Entry,
    Exit,
    /// Same physical presence as the last event; nothing is logged.
    Suppressed,
}

#[derive(Debug, Clone)]
pub struct AccessDecider {
    reentry_window: Duration,
}

impl Default for AccessDecider {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl AccessDecider {
    pub fn new(reentry_window: Duration) -> Self {
        Self { reentry_window }
    }

    pub fn reentry_window(&self) -> Duration {
        self.reentry_window
    }

    /// Decide the next event for an identity given its last entry/exit.
    ///
    /// 1. no history → `Entry`
    /// 2. last event on an earlier day → `Entry`
    /// 3. last event within the re-entry window → `Suppressed`
    /// 4. last was `Exit` → `Entry`, otherwise `Exit`
    pub fn decide(&self, now: NaiveDateTime, last: Option<&LastEvent>) -> Decision {
        let Some(last) = last else {
            return Decision::Entry;
        };

        let last_at = match parse_timestamp(&last.recorded_at) {
            Ok(ts) => ts,
            Err(e) => {
                tracing::warn!(error = %e, "last event timestamp unreadable; defaulting to entry");
                return Decision::Entry;
            }
        };

        if last_at.date() < now.date() {
            return Decision::Entry;
        }

        if self.within_window(now, last_at) {
            return Decision::Suppressed;
        }
        if last_at > now {
            tracing::warn!(
                last = %last_at,
                now = %now,
                "last event is later than now; ignoring it for re-entry suppression"
            );
        }

        match last.kind {
            EventKind::Exit => Decision::Entry,
            _ => Decision::Exit,
        }
    }

    /// True when `now` and `last_at` are less than one re-entry window
    /// apart. A small step back of the clock still suppresses; a `last_at`
    /// further in the future does not hold the identity indefinitely.
    pub fn within_window(&self, now: NaiveDateTime, last_at: NaiveDateTime) -> bool {
        let elapsed_ms = (now - last_at).num_milliseconds();
        let window_ms = i64::try_from(self.reentry_window.as_millis()).unwrap_or(i64::MAX);
        elapsed_ms.saturating_abs() < window_ms
    }
}
