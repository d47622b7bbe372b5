//! turnstile-store — SQLite persistence for the access engine.
//!
//! Implements the core collaborator traits: [`SqliteEmbeddings`] backs the
//! embedding gallery, [`SqliteAccessLog`] is the append-only access log and
//! the identity directory, and carries the reporting queries. [`Config`]
//! is the layered configuration both binaries resolve the database from.

mod db;

pub mod access_log;
pub mod config;
pub mod embeddings;
pub mod error;

pub use access_log::{EventFilter, LogEntry, NewIdentity, SqliteAccessLog, Statistics};
pub use config::{Config, ConfigError};
pub use embeddings::SqliteEmbeddings;
pub use error::StorageError;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::path::PathBuf;

/// Default database location: `$XDG_DATA_HOME/turnstile/access.db`,
/// falling back to `~/.local/share`.
pub fn default_db_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("turnstile")
        .join("access.db")
}

/// Closing time used when none (or a malformed one) is configured.
pub const DEFAULT_CLOSING_TIME: &str = "23:59";

/// Day an end-of-day report generated at `now` should cover: today once
/// the closing time has passed, yesterday before it.
pub fn report_date(now: NaiveDateTime, closing_time: &str) -> NaiveDate {
    let closing = NaiveTime::parse_from_str(closing_time.trim(), "%H:%M").unwrap_or_else(|_| {
        tracing::warn!(closing_time, "invalid closing time; using {DEFAULT_CLOSING_TIME}");
        NaiveTime::from_hms_opt(23, 59, 0).unwrap_or_default()
    });
    let today = now.date();
    if now.time() >= closing {
        today
    } else {
        today.pred_opt().unwrap_or(today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnstile_core::{AccessEngine, EngineConfig, Outcome, TIMESTAMP_FORMAT};

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap()
    }

    #[test]
    fn test_report_date() {
        assert_eq!(report_date(at("2024-01-10 18:30:00"), "18:00"), at("2024-01-10 00:00:00").date());
        assert_eq!(report_date(at("2024-01-10 07:30:00"), "18:00"), at("2024-01-09 00:00:00").date());
        assert_eq!(report_date(at("2024-01-10 23:59:30"), "bogus"), at("2024-01-10 00:00:00").date());
        assert_eq!(report_date(at("2024-01-10 12:00:00"), "bogus"), at("2024-01-09 00:00:00").date());
    }

    fn unit(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 512];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn test_engine_over_sqlite() {
        let log = SqliteAccessLog::open_in_memory().unwrap();
        let ana = log
            .add_identity(
                &NewIdentity {
                    first_name: "Ana".into(),
                    last_name: "Ruiz".into(),
                    role: "Operator".into(),
                    age: 31,
                },
                at("2024-01-01 09:00:00"),
            )
            .unwrap();

        let mut engine = AccessEngine::open(
            EngineConfig::default(),
            SqliteEmbeddings::open_in_memory().unwrap(),
            log,
        )
        .unwrap();
        engine.enroll(ana, &[unit(0), unit(0)]).unwrap();

        let face = engine.identify(&unit(0));
        assert_eq!(face.identity(), Some(ana));

        let start = at("2024-01-10 08:00:00");
        let mut outcomes = Vec::new();
        for i in 0..5 {
            let now = start + chrono::Duration::seconds(i);
            outcomes.extend(engine.process_frame_at(std::slice::from_ref(&face), now).unwrap());
        }
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], Outcome::Entry(_)));

        let o = engine
            .process_recognition_at(Some(ana), 0.95, at("2024-01-10 12:00:00"))
            .unwrap();
        assert!(matches!(o, Outcome::Exit(_)));

        let open = engine.log().open_entries(start.date()).unwrap();
        assert!(open.is_empty());

        engine.log().deactivate(ana).unwrap();
        let o = engine
            .process_recognition_at(Some(ana), 0.95, at("2024-01-10 13:00:00"))
            .unwrap();
        assert!(matches!(o, Outcome::Denied(_)));

        let kinds: Vec<String> = engine
            .log()
            .recent_events(10)
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, vec!["denied", "exit", "entry"]);
        assert_eq!(engine.log().statistics(start.date()).unwrap().permitted, 2);
    }
}
