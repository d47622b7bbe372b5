//! Layered configuration shared by the daemon and the CLI.
//!
//! Resolution order, each layer overriding the one before: built-in
//! defaults, the optional TOML file, then `TURNSTILE_*` environment
//! variables.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use turnstile_core::EngineConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Matching and decision tunables.
    pub engine: EngineConfig,
    /// End-of-day cut-off (`HH:MM`) used by reports.
    pub closing_time: String,
    /// Use the system bus instead of the session bus.
    pub system_bus: bool,
}

/// On-disk layout of the TOML config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    db_path: Option<PathBuf>,
    closing_time: Option<String>,
    bus: Option<String>,
    engine: EngineConfig,
}

impl Config {
    /// Load from the config file (if present) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path();
        let file = if path.exists() {
            let file = read_file(&path)?;
            tracing::debug!(path = %path.display(), "config file loaded");
            file
        } else {
            FileConfig::default()
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut engine = file.engine;
        engine.recognition_threshold = env_or(
            &env,
            "TURNSTILE_RECOGNITION_THRESHOLD",
            engine.recognition_threshold,
        );
        engine.confirmation_frames =
            env_or(&env, "TURNSTILE_CONFIRMATION_FRAMES", engine.confirmation_frames);
        engine.reentry_window_secs =
            env_or(&env, "TURNSTILE_REENTRY_WINDOW_SECS", engine.reentry_window_secs);
        engine.unknown_log_interval_secs = env_or(
            &env,
            "TURNSTILE_UNKNOWN_LOG_INTERVAL_SECS",
            engine.unknown_log_interval_secs,
        );
        engine.top_k = env_or(&env, "TURNSTILE_TOP_K", engine.top_k);
        engine.embedding_dim = env_or(&env, "TURNSTILE_EMBEDDING_DIM", engine.embedding_dim);

        let db_path = env("TURNSTILE_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(crate::default_db_path);

        let closing_time = env("TURNSTILE_CLOSING_TIME")
            .or(file.closing_time)
            .unwrap_or_else(|| crate::DEFAULT_CLOSING_TIME.to_string());

        let bus = env("TURNSTILE_BUS").or(file.bus);

        Self {
            db_path,
            engine: engine.sanitized(),
            closing_time,
            system_bus: bus.as_deref() == Some("system"),
        }
    }
}

/// `TURNSTILE_CONFIG`, else `$XDG_CONFIG_HOME/turnstile/config.toml`.
fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("TURNSTILE_CONFIG") {
        return PathBuf::from(p);
    }
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("turnstile")
        .join("config.toml")
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_file(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn parse_file(text: &str) -> Result<FileConfig, toml::de::Error> {
    toml::from_str(text)
}

fn env_or<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match env(key) {
        Some(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparseable environment value");
            default
        }),
        None => default,
    }
}
