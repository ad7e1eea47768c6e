//! Worker configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use xraygen_core::stuck::{DEFAULT_CHECK_INTERVAL_SECS, DEFAULT_SAMPLE_BUDGET_SECS};
use xraygen_renderer::codec::DEFAULT_THUMBNAIL_MAX_EDGE;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("expected 'text' or 'json', got '{other}'")),
        }
    }
}

/// Worker configuration.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Postgres URL. `None` runs against in-memory stores.
    pub database_url: Option<String>,
    /// Root directory of the local blob store.
    pub blob_root: PathBuf,
    /// Render service base URL. `None` uses the built-in synthetic renderer.
    pub renderer_url: Option<String>,
    /// Stable worker name; unfinished deliveries claimed under it are
    /// requeued on start-up.
    pub worker_name: String,
    pub worker_concurrency: usize,
    pub max_render_contexts: usize,
    pub queue_poll_interval: Duration,
    pub progress_min_interval: Duration,
    /// Expected time per sample before a session counts as stuck.
    pub sample_budget: chrono::Duration,
    pub stuck_check_interval: Duration,
    /// Sessions a non-staff user may own.
    pub user_session_limit: i64,
    pub thumbnail_max_edge: u32,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                      | Default          |
    /// |------------------------------|------------------|
    /// | `DATABASE_URL`               | unset (memory)   |
    /// | `BLOB_ROOT`                  | `./data/blobs`   |
    /// | `RENDERER_URL`               | unset (synthetic)|
    /// | `WORKER_NAME`                | `xraygen-worker` |
    /// | `WORKER_CONCURRENCY`         | `1`              |
    /// | `MAX_RENDER_CONTEXTS`        | `1`              |
    /// | `QUEUE_POLL_INTERVAL_MS`     | `1000`           |
    /// | `PROGRESS_MIN_INTERVAL_MS`   | `500`            |
    /// | `SESSION_SAMPLE_BUDGET_SECS` | `300`            |
    /// | `STUCK_CHECK_INTERVAL_SECS`  | `60`             |
    /// | `USER_SESSION_LIMIT`         | `5`              |
    /// | `THUMBNAIL_MAX_EDGE`         | `256`            |
    /// | `LOG_FORMAT`                 | `text`           |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let optional = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let sample_budget_secs: i64 =
            parse(&lookup, "SESSION_SAMPLE_BUDGET_SECS", DEFAULT_SAMPLE_BUDGET_SECS)?;

        Ok(Self {
            database_url: optional("DATABASE_URL"),
            blob_root: optional("BLOB_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/blobs")),
            renderer_url: optional("RENDERER_URL"),
            worker_name: optional("WORKER_NAME").unwrap_or_else(|| "xraygen-worker".into()),
            worker_concurrency: positive(&lookup, "WORKER_CONCURRENCY", 1)?,
            max_render_contexts: positive(&lookup, "MAX_RENDER_CONTEXTS", 1)?,
            queue_poll_interval: Duration::from_millis(parse(
                &lookup,
                "QUEUE_POLL_INTERVAL_MS",
                1000,
            )?),
            progress_min_interval: Duration::from_millis(parse(
                &lookup,
                "PROGRESS_MIN_INTERVAL_MS",
                500,
            )?),
            sample_budget: chrono::Duration::seconds(sample_budget_secs),
            stuck_check_interval: Duration::from_secs(parse(
                &lookup,
                "STUCK_CHECK_INTERVAL_SECS",
                DEFAULT_CHECK_INTERVAL_SECS,
            )?),
            user_session_limit: parse(&lookup, "USER_SESSION_LIMIT", 5)?,
            thumbnail_max_edge: parse(&lookup, "THUMBNAIL_MAX_EDGE", DEFAULT_THUMBNAIL_MAX_EDGE)?,
            log_format: parse(&lookup, "LOG_FORMAT", LogFormat::Text)?,
        })
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => {
            value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                value: value.clone(),
                reason: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

fn positive(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: usize,
) -> Result<usize, ConfigError> {
    let value = parse(lookup, name, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            name,
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }
    Ok(value)
}
