//! Logging setup: an `EnvFilter`-driven `fmt` layer on stderr and an
//! optional SQLite sink for warn+ records.

mod logging;

pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};

use std::path::PathBuf;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("log database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("a global subscriber is already installed")]
    AlreadyInitialized,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable lines.
    Text,
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. `RUST_LOG` overrides it.
    pub log_level: Level,
    /// Per-module levels, e.g. `("tern_engine", DEBUG)`.
    pub module_levels: Vec<(String, Level)>,
    pub format: LogFormat,
    /// Where to persist warn+ records. `None` disables the sink.
    pub log_db_path: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            format: LogFormat::Json,
            log_db_path: None,
        }
    }
}

/// Keeps the log sink reachable for queries after initialisation.
pub struct TelemetryGuard {
    log_sink: Option<Arc<SqliteLogSink>>,
}

impl TelemetryGuard {
    /// The persisted-log sink, if one was configured and opened.
    pub fn logs(&self) -> Option<&SqliteLogSink> {
        self.log_sink.as_deref()
    }
}

/// `EnvFilter` directives for the configured levels, e.g. `info,tern_engine=debug`.
pub fn filter_directives(config: &TelemetryConfig) -> String {
    let mut directives = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        directives.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    directives
}

/// Install the global subscriber. Call once at startup.
///
/// A log database that cannot be opened disables the sink rather than
/// failing start-up.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directives(&config)));

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let mut sink_error = None;
    let log_sink = match &config.log_db_path {
        Some(path) => match SqliteLogSink::open(path) {
            Ok(sink) => Some(Arc::new(sink)),
            Err(e) => {
                sink_error = Some(e);
                None
            }
        },
        None => None,
    };
    let sqlite_layer = log_sink.clone().map(SqliteLogLayer::new);

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .with(sqlite_layer)
        .try_init()
        .map_err(|_| TelemetryError::AlreadyInitialized)?;

    if let Some(e) = sink_error {
        tracing::warn!(error = %e, "log database unavailable, persisted logs disabled");
    }

    Ok(TelemetryGuard { log_sink })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_module_levels() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("tern_engine".into(), Level::DEBUG), ("tern_store".into(), Level::TRACE)],
            ..TelemetryConfig::default()
        };
        assert_eq!(filter_directives(&config), "warn,tern_engine=debug,tern_store=trace");
    }

    #[test]
    fn default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.log_db_path.is_none());
        assert_eq!(filter_directives(&config), "info");
    }

    // The only test in this crate that installs the global subscriber.
    #[test]
    fn init_opens_sink_and_rejects_second_install() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.db");
        let guard = init_telemetry(TelemetryConfig {
            log_db_path: Some(path.clone()),
            ..TelemetryConfig::default()
        })
        .unwrap();

        tracing::warn!(session_id = "ses_init", "persisted");
        let logs = guard.logs().unwrap();
        let records = logs
            .query(&LogQuery {
                session_id: Some("ses_init".into()),
                ..LogQuery::default()
            })
            .unwrap();
        assert_eq!(records.len(), 1);

        let again = init_telemetry(TelemetryConfig::default());
        assert!(matches!(again, Err(TelemetryError::AlreadyInitialized)));
    }
}
