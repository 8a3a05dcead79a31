//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TernSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `TERN_*` environment overrides
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{LogFormat, TernSettings};

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// `~/.tern`, or `/tmp/.tern` when `HOME` is unset.
pub fn tern_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tern")
}

/// Resolve the path to the settings file (`~/.tern/settings.json`).
pub fn settings_path() -> PathBuf {
    tern_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TernSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with process env overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid final value
/// is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TernSettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// Like [`load_settings_from_path`] with an explicit environment.
pub fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<TernSettings> {
    let defaults = serde_json::to_value(TernSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TernSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TERN_*` overrides read through `env`.
///
/// Integers must parse and sit in range; booleans accept
/// `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`. Anything else is
/// logged and ignored.
pub fn apply_env_overrides(settings: &mut TernSettings, env: impl Fn(&str) -> Option<String>) {
    let env = Env(&env);

    // ── Server ──
    if let Some(v) = env.string("TERN_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64("TERN_PORT", 0, 65535) {
        settings.server.port = v as u16;
    }
    if let Some(v) = env.u64("TERN_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
        settings.server.heartbeat_interval_secs = v;
    }

    // ── Orchestrator ──
    if let Some(v) = env.u64("TERN_MAX_ROUNDS", 1, 10_000) {
        settings.orchestrator.max_rounds = v as u32;
    }
    if let Some(v) = env.u64("TERN_TOOL_CONCURRENCY", 1, 256) {
        settings.orchestrator.tool_concurrency = v as u32;
    }
    if let Some(v) = env.u64("TERN_TOOL_TIMEOUT_MS", 1, 3_600_000) {
        settings.orchestrator.tool_timeout_ms = v;
    }
    if let Some(v) = env.u64("TERN_PROVIDER_TIMEOUT_MS", 1, 3_600_000) {
        settings.orchestrator.provider_timeout_ms = v;
    }
    if let Some(v) = env.u64("TERN_MAX_RETRIES", 0, 100) {
        settings.orchestrator.max_retries = v as u32;
    }
    if let Some(v) = env.bool("TERN_TRACE_DELTAS") {
        settings.orchestrator.trace_deltas = v;
    }

    // ── Provider ──
    if let Some(v) = env.string("TERN_PROVIDER") {
        settings.provider.name = v;
    }
    if let Some(v) = env.string("TERN_SCRIPT_PATH") {
        settings.provider.script_path = Some(v);
    }

    // ── Telemetry ──
    if let Some(v) = env.string("TERN_LOG_LEVEL") {
        if LOG_LEVELS.contains(&v.to_lowercase().as_str()) {
            settings.telemetry.level = v.to_lowercase();
        } else {
            warn!(key = "TERN_LOG_LEVEL", value = %v, "unknown log level, ignoring");
        }
    }
    if let Some(v) = env.string("TERN_LOG_FORMAT") {
        match v.to_lowercase().as_str() {
            "json" => settings.telemetry.format = LogFormat::Json,
            "text" => settings.telemetry.format = LogFormat::Text,
            _ => warn!(key = "TERN_LOG_FORMAT", value = %v, "unknown log format, ignoring"),
        }
    }

    if let Some(v) = env.string("TERN_DB_PATH") {
        settings.database_path = v;
    }
}

/// Reject settings the runtime cannot start with.
pub fn validate(settings: &TernSettings) -> Result<()> {
    let orch = &settings.orchestrator;
    let checks = [
        (orch.max_rounds == 0, "orchestrator.maxRounds must be at least 1"),
        (orch.tool_concurrency == 0, "orchestrator.toolConcurrency must be at least 1"),
        (orch.tool_timeout_ms == 0, "orchestrator.toolTimeoutMs must be positive"),
        (orch.provider_timeout_ms == 0, "orchestrator.providerTimeoutMs must be positive"),
        (orch.subscriber_capacity == 0, "orchestrator.subscriberCapacity must be at least 1"),
        (
            orch.retry_base_delay_ms > orch.retry_max_delay_ms,
            "orchestrator.retryBaseDelayMs exceeds retryMaxDelayMs",
        ),
        (settings.server.heartbeat_interval_secs == 0, "server.heartbeatIntervalSecs must be positive"),
        (settings.provider.name.trim().is_empty(), "provider.name is empty"),
        (settings.database_path.trim().is_empty(), "databasePath is empty"),
    ];
    if let Some((_, msg)) = checks.iter().find(|(bad, _)| *bad) {
        return Err(SettingsError::InvalidValue((*msg).to_string()));
    }

    let levels = std::iter::once(&settings.telemetry.level).chain(settings.telemetry.modules.values());
    for level in levels {
        if !LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
            return Err(SettingsError::InvalidValue(format!("unknown log level '{level}'")));
        }
    }
    Ok(())
}

// ── Pure parsing functions ──

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, min, max, "invalid integer env var, ignoring");
        }
        result
    }
}
