//! Daemon configuration loading with deep merge and environment overrides.
//!
//! Loading flow:
//! 1. Start with compiled defaults
//! 2. If the config file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use gridhub_engine::EngineConfig;
use gridhub_modules::SettingsMap;
use gridhub_server::ServerConfig;

/// One module instance declared in the config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModuleEntry {
    /// Instance ID, unique across the config.
    pub id: String,
    /// Adapter kind to build the instance from.
    pub kind: String,
    /// Adapter settings, validated at activation.
    #[serde(default)]
    pub settings: SettingsMap,
}

/// The whole daemon configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DaemonConfig {
    /// HTTP/WebSocket server tunables.
    pub server: ServerConfig,
    /// Engine tunables.
    pub engine: EngineConfig,
    /// Module instances to activate at startup.
    pub modules: Vec<ModuleEntry>,
}

/// Resolve the default config path (`~/.gridhub/config.json`).
pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".gridhub").join("config.json")
}

/// Load configuration from a path with env var overrides.
///
/// A missing file yields the defaults; invalid JSON is an error.
pub fn load_from_path(path: &Path) -> anyhow::Result<DaemonConfig> {
    let defaults = serde_json::to_value(DaemonConfig::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading config from file");
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let user: Value = serde_json::from_str(&content)
            .with_context(|| format!("invalid JSON in {}", path.display()))?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "config file not found, using defaults");
        defaults
    };

    let mut config: DaemonConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply environment variable overrides. Invalid values are logged and
/// ignored, falling back to file/default.
pub fn apply_env_overrides(config: &mut DaemonConfig) {
    if let Some(v) = read_env_string("GRIDHUB_HOST") {
        config.server.host = v;
    }
    if let Some(v) = read_env_u16("GRIDHUB_PORT", 1, 65535) {
        config.server.port = v;
    }
    if let Some(v) = read_env_usize("GRIDHUB_MAX_CONNECTIONS", 1, 10_000) {
        config.server.max_connections = v;
    }
    if let Some(v) = read_env_u64("GRIDHUB_TICK_MS", 50, 600_000) {
        config.engine.tick_ms = v;
    }
    if let Some(v) = read_env_usize("GRIDHUB_WORKERS", 1, 1024) {
        config.engine.workers = v;
    }
    if let Some(v) = read_env_string("GRIDHUB_CACHE_ROOT") {
        config.engine.artifact_root = PathBuf::from(v);
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
