use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration: maps to `air.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AirConfig {
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    pub trust: TrustConfig,
    pub kill_switch: KillSwitchConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address.
    pub listen: String,
    /// Enable permissive CORS.
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8200".into(),
            cors: false,
        }
    }
}

// ── Episode ledger ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Base URL of the episode store. Empty disables trust lookups
    /// (every agent scores neutral).
    pub episode_store_url: String,
    /// Per-request timeout for ledger lookups.
    pub timeout_ms: u64,
    /// How long an agent's aggregates are cached. 0 disables the cache.
    pub cache_ttl_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            episode_store_url: "http://localhost:8100".into(),
            timeout_ms: 2_000,
            cache_ttl_secs: 30,
        }
    }
}

// ── Trust ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Episode count at which the success ratio carries half its weight.
    pub confidence_episodes: u32,
    /// Scores at or above this are "high" trust.
    pub high_threshold: f64,
    /// Scores below this are "low" trust.
    pub low_threshold: f64,
    /// Average cost per episode above which the cost penalty applies.
    pub cost_ceiling_usd: f64,
    /// Amount subtracted from the score for expensive agents.
    pub cost_penalty: f64,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            confidence_episodes: 5,
            high_threshold: 0.8,
            low_threshold: 0.3,
            cost_ceiling_usd: 1.0,
            cost_penalty: 0.1,
        }
    }
}

// ── Kill switches ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KillSwitchConfig {
    /// Max wait for a policy's switch state before failing closed. The wait
    /// blocks the evaluating worker thread, so keep it to tens of milliseconds.
    pub lock_timeout_ms: u64,
    /// Window used by `rate` switches that don't set `window_secs`.
    pub default_window_secs: u64,
}

/// Above this, a contended switch lock visibly stalls the async runtime.
pub const MAX_LOCK_TIMEOUT_MS: u64 = 1000;

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 50,
            default_window_secs: 60,
        }
    }
}

// ── Engine ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// JSON file holding an array of policies to load at startup.
    pub seed_file: Option<PathBuf>,
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "{}: {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, " (hint: {})", h)?;
        }
        Ok(())
    }
}

impl AirConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Server ───
        if self.server.listen.trim().is_empty() {
            warnings.push(ConfigWarning {
                field: "server.listen".into(),
                message: "listen address is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. '0.0.0.0:8200'".into()),
            });
        }

        // ── Ledger ───
        if self.ledger.episode_store_url.is_empty() {
            warnings.push(ConfigWarning {
                field: "ledger.episode_store_url".into(),
                message: "no episode store configured; every agent scores neutral trust".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        } else if !self.ledger.episode_store_url.starts_with("http://")
            && !self.ledger.episode_store_url.starts_with("https://")
        {
            warnings.push(ConfigWarning {
                field: "ledger.episode_store_url".into(),
                message: format!(
                    "'{}' is not an http(s) URL",
                    self.ledger.episode_store_url
                ),
                severity: WarningSeverity::Error,
                hint: Some("Use e.g. 'http://localhost:8100'".into()),
            });
        }
        if self.ledger.timeout_ms == 0 {
            warnings.push(ConfigWarning {
                field: "ledger.timeout_ms".into(),
                message: "timeout is 0; every ledger lookup will fail".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set to e.g. 2000".into()),
            });
        }

        // ── Trust ───
        let t = &self.trust;
        for (field, value) in [
            ("trust.high_threshold", t.high_threshold),
            ("trust.low_threshold", t.low_threshold),
            ("trust.cost_penalty", t.cost_penalty),
        ] {
            if !(0.0..=1.0).contains(&value) {
                warnings.push(ConfigWarning {
                    field: field.into(),
                    message: format!("{} is outside [0, 1]", value),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
        }
        if t.low_threshold >= t.high_threshold {
            warnings.push(ConfigWarning {
                field: "trust.low_threshold".into(),
                message: format!(
                    "low threshold {} is not below high threshold {}",
                    t.low_threshold, t.high_threshold
                ),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }
        if t.cost_ceiling_usd <= 0.0 {
            warnings.push(ConfigWarning {
                field: "trust.cost_ceiling_usd".into(),
                message: "cost ceiling is zero or negative; every agent pays the cost penalty"
                    .into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set to e.g. 1.0".into()),
            });
        }

        // ── Kill switches ───
        if self.kill_switch.default_window_secs == 0 {
            warnings.push(ConfigWarning {
                field: "kill_switch.default_window_secs".into(),
                message: "rate window is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 60".into()),
            });
        }
        if self.kill_switch.lock_timeout_ms == 0 {
            warnings.push(ConfigWarning {
                field: "kill_switch.lock_timeout_ms".into(),
                message: "lock timeout is 0; contended policies will fail closed".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set to e.g. 50".into()),
            });
        } else if self.kill_switch.lock_timeout_ms > MAX_LOCK_TIMEOUT_MS {
            warnings.push(ConfigWarning {
                field: "kill_switch.lock_timeout_ms".into(),
                message: format!(
                    "lock timeout of {}ms blocks a runtime worker thread while a policy is contended",
                    self.kill_switch.lock_timeout_ms
                ),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Keep it at or below {MAX_LOCK_TIMEOUT_MS}")),
            });
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Error,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        // ── Engine ───
        if let Some(ref seed) = self.engine.seed_file {
            if !seed.exists() {
                warnings.push(ConfigWarning {
                    field: "engine.seed_file".into(),
                    message: format!("{} does not exist", seed.display()),
                    severity: WarningSeverity::Warning,
                    hint: None,
                });
            }
        }

        // Check for hard errors
        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
