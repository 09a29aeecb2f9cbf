//! Environment-driven configuration and layered YAML loading.
//!
//! `AppConfig::from_env` recognizes every deployment variable; anything
//! unset falls back to a safe default (dev environment, mock broker, no
//! auto-approval). Values that parse but make no sense are init failures:
//! the daemon exits non-zero rather than guessing.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono_tz::Tz;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use serde_json::Value;

use tg_schemas::{canonical_json, sha256_hex};

pub mod layered;

pub use layered::{load_layered_yaml, LoadedConfig};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("bad value for {var}: {value:?} ({hint})")]
    BadValue {
        var: &'static str,
        value: String,
        hint: &'static str,
    },
    #[error("config file unreadable: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file malformed: {0}")]
    Parse(#[from] serde_yaml::Error),
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Paper,
    Live,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Paper => "paper",
            Environment::Live => "live",
        }
    }

    /// Dev runs against the deterministic mock; paper and live differ only
    /// by gateway address and credentials.
    pub fn uses_mock_broker(&self) -> bool {
        matches!(self, Environment::Dev)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub broker_host: String,
    pub broker_port: u16,
    pub broker_client_id: String,
    pub readonly_mode: bool,
    pub kill_switch_enabled: bool,
    pub kill_switch_reason: Option<String>,
    pub auto_approval: bool,
    pub auto_approval_max_notional: Decimal,
    pub strict_validation: bool,
    pub risk_policy_path: Option<PathBuf>,
    pub rate_limit_per_tool: u32,
    pub rate_limit_per_session: u32,
    pub rate_limit_global: u32,
    pub scheduler_timezone: Tz,
    /// Root for persisted state (audit log, kill-switch record, exports).
    pub data_dir: PathBuf,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            env: Environment::Dev,
            broker_host: "127.0.0.1".to_string(),
            broker_port: 4002,
            broker_client_id: "1".to_string(),
            readonly_mode: false,
            kill_switch_enabled: false,
            kill_switch_reason: None,
            auto_approval: false,
            auto_approval_max_notional: dec!(1000),
            strict_validation: true,
            risk_policy_path: None,
            rate_limit_per_tool: 60,
            rate_limit_per_session: 100,
            rate_limit_global: 1000,
            scheduler_timezone: chrono_tz::UTC,
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Testable core: resolve every variable through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = AppConfig::default();

        if let Some(v) = lookup("ENV") {
            cfg.env = match v.to_ascii_lowercase().as_str() {
                "dev" => Environment::Dev,
                "paper" => Environment::Paper,
                "live" => Environment::Live,
                _ => {
                    return Err(ConfigError::BadValue {
                        var: "ENV",
                        value: v,
                        hint: "expected dev|paper|live",
                    })
                }
            };
        }
        if let Some(v) = lookup("BROKER_HOST") {
            cfg.broker_host = v;
        }
        if let Some(v) = lookup("BROKER_PORT") {
            cfg.broker_port = v.parse().map_err(|_| ConfigError::BadValue {
                var: "BROKER_PORT",
                value: v,
                hint: "expected a port number",
            })?;
        }
        if let Some(v) = lookup("BROKER_CLIENT_ID") {
            cfg.broker_client_id = v;
        }
        if let Some(v) = lookup("READONLY_MODE") {
            cfg.readonly_mode = parse_bool("READONLY_MODE", &v)?;
        }
        if let Some(v) = lookup("KILL_SWITCH_ENABLED") {
            cfg.kill_switch_enabled = parse_bool("KILL_SWITCH_ENABLED", &v)?;
        }
        cfg.kill_switch_reason = lookup("KILL_SWITCH_REASON");
        if let Some(v) = lookup("AUTO_APPROVAL") {
            cfg.auto_approval = parse_bool("AUTO_APPROVAL", &v)?;
        }
        if let Some(v) = lookup("AUTO_APPROVAL_MAX_NOTIONAL") {
            cfg.auto_approval_max_notional =
                v.parse::<Decimal>().map_err(|_| ConfigError::BadValue {
                    var: "AUTO_APPROVAL_MAX_NOTIONAL",
                    value: v,
                    hint: "expected a decimal amount",
                })?;
        }
        if let Some(v) = lookup("STRICT_VALIDATION") {
            cfg.strict_validation = parse_bool("STRICT_VALIDATION", &v)?;
        }
        if let Some(v) = lookup("RISK_POLICY_PATH") {
            cfg.risk_policy_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("RATE_LIMIT_PER_TOOL") {
            cfg.rate_limit_per_tool = parse_u32("RATE_LIMIT_PER_TOOL", &v)?;
        }
        if let Some(v) = lookup("RATE_LIMIT_PER_SESSION") {
            cfg.rate_limit_per_session = parse_u32("RATE_LIMIT_PER_SESSION", &v)?;
        }
        if let Some(v) = lookup("RATE_LIMIT_GLOBAL") {
            cfg.rate_limit_global = parse_u32("RATE_LIMIT_GLOBAL", &v)?;
        }
        if let Some(v) = lookup("SCHEDULER_TIMEZONE") {
            cfg.scheduler_timezone = v.parse::<Tz>().map_err(|_| ConfigError::BadValue {
                var: "SCHEDULER_TIMEZONE",
                value: v,
                hint: "expected an IANA timezone name",
            })?;
        }
        if let Some(v) = lookup("DATABASE_URL") {
            cfg.data_dir = data_dir_from_url(&v);
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            cfg.log_level = v;
        }

        Ok(cfg)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.data_dir.join("audit/events.jsonl")
    }

    pub fn kill_switch_path(&self) -> PathBuf {
        self.data_dir.join("kill_switch.json")
    }

    pub fn export_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }

    pub fn feature_flags(&self) -> FeatureFlags {
        FeatureFlags {
            env: self.env,
            auto_approval: self.auto_approval,
            strict_validation: self.strict_validation,
            readonly_mode: self.readonly_mode,
            kill_switch_override: self.kill_switch_enabled,
        }
    }
}

/// File-backed stores root. Accepts `file://`, `sqlite://`, or a bare path.
fn data_dir_from_url(url: &str) -> PathBuf {
    let stripped = url
        .strip_prefix("file://")
        .or_else(|| url.strip_prefix("sqlite://"))
        .unwrap_or(url);
    PathBuf::from(stripped)
}

fn parse_bool(var: &'static str, v: &str) -> Result<bool, ConfigError> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::BadValue {
            var,
            value: v.to_string(),
            hint: "expected a boolean",
        }),
    }
}

fn parse_u32(var: &'static str, v: &str) -> Result<u32, ConfigError> {
    v.parse().map_err(|_| ConfigError::BadValue {
        var,
        value: v.to_string(),
        hint: "expected a non-negative integer",
    })
}

// ---------------------------------------------------------------------------
// Feature flags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FeatureFlags {
    pub env: Environment,
    pub auto_approval: bool,
    pub strict_validation: bool,
    pub readonly_mode: bool,
    pub kill_switch_override: bool,
}

/// Canonical hash over any serializable config view, for audit records.
pub fn config_hash<T: Serialize>(value: &T) -> String {
    let canonical = canonical_json(value).expect("config serialization is infallible");
    sha256_hex(canonical.as_bytes())
}

/// Hash of an arbitrary JSON document (already merged config).
pub fn value_hash(value: &Value) -> String {
    config_hash(value)
}

/// Stable map form of the recognized variables, for diagnostics endpoints.
pub fn recognized_vars() -> BTreeMap<&'static str, &'static str> {
    BTreeMap::from([
        ("ENV", "dev|paper|live"),
        ("BROKER_HOST", "brokerage gateway host"),
        ("BROKER_PORT", "brokerage gateway port"),
        ("BROKER_CLIENT_ID", "brokerage client id"),
        ("READONLY_MODE", "bool"),
        ("KILL_SWITCH_ENABLED", "bool override, wins over stored state"),
        ("KILL_SWITCH_REASON", "override reason"),
        ("AUTO_APPROVAL", "bool"),
        ("AUTO_APPROVAL_MAX_NOTIONAL", "decimal, default 1000"),
        ("STRICT_VALIDATION", "bool"),
        ("RISK_POLICY_PATH", "path to the YAML risk policy"),
        ("RATE_LIMIT_PER_TOOL", "calls per minute"),
        ("RATE_LIMIT_PER_SESSION", "calls per minute"),
        ("RATE_LIMIT_GLOBAL", "calls per minute"),
        ("SCHEDULER_TIMEZONE", "IANA timezone"),
        ("DATABASE_URL", "data directory root (file:// or path)"),
        ("LOG_LEVEL", "tracing filter, default info"),
    ])
}
