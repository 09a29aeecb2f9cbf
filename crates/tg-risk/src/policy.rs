//! Risk policy file: YAML with one section per rule plus trading hours,
//! sector map, and volatility inputs. Missing sections fall back to
//! conservative defaults; a disabled rule always passes.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveTime;
use chrono_tz::Tz;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use tg_schemas::{canonical_json, sha256_hex, ErrorKind, Severity};

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("risk policy file unreadable: {0}")]
    Io(#[from] std::io::Error),
    #[error("risk policy malformed: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("risk policy invalid: {0}")]
    Invalid(String),
}

impl PolicyError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

// ---------------------------------------------------------------------------
// Rule configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub enabled: bool,
    /// Meaning depends on the rule: notional, weight fraction, bps, count,
    /// currency amount, percent, or minutes.
    pub limit: Decimal,
    pub severity: Severity,
}

impl RuleConfig {
    fn new(enabled: bool, limit: Decimal, severity: Severity) -> Self {
        Self {
            enabled,
            limit,
            severity,
        }
    }
}

macro_rules! rule_default {
    ($fn_name:ident, $enabled:expr, $limit:expr, $severity:expr) => {
        fn $fn_name() -> RuleConfig {
            RuleConfig::new($enabled, $limit, $severity)
        }
    };
}

rule_default!(default_r1, true, dec!(50000), Severity::Blocker);
rule_default!(default_r2, true, dec!(0.10), Severity::Blocker);
rule_default!(default_r3, true, dec!(0.30), Severity::Major);
rule_default!(default_r4, true, dec!(50), Severity::Blocker);
rule_default!(default_r5, true, Decimal::ZERO, Severity::Blocker);
rule_default!(default_r6, true, Decimal::ZERO, Severity::Major);
rule_default!(default_r7, true, dec!(50), Severity::Blocker);
rule_default!(default_r8, true, dec!(5000), Severity::Blocker);
rule_default!(default_r9, true, dec!(0.25), Severity::Major);
rule_default!(default_r10, false, dec!(0.50), Severity::Major);
rule_default!(default_r11, true, dec!(10), Severity::Blocker);
rule_default!(default_r12, true, dec!(15), Severity::Major);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rules {
    /// Max gross notional per trade.
    #[serde(default = "default_r1")]
    pub r1: RuleConfig,
    /// Max post-trade position weight (fraction of total value).
    #[serde(default = "default_r2")]
    pub r2: RuleConfig,
    /// Max post-trade sector weight (fraction; no-op without a sector map).
    #[serde(default = "default_r3")]
    pub r3: RuleConfig,
    /// Max estimated slippage in bps.
    #[serde(default = "default_r4")]
    pub r4: RuleConfig,
    /// Trading window (limit unused; window comes from trading_hours).
    #[serde(default = "default_r5")]
    pub r5: RuleConfig,
    /// Min liquidity proxy (no-op when liquidity is unknown).
    #[serde(default = "default_r6")]
    pub r6: RuleConfig,
    /// Max trades per day.
    #[serde(default = "default_r7")]
    pub r7: RuleConfig,
    /// Daily loss circuit breaker (currency amount).
    #[serde(default = "default_r8")]
    pub r8: RuleConfig,
    /// Max volatility-scaled exposure (fraction of total value).
    #[serde(default = "default_r9")]
    pub r9: RuleConfig,
    /// Correlation exposure ceiling (disabled unless data is supplied).
    #[serde(default = "default_r10")]
    pub r10: RuleConfig,
    /// Max drawdown percent; breach raises a halt request.
    #[serde(default = "default_r11")]
    pub r11: RuleConfig,
    /// Session-edge guard: first/last N minutes (limit = minutes).
    #[serde(default = "default_r12")]
    pub r12: RuleConfig,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            r1: default_r1(),
            r2: default_r2(),
            r3: default_r3(),
            r4: default_r4(),
            r5: default_r5(),
            r6: default_r6(),
            r7: default_r7(),
            r8: default_r8(),
            r9: default_r9(),
            r10: default_r10(),
            r11: default_r11(),
            r12: default_r12(),
        }
    }
}

// ---------------------------------------------------------------------------
// Trading hours
// ---------------------------------------------------------------------------

fn default_timezone() -> String {
    "America/New_York".to_string()
}
fn default_open() -> String {
    "09:30".to_string()
}
fn default_close() -> String {
    "16:00".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TradingHours {
    pub timezone: String,
    pub open: String,
    pub close: String,
    pub allow_pre_market: bool,
    pub allow_after_hours: bool,
    /// Weekends are always outside the window.
    pub weekdays_only: bool,
}

impl Default for TradingHours {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            open: default_open(),
            close: default_close(),
            allow_pre_market: false,
            allow_after_hours: false,
            weekdays_only: true,
        }
    }
}

impl TradingHours {
    pub fn tz(&self) -> Result<Tz, PolicyError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| PolicyError::Invalid(format!("unknown timezone {}", self.timezone)))
    }

    pub fn open_time(&self) -> Result<NaiveTime, PolicyError> {
        parse_hhmm(&self.open)
    }

    pub fn close_time(&self) -> Result<NaiveTime, PolicyError> {
        parse_hhmm(&self.close)
    }
}

fn parse_hhmm(s: &str) -> Result<NaiveTime, PolicyError> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| PolicyError::Invalid(format!("bad HH:MM time: {s}")))
}

// ---------------------------------------------------------------------------
// RiskPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RiskPolicy {
    pub rules: Rules,
    pub trading_hours: TradingHours,
    /// symbol -> sector. Empty map disables R3.
    pub sector_map: BTreeMap<String, String>,
    /// symbol -> annualized volatility fraction. Empty map skips R9.
    pub volatility: BTreeMap<String, Decimal>,
}

impl RiskPolicy {
    pub fn from_yaml_str(s: &str) -> Result<Self, PolicyError> {
        let policy: RiskPolicy = serde_yaml::from_str(s)?;
        // Fail early on structurally valid but semantically broken windows.
        policy.trading_hours.tz()?;
        policy.trading_hours.open_time()?;
        policy.trading_hours.close_time()?;
        Ok(policy)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    /// Canonical hash of the parsed policy, for audit trails.
    pub fn policy_hash(&self) -> String {
        let canonical = canonical_json(self).expect("policy serialization is infallible");
        sha256_hex(canonical.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let p = RiskPolicy::from_yaml_str("{}").unwrap();
        assert!(p.rules.r1.enabled);
        assert_eq!(p.rules.r1.limit, dec!(50000));
        assert_eq!(p.rules.r2.limit, dec!(0.10));
        assert!(!p.rules.r10.enabled);
        assert_eq!(p.trading_hours.timezone, "America/New_York");
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let p = RiskPolicy::from_yaml_str(
            r#"
rules:
  r1: { enabled: true, limit: 25000, severity: BLOCKER }
  r4: { enabled: false, limit: 50, severity: MINOR }
"#,
        )
        .unwrap();
        assert_eq!(p.rules.r1.limit, dec!(25000));
        assert!(!p.rules.r4.enabled);
        assert_eq!(p.rules.r7.limit, dec!(50));
    }

    #[test]
    fn unknown_rule_key_is_rejected() {
        let err = RiskPolicy::from_yaml_str("rules:\n  r99: { enabled: true, limit: 1, severity: MINOR }\n");
        assert!(err.is_err());
    }

    #[test]
    fn bad_timezone_is_rejected() {
        let err = RiskPolicy::from_yaml_str("trading_hours:\n  timezone: Mars/Olympus\n");
        assert!(matches!(err, Err(PolicyError::Invalid(_))));
    }

    #[test]
    fn policy_hash_is_stable_and_content_sensitive() {
        let a = RiskPolicy::from_yaml_str("{}").unwrap();
        let b = RiskPolicy::from_yaml_str("{}").unwrap();
        assert_eq!(a.policy_hash(), b.policy_hash());

        let c = RiskPolicy::from_yaml_str("rules:\n  r1: { enabled: true, limit: 1, severity: BLOCKER }\n").unwrap();
        assert_ne!(a.policy_hash(), c.policy_hash());
    }
}
