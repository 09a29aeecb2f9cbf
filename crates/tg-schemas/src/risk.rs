use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Final verdict of the risk gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskVerdict {
    Approve,
    Reject,
    ManualReview,
}

/// Identifier of a policy rule. `KS` is synthetic: it marks a rejection
/// caused by the kill switch rather than a configured rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleId {
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    R12,
    Ks,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::R1 => "R1",
            RuleId::R2 => "R2",
            RuleId::R3 => "R3",
            RuleId::R4 => "R4",
            RuleId::R5 => "R5",
            RuleId::R6 => "R6",
            RuleId::R7 => "R7",
            RuleId::R8 => "R8",
            RuleId::R9 => "R9",
            RuleId::R10 => "R10",
            RuleId::R11 => "R11",
            RuleId::R12 => "R12",
            RuleId::Ks => "KS",
        }
    }
}

/// How a violated rule affects the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Blocker,
    Major,
    Minor,
}

/// Immutable output of one risk evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub verdict: RiskVerdict,
    pub reason: String,
    pub violated_rules: Vec<RuleId>,
    pub warnings: Vec<String>,
    /// Rule-indexed telemetry (position_pct, slippage_bps, drawdown_pct, ...).
    /// BTreeMap so serialized output is deterministic.
    pub metrics: BTreeMap<String, Decimal>,
    /// Set when a drawdown breach asks the caller to trip the kill switch.
    pub halt_requested: bool,
}

impl RiskDecision {
    pub fn approve(reason: impl Into<String>) -> Self {
        Self {
            verdict: RiskVerdict::Approve,
            reason: reason.into(),
            violated_rules: Vec::new(),
            warnings: Vec::new(),
            metrics: BTreeMap::new(),
            halt_requested: false,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.verdict == RiskVerdict::Approve
    }
}
