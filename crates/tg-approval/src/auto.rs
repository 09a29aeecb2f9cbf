//! Auto-approval policy.
//!
//! A conservative allowlist that can substitute a generated token for the
//! human grant when every configured condition holds. The policy is a pure
//! conjunction: one failing condition refers the proposal to a human. It
//! never runs while the kill switch is enabled (enforced by the
//! service, which also owns the audit trail for the decision).

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use tg_schemas::{OrderIntent, OrderType, Portfolio, SecType, SimulationResult};

pub const DEFAULT_AUTO_MAX_NOTIONAL: Decimal = dec!(1000);

/// A recurring dollar-cost-averaging slot: the given symbol may auto-approve
/// on the given weekday up to its own notional ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcaSchedule {
    pub symbol: String,
    pub weekday: String,
    pub max_notional: Decimal,
}

impl DcaSchedule {
    fn weekday_matches(&self, day: Weekday) -> bool {
        matches!(
            (self.weekday.to_ascii_lowercase().as_str(), day),
            ("mon", Weekday::Mon)
                | ("tue", Weekday::Tue)
                | ("wed", Weekday::Wed)
                | ("thu", Weekday::Thu)
                | ("fri", Weekday::Fri)
                | ("sat", Weekday::Sat)
                | ("sun", Weekday::Sun)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoApprovalPolicy {
    pub enabled: bool,
    /// Absolute gross-notional ceiling (inclusive).
    pub max_notional: Decimal,
    /// Order types eligible for auto-approval. LMT-only is the recommended
    /// configuration; market orders have unbounded execution prices.
    pub order_types: Vec<OrderType>,
    /// When present, only these symbols are eligible.
    pub symbol_allowlist: Option<Vec<String>>,
    pub symbol_blocklist: Vec<String>,
    pub sec_types: Vec<SecType>,
    /// Post-trade position ceiling as a fraction of NAV.
    pub max_position_pct_nav: Decimal,
    /// Optional UTC time-of-day window "HH:MM".."HH:MM".
    pub window: Option<(String, String)>,
    /// When non-empty, the intent must match one schedule slot.
    pub dca: Vec<DcaSchedule>,
}

impl Default for AutoApprovalPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_notional: DEFAULT_AUTO_MAX_NOTIONAL,
            order_types: vec![OrderType::Lmt],
            symbol_allowlist: None,
            symbol_blocklist: Vec::new(),
            sec_types: vec![SecType::Stk, SecType::Etf],
            max_position_pct_nav: dec!(0.05),
            window: None,
            dca: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoDecision {
    Allow,
    /// Falls back to the human approval queue, with the first failed
    /// condition as the reason.
    Refer(String),
}

impl AutoApprovalPolicy {
    pub fn decide(
        &self,
        intent: &OrderIntent,
        simulation: &SimulationResult,
        portfolio: Option<&Portfolio>,
        now: DateTime<Utc>,
    ) -> AutoDecision {
        if !self.enabled {
            return AutoDecision::Refer("auto-approval disabled".into());
        }

        let symbol = intent.instrument.symbol.as_str();
        if self
            .symbol_blocklist
            .iter()
            .any(|s| s.eq_ignore_ascii_case(symbol))
        {
            return AutoDecision::Refer(format!("{symbol} is blocklisted"));
        }
        if let Some(allow) = &self.symbol_allowlist {
            if !allow.iter().any(|s| s.eq_ignore_ascii_case(symbol)) {
                return AutoDecision::Refer(format!("{symbol} not on the allowlist"));
            }
        }

        if !self.sec_types.contains(&intent.instrument.sec_type) {
            return AutoDecision::Refer(format!(
                "instrument type {} not eligible",
                intent.instrument.sec_type.as_str()
            ));
        }

        if !self.order_types.contains(&intent.order_type) {
            return AutoDecision::Refer(format!(
                "order type {} not eligible",
                intent.order_type.as_str()
            ));
        }

        if let Some((start, end)) = &self.window {
            match (parse_hhmm(start), parse_hhmm(end)) {
                (Some(start), Some(end)) => {
                    let t = now.time();
                    if t < start || t >= end {
                        return AutoDecision::Refer("outside the auto-approval window".into());
                    }
                }
                _ => return AutoDecision::Refer("auto-approval window misconfigured".into()),
            }
        }

        // Boundary is inclusive: exactly at the ceiling still auto-approves.
        if simulation.gross_notional > self.max_notional {
            return AutoDecision::Refer(format!(
                "notional {} above auto-approval ceiling {}",
                simulation.gross_notional, self.max_notional
            ));
        }

        match portfolio {
            Some(p) if p.total_value > Decimal::ZERO => {
                let weight = simulation.exposure_after / p.total_value;
                if weight > self.max_position_pct_nav {
                    return AutoDecision::Refer(format!(
                        "post-trade weight {weight:.4} above {} of NAV",
                        self.max_position_pct_nav
                    ));
                }
            }
            _ => return AutoDecision::Refer("portfolio unavailable for NAV ceiling".into()),
        }

        if !self.dca.is_empty() {
            let matched = self.dca.iter().any(|slot| {
                slot.symbol.eq_ignore_ascii_case(symbol)
                    && slot.weekday_matches(now.weekday())
                    && simulation.gross_notional <= slot.max_notional
            });
            if !matched {
                return AutoDecision::Refer("no DCA schedule slot matches".into());
            }
        }

        AutoDecision::Allow
    }
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}
