//! Order intent: the immutable, declarative description of an order.
//!
//! An intent is never executable by itself. Its canonical JSON form is
//! content-addressed with SHA-256; that hash binds approval tokens to exactly
//! this intent, so any mutation invalidates previously issued approvals.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_json, sha256_hex};
use crate::error::ErrorKind;
use crate::instrument::Instrument;

// ---------------------------------------------------------------------------
// Wire enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Mkt,
    Lmt,
    Stp,
    StpLmt,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Mkt => "MKT",
            OrderType::Lmt => "LMT",
            OrderType::Stp => "STP",
            OrderType::StpLmt => "STP_LMT",
        }
    }

    pub fn requires_limit_price(&self) -> bool {
        matches!(self, OrderType::Lmt | OrderType::StpLmt)
    }

    pub fn requires_stop_price(&self) -> bool {
        matches!(self, OrderType::Stp | OrderType::StpLmt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Fok,
}

// ---------------------------------------------------------------------------
// Constraints
// ---------------------------------------------------------------------------

/// Caller-supplied hard bounds checked by the simulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Constraints {
    /// Maximum tolerated slippage, basis points. Valid range 0..=1000.
    pub max_slippage_bps: u32,
    /// Maximum gross notional, account currency. Must be > 0.
    pub max_notional: Decimal,
}

// ---------------------------------------------------------------------------
// OrderIntent
// ---------------------------------------------------------------------------

/// Immutable order specification. See module docs for hashing semantics.
/// Unknown fields are rejected at deserialization: a payload carrying
/// legacy aliases or extras never reaches validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderIntent {
    pub account_id: String,
    pub instrument: Instrument,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub time_in_force: TimeInForce,
    /// Human-readable motivation. At least 10 characters and 3 words; forces
    /// the proposing agent to state why, which lands in the audit trail.
    pub reason: String,
    pub strategy_tag: Option<String>,
    pub constraints: Constraints,
}

/// Field-level rejection reasons for an intent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntentError {
    #[error("account_id must not be empty")]
    EmptyAccountId,
    #[error("quantity must be > 0, got {0}")]
    NonPositiveQuantity(Decimal),
    #[error("{order_type} orders require a limit_price")]
    LimitPriceRequired { order_type: &'static str },
    #[error("{order_type} orders do not take a limit_price")]
    UnexpectedLimitPrice { order_type: &'static str },
    #[error("{order_type} orders require a stop_price")]
    StopPriceRequired { order_type: &'static str },
    #[error("{order_type} orders do not take a stop_price")]
    UnexpectedStopPrice { order_type: &'static str },
    #[error("price must be > 0, got {0}")]
    NonPositivePrice(Decimal),
    #[error("reason must be at least 10 characters")]
    ReasonTooShort,
    #[error("reason must contain at least 3 words")]
    ReasonTooFewWords,
    #[error("max_slippage_bps must be within 0..=1000, got {0}")]
    SlippageBpsOutOfRange(u32),
    #[error("max_notional must be > 0, got {0}")]
    NonPositiveMaxNotional(Decimal),
}

impl IntentError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

impl OrderIntent {
    /// Normalize caller-supplied fields (symbol case, whitespace) without
    /// touching anything semantic. Call before `validate` / `intent_hash`.
    pub fn normalized(mut self) -> Self {
        self.account_id = self.account_id.trim().to_string();
        self.instrument = self.instrument.normalized();
        self.reason = self.reason.trim().to_string();
        self
    }

    /// Check every structural invariant. First violation wins.
    pub fn validate(&self) -> Result<(), IntentError> {
        if self.account_id.is_empty() {
            return Err(IntentError::EmptyAccountId);
        }
        if self.quantity <= Decimal::ZERO {
            return Err(IntentError::NonPositiveQuantity(self.quantity));
        }

        let ot = self.order_type.as_str();
        match (self.order_type.requires_limit_price(), self.limit_price) {
            (true, None) => return Err(IntentError::LimitPriceRequired { order_type: ot }),
            (false, Some(_)) => return Err(IntentError::UnexpectedLimitPrice { order_type: ot }),
            (true, Some(p)) if p <= Decimal::ZERO => {
                return Err(IntentError::NonPositivePrice(p));
            }
            _ => {}
        }
        match (self.order_type.requires_stop_price(), self.stop_price) {
            (true, None) => return Err(IntentError::StopPriceRequired { order_type: ot }),
            (false, Some(_)) => return Err(IntentError::UnexpectedStopPrice { order_type: ot }),
            (true, Some(p)) if p <= Decimal::ZERO => {
                return Err(IntentError::NonPositivePrice(p));
            }
            _ => {}
        }

        if self.reason.chars().count() < 10 {
            return Err(IntentError::ReasonTooShort);
        }
        if self.reason.split_whitespace().count() < 3 {
            return Err(IntentError::ReasonTooFewWords);
        }

        if self.constraints.max_slippage_bps > 1000 {
            return Err(IntentError::SlippageBpsOutOfRange(
                self.constraints.max_slippage_bps,
            ));
        }
        if self.constraints.max_notional <= Decimal::ZERO {
            return Err(IntentError::NonPositiveMaxNotional(
                self.constraints.max_notional,
            ));
        }

        Ok(())
    }

    /// Canonical JSON form (sorted keys, compact).
    pub fn canonical_json(&self) -> String {
        // Serialization of a plain struct of serde types cannot fail.
        canonical_json(self).expect("intent serialization is infallible")
    }

    /// SHA-256 hex over the canonical JSON bytes.
    pub fn intent_hash(&self) -> String {
        sha256_hex(self.canonical_json().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::Instrument;
    use rust_decimal_macros::dec;

    fn buy_mkt(qty: Decimal) -> OrderIntent {
        OrderIntent {
            account_id: "DU123456".to_string(),
            instrument: Instrument::stock("AAPL"),
            side: Side::Buy,
            order_type: OrderType::Mkt,
            quantity: qty,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
            reason: "Portfolio rebalance to target allocation".to_string(),
            strategy_tag: None,
            constraints: Constraints {
                max_slippage_bps: 50,
                max_notional: dec!(10000),
            },
        }
    }

    #[test]
    fn valid_intent_passes() {
        assert!(buy_mkt(dec!(10)).validate().is_ok());
    }

    #[test]
    fn zero_quantity_rejected() {
        let err = buy_mkt(dec!(0)).validate().unwrap_err();
        assert!(matches!(err, IntentError::NonPositiveQuantity(_)));
    }

    #[test]
    fn mkt_with_limit_price_rejected() {
        let mut i = buy_mkt(dec!(10));
        i.limit_price = Some(dec!(100));
        assert!(matches!(
            i.validate().unwrap_err(),
            IntentError::UnexpectedLimitPrice { .. }
        ));
    }

    #[test]
    fn lmt_without_limit_price_rejected() {
        let mut i = buy_mkt(dec!(10));
        i.order_type = OrderType::Lmt;
        assert!(matches!(
            i.validate().unwrap_err(),
            IntentError::LimitPriceRequired { .. }
        ));
    }

    #[test]
    fn stp_lmt_requires_both_prices() {
        let mut i = buy_mkt(dec!(10));
        i.order_type = OrderType::StpLmt;
        i.limit_price = Some(dec!(100));
        assert!(matches!(
            i.validate().unwrap_err(),
            IntentError::StopPriceRequired { .. }
        ));
        i.stop_price = Some(dec!(99));
        assert!(i.validate().is_ok());
    }

    #[test]
    fn short_reason_rejected() {
        let mut i = buy_mkt(dec!(10));
        i.reason = "ok".to_string();
        assert_eq!(i.validate().unwrap_err(), IntentError::ReasonTooShort);
    }

    #[test]
    fn two_word_reason_rejected() {
        let mut i = buy_mkt(dec!(10));
        i.reason = "rebalancing portfolio".to_string();
        assert_eq!(i.validate().unwrap_err(), IntentError::ReasonTooFewWords);
    }

    #[test]
    fn slippage_bps_over_1000_rejected() {
        let mut i = buy_mkt(dec!(10));
        i.constraints.max_slippage_bps = 1001;
        assert!(matches!(
            i.validate().unwrap_err(),
            IntentError::SlippageBpsOutOfRange(1001)
        ));
    }

    #[test]
    fn intent_hash_is_stable_across_reruns() {
        let i = buy_mkt(dec!(10));
        let h = i.intent_hash();
        for _ in 0..5 {
            assert_eq!(buy_mkt(dec!(10)).intent_hash(), h);
        }
        assert_eq!(h.len(), 64);
    }

    #[test]
    fn intent_hash_changes_with_any_field() {
        let base = buy_mkt(dec!(10)).intent_hash();
        assert_ne!(buy_mkt(dec!(11)).intent_hash(), base);

        let mut i = buy_mkt(dec!(10));
        i.side = Side::Sell;
        assert_ne!(i.intent_hash(), base);
    }

    #[test]
    fn normalization_happens_before_hashing() {
        let mut a = buy_mkt(dec!(10));
        a.instrument.symbol = "aapl".to_string();
        let a = a.normalized();
        assert_eq!(a.intent_hash(), buy_mkt(dec!(10)).intent_hash());
    }
}
