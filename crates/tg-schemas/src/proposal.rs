//! Order proposal lifecycle.
//!
//! The eleven-state machine below is the backbone of the two-step commit:
//! decision (grant) and action (submit) are separate transitions, and the
//! transition table is enforced: skipping a state is a `State` error, not a
//! silent fast-path.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::intent::{IntentError, OrderIntent, OrderType, Side};
use crate::risk::RiskDecision;
use crate::simulation::SimulationResult;

// ---------------------------------------------------------------------------
// OrderState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Proposed,
    Simulated,
    RiskApproved,
    RiskRejected,
    ApprovalRequested,
    ApprovalGranted,
    ApprovalDenied,
    Submitted,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Proposed => "PROPOSED",
            OrderState::Simulated => "SIMULATED",
            OrderState::RiskApproved => "RISK_APPROVED",
            OrderState::RiskRejected => "RISK_REJECTED",
            OrderState::ApprovalRequested => "APPROVAL_REQUESTED",
            OrderState::ApprovalGranted => "APPROVAL_GRANTED",
            OrderState::ApprovalDenied => "APPROVAL_DENIED",
            OrderState::Submitted => "SUBMITTED",
            OrderState::Filled => "FILLED",
            OrderState::Cancelled => "CANCELLED",
            OrderState::Rejected => "REJECTED",
        }
    }

    /// Terminal states are write-once: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::RiskRejected
                | OrderState::ApprovalDenied
                | OrderState::Filled
                | OrderState::Cancelled
                | OrderState::Rejected
        )
    }

    /// The allowed-successor table. `ApprovalGranted` is reachable from both
    /// `RiskApproved` (auto-approval) and `ApprovalRequested` (human grant).
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (self, next),
            (Proposed, Simulated)
                | (Simulated, RiskApproved)
                | (Simulated, RiskRejected)
                | (RiskApproved, ApprovalRequested)
                | (RiskApproved, ApprovalGranted)
                | (ApprovalRequested, ApprovalGranted)
                | (ApprovalRequested, ApprovalDenied)
                | (ApprovalGranted, Submitted)
                | (Submitted, Filled)
                | (Submitted, Cancelled)
                | (Submitted, Rejected)
        )
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition outside the allowed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal order state transition {from} -> {to}")]
pub struct TransitionError {
    pub from: OrderState,
    pub to: OrderState,
}

impl TransitionError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::State
    }
}

// ---------------------------------------------------------------------------
// OrderProposal
// ---------------------------------------------------------------------------

/// A proposal and its accumulated gate evidence.
///
/// The intent hash is fixed at creation; `advance` is the only mutation
/// path for `state` and it enforces the transition table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderProposal {
    pub proposal_id: Uuid,
    pub correlation_id: Uuid,
    pub intent: OrderIntent,
    pub intent_canonical: String,
    pub intent_hash: String,
    pub simulation: Option<SimulationResult>,
    pub risk_decision: Option<RiskDecision>,
    pub state: OrderState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub granted_token_id: Option<Uuid>,
    pub approval_reason: Option<String>,
    pub broker_order_id: Option<String>,
}

impl OrderProposal {
    /// Validate and freeze an intent into a new PROPOSED proposal.
    pub fn new(
        intent: OrderIntent,
        correlation_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Self, IntentError> {
        let intent = intent.normalized();
        intent.validate()?;
        let intent_canonical = intent.canonical_json();
        let intent_hash = intent.intent_hash();
        Ok(Self {
            proposal_id: Uuid::new_v4(),
            correlation_id,
            intent,
            intent_canonical,
            intent_hash,
            simulation: None,
            risk_decision: None,
            state: OrderState::Proposed,
            created_at: now,
            updated_at: now,
            granted_token_id: None,
            approval_reason: None,
            broker_order_id: None,
        })
    }

    /// Move to `next`, enforcing the transition table.
    pub fn advance(&mut self, next: OrderState, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = now;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OpenOrder (broker-side view)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BrokerOrderStatus {
    PendingNew,
    Working,
    Filled,
    Cancelled,
    Rejected,
}

impl BrokerOrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BrokerOrderStatus::Filled | BrokerOrderStatus::Cancelled | BrokerOrderStatus::Rejected
        )
    }
}

/// Broker-side order record returned by submit/cancel/status calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub broker_order_id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub status: BrokerOrderStatus,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::Instrument;
    use crate::intent::{Constraints, TimeInForce};
    use rust_decimal_macros::dec;

    fn intent() -> OrderIntent {
        OrderIntent {
            account_id: "DU123456".to_string(),
            instrument: Instrument::stock("AAPL"),
            side: Side::Buy,
            order_type: OrderType::Mkt,
            quantity: dec!(10),
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

    fn proposal() -> OrderProposal {
        OrderProposal::new(intent(), Uuid::new_v4(), Utc::now()).unwrap()
    }

    const ALL: [OrderState; 11] = [
        OrderState::Proposed,
        OrderState::Simulated,
        OrderState::RiskApproved,
        OrderState::RiskRejected,
        OrderState::ApprovalRequested,
        OrderState::ApprovalGranted,
        OrderState::ApprovalDenied,
        OrderState::Submitted,
        OrderState::Filled,
        OrderState::Cancelled,
        OrderState::Rejected,
    ];

    #[test]
    fn happy_path_transitions_are_allowed() {
        let now = Utc::now();
        let mut p = proposal();
        for next in [
            OrderState::Simulated,
            OrderState::RiskApproved,
            OrderState::ApprovalRequested,
            OrderState::ApprovalGranted,
            OrderState::Submitted,
            OrderState::Filled,
        ] {
            p.advance(next, now).unwrap();
        }
        assert!(p.state.is_terminal());
    }

    #[test]
    fn auto_approval_skips_requested() {
        let now = Utc::now();
        let mut p = proposal();
        p.advance(OrderState::Simulated, now).unwrap();
        p.advance(OrderState::RiskApproved, now).unwrap();
        p.advance(OrderState::ApprovalGranted, now).unwrap();
        assert_eq!(p.state, OrderState::ApprovalGranted);
    }

    #[test]
    fn skipping_states_is_rejected() {
        let now = Utc::now();
        let mut p = proposal();
        let err = p.advance(OrderState::Submitted, now).unwrap_err();
        assert_eq!(err.from, OrderState::Proposed);
        assert_eq!(err.to, OrderState::Submitted);
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[test]
    fn terminal_states_admit_no_successor() {
        for s in ALL.iter().filter(|s| s.is_terminal()) {
            for next in ALL {
                assert!(
                    !s.can_transition_to(next),
                    "terminal {s} must not reach {next}"
                );
            }
        }
    }

    #[test]
    fn intent_hash_fixed_at_creation() {
        let now = Utc::now();
        let mut p = proposal();
        let h = p.intent_hash.clone();
        p.advance(OrderState::Simulated, now).unwrap();
        assert_eq!(p.intent_hash, h);
    }
}
