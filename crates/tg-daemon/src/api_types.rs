//! Wire DTOs for the HTTP surface.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tg_execution::ModifyParams;
use tg_schemas::{
    MarketSnapshot, OrderIntent, OrderState, RiskDecision, SimulationResult,
};

// ---------------------------------------------------------------------------
// Health / flags
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
    pub components: ComponentHealth,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub broker_connected: bool,
    pub audit_writable: bool,
    pub approval_store_len: usize,
    pub kill_switch_enabled: bool,
}

// ---------------------------------------------------------------------------
// Propose / simulate / risk
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ProposeRequest {
    pub intent: OrderIntent,
}

#[derive(Debug, Serialize)]
pub struct ProposeResponse {
    pub intent_hash: String,
    pub intent: OrderIntent,
}

#[derive(Debug, Deserialize)]
pub struct SimulateRequest {
    pub intent: OrderIntent,
    /// Explicit quote; decisions must not depend on hidden cache state.
    pub market_snapshot: Option<MarketSnapshot>,
    /// Shorthand: a bare price stands in for a flat bid/ask quote.
    pub market_price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct RiskEvaluateRequest {
    pub intent: OrderIntent,
    pub simulation: SimulationResult,
    /// Overrides the live portfolio value when supplied.
    pub portfolio_value: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Proposals / approvals
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ProposalCreateRequest {
    pub intent: OrderIntent,
    pub simulation: SimulationResult,
    pub risk_decision: RiskDecision,
}

#[derive(Debug, Serialize)]
pub struct ProposalResponse {
    pub proposal_id: Uuid,
    pub correlation_id: Uuid,
    pub state: OrderState,
    pub intent_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct ApprovalRequestRequest {
    pub proposal_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ApprovalRequestResponse {
    pub proposal_id: Uuid,
    pub state: OrderState,
    pub auto_approved: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApprovalGrantRequest {
    pub proposal_id: Uuid,
    pub reason: String,
    pub actor: String,
}

#[derive(Debug, Serialize)]
pub struct ApprovalGrantResponse {
    pub proposal_id: Uuid,
    pub state: OrderState,
    pub token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ApprovalDenyRequest {
    pub proposal_id: Uuid,
    pub reason: String,
    pub actor: String,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub proposal_id: Uuid,
    pub token_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub proposal_id: Uuid,
    pub broker_order_id: String,
    pub broker_status: tg_schemas::BrokerOrderStatus,
    pub proposal_state: OrderState,
}

// ---------------------------------------------------------------------------
// Cancel / modify
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CancelRequestRequest {
    pub broker_order_id: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelGrantRequest {
    pub cancel_id: Uuid,
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelDenyRequest {
    pub cancel_id: Uuid,
    pub reason: String,
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct ModifyRequestRequest {
    pub broker_order_id: String,
    #[serde(flatten)]
    pub params: ModifyParams,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ModifyGrantRequest {
    pub modify_id: Uuid,
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct ModifyDenyRequest {
    pub modify_id: Uuid,
    pub reason: String,
    pub actor: String,
}

// ---------------------------------------------------------------------------
// Kill switch
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct KillSwitchActivateRequest {
    pub reason: String,
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct KillSwitchReleaseRequest {
    pub actor: String,
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ToolCallRequest {
    pub session_id: String,
    pub tool: String,
    #[serde(default)]
    pub params: serde_json::Value,
}
