//! The closed audit event taxonomy.
//!
//! Every observable action in the system maps to exactly one kind. Payloads
//! are opaque structured data; the log stores and returns them without
//! interpretation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    // Order lifecycle
    OrderProposed,
    OrderSimulated,
    RiskGateEvaluated,
    ProposalCreated,
    ApprovalRequested,
    ApprovalGranted,
    ApprovalDenied,
    AutoApprovalGranted,
    OrderSubmitted,
    OrderSubmissionFailed,
    OrderFilled,
    OrderCancelled,
    OrderRejected,
    OrderPollExhausted,

    // Cancel / modify flows
    CancelRequested,
    CancelGranted,
    CancelDenied,
    CancelExecuted,
    ModifyRequested,
    ModifyGranted,
    ModifyDenied,
    ModifyExecuted,

    // Kill switch
    KillSwitchActivated,
    KillSwitchReleased,

    // Broker connectivity and data
    BrokerConnected,
    BrokerDisconnected,
    PortfolioSnapshotTaken,
    MarketSnapshotTaken,

    // Tool gateway
    ToolCalled,
    ToolRejected,

    // Operations
    PolicyLoaded,
    ScheduledExportCompleted,
    BackupCreated,
    ValidationFailed,
    OperationCancelled,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderProposed => "ORDER_PROPOSED",
            EventType::OrderSimulated => "ORDER_SIMULATED",
            EventType::RiskGateEvaluated => "RISK_GATE_EVALUATED",
            EventType::ProposalCreated => "PROPOSAL_CREATED",
            EventType::ApprovalRequested => "APPROVAL_REQUESTED",
            EventType::ApprovalGranted => "APPROVAL_GRANTED",
            EventType::ApprovalDenied => "APPROVAL_DENIED",
            EventType::AutoApprovalGranted => "AUTO_APPROVAL_GRANTED",
            EventType::OrderSubmitted => "ORDER_SUBMITTED",
            EventType::OrderSubmissionFailed => "ORDER_SUBMISSION_FAILED",
            EventType::OrderFilled => "ORDER_FILLED",
            EventType::OrderCancelled => "ORDER_CANCELLED",
            EventType::OrderRejected => "ORDER_REJECTED",
            EventType::OrderPollExhausted => "ORDER_POLL_EXHAUSTED",
            EventType::CancelRequested => "CANCEL_REQUESTED",
            EventType::CancelGranted => "CANCEL_GRANTED",
            EventType::CancelDenied => "CANCEL_DENIED",
            EventType::CancelExecuted => "CANCEL_EXECUTED",
            EventType::ModifyRequested => "MODIFY_REQUESTED",
            EventType::ModifyGranted => "MODIFY_GRANTED",
            EventType::ModifyDenied => "MODIFY_DENIED",
            EventType::ModifyExecuted => "MODIFY_EXECUTED",
            EventType::KillSwitchActivated => "KILL_SWITCH_ACTIVATED",
            EventType::KillSwitchReleased => "KILL_SWITCH_RELEASED",
            EventType::BrokerConnected => "BROKER_CONNECTED",
            EventType::BrokerDisconnected => "BROKER_DISCONNECTED",
            EventType::PortfolioSnapshotTaken => "PORTFOLIO_SNAPSHOT_TAKEN",
            EventType::MarketSnapshotTaken => "MARKET_SNAPSHOT_TAKEN",
            EventType::ToolCalled => "TOOL_CALLED",
            EventType::ToolRejected => "TOOL_REJECTED",
            EventType::PolicyLoaded => "POLICY_LOADED",
            EventType::ScheduledExportCompleted => "SCHEDULED_EXPORT_COMPLETED",
            EventType::BackupCreated => "BACKUP_CREATED",
            EventType::ValidationFailed => "VALIDATION_FAILED",
            EventType::OperationCancelled => "OPERATION_CANCELLED",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
