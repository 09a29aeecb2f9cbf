//! Order submitter: consumes an approval token and hands the intent to the
//! broker, then polls the order to a terminal state.
//!
//! Failure contract:
//! - Any failure before `consume_token` leaves the token intact and the
//!   broker untouched.
//! - A broker failure after consumption burns the token: the proposal stays
//!   in APPROVAL_GRANTED, ORDER_SUBMISSION_FAILED is audited, and the caller
//!   must start a new proposal. Writes are never silently retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use tg_approval::{ApprovalError, ApprovalService};
use tg_audit::{AuditError, AuditLog, EventType};
use tg_broker::{BrokerAdapter, BrokerError};
use tg_killswitch::{KillSwitch, KillSwitchError};
use tg_schemas::{BrokerOrderStatus, ErrorKind, OpenOrder, OrderState};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_POLLS: u32 = 60;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    KillSwitch(#[from] KillSwitchError),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error("proposal is in state {state}, expected APPROVAL_GRANTED")]
    NotGranted { state: OrderState },
    #[error("token is not valid for this proposal: {reason}")]
    TokenMismatch { reason: String },
    #[error("broker rejected the submission after the token was consumed: {source}")]
    SubmissionFailed { source: BrokerError },
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl SubmitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubmitError::KillSwitch(e) => e.kind(),
            SubmitError::Approval(e) => e.kind(),
            SubmitError::NotGranted { .. } => ErrorKind::State,
            SubmitError::TokenMismatch { .. } => ErrorKind::Validation,
            // The token cannot be reused; retrying is pointless without a
            // fresh proposal, so this is a State failure, not a Resource one.
            SubmitError::SubmissionFailed { .. } => ErrorKind::State,
            SubmitError::Broker(e) => e.kind(),
            SubmitError::Audit(e) => e.kind(),
        }
    }
}

// ---------------------------------------------------------------------------
// Submitter
// ---------------------------------------------------------------------------

pub struct OrderSubmitter {
    broker: Arc<dyn BrokerAdapter>,
    approval: Arc<ApprovalService>,
    audit: Arc<AuditLog>,
    kill: Arc<KillSwitch>,
    poll_interval: Duration,
    max_polls: u32,
}

impl OrderSubmitter {
    pub fn new(
        broker: Arc<dyn BrokerAdapter>,
        approval: Arc<ApprovalService>,
        audit: Arc<AuditLog>,
        kill: Arc<KillSwitch>,
    ) -> Self {
        Self {
            broker,
            approval,
            audit,
            kill,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    pub fn with_polling(mut self, max_polls: u32, interval: Duration) -> Self {
        self.max_polls = max_polls;
        self.poll_interval = interval;
        self
    }

    /// Submit an approved proposal with its token.
    ///
    /// Sequence: kill-switch gate, state check, token binding check, token
    /// consumption, broker submit, SUBMITTED transition.
    pub async fn submit(
        &self,
        proposal_id: Uuid,
        token_id: Uuid,
    ) -> Result<OpenOrder, SubmitError> {
        self.kill.check_or_fail("submit_order")?;
        let now = Utc::now();

        let proposal = self.approval.get(proposal_id)?;
        if proposal.state != OrderState::ApprovalGranted {
            return Err(SubmitError::NotGranted {
                state: proposal.state,
            });
        }

        // Binding check before the burn: a token for another proposal or a
        // mutated intent must fail without consuming anything.
        let token = self
            .approval
            .token_snapshot(token_id)
            .ok_or(ApprovalError::TokenNotFound(token_id))?;
        if token.proposal_id != proposal_id {
            return Err(SubmitError::TokenMismatch {
                reason: "token belongs to a different proposal".to_string(),
            });
        }
        if token.intent_hash != proposal.intent_hash {
            return Err(SubmitError::TokenMismatch {
                reason: "token is bound to a different intent hash".to_string(),
            });
        }

        // Point of no return: after this the token is burned.
        let consumed = self.approval.consume_token(token_id, now)?;

        let open = match self.broker.submit_order(&proposal.intent, &consumed).await {
            Ok(open) => open,
            Err(source) => {
                warn!(proposal_id = %proposal_id, error = %source, "broker submit failed after token burn");
                self.approval
                    .record_submission_failed(proposal_id, &source.to_string())?;
                return Err(SubmitError::SubmissionFailed { source });
            }
        };

        self.approval
            .record_submitted(proposal_id, &open.broker_order_id, Utc::now())?;
        info!(proposal_id = %proposal_id, broker_order_id = %open.broker_order_id, "order submitted");

        // An immediate terminal ack (e.g. an exchange reject) short-circuits
        // polling.
        if open.status.is_terminal() {
            self.approval.record_broker_terminal(
                proposal_id,
                order_state_for(open.status),
                Utc::now(),
            )?;
        }
        Ok(open)
    }

    /// Poll a submitted order until it reaches a terminal status or the poll
    /// budget is exhausted. Exhaustion leaves the proposal in SUBMITTED and
    /// emits an operational warning event.
    pub async fn poll(
        &self,
        proposal_id: Uuid,
        broker_order_id: &str,
    ) -> Result<OpenOrder, SubmitError> {
        let mut last: Option<OpenOrder> = None;
        for _ in 0..self.max_polls {
            let open = self.broker.get_order_status(broker_order_id).await?;
            if open.status.is_terminal() {
                self.approval.record_broker_terminal(
                    proposal_id,
                    order_state_for(open.status),
                    Utc::now(),
                )?;
                return Ok(open);
            }
            last = Some(open);
            tokio::time::sleep(self.poll_interval).await;
        }

        warn!(broker_order_id, "order poll budget exhausted; order remains SUBMITTED");
        let proposal = self.approval.get(proposal_id)?;
        self.audit.append(
            EventType::OrderPollExhausted,
            Some(proposal.correlation_id),
            json!({
                "proposal_id": proposal_id,
                "broker_order_id": broker_order_id,
                "max_polls": self.max_polls,
            }),
        )?;
        match last {
            Some(open) => Ok(open),
            None => Ok(self.broker.get_order_status(broker_order_id).await?),
        }
    }

    /// Submit and drive to a terminal state in one call.
    pub async fn submit_and_poll(
        &self,
        proposal_id: Uuid,
        token_id: Uuid,
    ) -> Result<OpenOrder, SubmitError> {
        let open = self.submit(proposal_id, token_id).await?;
        if open.status.is_terminal() {
            return Ok(open);
        }
        self.poll(proposal_id, &open.broker_order_id).await
    }
}

fn order_state_for(status: BrokerOrderStatus) -> OrderState {
    match status {
        BrokerOrderStatus::Filled => OrderState::Filled,
        BrokerOrderStatus::Cancelled => OrderState::Cancelled,
        _ => OrderState::Rejected,
    }
}
