//! The approval service: the only writer of proposal state and the sole
//! issuer of approval tokens.
//!
//! Every state transition appends an audit event under the proposal's
//! correlation id. Tokens are stored by id; consume is atomic under the
//! token-map lock, so a replay observes `TokenAlreadyUsed` rather than a
//! second success.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use tg_audit::{AuditLog, EventType};
use tg_killswitch::KillSwitch;
use tg_schemas::{
    ApprovalToken, OrderProposal, OrderState, Portfolio, RiskDecision, RiskVerdict,
    SimulationResult, DEFAULT_TOKEN_TTL_SECS,
};

use crate::auto::{AutoApprovalPolicy, AutoDecision};
use crate::store::{ProposalStore, DEFAULT_CAPACITY};
use crate::ApprovalError;

pub struct ApprovalService {
    store: ProposalStore,
    tokens: Mutex<HashMap<Uuid, ApprovalToken>>,
    audit: Arc<AuditLog>,
    kill: Arc<KillSwitch>,
    auto_policy: AutoApprovalPolicy,
    token_ttl: Duration,
}

impl ApprovalService {
    pub fn new(audit: Arc<AuditLog>, kill: Arc<KillSwitch>) -> Self {
        Self {
            store: ProposalStore::new(DEFAULT_CAPACITY),
            tokens: Mutex::new(HashMap::new()),
            audit,
            kill,
            auto_policy: AutoApprovalPolicy::default(),
            token_ttl: Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.store = ProposalStore::new(capacity);
        self
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn with_auto_policy(mut self, policy: AutoApprovalPolicy) -> Self {
        self.auto_policy = policy;
        self
    }

    pub fn store_len(&self) -> usize {
        self.store.len()
    }

    // -----------------------------------------------------------------------
    // Proposal lifecycle
    // -----------------------------------------------------------------------

    /// Insert a freshly created proposal.
    pub fn store(&self, proposal: OrderProposal) -> Result<OrderProposal, ApprovalError> {
        let snapshot = proposal.clone();
        self.store.insert(proposal)?;
        self.audit.append(
            EventType::ProposalCreated,
            Some(snapshot.correlation_id),
            json!({
                "proposal_id": snapshot.proposal_id,
                "intent_hash": snapshot.intent_hash,
                "state": snapshot.state,
            }),
        )?;
        Ok(snapshot)
    }

    /// PROPOSED -> SIMULATED, attaching the simulation result.
    pub fn attach_simulation(
        &self,
        proposal_id: Uuid,
        simulation: SimulationResult,
        now: DateTime<Utc>,
    ) -> Result<OrderProposal, ApprovalError> {
        let snapshot = self.transition(proposal_id, OrderState::Simulated, now, |p| {
            p.simulation = Some(simulation.clone());
        })?;
        self.audit.append(
            EventType::OrderSimulated,
            Some(snapshot.correlation_id),
            json!({
                "proposal_id": proposal_id,
                "status": simulation.status,
                "net_notional": simulation.net_notional,
            }),
        )?;
        Ok(snapshot)
    }

    /// SIMULATED -> RISK_APPROVED or RISK_REJECTED. A MANUAL_REVIEW verdict
    /// also lands in RISK_APPROVED: it stays gated behind a human grant, and
    /// auto-approval refuses to touch it.
    pub fn attach_risk_decision(
        &self,
        proposal_id: Uuid,
        decision: RiskDecision,
        now: DateTime<Utc>,
    ) -> Result<OrderProposal, ApprovalError> {
        let next = match decision.verdict {
            RiskVerdict::Approve | RiskVerdict::ManualReview => OrderState::RiskApproved,
            RiskVerdict::Reject => OrderState::RiskRejected,
        };
        let snapshot = self.transition(proposal_id, next, now, |p| {
            p.risk_decision = Some(decision.clone());
        })?;
        self.audit.append(
            EventType::RiskGateEvaluated,
            Some(snapshot.correlation_id),
            json!({
                "proposal_id": proposal_id,
                "verdict": decision.verdict,
                "violated_rules": decision.violated_rules,
                "state": snapshot.state,
            }),
        )?;
        Ok(snapshot)
    }

    /// RISK_APPROVED -> APPROVAL_REQUESTED, or straight to APPROVAL_GRANTED
    /// when the auto-approval policy allows it. The kill switch suppresses
    /// auto-approval entirely (the request still succeeds and waits for a
    /// human).
    pub fn request(
        &self,
        proposal_id: Uuid,
        portfolio: Option<&Portfolio>,
        now: DateTime<Utc>,
    ) -> Result<(OrderProposal, Option<ApprovalToken>), ApprovalError> {
        let arc = self.store.handle(proposal_id)?;
        let mut p = arc.lock().expect("proposal lock poisoned");

        let mut refer_reason: Option<String> = None;
        if self.auto_policy.enabled && !self.kill.is_enabled() {
            let risk_approved = p
                .risk_decision
                .as_ref()
                .map(|d| d.verdict == RiskVerdict::Approve)
                .unwrap_or(false);
            match (risk_approved, p.simulation.clone()) {
                (true, Some(sim)) => {
                    match self.auto_policy.decide(&p.intent, &sim, portfolio, now) {
                        AutoDecision::Allow => {
                            p.advance(OrderState::ApprovalGranted, now)?;
                            let token = self.issue_token(p.proposal_id, &p.intent_hash, now);
                            p.granted_token_id = Some(token.token_id);
                            p.approval_reason = Some("auto-approved by policy".to_string());
                            let snapshot = p.clone();
                            drop(p);

                            info!(proposal_id = %proposal_id, "auto-approval granted");
                            self.audit.append(
                                EventType::AutoApprovalGranted,
                                Some(snapshot.correlation_id),
                                json!({
                                    "proposal_id": proposal_id,
                                    "token_id": token.token_id,
                                    "expires_at": token.expires_at,
                                }),
                            )?;
                            return Ok((snapshot, Some(token)));
                        }
                        AutoDecision::Refer(reason) => refer_reason = Some(reason),
                    }
                }
                (false, _) => refer_reason = Some("risk verdict requires human review".into()),
                (_, None) => refer_reason = Some("no simulation attached".into()),
            }
        }

        p.advance(OrderState::ApprovalRequested, now)?;
        let snapshot = p.clone();
        drop(p);

        self.audit.append(
            EventType::ApprovalRequested,
            Some(snapshot.correlation_id),
            json!({
                "proposal_id": proposal_id,
                "auto_refer_reason": refer_reason,
            }),
        )?;
        Ok((snapshot, None))
    }

    /// APPROVAL_REQUESTED -> APPROVAL_GRANTED with a fresh single-use token.
    pub fn grant(
        &self,
        proposal_id: Uuid,
        reason: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<(OrderProposal, ApprovalToken), ApprovalError> {
        let arc = self.store.handle(proposal_id)?;
        let mut p = arc.lock().expect("proposal lock poisoned");

        p.advance(OrderState::ApprovalGranted, now)?;
        let token = self.issue_token(p.proposal_id, &p.intent_hash, now);
        p.granted_token_id = Some(token.token_id);
        p.approval_reason = Some(reason.to_string());
        let snapshot = p.clone();
        drop(p);

        info!(proposal_id = %proposal_id, actor, "approval granted");
        self.audit.append(
            EventType::ApprovalGranted,
            Some(snapshot.correlation_id),
            json!({
                "proposal_id": proposal_id,
                "reason": reason,
                "actor": actor,
                "token_id": token.token_id,
                "expires_at": token.expires_at,
            }),
        )?;
        Ok((snapshot, token))
    }

    /// APPROVAL_REQUESTED -> APPROVAL_DENIED. The reason is mandatory.
    pub fn deny(
        &self,
        proposal_id: Uuid,
        reason: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<OrderProposal, ApprovalError> {
        if reason.trim().is_empty() {
            return Err(ApprovalError::DenialReasonRequired);
        }
        let snapshot = self.transition(proposal_id, OrderState::ApprovalDenied, now, |p| {
            p.approval_reason = Some(reason.to_string());
        })?;
        self.audit.append(
            EventType::ApprovalDenied,
            Some(snapshot.correlation_id),
            json!({"proposal_id": proposal_id, "reason": reason, "actor": actor}),
        )?;
        Ok(snapshot)
    }

    /// APPROVAL_GRANTED -> SUBMITTED, recording the broker order id.
    pub fn record_submitted(
        &self,
        proposal_id: Uuid,
        broker_order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<OrderProposal, ApprovalError> {
        let snapshot = self.transition(proposal_id, OrderState::Submitted, now, |p| {
            p.broker_order_id = Some(broker_order_id.to_string());
        })?;
        self.audit.append(
            EventType::OrderSubmitted,
            Some(snapshot.correlation_id),
            json!({"proposal_id": proposal_id, "broker_order_id": broker_order_id}),
        )?;
        Ok(snapshot)
    }

    /// SUBMITTED -> FILLED / CANCELLED / REJECTED, from broker status.
    pub fn record_broker_terminal(
        &self,
        proposal_id: Uuid,
        terminal: OrderState,
        now: DateTime<Utc>,
    ) -> Result<OrderProposal, ApprovalError> {
        let event_type = match terminal {
            OrderState::Filled => EventType::OrderFilled,
            OrderState::Cancelled => EventType::OrderCancelled,
            _ => EventType::OrderRejected,
        };
        let snapshot = self.transition(proposal_id, terminal, now, |_| {})?;
        self.audit.append(
            event_type,
            Some(snapshot.correlation_id),
            json!({
                "proposal_id": proposal_id,
                "broker_order_id": snapshot.broker_order_id,
                "state": snapshot.state,
            }),
        )?;
        Ok(snapshot)
    }

    /// Broker failure after token consumption: the proposal stays in
    /// APPROVAL_GRANTED, the token stays burned, and the failure is audited
    /// as its own kind so callers know a new proposal is required.
    pub fn record_submission_failed(
        &self,
        proposal_id: Uuid,
        error: &str,
    ) -> Result<(), ApprovalError> {
        let snapshot = self.store.snapshot(proposal_id)?;
        self.audit.append(
            EventType::OrderSubmissionFailed,
            Some(snapshot.correlation_id),
            json!({"proposal_id": proposal_id, "error": error}),
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tokens
    // -----------------------------------------------------------------------

    /// Full validity check: exists, unused, unexpired, bound to this hash.
    pub fn validate_token(&self, token_id: Uuid, intent_hash: &str, now: DateTime<Utc>) -> bool {
        let tokens = self.tokens.lock().expect("token lock poisoned");
        tokens
            .get(&token_id)
            .map(|t| t.is_valid(now) && t.intent_hash == intent_hash)
            .unwrap_or(false)
    }

    /// Read-only copy of a token, for binding checks that must not burn it.
    pub fn token_snapshot(&self, token_id: Uuid) -> Option<ApprovalToken> {
        self.tokens
            .lock()
            .expect("token lock poisoned")
            .get(&token_id)
            .cloned()
    }

    /// Atomically consume a token. The second consumer of the same token
    /// always observes `TokenAlreadyUsed`.
    pub fn consume_token(
        &self,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ApprovalToken, ApprovalError> {
        self.kill.check_or_fail("consume_token")?;

        let mut tokens = self.tokens.lock().expect("token lock poisoned");
        let token = tokens
            .get_mut(&token_id)
            .ok_or(ApprovalError::TokenNotFound(token_id))?;
        if token.is_used() {
            return Err(ApprovalError::TokenAlreadyUsed(token_id));
        }
        if token.is_expired(now) {
            return Err(ApprovalError::TokenExpired(token_id));
        }
        token.used_at = Some(now);
        Ok(token.clone())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// RISK_APPROVED and APPROVAL_REQUESTED proposals, newest first.
    pub fn pending(&self, limit: usize) -> Vec<OrderProposal> {
        self.store.filtered(limit, |p| {
            matches!(
                p.state,
                OrderState::RiskApproved | OrderState::ApprovalRequested
            )
        })
    }

    pub fn get(&self, proposal_id: Uuid) -> Result<OrderProposal, ApprovalError> {
        self.store.snapshot(proposal_id)
    }

    /// Find the proposal that owns a broker order id.
    pub fn find_by_broker_order(&self, broker_order_id: &str) -> Option<OrderProposal> {
        self.store
            .filtered(1, |p| {
                p.broker_order_id.as_deref() == Some(broker_order_id)
            })
            .into_iter()
            .next()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn transition(
        &self,
        proposal_id: Uuid,
        next: OrderState,
        now: DateTime<Utc>,
        mutate: impl FnOnce(&mut OrderProposal),
    ) -> Result<OrderProposal, ApprovalError> {
        let arc = self.store.handle(proposal_id)?;
        let mut guard = arc.lock().expect("proposal lock poisoned");
        guard.advance(next, now)?;
        mutate(&mut guard);
        Ok(guard.clone())
    }

    fn issue_token(
        &self,
        proposal_id: Uuid,
        intent_hash: &str,
        now: DateTime<Utc>,
    ) -> ApprovalToken {
        let token = ApprovalToken::issue(proposal_id, intent_hash, now, self.token_ttl);
        self.tokens
            .lock()
            .expect("token lock poisoned")
            .insert(token.token_id, token.clone());
        token
    }
}
