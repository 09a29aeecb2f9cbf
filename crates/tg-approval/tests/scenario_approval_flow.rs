//! Approval-service scenarios: the two-step commit, token single-use,
//! auto-approval, and the kill-switch interaction.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use tg_approval::{ApprovalError, ApprovalService, AutoApprovalPolicy};
use tg_audit::{AuditLog, EventFilter, EventType};
use tg_killswitch::{EnvOverride, KillSwitch};
use tg_schemas::{
    CashBalance, Constraints, Instrument, OrderIntent, OrderProposal, OrderState, OrderType,
    Portfolio, RiskDecision, Side, SimulationResult, SimulationStatus, TimeInForce,
};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    _dir: tempfile::TempDir,
    audit: Arc<AuditLog>,
    kill: Arc<KillSwitch>,
    service: ApprovalService,
}

fn harness(auto: Option<AutoApprovalPolicy>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(AuditLog::open(dir.path().join("events.jsonl")).unwrap());
    let kill = Arc::new(
        KillSwitch::open(
            dir.path().join("kill_switch.json"),
            Arc::clone(&audit),
            EnvOverride::default(),
        )
        .unwrap(),
    );
    let mut service = ApprovalService::new(Arc::clone(&audit), Arc::clone(&kill));
    if let Some(policy) = auto {
        service = service.with_auto_policy(policy);
    }
    Harness {
        _dir: dir,
        audit,
        kill,
        service,
    }
}

fn intent(order_type: OrderType, qty: Decimal) -> OrderIntent {
    OrderIntent {
        account_id: "DU123456".into(),
        instrument: Instrument::stock("AAPL"),
        side: Side::Buy,
        order_type,
        quantity: qty,
        limit_price: order_type.requires_limit_price().then(|| dec!(190)),
        stop_price: None,
        time_in_force: TimeInForce::Day,
        reason: "Portfolio rebalance to target allocation".into(),
        strategy_tag: None,
        constraints: Constraints {
            max_slippage_bps: 50,
            max_notional: dec!(100000),
        },
    }
}

fn simulation(gross: Decimal) -> SimulationResult {
    SimulationResult {
        status: SimulationStatus::Success,
        execution_price: dec!(190.47),
        gross_notional: gross,
        estimated_fee: dec!(1),
        estimated_slippage: dec!(0.95),
        net_notional: gross + dec!(1.95),
        cash_before: dec!(50000),
        cash_after: dec!(50000) - gross - dec!(1.95),
        exposure_before: Decimal::ZERO,
        exposure_after: gross,
        warnings: vec![],
        error_message: None,
    }
}

fn portfolio() -> Portfolio {
    Portfolio {
        account_id: "DU123456".into(),
        total_value: dec!(100000),
        cash: vec![CashBalance {
            currency: "USD".into(),
            amount: dec!(50000),
        }],
        positions: vec![],
        ts_utc: Utc::now(),
    }
}

/// Drive a fresh proposal to RISK_APPROVED.
fn risk_approved(h: &Harness, order_type: OrderType, gross: Decimal) -> OrderProposal {
    let now = Utc::now();
    let p = OrderProposal::new(intent(order_type, dec!(10)), Uuid::new_v4(), now).unwrap();
    let p = h.service.store(p).unwrap();
    h.service
        .attach_simulation(p.proposal_id, simulation(gross), now)
        .unwrap();
    h.service
        .attach_risk_decision(p.proposal_id, RiskDecision::approve("all rules passed"), now)
        .unwrap()
}

// ---------------------------------------------------------------------------
// Two-step commit
// ---------------------------------------------------------------------------

#[test]
fn human_flow_request_grant_consume() {
    let h = harness(None);
    let now = Utc::now();
    let p = risk_approved(&h, OrderType::Mkt, dec!(1904.70));

    let (p, token) = h.service.request(p.proposal_id, None, now).unwrap();
    assert_eq!(p.state, OrderState::ApprovalRequested);
    assert!(token.is_none());

    let (p, token) = h
        .service
        .grant(p.proposal_id, "looks reasonable", "ops", now)
        .unwrap();
    assert_eq!(p.state, OrderState::ApprovalGranted);
    assert_eq!(p.granted_token_id, Some(token.token_id));

    assert!(h.service.validate_token(token.token_id, &p.intent_hash, now));
    let consumed = h.service.consume_token(token.token_id, now).unwrap();
    assert_eq!(consumed.used_at, Some(now));

    // The audit trail for this proposal is complete and ordered.
    let events = h.audit.query(&EventFilter::for_correlation(p.correlation_id));
    let kinds: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(
        kinds,
        vec![
            EventType::ProposalCreated,
            EventType::OrderSimulated,
            EventType::RiskGateEvaluated,
            EventType::ApprovalRequested,
            EventType::ApprovalGranted,
        ]
    );
    for pair in events.windows(2) {
        assert!(pair[0].ts_utc <= pair[1].ts_utc);
    }
}

#[test]
fn second_consume_fails_with_already_used() {
    let h = harness(None);
    let now = Utc::now();
    let p = risk_approved(&h, OrderType::Mkt, dec!(1904.70));
    let (p, _) = h.service.request(p.proposal_id, None, now).unwrap();
    let (_, token) = h.service.grant(p.proposal_id, "ok to proceed", "ops", now).unwrap();

    h.service.consume_token(token.token_id, now).unwrap();
    let err = h.service.consume_token(token.token_id, now).unwrap_err();
    assert!(matches!(err, ApprovalError::TokenAlreadyUsed(_)));
    assert_eq!(err.kind(), tg_schemas::ErrorKind::Concurrency);

    // And it fails the same way every subsequent time.
    let err = h.service.consume_token(token.token_id, now).unwrap_err();
    assert!(matches!(err, ApprovalError::TokenAlreadyUsed(_)));
}

#[test]
fn token_expiry_is_strict() {
    let h = harness(None);
    let dir_now = Utc::now();
    let p = risk_approved(&h, OrderType::Mkt, dec!(1904.70));
    let (p, _) = h.service.request(p.proposal_id, None, dir_now).unwrap();
    let (_, token) = h.service.grant(p.proposal_id, "ok to proceed", "ops", dir_now).unwrap();

    // Exactly at expires_at: invalid.
    assert!(!h
        .service
        .validate_token(token.token_id, &token.intent_hash, token.expires_at));
    let err = h
        .service
        .consume_token(token.token_id, token.expires_at)
        .unwrap_err();
    assert!(matches!(err, ApprovalError::TokenExpired(_)));

    // One second before: still valid.
    assert!(h.service.validate_token(
        token.token_id,
        &token.intent_hash,
        token.expires_at - Duration::seconds(1)
    ));
}

#[test]
fn token_is_bound_to_the_intent_hash() {
    let h = harness(None);
    let now = Utc::now();
    let p = risk_approved(&h, OrderType::Mkt, dec!(1904.70));
    let (p, _) = h.service.request(p.proposal_id, None, now).unwrap();
    let (_, token) = h.service.grant(p.proposal_id, "ok to proceed", "ops", now).unwrap();

    assert!(!h.service.validate_token(token.token_id, "a-different-hash", now));
}

#[test]
fn deny_requires_a_reason_and_is_terminal() {
    let h = harness(None);
    let now = Utc::now();
    let p = risk_approved(&h, OrderType::Mkt, dec!(1904.70));
    let (p, _) = h.service.request(p.proposal_id, None, now).unwrap();

    let err = h.service.deny(p.proposal_id, "  ", "ops", now).unwrap_err();
    assert!(matches!(err, ApprovalError::DenialReasonRequired));

    let p = h
        .service
        .deny(p.proposal_id, "too close to earnings", "ops", now)
        .unwrap();
    assert_eq!(p.state, OrderState::ApprovalDenied);

    // Terminal is write-once.
    let err = h
        .service
        .grant(p.proposal_id, "changed my mind", "ops", now)
        .unwrap_err();
    assert!(matches!(err, ApprovalError::Transition(_)));
}

#[test]
fn grant_without_request_is_a_state_error() {
    let h = harness(None);
    let now = Utc::now();
    let p = risk_approved(&h, OrderType::Mkt, dec!(1904.70));
    let err = h.service.grant(p.proposal_id, "skip the queue", "ops", now).unwrap_err();
    assert!(matches!(err, ApprovalError::Transition(_)));
}

#[test]
fn pending_returns_newest_first() {
    let h = harness(None);
    let now = Utc::now();
    let a = risk_approved(&h, OrderType::Mkt, dec!(100));
    let b = risk_approved(&h, OrderType::Mkt, dec!(200));
    h.service.request(b.proposal_id, None, now).unwrap();

    let pending = h.service.pending(10);
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().any(|p| p.proposal_id == a.proposal_id));
    assert!(pending.iter().any(|p| p.proposal_id == b.proposal_id));
}

// ---------------------------------------------------------------------------
// Auto-approval
// ---------------------------------------------------------------------------

fn auto_policy(max_notional: Decimal) -> AutoApprovalPolicy {
    AutoApprovalPolicy {
        enabled: true,
        max_notional,
        ..AutoApprovalPolicy::default()
    }
}

#[test]
fn auto_approval_skips_the_queue_and_issues_a_token() {
    let h = harness(Some(auto_policy(dec!(2000))));
    let now = Utc::now();
    let p = risk_approved(&h, OrderType::Lmt, dec!(900));

    let (p, token) = h.service.request(p.proposal_id, Some(&portfolio()), now).unwrap();
    assert_eq!(p.state, OrderState::ApprovalGranted);
    let token = token.expect("auto-approval should issue a token");
    assert!(h.service.validate_token(token.token_id, &p.intent_hash, now));

    assert_eq!(h.audit.stats()["AUTO_APPROVAL_GRANTED"], 1);
}

#[test]
fn auto_approval_boundary_is_inclusive() {
    let h = harness(Some(auto_policy(dec!(1000))));
    let now = Utc::now();

    let at = risk_approved(&h, OrderType::Lmt, dec!(1000));
    let (p, token) = h.service.request(at.proposal_id, Some(&portfolio()), now).unwrap();
    assert_eq!(p.state, OrderState::ApprovalGranted);
    assert!(token.is_some());

    let over = risk_approved(&h, OrderType::Lmt, dec!(1000.01));
    let (p, token) = h.service.request(over.proposal_id, Some(&portfolio()), now).unwrap();
    assert_eq!(p.state, OrderState::ApprovalRequested);
    assert!(token.is_none());
}

#[test]
fn kill_switch_suppresses_auto_approval() {
    let h = harness(Some(auto_policy(dec!(2000))));
    let now = Utc::now();
    let p = risk_approved(&h, OrderType::Lmt, dec!(900));

    h.kill.activate("incident response", "ops").unwrap();

    let (p, token) = h.service.request(p.proposal_id, Some(&portfolio()), now).unwrap();
    assert_eq!(p.state, OrderState::ApprovalRequested);
    assert!(token.is_none(), "no token may be issued while halted");

    // KILL_SWITCH_ACTIVATED precedes the request in the audit log.
    let stats = h.audit.stats();
    assert_eq!(stats["KILL_SWITCH_ACTIVATED"], 1);
    assert_eq!(stats["APPROVAL_REQUESTED"], 1);
    assert!(!stats.contains_key("AUTO_APPROVAL_GRANTED"));
}

#[test]
fn kill_switch_blocks_token_consumption() {
    let h = harness(None);
    let now = Utc::now();
    let p = risk_approved(&h, OrderType::Mkt, dec!(1904.70));
    let (p, _) = h.service.request(p.proposal_id, None, now).unwrap();
    let (_, token) = h.service.grant(p.proposal_id, "ok to proceed", "ops", now).unwrap();

    h.kill.activate("incident response", "ops").unwrap();
    let err = h.service.consume_token(token.token_id, now).unwrap_err();
    assert!(matches!(err, ApprovalError::KillSwitch(_)));
    assert_eq!(err.kind(), tg_schemas::ErrorKind::Policy);
}
