//! End-to-end submit scenarios against the deterministic mock broker:
//! happy path, token replay, burn-on-broker-failure, kill switch, and the
//! cancel/modify two-step.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use tg_approval::{ApprovalError, ApprovalService};
use tg_audit::{AuditLog, EventFilter, EventType};
use tg_broker::{BrokerAdapter, MockBroker};
use tg_execution::{CancelModifyService, ModifyParams, MutationState, OrderSubmitter, SubmitError};
use tg_killswitch::{EnvOverride, KillSwitch};
use tg_schemas::{
    ApprovalToken, BrokerOrderStatus, Constraints, Instrument, OrderIntent, OrderProposal,
    OrderState, OrderType, RiskDecision, Side, SimulationResult, SimulationStatus, TimeInForce,
};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    _dir: tempfile::TempDir,
    audit: Arc<AuditLog>,
    kill: Arc<KillSwitch>,
    broker: Arc<MockBroker>,
    approval: Arc<ApprovalService>,
    submitter: OrderSubmitter,
    mutations: CancelModifyService,
}

fn harness(broker: MockBroker) -> Harness {
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
    let broker = Arc::new(broker);
    let approval = Arc::new(ApprovalService::new(Arc::clone(&audit), Arc::clone(&kill)));
    let submitter = OrderSubmitter::new(
        broker.clone() as Arc<dyn BrokerAdapter>,
        Arc::clone(&approval),
        Arc::clone(&audit),
        Arc::clone(&kill),
    )
    .with_polling(10, Duration::from_millis(1));
    let mutations = CancelModifyService::new(
        broker.clone() as Arc<dyn BrokerAdapter>,
        Arc::clone(&audit),
        Arc::clone(&kill),
    );
    Harness {
        _dir: dir,
        audit,
        kill,
        broker,
        approval,
        submitter,
        mutations,
    }
}

fn intent(symbol: &str) -> OrderIntent {
    OrderIntent {
        account_id: "DU123456".into(),
        instrument: Instrument::stock(symbol),
        side: Side::Buy,
        order_type: OrderType::Mkt,
        quantity: dec!(10),
        limit_price: None,
        stop_price: None,
        time_in_force: TimeInForce::Day,
        reason: "Portfolio rebalance to target allocation".into(),
        strategy_tag: None,
        constraints: Constraints {
            max_slippage_bps: 100,
            max_notional: dec!(100000),
        },
    }
}

fn simulation() -> SimulationResult {
    SimulationResult {
        status: SimulationStatus::Success,
        execution_price: dec!(190.47),
        gross_notional: dec!(1904.70),
        estimated_fee: dec!(1.00),
        estimated_slippage: dec!(0.95),
        net_notional: dec!(1906.65),
        cash_before: dec!(50000),
        cash_after: dec!(48093.35),
        exposure_before: Decimal::ZERO,
        exposure_after: dec!(1904.70),
        warnings: vec![],
        error_message: None,
    }
}

/// Drive a proposal to APPROVAL_GRANTED and return it with its token.
fn granted(h: &Harness, symbol: &str) -> (OrderProposal, ApprovalToken) {
    let now = Utc::now();
    let p = OrderProposal::new(intent(symbol), Uuid::new_v4(), now).unwrap();
    let p = h.approval.store(p).unwrap();
    h.approval
        .attach_simulation(p.proposal_id, simulation(), now)
        .unwrap();
    h.approval
        .attach_risk_decision(p.proposal_id, RiskDecision::approve("all rules passed"), now)
        .unwrap();
    let (p, _) = h.approval.request(p.proposal_id, None, now).unwrap();
    h.approval
        .grant(p.proposal_id, "approved for rebalance", "ops", now)
        .unwrap()
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn buy_mkt_happy_path_reaches_filled_with_one_consumed_token() {
    let h = harness(MockBroker::new(42));
    let (p, token) = granted(&h, "AAPL");

    let open = h
        .submitter
        .submit_and_poll(p.proposal_id, token.token_id)
        .await
        .unwrap();
    assert!(open.broker_order_id.starts_with("MOCK-"));
    assert_eq!(open.status, BrokerOrderStatus::Filled);

    let p = h.approval.get(p.proposal_id).unwrap();
    assert_eq!(p.state, OrderState::Filled);
    assert_eq!(p.broker_order_id.as_deref(), Some(open.broker_order_id.as_str()));

    // Exactly one consumed token, bound to this proposal and intent hash.
    let consumed = h.approval.token_snapshot(token.token_id).unwrap();
    assert!(consumed.is_used());
    assert_eq!(consumed.proposal_id, p.proposal_id);
    assert_eq!(consumed.intent_hash, p.intent_hash);

    // One correlation id carries the whole story, in order.
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
            EventType::OrderSubmitted,
            EventType::OrderFilled,
        ]
    );
    for pair in events.windows(2) {
        assert!(pair[0].ts_utc <= pair[1].ts_utc);
    }
}

// ---------------------------------------------------------------------------
// Token replay
// ---------------------------------------------------------------------------

#[tokio::test]
async fn token_replay_is_blocked_and_emits_no_second_submit_event() {
    let h = harness(MockBroker::new(42));
    let (p, token) = granted(&h, "AAPL");

    h.submitter
        .submit_and_poll(p.proposal_id, token.token_id)
        .await
        .unwrap();

    let err = h
        .submitter
        .submit(p.proposal_id, token.token_id)
        .await
        .unwrap_err();
    // The proposal left APPROVAL_GRANTED, so the state gate fires first; a
    // replay against a still-granted proposal hits the consumed token.
    assert!(matches!(err, SubmitError::NotGranted { .. }));

    let p = h.approval.get(p.proposal_id).unwrap();
    assert_eq!(p.state, OrderState::Filled);
    let stats = h.audit.stats();
    assert_eq!(stats["ORDER_SUBMITTED"], 1, "no second ORDER_SUBMITTED");
}

#[tokio::test]
async fn consumed_token_fails_with_concurrency_error() {
    let h = harness(MockBroker::new(42));
    let (p, token) = granted(&h, "AAPL");

    // Burn the token directly, then try to submit with it.
    h.approval.consume_token(token.token_id, Utc::now()).unwrap();
    let err = h
        .submitter
        .submit(p.proposal_id, token.token_id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SubmitError::Approval(ApprovalError::TokenAlreadyUsed(_))
    ));
    assert_eq!(err.kind(), tg_schemas::ErrorKind::Concurrency);
}

#[tokio::test]
async fn token_for_another_proposal_never_reaches_the_broker() {
    let h = harness(MockBroker::new(42));
    let (pa, _ta) = granted(&h, "AAPL");
    let (_pb, tb) = granted(&h, "MSFT");

    let err = h.submitter.submit(pa.proposal_id, tb.token_id).await.unwrap_err();
    assert!(matches!(err, SubmitError::TokenMismatch { .. }));

    // Proposal untouched, token not burned, broker never called.
    assert_eq!(h.approval.get(pa.proposal_id).unwrap().state, OrderState::ApprovalGranted);
    assert!(!h.approval.token_snapshot(tb.token_id).unwrap().is_used());
    assert!(h.broker.get_open_orders("DU123456").await.unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Failure semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn broker_failure_after_consumption_burns_the_token() {
    let h = harness(MockBroker::new(42));
    let (p, token) = granted(&h, "AAPL");

    h.broker.set_connected(false);
    let err = h.submitter.submit(p.proposal_id, token.token_id).await.unwrap_err();
    assert!(matches!(err, SubmitError::SubmissionFailed { .. }));

    // Proposal stays granted, token is burned, failure is audited.
    let p = h.approval.get(p.proposal_id).unwrap();
    assert_eq!(p.state, OrderState::ApprovalGranted);
    assert!(h.approval.token_snapshot(token.token_id).unwrap().is_used());
    assert_eq!(h.audit.stats()["ORDER_SUBMISSION_FAILED"], 1);

    // Reconnecting does not help: the token cannot be replayed.
    h.broker.set_connected(true);
    let err = h.submitter.submit(p.proposal_id, token.token_id).await.unwrap_err();
    assert!(matches!(
        err,
        SubmitError::Approval(ApprovalError::TokenAlreadyUsed(_))
    ));
}

#[tokio::test]
async fn kill_switch_blocks_submission_outright() {
    let h = harness(MockBroker::new(42));
    let (p, token) = granted(&h, "AAPL");

    h.kill.activate("incident response", "ops").unwrap();
    let err = h.submitter.submit(p.proposal_id, token.token_id).await.unwrap_err();
    assert_eq!(err.kind(), tg_schemas::ErrorKind::Policy);

    // Token untouched: submission can proceed after release.
    h.kill.release("ops").unwrap();
    let open = h
        .submitter
        .submit_and_poll(p.proposal_id, token.token_id)
        .await
        .unwrap();
    assert_eq!(open.status, BrokerOrderStatus::Filled);
}

#[tokio::test]
async fn submit_requires_approval_granted_state() {
    let h = harness(MockBroker::new(42));
    let now = Utc::now();
    let p = OrderProposal::new(intent("AAPL"), Uuid::new_v4(), now).unwrap();
    let p = h.approval.store(p).unwrap();

    let err = h.submitter.submit(p.proposal_id, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, SubmitError::NotGranted { .. }));
    assert_eq!(err.kind(), tg_schemas::ErrorKind::State);
}

#[tokio::test]
async fn exhausted_poll_budget_leaves_submitted_and_warns() {
    let h = {
        let mut h = harness(MockBroker::new(42).with_fill_after_polls(100));
        h.submitter = OrderSubmitter::new(
            h.broker.clone() as Arc<dyn BrokerAdapter>,
            Arc::clone(&h.approval),
            Arc::clone(&h.audit),
            Arc::clone(&h.kill),
        )
        .with_polling(3, Duration::from_millis(1));
        h
    };
    let (p, token) = granted(&h, "AAPL");

    let open = h
        .submitter
        .submit_and_poll(p.proposal_id, token.token_id)
        .await
        .unwrap();
    assert_eq!(open.status, BrokerOrderStatus::Working);
    assert_eq!(h.approval.get(p.proposal_id).unwrap().state, OrderState::Submitted);
    assert_eq!(h.audit.stats()["ORDER_POLL_EXHAUSTED"], 1);
}

#[tokio::test]
async fn exchange_reject_lands_in_rejected_state() {
    let h = harness(MockBroker::new(42).with_rejections(&["TSLA"]));
    let (p, token) = granted(&h, "TSLA");

    let open = h
        .submitter
        .submit_and_poll(p.proposal_id, token.token_id)
        .await
        .unwrap();
    assert_eq!(open.status, BrokerOrderStatus::Rejected);
    assert_eq!(h.approval.get(p.proposal_id).unwrap().state, OrderState::Rejected);
    assert_eq!(h.audit.stats()["ORDER_REJECTED"], 1);
}

// ---------------------------------------------------------------------------
// Cancel / modify two-step
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_two_step_executes_on_grant() {
    let h = harness(MockBroker::new(42).with_fill_after_polls(100));
    let (p, token) = granted(&h, "AAPL");
    let open = h.submitter.submit(p.proposal_id, token.token_id).await.unwrap();

    let req = h
        .mutations
        .request_cancel(&open.broker_order_id, "no longer needed today")
        .unwrap();
    assert_eq!(req.state, MutationState::Requested);

    let (intent, cancelled) = h.mutations.grant_cancel(req.cancel_id, "ops").await.unwrap();
    assert_eq!(intent.state, MutationState::Executed);
    assert_eq!(cancelled.status, BrokerOrderStatus::Cancelled);

    let stats = h.audit.stats();
    assert_eq!(stats["CANCEL_REQUESTED"], 1);
    assert_eq!(stats["CANCEL_GRANTED"], 1);
    assert_eq!(stats["CANCEL_EXECUTED"], 1);
}

#[tokio::test]
async fn cancel_deny_never_contacts_the_broker() {
    let h = harness(MockBroker::new(42).with_fill_after_polls(100));
    let (p, token) = granted(&h, "AAPL");
    let open = h.submitter.submit(p.proposal_id, token.token_id).await.unwrap();

    let req = h
        .mutations
        .request_cancel(&open.broker_order_id, "second thoughts about sizing")
        .unwrap();
    let denied = h
        .mutations
        .deny_cancel(req.cancel_id, "order should stand", "ops")
        .unwrap();
    assert_eq!(denied.state, MutationState::Denied);

    // The order is still working at the broker.
    let status = h.broker.get_order_status(&open.broker_order_id).await.unwrap();
    assert_ne!(status.status, BrokerOrderStatus::Cancelled);

    // A denied request cannot be granted afterwards.
    let err = h.mutations.grant_cancel(req.cancel_id, "ops").await.unwrap_err();
    assert!(matches!(err, tg_execution::MutationError::WrongState { .. }));
}

#[tokio::test]
async fn kill_switch_blocks_mutation_execution_not_requests() {
    let h = harness(MockBroker::new(42).with_fill_after_polls(100));
    let (p, token) = granted(&h, "AAPL");
    let open = h.submitter.submit(p.proposal_id, token.token_id).await.unwrap();

    h.kill.activate("incident response", "ops").unwrap();

    let req = h
        .mutations
        .request_cancel(&open.broker_order_id, "halting all working orders")
        .unwrap();
    let err = h.mutations.grant_cancel(req.cancel_id, "ops").await.unwrap_err();
    assert_eq!(err.kind(), tg_schemas::ErrorKind::Policy);
}

#[tokio::test]
async fn modify_two_step_changes_quantity() {
    let h = harness(MockBroker::new(42).with_fill_after_polls(100));
    let (p, token) = granted(&h, "AAPL");
    let open = h.submitter.submit(p.proposal_id, token.token_id).await.unwrap();

    let req = h
        .mutations
        .request_modify(
            &open.broker_order_id,
            ModifyParams {
                quantity: Some(dec!(5)),
                limit_price: None,
            },
            "reduce size after review",
        )
        .unwrap();
    let (intent, modified) = h.mutations.grant_modify(req.modify_id, "ops").await.unwrap();
    assert_eq!(intent.state, MutationState::Executed);
    assert_eq!(modified.quantity, dec!(5));
    assert_eq!(h.audit.stats()["MODIFY_EXECUTED"], 1);
}

#[tokio::test]
async fn empty_modify_is_rejected() {
    let h = harness(MockBroker::new(42));
    let err = h
        .mutations
        .request_modify("MOCK-000001", ModifyParams::default(), "noop change request")
        .unwrap_err();
    assert!(matches!(err, tg_execution::MutationError::EmptyModify));
}
