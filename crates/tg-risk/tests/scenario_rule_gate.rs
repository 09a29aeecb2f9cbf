//! Rule-gate scenarios: verdict mapping, boundary semantics, kill-switch
//! override, and hot reload.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tg_risk::{RiskContext, RiskEngine, RiskPolicy};
use tg_schemas::{
    CashBalance, Constraints, Instrument, OrderIntent, OrderType, Portfolio, RiskVerdict, RuleId,
    Side, SimulationResult, SimulationStatus, TimeInForce,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A Wednesday, 14:00 New York time (18:00 UTC in July): mid-session, clear
/// of both session edges.
fn mid_session() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 10, 18, 0, 0).unwrap()
}

/// A Saturday, always outside the window.
fn weekend() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 13, 18, 0, 0).unwrap()
}

fn portfolio(total: Decimal) -> Portfolio {
    Portfolio {
        account_id: "DU123456".into(),
        total_value: total,
        cash: vec![CashBalance {
            currency: "USD".into(),
            amount: total,
        }],
        positions: vec![],
        ts_utc: mid_session(),
    }
}

fn intent() -> OrderIntent {
    OrderIntent {
        account_id: "DU123456".into(),
        instrument: Instrument::stock("AAPL"),
        side: Side::Buy,
        order_type: OrderType::Mkt,
        quantity: dec!(10),
        limit_price: None,
        stop_price: None,
        time_in_force: TimeInForce::Day,
        reason: "Portfolio rebalance to target allocation".into(),
        strategy_tag: None,
        constraints: Constraints {
            max_slippage_bps: 1000,
            max_notional: dec!(10000000),
        },
    }
}

fn sim(gross: Decimal, slippage: Decimal) -> SimulationResult {
    SimulationResult {
        status: SimulationStatus::Success,
        execution_price: dec!(190.47),
        gross_notional: gross,
        estimated_fee: dec!(1),
        estimated_slippage: slippage,
        net_notional: gross + dec!(1) + slippage,
        cash_before: dec!(1000000),
        cash_after: dec!(1000000) - gross,
        exposure_before: Decimal::ZERO,
        exposure_after: gross,
        warnings: vec![],
        error_message: None,
    }
}

struct Fixture {
    intent: OrderIntent,
    portfolio: Portfolio,
    sim: SimulationResult,
}

impl Fixture {
    fn new(gross: Decimal) -> Self {
        Self {
            intent: intent(),
            portfolio: portfolio(dec!(1000000)),
            sim: sim(gross, Decimal::ZERO),
        }
    }

    fn ctx(&self) -> RiskContext<'_> {
        RiskContext {
            intent: &self.intent,
            portfolio: &self.portfolio,
            simulation: &self.sim,
            now: mid_session(),
            daily_trades_count: 0,
            daily_pnl: Decimal::ZERO,
            peak_portfolio_value: None,
            liquidity: None,
            volatility: None,
            correlation_exposure: None,
            kill_switch_enabled: false,
        }
    }
}

fn engine() -> RiskEngine {
    RiskEngine::new(RiskPolicy::default())
}

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

#[test]
fn clean_trade_is_approved() {
    let f = Fixture::new(dec!(1904.70));
    let d = engine().evaluate(&f.ctx());
    assert_eq!(d.verdict, RiskVerdict::Approve, "reason: {}", d.reason);
    assert!(d.violated_rules.is_empty());
    assert!(!d.halt_requested);
}

#[test]
fn oversized_trade_rejected_by_r1_with_cited_limit() {
    // 1000 shares at 190.47: gross 190,470 over the 50,000 default.
    let f = Fixture::new(dec!(190470));
    let d = engine().evaluate(&f.ctx());
    assert_eq!(d.verdict, RiskVerdict::Reject);
    assert!(d.violated_rules.contains(&RuleId::R1));
    assert!(d.reason.contains("max_notional_per_trade"));
    assert!(d.reason.contains("50000"));
}

#[test]
fn major_only_violation_defers_to_manual_review() {
    let f = Fixture::new(dec!(1904.70));
    let mut ctx = f.ctx();
    // R6 (MAJOR by default): liquidity below the floor.
    let eng = RiskEngine::new(
        RiskPolicy::from_yaml_str("rules:\n  r6: { enabled: true, limit: 1000, severity: MAJOR }\n")
            .unwrap(),
    );
    ctx.liquidity = Some(dec!(500));
    let d = eng.evaluate(&ctx);
    assert_eq!(d.verdict, RiskVerdict::ManualReview);
    assert_eq!(d.violated_rules, vec![RuleId::R6]);
}

#[test]
fn kill_switch_rejects_with_synthetic_rule() {
    let f = Fixture::new(dec!(100));
    let mut ctx = f.ctx();
    ctx.kill_switch_enabled = true;
    let d = engine().evaluate(&ctx);
    assert_eq!(d.verdict, RiskVerdict::Reject);
    assert_eq!(d.violated_rules, vec![RuleId::Ks]);
}

// ---------------------------------------------------------------------------
// Boundaries
// ---------------------------------------------------------------------------

#[test]
fn slippage_exactly_at_limit_approves_one_bp_above_rejects() {
    // gross 10,000: 50.00 slippage == 50 bps exactly.
    let mut f = Fixture::new(dec!(10000));
    f.sim.estimated_slippage = dec!(50.00);
    let d = engine().evaluate(&f.ctx());
    assert_eq!(d.verdict, RiskVerdict::Approve, "reason: {}", d.reason);

    // One bp above: 51 bps.
    f.sim.estimated_slippage = dec!(51.00);
    let d = engine().evaluate(&f.ctx());
    assert_eq!(d.verdict, RiskVerdict::Reject);
    assert!(d.violated_rules.contains(&RuleId::R4));
}

#[test]
fn daily_trade_budget_is_strict() {
    let f = Fixture::new(dec!(1904.70));
    let mut ctx = f.ctx();
    ctx.daily_trades_count = 49;
    assert_eq!(engine().evaluate(&ctx).verdict, RiskVerdict::Approve);

    ctx.daily_trades_count = 50;
    let d = engine().evaluate(&ctx);
    assert_eq!(d.verdict, RiskVerdict::Reject);
    assert!(d.violated_rules.contains(&RuleId::R7));
}

#[test]
fn daily_loss_breach_trips_r8() {
    let f = Fixture::new(dec!(1904.70));
    let mut ctx = f.ctx();
    ctx.daily_pnl = dec!(-4999.99);
    assert_eq!(engine().evaluate(&ctx).verdict, RiskVerdict::Approve);

    ctx.daily_pnl = dec!(-5000);
    let d = engine().evaluate(&ctx);
    assert_eq!(d.verdict, RiskVerdict::Reject);
    assert!(d.violated_rules.contains(&RuleId::R8));
}

#[test]
fn drawdown_breach_rejects_and_requests_halt() {
    let f = Fixture::new(dec!(1904.70));
    let mut ctx = f.ctx();
    // total_value 1,000,000 vs peak 1,200,000: 16.7% drawdown over the 10% cap.
    ctx.peak_portfolio_value = Some(dec!(1200000));
    let d = engine().evaluate(&ctx);
    assert_eq!(d.verdict, RiskVerdict::Reject);
    assert!(d.violated_rules.contains(&RuleId::R11));
    assert!(d.halt_requested);
    assert!(d.metrics.contains_key("drawdown_pct"));
}

// ---------------------------------------------------------------------------
// Trading window (R5 / R12)
// ---------------------------------------------------------------------------

#[test]
fn weekend_is_outside_the_window() {
    let f = Fixture::new(dec!(1904.70));
    let mut ctx = f.ctx();
    ctx.now = weekend();
    let d = engine().evaluate(&ctx);
    assert_eq!(d.verdict, RiskVerdict::Reject);
    assert!(d.violated_rules.contains(&RuleId::R5));
}

#[test]
fn r5_judges_now_not_snapshot_age() {
    // A stale portfolio snapshot does not matter: `now` is mid-session, so
    // R5 passes even though the fixture's snapshot is hours old.
    let mut f = Fixture::new(dec!(1904.70));
    f.portfolio.ts_utc = mid_session() - chrono::Duration::minutes(10);
    let d = engine().evaluate(&f.ctx());
    assert_eq!(d.verdict, RiskVerdict::Approve, "reason: {}", d.reason);
}

#[test]
fn session_open_edge_defers_to_review() {
    let f = Fixture::new(dec!(1904.70));
    let mut ctx = f.ctx();
    // 09:35 New York on a Wednesday (13:35 UTC in July): 5 minutes in.
    ctx.now = Utc.with_ymd_and_hms(2024, 7, 10, 13, 35, 0).unwrap();
    let d = engine().evaluate(&ctx);
    assert_eq!(d.verdict, RiskVerdict::ManualReview, "reason: {}", d.reason);
    assert!(d.violated_rules.contains(&RuleId::R12));
}

#[test]
fn pre_market_allowed_only_by_flag() {
    let f = Fixture::new(dec!(1904.70));
    let mut ctx = f.ctx();
    // 08:00 New York (12:00 UTC in July).
    ctx.now = Utc.with_ymd_and_hms(2024, 7, 10, 12, 0, 0).unwrap();
    let d = engine().evaluate(&ctx);
    assert!(d.violated_rules.contains(&RuleId::R5));

    let eng = RiskEngine::new(
        RiskPolicy::from_yaml_str("trading_hours:\n  allow_pre_market: true\n").unwrap(),
    );
    let d = eng.evaluate(&ctx);
    assert!(!d.violated_rules.contains(&RuleId::R5), "reason: {}", d.reason);
}

// ---------------------------------------------------------------------------
// Warnings and disabled rules
// ---------------------------------------------------------------------------

#[test]
fn warning_at_80_percent_of_limit_is_non_blocking() {
    let f = Fixture::new(dec!(45000));
    let d = engine().evaluate(&f.ctx());
    assert_eq!(d.verdict, RiskVerdict::Approve, "reason: {}", d.reason);
    assert!(d.warnings.iter().any(|w| w.starts_with("R1")), "{:?}", d.warnings);
}

#[test]
fn disabled_rule_always_passes() {
    let eng = RiskEngine::new(
        RiskPolicy::from_yaml_str("rules:\n  r1: { enabled: false, limit: 50000, severity: BLOCKER }\n")
            .unwrap(),
    );
    let mut f = Fixture::new(dec!(190470));
    // Keep R2 quiet: the position stays tiny relative to the book.
    f.portfolio.total_value = dec!(10000000);
    let d = eng.evaluate(&f.ctx());
    assert!(!d.violated_rules.contains(&RuleId::R1), "reason: {}", d.reason);
}

#[test]
fn sector_rule_is_noop_without_mapping() {
    let f = Fixture::new(dec!(1904.70));
    let d = engine().evaluate(&f.ctx());
    assert!(!d.metrics.contains_key("sector_pct"));
}

// ---------------------------------------------------------------------------
// Hot reload
// ---------------------------------------------------------------------------

#[test]
fn reload_swaps_limits_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("risk_policy.yaml");
    std::fs::write(&path, "{}\n").unwrap();

    let eng = RiskEngine::from_path(&path).unwrap();
    let f = Fixture::new(dec!(40000));
    assert_eq!(eng.evaluate(&f.ctx()).verdict, RiskVerdict::Approve);

    std::fs::write(
        &path,
        "rules:\n  r1: { enabled: true, limit: 10000, severity: BLOCKER }\n",
    )
    .unwrap();
    let hash = eng.reload().unwrap();
    assert_eq!(hash.len(), 64);

    let d = eng.evaluate(&f.ctx());
    assert_eq!(d.verdict, RiskVerdict::Reject);
    assert!(d.violated_rules.contains(&RuleId::R1));
}

#[test]
fn malformed_reload_keeps_previous_policy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("risk_policy.yaml");
    std::fs::write(&path, "{}\n").unwrap();

    let eng = RiskEngine::from_path(&path).unwrap();
    std::fs::write(&path, "rules: [this is not a mapping]\n").unwrap();
    assert!(eng.reload().is_err());

    // Still evaluating with the original defaults.
    let f = Fixture::new(dec!(1904.70));
    assert_eq!(eng.evaluate(&f.ctx()).verdict, RiskVerdict::Approve);
}
