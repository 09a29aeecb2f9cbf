//! The deterministic policy evaluator.
//!
//! Evaluation order is fixed: kill switch first, then R1..R12. Each enabled
//! rule either passes, warns (at 80% of its limit), or records a violation.
//! Any violated BLOCKER rule rejects; violations carrying only MAJOR/MINOR
//! severity defer to manual review; approval requires every enabled rule to
//! pass. All boundary comparisons are non-strict: a value exactly at its
//! limit passes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

use tg_schemas::{
    OrderIntent, Portfolio, RiskDecision, RiskVerdict, RuleId, Severity, SimulationResult,
};

use crate::policy::{PolicyError, RiskPolicy, RuleConfig, TradingHours};

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything one evaluation may look at. All fields are inputs; the engine
/// holds no per-account state of its own.
#[derive(Debug, Clone)]
pub struct RiskContext<'a> {
    pub intent: &'a OrderIntent,
    pub portfolio: &'a Portfolio,
    pub simulation: &'a SimulationResult,
    pub now: DateTime<Utc>,
    pub daily_trades_count: u32,
    pub daily_pnl: Decimal,
    /// High-water mark of portfolio value; absent disables R11.
    pub peak_portfolio_value: Option<Decimal>,
    /// Liquidity proxy for the instrument (e.g. snapshot volume); absent
    /// makes R6 a no-op.
    pub liquidity: Option<Decimal>,
    /// Per-symbol annualized volatility override; falls back to the policy's
    /// own table, and R9 is skipped when neither knows the symbol.
    pub volatility: Option<&'a BTreeMap<String, Decimal>>,
    /// Pre-computed correlation-scaled exposure; absent keeps R10 inactive.
    pub correlation_exposure: Option<Decimal>,
    pub kill_switch_enabled: bool,
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

struct Collector {
    violations: Vec<(RuleId, Severity, String)>,
    warnings: Vec<String>,
    metrics: BTreeMap<String, Decimal>,
    halt_requested: bool,
}

impl Collector {
    fn new() -> Self {
        Self {
            violations: Vec::new(),
            warnings: Vec::new(),
            metrics: BTreeMap::new(),
            halt_requested: false,
        }
    }

    fn metric(&mut self, key: &str, value: Decimal) {
        self.metrics.insert(key.to_string(), value);
    }

    fn violate(&mut self, rule: RuleId, severity: Severity, message: String) {
        self.violations.push((rule, severity, message));
    }

    /// Non-strict ceiling check with an 80% early warning.
    fn ceiling(
        &mut self,
        rule: RuleId,
        cfg: &RuleConfig,
        value: Decimal,
        limit: Decimal,
        message: String,
    ) {
        if value > limit {
            self.violate(rule, cfg.severity, message);
        } else if limit > Decimal::ZERO && value >= limit * dec!(0.8) {
            self.warnings
                .push(format!("{}: {value} is within 80% of limit {limit}", rule.as_str()));
        }
    }

    fn into_decision(self) -> RiskDecision {
        let verdict = if self.violations.is_empty() {
            RiskVerdict::Approve
        } else if self
            .violations
            .iter()
            .any(|(_, sev, _)| *sev == Severity::Blocker)
        {
            RiskVerdict::Reject
        } else {
            RiskVerdict::ManualReview
        };

        let reason = if self.violations.is_empty() {
            "all enabled risk rules passed".to_string()
        } else {
            self.violations
                .iter()
                .map(|(_, _, m)| m.as_str())
                .collect::<Vec<_>>()
                .join("; ")
        };

        RiskDecision {
            verdict,
            reason,
            violated_rules: self.violations.iter().map(|(r, _, _)| *r).collect(),
            warnings: self.warnings,
            metrics: self.metrics,
            halt_requested: self.halt_requested,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Holds the active policy behind a read/write lock so `reload` can swap it
/// atomically while evaluations keep reading the previous snapshot.
pub struct RiskEngine {
    policy: RwLock<Arc<RiskPolicy>>,
    source: Option<PathBuf>,
}

impl RiskEngine {
    pub fn new(policy: RiskPolicy) -> Self {
        Self {
            policy: RwLock::new(Arc::new(policy)),
            source: None,
        }
    }

    /// Load from a YAML policy file and remember the path for hot reload.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, PolicyError> {
        let path = path.into();
        let policy = RiskPolicy::load(&path)?;
        Ok(Self {
            policy: RwLock::new(Arc::new(policy)),
            source: Some(path),
        })
    }

    pub fn policy(&self) -> Arc<RiskPolicy> {
        Arc::clone(&self.policy.read().expect("policy lock poisoned"))
    }

    /// Re-read the source file and swap the active policy. Returns the new
    /// policy hash. A parse failure leaves the previous policy active.
    pub fn reload(&self) -> Result<String, PolicyError> {
        let path = self
            .source
            .as_ref()
            .ok_or_else(|| PolicyError::Invalid("engine has no policy file to reload".into()))?;
        let fresh = RiskPolicy::load(path)?;
        let hash = fresh.policy_hash();
        *self.policy.write().expect("policy lock poisoned") = Arc::new(fresh);
        info!(policy_hash = %hash, "risk policy reloaded");
        Ok(hash)
    }

    /// Evaluate an intent against the active policy. Pure given its inputs.
    pub fn evaluate(&self, ctx: &RiskContext<'_>) -> RiskDecision {
        let policy = self.policy();
        evaluate_with(&policy, ctx)
    }
}

/// Rule-by-rule evaluation against an explicit policy snapshot.
pub fn evaluate_with(policy: &RiskPolicy, ctx: &RiskContext<'_>) -> RiskDecision {
    // Kill switch overrides everything.
    if ctx.kill_switch_enabled {
        return RiskDecision {
            verdict: RiskVerdict::Reject,
            reason: "kill switch active: all trades rejected".to_string(),
            violated_rules: vec![RuleId::Ks],
            warnings: Vec::new(),
            metrics: BTreeMap::new(),
            halt_requested: false,
        };
    }

    let mut c = Collector::new();
    let rules = &policy.rules;
    let sim = ctx.simulation;
    let symbol = ctx.intent.instrument.symbol.as_str();
    let gross = sim.gross_notional;
    let total_value = ctx.portfolio.total_value;

    // R1 — max notional per trade.
    if rules.r1.enabled {
        c.metric("gross_notional", gross);
        c.ceiling(
            RuleId::R1,
            &rules.r1,
            gross,
            rules.r1.limit,
            format!(
                "gross notional {gross} exceeds max_notional_per_trade {}",
                rules.r1.limit
            ),
        );
    }

    // R2 — post-trade position weight.
    if rules.r2.enabled && total_value > Decimal::ZERO {
        let weight = sim.exposure_after / total_value;
        c.metric("position_pct", weight * dec!(100));
        c.ceiling(
            RuleId::R2,
            &rules.r2,
            weight,
            rules.r2.limit,
            format!(
                "post-trade weight of {symbol} {:.4} exceeds max_position_weight {}",
                weight, rules.r2.limit
            ),
        );
    }

    // R3 — post-trade sector weight. No-op without a sector mapping.
    if rules.r3.enabled && total_value > Decimal::ZERO {
        if let Some(sector) = policy.sector_map.get(symbol) {
            let current: Decimal = ctx
                .portfolio
                .positions
                .iter()
                .filter(|p| policy.sector_map.get(&p.instrument.symbol) == Some(sector))
                .map(|p| p.market_value)
                .sum();
            let after = current + (sim.exposure_after - sim.exposure_before);
            let weight = after / total_value;
            c.metric("sector_pct", weight * dec!(100));
            c.ceiling(
                RuleId::R3,
                &rules.r3,
                weight,
                rules.r3.limit,
                format!(
                    "post-trade sector weight of {sector} {:.4} exceeds max_sector_weight {}",
                    weight, rules.r3.limit
                ),
            );
        }
    }

    // R4 — slippage ceiling (non-strict: exactly at the limit approves).
    if rules.r4.enabled {
        let bps = sim.slippage_bps();
        c.metric("slippage_bps", bps);
        c.ceiling(
            RuleId::R4,
            &rules.r4,
            bps,
            rules.r4.limit,
            format!(
                "estimated slippage {bps:.2} bps exceeds max_slippage_bps {}",
                rules.r4.limit
            ),
        );
    }

    // R5 — trading window, judged against `now` (never the snapshot age).
    if rules.r5.enabled {
        match window_position(&policy.trading_hours, ctx.now) {
            Ok(WindowPosition::Open { .. }) => {}
            Ok(WindowPosition::PreMarket) if policy.trading_hours.allow_pre_market => {}
            Ok(WindowPosition::AfterHours) if policy.trading_hours.allow_after_hours => {}
            Ok(pos) => c.violate(
                RuleId::R5,
                rules.r5.severity,
                format!("outside trading window ({})", pos.describe()),
            ),
            Err(e) => c.violate(
                RuleId::R5,
                rules.r5.severity,
                format!("trading window misconfigured: {e}"),
            ),
        }
    }

    // R6 — liquidity floor. No-op when the proxy is unknown.
    if rules.r6.enabled {
        if let Some(liquidity) = ctx.liquidity {
            c.metric("liquidity", liquidity);
            if liquidity < rules.r6.limit {
                c.violate(
                    RuleId::R6,
                    rules.r6.severity,
                    format!(
                        "liquidity proxy {liquidity} below min_liquidity {}",
                        rules.r6.limit
                    ),
                );
            }
        }
    }

    // R7 — daily trade budget (strict: the Nth trade of N is refused).
    if rules.r7.enabled {
        let count = Decimal::from(ctx.daily_trades_count);
        c.metric("daily_trades", count);
        if count >= rules.r7.limit {
            c.violate(
                RuleId::R7,
                rules.r7.severity,
                format!(
                    "daily trade count {count} reached max_daily_trades {}",
                    rules.r7.limit
                ),
            );
        } else if rules.r7.limit > Decimal::ZERO && count >= rules.r7.limit * dec!(0.8) {
            c.warnings
                .push(format!("R7: {count} trades is within 80% of {}", rules.r7.limit));
        }
    }

    // R8 — daily loss circuit breaker: pnl must stay above -limit.
    if rules.r8.enabled {
        c.metric("daily_pnl", ctx.daily_pnl);
        let floor = -rules.r8.limit;
        if ctx.daily_pnl <= floor {
            c.violate(
                RuleId::R8,
                rules.r8.severity,
                format!(
                    "daily pnl {} breached max_daily_loss {}",
                    ctx.daily_pnl, rules.r8.limit
                ),
            );
        } else if ctx.daily_pnl < Decimal::ZERO && -ctx.daily_pnl >= rules.r8.limit * dec!(0.8) {
            c.warnings.push(format!(
                "R8: daily loss {} is within 80% of {}",
                -ctx.daily_pnl,
                rules.r8.limit
            ));
        }
    }

    // R9 — volatility-scaled exposure. Skipped without volatility metrics.
    if rules.r9.enabled && total_value > Decimal::ZERO {
        let vol = ctx
            .volatility
            .and_then(|m| m.get(symbol))
            .or_else(|| policy.volatility.get(symbol));
        if let Some(vol) = vol {
            let exposure = gross * *vol;
            c.metric("volatility_exposure", exposure);
            c.ceiling(
                RuleId::R9,
                &rules.r9,
                exposure,
                rules.r9.limit * total_value,
                format!(
                    "volatility exposure {exposure} exceeds {} of portfolio value",
                    rules.r9.limit
                ),
            );
        }
    }

    // R10 — correlation exposure. Inactive unless the caller supplies data.
    if rules.r10.enabled {
        if let Some(corr) = ctx.correlation_exposure {
            c.metric("correlation_exposure", corr);
            c.ceiling(
                RuleId::R10,
                &rules.r10,
                corr,
                rules.r10.limit,
                format!(
                    "correlation exposure {corr} exceeds max_correlation_exposure {}",
                    rules.r10.limit
                ),
            );
        }
    }

    // R11 — drawdown guard; a breach also asks the caller to halt.
    if rules.r11.enabled {
        if let Some(peak) = ctx.peak_portfolio_value {
            if peak > Decimal::ZERO {
                let drawdown_pct = (peak - total_value) / peak * dec!(100);
                c.metric("drawdown_pct", drawdown_pct);
                if drawdown_pct > rules.r11.limit {
                    c.violate(
                        RuleId::R11,
                        rules.r11.severity,
                        format!(
                            "drawdown {drawdown_pct:.2}% exceeds max_drawdown_pct {}%",
                            rules.r11.limit
                        ),
                    );
                    c.halt_requested = true;
                } else if rules.r11.limit > Decimal::ZERO
                    && drawdown_pct >= rules.r11.limit * dec!(0.8)
                {
                    c.warnings.push(format!(
                        "R11: drawdown {drawdown_pct:.2}% is within 80% of {}%",
                        rules.r11.limit
                    ));
                }
            }
        }
    }

    // R12 — session-edge guard: first/last N minutes of the regular session.
    if rules.r12.enabled {
        if let Ok(WindowPosition::Open {
            minutes_since_open,
            minutes_to_close,
        }) = window_position(&policy.trading_hours, ctx.now)
        {
            let edge = rules.r12.limit;
            let since = Decimal::from(minutes_since_open);
            let to_close = Decimal::from(minutes_to_close);
            if since < edge {
                c.violate(
                    RuleId::R12,
                    rules.r12.severity,
                    format!("within first {edge} minutes of the session"),
                );
            } else if to_close < edge {
                c.violate(
                    RuleId::R12,
                    rules.r12.severity,
                    format!("within last {edge} minutes of the session"),
                );
            }
        }
    }

    c.into_decision()
}

// ---------------------------------------------------------------------------
// Trading window arithmetic
// ---------------------------------------------------------------------------

enum WindowPosition {
    Open {
        minutes_since_open: i64,
        minutes_to_close: i64,
    },
    PreMarket,
    AfterHours,
    Weekend,
}

impl WindowPosition {
    fn describe(&self) -> &'static str {
        match self {
            WindowPosition::Open { .. } => "open",
            WindowPosition::PreMarket => "pre-market",
            WindowPosition::AfterHours => "after-hours",
            WindowPosition::Weekend => "weekend",
        }
    }
}

fn window_position(th: &TradingHours, now: DateTime<Utc>) -> Result<WindowPosition, PolicyError> {
    let tz = th.tz()?;
    let open = th.open_time()?;
    let close = th.close_time()?;

    let local = now.with_timezone(&tz);
    if th.weekdays_only && matches!(local.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) {
        return Ok(WindowPosition::Weekend);
    }

    let t = local.time();
    if t < open {
        Ok(WindowPosition::PreMarket)
    } else if t >= close {
        Ok(WindowPosition::AfterHours)
    } else {
        Ok(WindowPosition::Open {
            minutes_since_open: minutes_of(t) - minutes_of(open),
            minutes_to_close: minutes_of(close) - minutes_of(t),
        })
    }
}

fn minutes_of(t: NaiveTime) -> i64 {
    i64::from(t.hour()) * 60 + i64::from(t.minute())
}
