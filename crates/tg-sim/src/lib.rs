//! Deterministic pre-trade simulator.
//!
//! Pure arithmetic over `rust_decimal::Decimal`: equal inputs produce
//! bit-identical outputs. No clocks, no randomness, no I/O. The snapshot is
//! an explicit argument so results never depend on hidden cache state.
//!
//! Money outputs (fee, slippage) are rounded to cents; notionals carry the
//! exact product of price and quantity.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use tg_schemas::{
    MarketSnapshot, OrderIntent, OrderType, Portfolio, Side, SimulationResult, SimulationStatus,
};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Simulator tuning. Defaults reproduce the standard fee/slippage model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Base market-order slippage in basis points.
    pub base_slippage_bps: Decimal,
    /// Additional impact per (notional / liquidity_proxy) unit.
    pub market_impact_factor: Decimal,
    /// Notional that counts as "one unit of liquidity" for impact scaling.
    pub liquidity_proxy: Decimal,
    /// Commission per share.
    pub per_share_rate: Decimal,
    /// Commission floor.
    pub min_fee: Decimal,
    /// Commission cap as a fraction of gross notional.
    pub max_fee_fraction: Decimal,
    /// Warn when estimated slippage exceeds this many bps.
    pub warn_slippage_bps: Decimal,
    /// Warn when gross notional exceeds this value.
    pub large_trade_notional: Decimal,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            base_slippage_bps: dec!(5),
            market_impact_factor: Decimal::ZERO,
            liquidity_proxy: dec!(10000),
            per_share_rate: dec!(0.005),
            // Scale 2 so fee output always reads as cents.
            min_fee: dec!(1.00),
            max_fee_fraction: dec!(0.01),
            warn_slippage_bps: dec!(20),
            large_trade_notional: dec!(50000),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

const BPS_DENOMINATOR: Decimal = dec!(10000);

/// Project the effect of `intent` on cash and exposure.
///
/// Execution price model: MKT buys at ask / sells at bid; LMT assumes the
/// limit is executable; STP and STP_LMT price at the current touch.
pub fn simulate(
    portfolio: &Portfolio,
    snapshot: Option<&MarketSnapshot>,
    intent: &OrderIntent,
    cfg: &SimConfig,
) -> SimulationResult {
    let symbol = intent.instrument.symbol.as_str();
    let cash_before = portfolio.cash_in(&intent.instrument.currency);
    let exposure_before = portfolio.exposure_for(symbol);

    if intent.quantity <= Decimal::ZERO {
        return failed(
            SimulationStatus::InvalidQuantity,
            format!("quantity must be > 0, got {}", intent.quantity),
            cash_before,
            exposure_before,
        );
    }

    let execution_price = match execution_price(intent, snapshot) {
        Some(p) if p > Decimal::ZERO => p,
        _ => {
            return failed(
                SimulationStatus::PriceUnavailable,
                format!("no usable price for {symbol}"),
                cash_before,
                exposure_before,
            );
        }
    };

    let gross = execution_price * intent.quantity;

    // Commission: per-share with a floor, capped at a fraction of notional.
    let fee = (intent.quantity * cfg.per_share_rate)
        .max(cfg.min_fee)
        .min(gross * cfg.max_fee_fraction)
        .max(Decimal::ZERO)
        .round_dp(2);

    // Slippage applies to market orders only; a limit order either executes
    // at its price or not at all.
    let slippage = match intent.order_type {
        OrderType::Mkt => {
            let base = gross * cfg.base_slippage_bps / BPS_DENOMINATOR;
            let impact = gross / cfg.liquidity_proxy * cfg.market_impact_factor;
            (base + impact).round_dp(2)
        }
        _ => Decimal::ZERO,
    };
    let slippage_bps = if gross.is_zero() {
        Decimal::ZERO
    } else {
        slippage / gross * BPS_DENOMINATOR
    };

    let mut warnings = Vec::new();
    if intent.order_type == OrderType::Mkt {
        warnings.push("market order: execution price is not bounded".to_string());
    }
    if slippage_bps > cfg.warn_slippage_bps {
        warnings.push(format!(
            "estimated slippage {:.1} bps exceeds {} bps",
            slippage_bps, cfg.warn_slippage_bps
        ));
    }
    if gross > cfg.large_trade_notional {
        warnings.push(format!(
            "large trade: gross notional {gross} exceeds {}",
            cfg.large_trade_notional
        ));
    }

    let net = match intent.side {
        Side::Buy => gross + fee + slippage,
        Side::Sell => gross - fee - slippage,
    };
    let cash_after = match intent.side {
        Side::Buy => cash_before - net,
        Side::Sell => cash_before + net,
    };
    let exposure_after = match intent.side {
        Side::Buy => exposure_before + gross,
        Side::Sell => exposure_before - gross,
    };

    let base = SimulationResult {
        status: SimulationStatus::Success,
        execution_price,
        gross_notional: gross,
        estimated_fee: fee,
        estimated_slippage: slippage,
        net_notional: net,
        cash_before,
        cash_after,
        exposure_before,
        exposure_after,
        warnings,
        error_message: None,
    };

    // Caller constraints are hard bounds, checked before affordability.
    let max_slippage = Decimal::from(intent.constraints.max_slippage_bps);
    if slippage_bps > max_slippage {
        return SimulationResult {
            status: SimulationStatus::ConstraintViolated,
            error_message: Some(format!(
                "slippage {slippage_bps:.2} bps exceeds constraint {max_slippage} bps"
            )),
            ..base
        };
    }
    if gross > intent.constraints.max_notional {
        return SimulationResult {
            status: SimulationStatus::ConstraintViolated,
            error_message: Some(format!(
                "gross notional {gross} exceeds constraint {}",
                intent.constraints.max_notional
            )),
            ..base
        };
    }

    // Affordability: cash may go to exactly zero, not below.
    if intent.side == Side::Buy && cash_after < Decimal::ZERO {
        return SimulationResult {
            status: SimulationStatus::InsufficientCash,
            error_message: Some(format!(
                "net notional {net} exceeds available cash {cash_before}"
            )),
            ..base
        };
    }

    base
}

fn execution_price(intent: &OrderIntent, snapshot: Option<&MarketSnapshot>) -> Option<Decimal> {
    match intent.order_type {
        OrderType::Lmt => intent.limit_price,
        OrderType::Mkt | OrderType::Stp | OrderType::StpLmt => {
            let snap = snapshot?;
            Some(match intent.side {
                Side::Buy => snap.ask,
                Side::Sell => snap.bid,
            })
        }
    }
}

fn failed(
    status: SimulationStatus,
    message: String,
    cash_before: Decimal,
    exposure_before: Decimal,
) -> SimulationResult {
    SimulationResult {
        status,
        execution_price: Decimal::ZERO,
        gross_notional: Decimal::ZERO,
        estimated_fee: Decimal::ZERO,
        estimated_slippage: Decimal::ZERO,
        net_notional: Decimal::ZERO,
        cash_before,
        cash_after: cash_before,
        exposure_before,
        exposure_after: exposure_before,
        warnings: Vec::new(),
        error_message: Some(message),
    }
}
