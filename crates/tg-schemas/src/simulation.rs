use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome class of a pre-trade simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationStatus {
    Success,
    InsufficientCash,
    InvalidQuantity,
    PriceUnavailable,
    ConstraintViolated,
}

impl SimulationStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, SimulationStatus::Success)
    }
}

/// Deterministic projection of an intent's effect on cash and exposure.
/// Produced once per proposal and carried immutably thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub status: SimulationStatus,
    pub execution_price: Decimal,
    pub gross_notional: Decimal,
    pub estimated_fee: Decimal,
    pub estimated_slippage: Decimal,
    /// BUY: gross + fee + slippage. SELL: gross - fee - slippage.
    pub net_notional: Decimal,
    pub cash_before: Decimal,
    pub cash_after: Decimal,
    pub exposure_before: Decimal,
    pub exposure_after: Decimal,
    pub warnings: Vec<String>,
    pub error_message: Option<String>,
}

impl SimulationResult {
    /// Effective slippage in basis points of gross notional. Zero when the
    /// notional is zero (degenerate inputs).
    pub fn slippage_bps(&self) -> Decimal {
        if self.gross_notional.is_zero() {
            Decimal::ZERO
        } else {
            self.estimated_slippage / self.gross_notional * Decimal::from(10_000)
        }
    }
}
