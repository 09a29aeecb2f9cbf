use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::instrument::Instrument;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashBalance {
    pub currency: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: Instrument,
    pub quantity: Decimal,
    pub average_cost: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
}

/// Account snapshot as reported by the broker. The core never mutates one;
/// projections (simulation) build successor values instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portfolio {
    pub account_id: String,
    pub total_value: Decimal,
    pub cash: Vec<CashBalance>,
    pub positions: Vec<Position>,
    pub ts_utc: DateTime<Utc>,
}

impl Portfolio {
    /// Cash available in the given currency; zero when the currency is not held.
    pub fn cash_in(&self, currency: &str) -> Decimal {
        self.cash
            .iter()
            .find(|c| c.currency.eq_ignore_ascii_case(currency))
            .map(|c| c.amount)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn position_for(&self, symbol: &str) -> Option<&Position> {
        self.positions
            .iter()
            .find(|p| p.instrument.symbol == symbol)
    }

    /// Current market value held in `symbol` (zero when flat).
    pub fn exposure_for(&self, symbol: &str) -> Decimal {
        self.position_for(symbol)
            .map(|p| p.market_value)
            .unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn cash_in_is_currency_insensitive_and_defaults_zero() {
        let p = Portfolio {
            account_id: "DU1".into(),
            total_value: dec!(100000),
            cash: vec![CashBalance {
                currency: "USD".into(),
                amount: dec!(50000),
            }],
            positions: vec![],
            ts_utc: Utc::now(),
        };
        assert_eq!(p.cash_in("usd"), dec!(50000));
        assert_eq!(p.cash_in("EUR"), Decimal::ZERO);
        assert_eq!(p.exposure_for("AAPL"), Decimal::ZERO);
    }
}
