use serde::{Deserialize, Serialize};

/// Security type of a tradable instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecType {
    Stk,
    Etf,
    Fut,
    Fx,
    Crypto,
}

impl SecType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecType::Stk => "STK",
            SecType::Etf => "ETF",
            SecType::Fut => "FUT",
            SecType::Fx => "FX",
            SecType::Crypto => "CRYPTO",
        }
    }
}

/// A tradable instrument. Symbols are held uppercase; `normalized` enforces
/// that for values arriving from external callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Instrument {
    pub symbol: String,
    pub sec_type: SecType,
    pub exchange: String,
    pub currency: String,
}

impl Instrument {
    pub fn new(
        symbol: impl Into<String>,
        sec_type: SecType,
        exchange: impl Into<String>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            sec_type,
            exchange: exchange.into(),
            currency: currency.into(),
        }
        .normalized()
    }

    /// Uppercase the symbol and trim incidental whitespace.
    pub fn normalized(mut self) -> Self {
        self.symbol = self.symbol.trim().to_ascii_uppercase();
        self.exchange = self.exchange.trim().to_string();
        self.currency = self.currency.trim().to_ascii_uppercase();
        self
    }

    /// Equity convenience constructor used widely in tests.
    pub fn stock(symbol: impl Into<String>) -> Self {
        Self::new(symbol, SecType::Stk, "SMART", "USD")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_uppercases_symbol() {
        let ins = Instrument::new(" aapl ", SecType::Stk, "SMART", "usd");
        assert_eq!(ins.symbol, "AAPL");
        assert_eq!(ins.currency, "USD");
    }

    #[test]
    fn sec_type_serializes_screaming() {
        let s = serde_json::to_string(&SecType::Crypto).unwrap();
        assert_eq!(s, "\"CRYPTO\"");
    }
}
