use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::instrument::Instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// Point-in-time quote for one instrument. Staleness is judged against wall
/// clock via `age`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub instrument: Instrument,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
    pub volume: Decimal,
    pub ohlc: Ohlc,
    pub prev_close: Decimal,
    pub ts_utc: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Midpoint of the current bid/ask.
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.ts_utc
    }
}

/// One historical bar. Bar series returned by the broker are finite and
/// ascending by `ts_utc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub ts_utc: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1min")]
    Min1,
    #[serde(rename = "5min")]
    Min5,
    #[serde(rename = "15min")]
    Min15,
    #[serde(rename = "30min")]
    Min30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "1d")]
    Day1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Min1 => "1min",
            Timeframe::Min5 => "5min",
            Timeframe::Min15 => "15min",
            Timeframe::Min30 => "30min",
            Timeframe::Hour1 => "1h",
            Timeframe::Day1 => "1d",
        }
    }

    pub fn step(&self) -> Duration {
        match self {
            Timeframe::Min1 => Duration::minutes(1),
            Timeframe::Min5 => Duration::minutes(5),
            Timeframe::Min15 => Duration::minutes(15),
            Timeframe::Min30 => Duration::minutes(30),
            Timeframe::Hour1 => Duration::hours(1),
            Timeframe::Day1 => Duration::days(1),
        }
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1min" => Ok(Timeframe::Min1),
            "5min" => Ok(Timeframe::Min5),
            "15min" => Ok(Timeframe::Min15),
            "30min" => Ok(Timeframe::Min30),
            "1h" => Ok(Timeframe::Hour1),
            "1d" => Ok(Timeframe::Day1),
            other => Err(format!("unknown timeframe: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snap() -> MarketSnapshot {
        MarketSnapshot {
            instrument: Instrument::stock("AAPL"),
            bid: dec!(190.28),
            ask: dec!(190.47),
            last: dec!(190.40),
            volume: dec!(1000000),
            ohlc: Ohlc {
                open: dec!(189.00),
                high: dec!(191.00),
                low: dec!(188.50),
                close: dec!(190.40),
            },
            prev_close: dec!(189.20),
            ts_utc: Utc::now(),
        }
    }

    #[test]
    fn mid_is_bid_ask_midpoint() {
        assert_eq!(snap().mid(), dec!(190.375));
    }

    #[test]
    fn timeframe_round_trips_via_str() {
        for tf in [
            Timeframe::Min1,
            Timeframe::Min5,
            Timeframe::Min15,
            Timeframe::Min30,
            Timeframe::Hour1,
            Timeframe::Day1,
        ] {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
    }
}
