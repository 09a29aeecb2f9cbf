//! TTL cache for market data.
//!
//! Short TTLs instead of invalidation: snapshots default to 60s, bars to
//! 5 minutes. Entries are keyed by (symbol, timeframe-or-"snapshot").
//! Freshness-critical callers bypass the cache explicitly.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tg_schemas::{Bar, MarketSnapshot, Timeframe};

pub const DEFAULT_SNAPSHOT_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_BARS_TTL: Duration = Duration::from_secs(300);

struct Entry<T> {
    stored_at: Instant,
    value: T,
}

pub struct MarketCache {
    snapshot_ttl: Duration,
    bars_ttl: Duration,
    snapshots: Mutex<HashMap<String, Entry<MarketSnapshot>>>,
    bars: Mutex<HashMap<(String, Timeframe), Entry<Vec<Bar>>>>,
}

impl MarketCache {
    pub fn new(snapshot_ttl: Duration, bars_ttl: Duration) -> Self {
        Self {
            snapshot_ttl,
            bars_ttl,
            snapshots: Mutex::new(HashMap::new()),
            bars: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_snapshot(&self, symbol: &str) -> Option<MarketSnapshot> {
        let map = self.snapshots.lock().expect("cache lock poisoned");
        map.get(symbol)
            .filter(|e| e.stored_at.elapsed() < self.snapshot_ttl)
            .map(|e| e.value.clone())
    }

    pub fn put_snapshot(&self, symbol: &str, snapshot: MarketSnapshot) {
        let mut map = self.snapshots.lock().expect("cache lock poisoned");
        map.insert(
            symbol.to_string(),
            Entry {
                stored_at: Instant::now(),
                value: snapshot,
            },
        );
    }

    pub fn get_bars(&self, symbol: &str, timeframe: Timeframe) -> Option<Vec<Bar>> {
        let map = self.bars.lock().expect("cache lock poisoned");
        map.get(&(symbol.to_string(), timeframe))
            .filter(|e| e.stored_at.elapsed() < self.bars_ttl)
            .map(|e| e.value.clone())
    }

    pub fn put_bars(&self, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) {
        let mut map = self.bars.lock().expect("cache lock poisoned");
        map.insert(
            (symbol.to_string(), timeframe),
            Entry {
                stored_at: Instant::now(),
                value: bars,
            },
        );
    }

    pub fn clear(&self) {
        self.snapshots.lock().expect("cache lock poisoned").clear();
        self.bars.lock().expect("cache lock poisoned").clear();
    }
}

impl Default for MarketCache {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_TTL, DEFAULT_BARS_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tg_schemas::{Instrument, Ohlc};

    fn snap() -> MarketSnapshot {
        MarketSnapshot {
            instrument: Instrument::stock("AAPL"),
            bid: dec!(190.28),
            ask: dec!(190.47),
            last: dec!(190.40),
            volume: dec!(100),
            ohlc: Ohlc {
                open: dec!(190),
                high: dec!(191),
                low: dec!(189),
                close: dec!(190.4),
            },
            prev_close: dec!(189),
            ts_utc: Utc::now(),
        }
    }

    #[test]
    fn hit_within_ttl_miss_after_expiry() {
        let cache = MarketCache::new(Duration::from_millis(40), Duration::from_secs(1));
        cache.put_snapshot("AAPL", snap());
        assert!(cache.get_snapshot("AAPL").is_some());

        std::thread::sleep(Duration::from_millis(60));
        assert!(cache.get_snapshot("AAPL").is_none());
    }

    #[test]
    fn bars_are_keyed_by_symbol_and_timeframe() {
        let cache = MarketCache::default();
        cache.put_bars("AAPL", Timeframe::Min5, vec![]);
        assert!(cache.get_bars("AAPL", Timeframe::Min5).is_some());
        assert!(cache.get_bars("AAPL", Timeframe::Day1).is_none());
        assert!(cache.get_bars("MSFT", Timeframe::Min5).is_none());
    }
}
