//! Deterministic mock brokerage.
//!
//! Seeded pseudo-randomness only: two runs with the same seed and the same
//! call order produce identical quotes, fills, and ids. No network I/O.
//! Orders acknowledge as WORKING and fill after a configurable number of
//! status polls, so submit/poll flows exercise the same paths they would
//! against the live gateway.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use tg_schemas::{
    ApprovalToken, Bar, BrokerOrderStatus, CashBalance, Instrument, MarketSnapshot, Ohlc,
    OpenOrder, OrderIntent, Portfolio, Position, SecType, Side, Timeframe,
};

use crate::{
    verify_submit_token, BarRange, BrokerAdapter, BrokerError, Contract, InstrumentCandidate,
    ReportHandle, ReportQuery, ResolveHint, SearchQuery, FUZZY_MATCH_THRESHOLD,
};

const DEFAULT_FILL_AFTER_POLLS: u32 = 2;
const DEFAULT_STARTING_CASH: Decimal = dec!(100000);

struct MockOrder {
    open: OpenOrder,
    intent_side: Side,
    fill_price: Decimal,
    polls_remaining: u32,
}

struct MockReport {
    query: ReportQuery,
    polls_remaining: u32,
}

struct Inner {
    rng: StdRng,
    connected: bool,
    cash: Decimal,
    positions: BTreeMap<String, Position>,
    orders: BTreeMap<String, MockOrder>,
    reports: BTreeMap<String, MockReport>,
    next_order_seq: u64,
    next_report_seq: u64,
}

pub struct MockBroker {
    inner: Mutex<Inner>,
    universe: Vec<(i64, Instrument, Decimal)>,
    fill_after_polls: u32,
    /// Symbols whose submissions are rejected by the "exchange".
    reject_symbols: Vec<String>,
}

impl MockBroker {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                rng: StdRng::seed_from_u64(seed),
                connected: true,
                cash: DEFAULT_STARTING_CASH,
                positions: BTreeMap::new(),
                orders: BTreeMap::new(),
                reports: BTreeMap::new(),
                next_order_seq: 1,
                next_report_seq: 1,
            }),
            universe: default_universe(),
            fill_after_polls: DEFAULT_FILL_AFTER_POLLS,
            reject_symbols: Vec::new(),
        }
    }

    pub fn with_cash(self, cash: Decimal) -> Self {
        self.inner.lock().expect("mock lock poisoned").cash = cash;
        self
    }

    pub fn with_fill_after_polls(mut self, polls: u32) -> Self {
        self.fill_after_polls = polls;
        self
    }

    /// Orders for these symbols come back REJECTED from the exchange.
    pub fn with_rejections(mut self, symbols: &[&str]) -> Self {
        self.reject_symbols = symbols.iter().map(|s| s.to_ascii_uppercase()).collect();
        self
    }

    /// Simulate a gateway outage for resilience tests.
    pub fn set_connected(&self, connected: bool) {
        self.inner.lock().expect("mock lock poisoned").connected = connected;
    }

    fn base_price(&self, symbol: &str) -> Option<Decimal> {
        self.universe
            .iter()
            .find(|(_, ins, _)| ins.symbol == symbol)
            .map(|(_, _, px)| *px)
    }

    fn quote(&self, inner: &mut Inner, base: Decimal) -> (Decimal, Decimal, Decimal) {
        // Jitter of +/- 20 bps around base, spread of 10 bps.
        let jitter_bps = inner.rng.random_range(-20i64..=20);
        let mid = base * (Decimal::from(10_000 + jitter_bps)) / dec!(10000);
        let half_spread = mid * dec!(0.0005);
        let bid = (mid - half_spread).round_dp(2);
        let ask = (mid + half_spread).round_dp(2);
        (bid, ask, mid.round_dp(2))
    }

    fn portfolio_from(&self, inner: &Inner, account_id: &str, now: DateTime<Utc>) -> Portfolio {
        let positions: Vec<Position> = inner.positions.values().cloned().collect();
        let invested: Decimal = positions.iter().map(|p| p.market_value).sum();
        Portfolio {
            account_id: account_id.to_string(),
            total_value: inner.cash + invested,
            cash: vec![CashBalance {
                currency: "USD".to_string(),
                amount: inner.cash,
            }],
            positions,
            ts_utc: now,
        }
    }

    fn apply_fill(inner: &mut Inner, open: &OpenOrder, side: Side, fill_price: Decimal) {
        let qty = open.quantity;
        let notional = fill_price * qty;
        let symbol = open.symbol.clone();
        let instrument = Instrument::stock(symbol.clone());

        let pos = inner.positions.entry(symbol).or_insert_with(|| Position {
            instrument,
            quantity: Decimal::ZERO,
            average_cost: Decimal::ZERO,
            market_value: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
        });

        match side {
            Side::Buy => {
                let total_cost = pos.average_cost * pos.quantity + notional;
                pos.quantity += qty;
                if pos.quantity > Decimal::ZERO {
                    pos.average_cost = total_cost / pos.quantity;
                }
                pos.market_value = pos.quantity * fill_price;
                inner.cash -= notional;
            }
            Side::Sell => {
                pos.quantity -= qty;
                pos.realized_pnl += (fill_price - pos.average_cost) * qty;
                pos.market_value = pos.quantity * fill_price;
                inner.cash += notional;
            }
        }
    }

    fn check_connected(inner: &Inner) -> Result<(), BrokerError> {
        if inner.connected {
            Ok(())
        } else {
            Err(BrokerError::NotConnected)
        }
    }
}

#[async_trait]
impl BrokerAdapter for MockBroker {
    async fn ping(&self) -> Result<(), BrokerError> {
        let inner = self.inner.lock().expect("mock lock poisoned");
        Self::check_connected(&inner)
    }

    async fn get_portfolio(&self, account_id: &str) -> Result<Portfolio, BrokerError> {
        let inner = self.inner.lock().expect("mock lock poisoned");
        Self::check_connected(&inner)?;
        Ok(self.portfolio_from(&inner, account_id, Utc::now()))
    }

    async fn get_positions(&self, account_id: &str) -> Result<Vec<Position>, BrokerError> {
        Ok(self.get_portfolio(account_id).await?.positions)
    }

    async fn get_cash(&self, account_id: &str) -> Result<Vec<CashBalance>, BrokerError> {
        Ok(self.get_portfolio(account_id).await?.cash)
    }

    async fn get_open_orders(&self, _account_id: &str) -> Result<Vec<OpenOrder>, BrokerError> {
        let inner = self.inner.lock().expect("mock lock poisoned");
        Self::check_connected(&inner)?;
        Ok(inner
            .orders
            .values()
            .filter(|o| !o.open.status.is_terminal())
            .map(|o| o.open.clone())
            .collect())
    }

    async fn get_market_snapshot(
        &self,
        instrument: &Instrument,
    ) -> Result<MarketSnapshot, BrokerError> {
        let mut inner = self.inner.lock().expect("mock lock poisoned");
        Self::check_connected(&inner)?;
        let base = self
            .base_price(&instrument.symbol)
            .ok_or_else(|| BrokerError::UnknownInstrument(instrument.symbol.clone()))?;

        let (bid, ask, mid) = self.quote(&mut inner, base);
        let volume = Decimal::from(inner.rng.random_range(100_000i64..5_000_000));
        Ok(MarketSnapshot {
            instrument: instrument.clone(),
            bid,
            ask,
            last: mid,
            volume,
            ohlc: Ohlc {
                open: base,
                high: ask.max(base),
                low: bid.min(base),
                close: mid,
            },
            prev_close: (base * dec!(0.998)).round_dp(2),
            ts_utc: Utc::now(),
        })
    }

    async fn get_market_bars(
        &self,
        instrument: &Instrument,
        timeframe: Timeframe,
        range: BarRange,
    ) -> Result<Vec<Bar>, BrokerError> {
        let mut inner = self.inner.lock().expect("mock lock poisoned");
        Self::check_connected(&inner)?;
        let base = self
            .base_price(&instrument.symbol)
            .ok_or_else(|| BrokerError::UnknownInstrument(instrument.symbol.clone()))?;

        let step: ChronoDuration = timeframe.step();
        let now = Utc::now();
        let mut bars = Vec::with_capacity(range.limit);
        let mut close = base;
        for i in (0..range.limit).rev() {
            let jitter_bps = inner.rng.random_range(-30i64..=30);
            let open = close;
            close = (open * Decimal::from(10_000 + jitter_bps) / dec!(10000)).round_dp(2);
            let high = open.max(close) * dec!(1.001);
            let low = open.min(close) * dec!(0.999);
            bars.push(Bar {
                ts_utc: now - step * (i as i32 + 1),
                open,
                high: high.round_dp(2),
                low: low.round_dp(2),
                close,
                volume: Decimal::from(inner.rng.random_range(10_000i64..500_000)),
            });
        }
        Ok(bars)
    }

    async fn instrument_search(
        &self,
        query: &SearchQuery,
    ) -> Result<Vec<InstrumentCandidate>, BrokerError> {
        let inner = self.inner.lock().expect("mock lock poisoned");
        Self::check_connected(&inner)?;

        let mut candidates: Vec<InstrumentCandidate> = self
            .universe
            .iter()
            .filter(|(_, ins, _)| {
                query.sec_type.map_or(true, |t| ins.sec_type == t)
                    && query
                        .exchange
                        .as_deref()
                        .map_or(true, |e| ins.exchange.eq_ignore_ascii_case(e))
                    && query
                        .currency
                        .as_deref()
                        .map_or(true, |c| ins.currency.eq_ignore_ascii_case(c))
            })
            .map(|(con_id, ins, _)| InstrumentCandidate {
                con_id: *con_id,
                instrument: ins.clone(),
                score: match query.q.as_deref() {
                    None | Some("") | Some("*") => 1.0,
                    Some(q) => symbol_similarity(q, &ins.symbol),
                },
            })
            .filter(|c| c.score >= FUZZY_MATCH_THRESHOLD)
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.instrument.symbol.cmp(&b.instrument.symbol))
        });
        candidates.truncate(query.limit.unwrap_or(10));
        Ok(candidates)
    }

    async fn instrument_resolve(&self, hint: &ResolveHint) -> Result<Contract, BrokerError> {
        let inner = self.inner.lock().expect("mock lock poisoned");
        Self::check_connected(&inner)?;
        drop(inner);

        // 1) con_id wins outright.
        if let Some(con_id) = hint.con_id {
            if let Some((id, ins, _)) = self.universe.iter().find(|(id, _, _)| *id == con_id) {
                return Ok(Contract {
                    con_id: *id,
                    instrument: ins.clone(),
                });
            }
            return Err(BrokerError::UnknownInstrument(format!("conId {con_id}")));
        }

        let symbol = hint
            .symbol
            .as_deref()
            .ok_or_else(|| BrokerError::UnknownInstrument("empty hint".to_string()))?
            .to_ascii_uppercase();

        // 2) exact symbol.
        if let Some((id, ins, _)) = self.universe.iter().find(|(_, ins, _)| ins.symbol == symbol) {
            return Ok(Contract {
                con_id: *id,
                instrument: ins.clone(),
            });
        }

        // 3) fuzzy above threshold.
        let best = self
            .universe
            .iter()
            .map(|(id, ins, _)| (*id, ins, symbol_similarity(&symbol, &ins.symbol)))
            .max_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));
        match best {
            Some((id, ins, score)) if score >= FUZZY_MATCH_THRESHOLD => Ok(Contract {
                con_id: id,
                instrument: ins.clone(),
            }),
            _ => Err(BrokerError::UnknownInstrument(symbol)),
        }
    }

    async fn submit_order(
        &self,
        intent: &OrderIntent,
        token: &ApprovalToken,
    ) -> Result<OpenOrder, BrokerError> {
        verify_submit_token(intent, token)?;

        let mut inner = self.inner.lock().expect("mock lock poisoned");
        Self::check_connected(&inner)?;

        let symbol = intent.instrument.symbol.clone();
        let base = self
            .base_price(&symbol)
            .ok_or_else(|| BrokerError::UnknownInstrument(symbol.clone()))?;
        let (bid, ask, _mid) = self.quote(&mut inner, base);
        let fill_price = match (intent.order_type.requires_limit_price(), intent.side) {
            (true, _) => intent.limit_price.unwrap_or(ask),
            (false, Side::Buy) => ask,
            (false, Side::Sell) => bid,
        };

        let broker_order_id = format!("MOCK-{:06}", inner.next_order_seq);
        inner.next_order_seq += 1;

        let rejected = self.reject_symbols.contains(&symbol);
        let open = OpenOrder {
            broker_order_id: broker_order_id.clone(),
            client_order_id: Some(intent.intent_hash()),
            symbol,
            side: intent.side,
            order_type: intent.order_type,
            quantity: intent.quantity,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            status: if rejected {
                BrokerOrderStatus::Rejected
            } else {
                BrokerOrderStatus::Working
            },
            updated_at: Utc::now(),
        };

        inner.orders.insert(
            broker_order_id,
            MockOrder {
                open: open.clone(),
                intent_side: intent.side,
                fill_price,
                polls_remaining: self.fill_after_polls,
            },
        );
        Ok(open)
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<OpenOrder, BrokerError> {
        let mut inner = self.inner.lock().expect("mock lock poisoned");
        Self::check_connected(&inner)?;
        let order = inner
            .orders
            .get_mut(broker_order_id)
            .ok_or_else(|| BrokerError::OrderNotFound(broker_order_id.to_string()))?;

        // Cancel is idempotent; a terminal order is returned unchanged.
        if !order.open.status.is_terminal() {
            order.open.status = BrokerOrderStatus::Cancelled;
            order.open.updated_at = Utc::now();
        }
        Ok(order.open.clone())
    }

    async fn get_order_status(&self, broker_order_id: &str) -> Result<OpenOrder, BrokerError> {
        let mut inner = self.inner.lock().expect("mock lock poisoned");
        Self::check_connected(&inner)?;

        let filled = {
            let order = inner
                .orders
                .get_mut(broker_order_id)
                .ok_or_else(|| BrokerError::OrderNotFound(broker_order_id.to_string()))?;

            if order.open.status == BrokerOrderStatus::Working {
                if order.polls_remaining > 0 {
                    order.polls_remaining -= 1;
                }
                if order.polls_remaining == 0 {
                    order.open.status = BrokerOrderStatus::Filled;
                    order.open.filled_quantity = order.open.quantity;
                    order.open.avg_fill_price = Some(order.fill_price);
                    order.open.updated_at = Utc::now();
                    Some((order.open.clone(), order.intent_side, order.fill_price))
                } else {
                    None
                }
            } else {
                None
            }
        };

        if let Some((open, side, fill_price)) = filled {
            Self::apply_fill(&mut inner, &open, side, fill_price);
            return Ok(open);
        }

        Ok(inner.orders[broker_order_id].open.clone())
    }

    async fn modify_order(
        &self,
        broker_order_id: &str,
        new_quantity: Option<Decimal>,
        new_limit_price: Option<Decimal>,
    ) -> Result<OpenOrder, BrokerError> {
        let mut inner = self.inner.lock().expect("mock lock poisoned");
        Self::check_connected(&inner)?;
        let order = inner
            .orders
            .get_mut(broker_order_id)
            .ok_or_else(|| BrokerError::OrderNotFound(broker_order_id.to_string()))?;
        if order.open.status.is_terminal() {
            return Err(BrokerError::Protocol(format!(
                "order {broker_order_id} is terminal and cannot be modified"
            )));
        }
        if let Some(qty) = new_quantity {
            order.open.quantity = qty;
        }
        if let Some(px) = new_limit_price {
            order.fill_price = px;
        }
        order.open.updated_at = Utc::now();
        Ok(order.open.clone())
    }

    async fn request_report(&self, query: &ReportQuery) -> Result<ReportHandle, BrokerError> {
        let mut inner = self.inner.lock().expect("mock lock poisoned");
        Self::check_connected(&inner)?;
        let handle = ReportHandle(format!("RPT-{:04}", inner.next_report_seq));
        inner.next_report_seq += 1;
        inner.reports.insert(
            handle.0.clone(),
            MockReport {
                query: query.clone(),
                polls_remaining: 1,
            },
        );
        Ok(handle)
    }

    async fn report_ready(&self, handle: &ReportHandle) -> Result<bool, BrokerError> {
        let mut inner = self.inner.lock().expect("mock lock poisoned");
        Self::check_connected(&inner)?;
        let report = inner
            .reports
            .get_mut(&handle.0)
            .ok_or_else(|| BrokerError::Protocol(format!("unknown report {}", handle.0)))?;
        if report.polls_remaining > 0 {
            report.polls_remaining -= 1;
            Ok(false)
        } else {
            Ok(true)
        }
    }

    async fn download_report(&self, handle: &ReportHandle) -> Result<Vec<u8>, BrokerError> {
        let inner = self.inner.lock().expect("mock lock poisoned");
        Self::check_connected(&inner)?;
        let report = inner
            .reports
            .get(&handle.0)
            .ok_or_else(|| BrokerError::Protocol(format!("unknown report {}", handle.0)))?;

        let mut csv = String::from("symbol,quantity,average_cost,market_value\n");
        for pos in inner.positions.values() {
            csv.push_str(&format!(
                "{},{},{},{}\n",
                pos.instrument.symbol, pos.quantity, pos.average_cost, pos.market_value
            ));
        }
        csv.push_str(&format!(
            "# report={} range_days={}\n",
            report.query.report, report.query.range_days
        ));
        Ok(csv.into_bytes())
    }
}

fn default_universe() -> Vec<(i64, Instrument, Decimal)> {
    vec![
        (10001, Instrument::stock("AAPL"), dec!(190.40)),
        (10002, Instrument::stock("MSFT"), dec!(425.10)),
        (10003, Instrument::stock("AMZN"), dec!(182.70)),
        (10004, Instrument::stock("NVDA"), dec!(122.60)),
        (10005, Instrument::stock("TSLA"), dec!(248.50)),
        (
            10006,
            Instrument::new("SPY", SecType::Etf, "ARCA", "USD"),
            dec!(545.30),
        ),
        (
            10007,
            Instrument::new("QQQ", SecType::Etf, "NASDAQ", "USD"),
            dec!(480.20),
        ),
    ]
}

/// Normalized edit-distance similarity over uppercased symbols.
fn symbol_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_ascii_uppercase();
    let b = b.to_ascii_uppercase();
    if a == b {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
