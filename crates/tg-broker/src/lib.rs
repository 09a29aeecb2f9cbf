//! Broker adapter boundary.
//!
//! `BrokerAdapter` is the only doorway to a brokerage. Two implementations
//! live here: a deterministic seeded mock for paper/test environments and a
//! JSON/REST adapter for the live gateway. `BrokerClient` wraps either one
//! with the resilience layer (read-only guard, circuit breaker, retry with
//! backoff, per-call deadlines, TTL market-data cache).
//!
//! `submit_order` takes the consumed approval token by design: an adapter
//! must refuse an intent whose token is absent, unconsumed, or bound to a
//! different intent hash. That check is the last line of the two-step
//! commit, below every service-layer gate.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tg_schemas::{
    ApprovalToken, Bar, CashBalance, ErrorKind, Instrument, MarketSnapshot, OpenOrder, OrderIntent,
    Portfolio, Position, SecType, Timeframe,
};

pub mod breaker;
pub mod cache;
pub mod client;
pub mod live;
pub mod mock;

pub use breaker::{Breaker, BreakerState};
pub use cache::MarketCache;
pub use client::{BrokerClient, BrokerConfig};
pub use live::LiveBroker;
pub use mock::MockBroker;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("broker not connected")]
    NotConnected,
    #[error("broker call {op} timed out after {after_ms}ms")]
    Timeout { op: &'static str, after_ms: u64 },
    #[error("read-only mode: {op} refused without contacting the brokerage")]
    ReadOnly { op: &'static str },
    #[error("broker circuit open; retry in {retry_in_secs}s")]
    CircuitOpen { retry_in_secs: u64 },
    #[error("unknown broker order id {0}")]
    OrderNotFound(String),
    #[error("no instrument matches {0}")]
    UnknownInstrument(String),
    #[error("submission requires a consumed approval token: {0}")]
    TokenRequired(String),
    #[error("broker protocol error: {0}")]
    Protocol(String),
    #[error("broker transport error: {0}")]
    Transport(String),
}

impl BrokerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::NotConnected
            | BrokerError::Timeout { .. }
            | BrokerError::CircuitOpen { .. }
            | BrokerError::Transport(_) => ErrorKind::Resource,
            BrokerError::ReadOnly { .. } | BrokerError::TokenRequired(_) => ErrorKind::Policy,
            BrokerError::OrderNotFound(_) | BrokerError::UnknownInstrument(_) => {
                ErrorKind::Validation
            }
            BrokerError::Protocol(_) => ErrorKind::Internal,
        }
    }

    /// Whether a retry with backoff may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            BrokerError::NotConnected | BrokerError::Timeout { .. } | BrokerError::Transport(_)
        )
    }

    /// Connection-shaped failures feed the circuit breaker.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, BrokerError::NotConnected | BrokerError::Transport(_))
    }
}

// ---------------------------------------------------------------------------
// Search / resolve / report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Fuzzy text; absent means wildcard.
    pub q: Option<String>,
    pub sec_type: Option<SecType>,
    pub exchange: Option<String>,
    pub currency: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentCandidate {
    pub con_id: i64,
    pub instrument: Instrument,
    /// Similarity in [0, 1]; 1.0 is an exact symbol match.
    pub score: f64,
}

/// Resolution input. Strategy order: con_id, then exact symbol, then fuzzy
/// above `FUZZY_MATCH_THRESHOLD`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolveHint {
    pub con_id: Option<i64>,
    pub symbol: Option<String>,
}

/// Minimum similarity for a fuzzy symbol match, in search and resolve alike.
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.95;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub con_id: i64,
    pub instrument: Instrument,
}

/// A reporting request (flex-style async export).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportQuery {
    pub report: String,
    pub range_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportHandle(pub String);

/// Inclusive request for historical bars.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BarRange {
    pub limit: usize,
}

// ---------------------------------------------------------------------------
// BrokerAdapter
// ---------------------------------------------------------------------------

/// Capability set every brokerage implementation provides.
///
/// Reads may run concurrently; callers keep one outstanding submit/cancel
/// per broker order id (single-writer convention).
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    async fn ping(&self) -> Result<(), BrokerError>;

    async fn get_portfolio(&self, account_id: &str) -> Result<Portfolio, BrokerError>;
    async fn get_positions(&self, account_id: &str) -> Result<Vec<Position>, BrokerError>;
    async fn get_cash(&self, account_id: &str) -> Result<Vec<CashBalance>, BrokerError>;
    async fn get_open_orders(&self, account_id: &str) -> Result<Vec<OpenOrder>, BrokerError>;

    async fn get_market_snapshot(
        &self,
        instrument: &Instrument,
    ) -> Result<MarketSnapshot, BrokerError>;

    /// Finite series, ascending by timestamp.
    async fn get_market_bars(
        &self,
        instrument: &Instrument,
        timeframe: Timeframe,
        range: BarRange,
    ) -> Result<Vec<Bar>, BrokerError>;

    async fn instrument_search(
        &self,
        query: &SearchQuery,
    ) -> Result<Vec<InstrumentCandidate>, BrokerError>;

    async fn instrument_resolve(&self, hint: &ResolveHint) -> Result<Contract, BrokerError>;

    /// Token contract: `token` must be consumed and bound to `intent`'s hash.
    async fn submit_order(
        &self,
        intent: &OrderIntent,
        token: &ApprovalToken,
    ) -> Result<OpenOrder, BrokerError>;

    async fn cancel_order(&self, broker_order_id: &str) -> Result<OpenOrder, BrokerError>;
    async fn get_order_status(&self, broker_order_id: &str) -> Result<OpenOrder, BrokerError>;

    /// Modify quantity / limit price of a working order.
    async fn modify_order(
        &self,
        broker_order_id: &str,
        new_quantity: Option<Decimal>,
        new_limit_price: Option<Decimal>,
    ) -> Result<OpenOrder, BrokerError>;

    // Reporting surface used by the export scheduler.
    async fn request_report(&self, query: &ReportQuery) -> Result<ReportHandle, BrokerError>;
    async fn report_ready(&self, handle: &ReportHandle) -> Result<bool, BrokerError>;
    async fn download_report(&self, handle: &ReportHandle) -> Result<Vec<u8>, BrokerError>;
}

/// Shared token check used by both adapters before any submit.
pub(crate) fn verify_submit_token(
    intent: &OrderIntent,
    token: &ApprovalToken,
) -> Result<(), BrokerError> {
    if token.used_at.is_none() {
        return Err(BrokerError::TokenRequired(
            "token has not been consumed".to_string(),
        ));
    }
    let hash = intent.intent_hash();
    if token.intent_hash != hash {
        return Err(BrokerError::TokenRequired(format!(
            "token bound to {}, intent is {}",
            token.intent_hash, hash
        )));
    }
    Ok(())
}
