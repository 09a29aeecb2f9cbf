//! Shared domain types for the TradeGate workspace.
//!
//! Everything here is plain data: serde-serializable structs and enums with
//! no I/O and no clocks of their own. Components exchange these types by
//! value; cross-references are by id (proposal_id, token_id, correlation_id)
//! rather than object graphs.

pub mod canonical;
pub mod error;
pub mod instrument;
pub mod intent;
pub mod market;
pub mod portfolio;
pub mod proposal;
pub mod risk;
pub mod simulation;
pub mod token;

pub use canonical::{canonical_json, sha256_hex};
pub use error::ErrorKind;
pub use instrument::{Instrument, SecType};
pub use intent::{Constraints, IntentError, OrderIntent, OrderType, Side, TimeInForce};
pub use market::{Bar, MarketSnapshot, Ohlc, Timeframe};
pub use portfolio::{CashBalance, Portfolio, Position};
pub use proposal::{BrokerOrderStatus, OpenOrder, OrderProposal, OrderState, TransitionError};
pub use risk::{RiskDecision, RiskVerdict, RuleId, Severity};
pub use simulation::{SimulationResult, SimulationStatus};
pub use token::{ApprovalToken, DEFAULT_TOKEN_TTL_SECS};
