//! Risk policy engine: twelve deterministic rules driven by a YAML policy
//! document with hot reload. See `engine` for evaluation order and verdict
//! mapping, `policy` for the file format.

pub mod engine;
pub mod policy;

pub use engine::{evaluate_with, RiskContext, RiskEngine};
pub use policy::{PolicyError, RiskPolicy, RuleConfig, Rules, TradingHours};
