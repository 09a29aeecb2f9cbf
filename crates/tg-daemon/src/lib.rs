//! TradeGate HTTP daemon.
//!
//! `main.rs` is intentionally thin: it loads configuration, builds the
//! shared [`core::Core`] aggregate, wires middleware, and serves. All
//! handlers live in `routes`, all wire DTOs in `api_types`, and the
//! error-to-status mapping in `error`.

pub mod api_types;
pub mod core;
pub mod error;
pub mod routes;
