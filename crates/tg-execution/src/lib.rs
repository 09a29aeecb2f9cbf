//! Execution layer: the token-validated bridge from approved proposals to
//! the broker, plus the two-step cancel/modify services for live orders.

pub mod mutation;
pub mod submitter;

pub use mutation::{
    CancelIntent, CancelModifyService, ModifyIntent, ModifyParams, MutationError, MutationState,
};
pub use submitter::{OrderSubmitter, SubmitError};
