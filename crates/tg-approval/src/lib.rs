//! Approval service: proposal ownership, the eleven-state lifecycle, and
//! single-use token issuance.
//!
//! This crate exclusively owns proposals and tokens. Everything else refers
//! to them by id; no object graph ever leaves the service.

use uuid::Uuid;

use tg_audit::AuditError;
use tg_killswitch::KillSwitchError;
use tg_schemas::{ErrorKind, IntentError, TransitionError};

pub mod auto;
pub mod service;
pub mod store;

pub use auto::{AutoApprovalPolicy, AutoDecision, DcaSchedule};
pub use service::ApprovalService;
pub use store::ProposalStore;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("unknown proposal {0}")]
    NotFound(Uuid),
    #[error(transparent)]
    Intent(#[from] IntentError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("denial requires a non-empty reason")]
    DenialReasonRequired,
    #[error("unknown token {0}")]
    TokenNotFound(Uuid),
    #[error("token already consumed: {0}")]
    TokenAlreadyUsed(Uuid),
    #[error("token expired: {0}")]
    TokenExpired(Uuid),
    #[error("token intent hash mismatch: token is bound to a different intent")]
    TokenHashMismatch,
    #[error("proposal store full and no terminal proposal is evictable")]
    StoreFull,
    #[error(transparent)]
    KillSwitch(#[from] KillSwitchError),
    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl ApprovalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApprovalError::NotFound(_) | ApprovalError::TokenNotFound(_) => ErrorKind::Validation,
            ApprovalError::Intent(e) => e.kind(),
            ApprovalError::Transition(e) => e.kind(),
            ApprovalError::DenialReasonRequired | ApprovalError::TokenHashMismatch => {
                ErrorKind::Validation
            }
            ApprovalError::TokenAlreadyUsed(_)
            | ApprovalError::TokenExpired(_)
            | ApprovalError::StoreFull => ErrorKind::Concurrency,
            ApprovalError::KillSwitch(e) => e.kind(),
            ApprovalError::Audit(e) => e.kind(),
        }
    }
}
