//! Machine-readable error classification.
//!
//! Every typed error in the workspace maps onto one of these kinds so the
//! HTTP layer can translate uniformly and callers can reason about
//! retriability without string matching.

use serde::{Deserialize, Serialize};

/// The failure taxonomy shared by all components.
///
/// | Kind        | Retriable | Surfaced to caller |
/// |-------------|-----------|--------------------|
/// | Validation  | no        | verbatim, 4xx      |
/// | State       | no        | verbatim           |
/// | Policy      | no        | verbatim + rule id |
/// | Resource    | maybe     | verbatim + hint    |
/// | Concurrency | no        | verbatim           |
/// | Internal    | no        | masked             |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    State,
    Policy,
    Resource,
    Concurrency,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::State => "STATE",
            ErrorKind::Policy => "POLICY",
            ErrorKind::Resource => "RESOURCE",
            ErrorKind::Concurrency => "CONCURRENCY",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// Whether a caller retry can ever help.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ErrorKind::Resource)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
