//! Single-use approval tokens.
//!
//! A token binds one proposal and one intent hash. It is the only credential
//! the broker submission path accepts; consuming it is atomic (enforced by
//! the approval service, which owns the token store).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default token lifetime.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalToken {
    /// Unpredictable v4 UUID. Knowing a proposal id must not let a caller
    /// forge its token.
    pub token_id: Uuid,
    pub proposal_id: Uuid,
    /// Hash of the intent at grant time; must still match at use time.
    pub intent_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl ApprovalToken {
    pub fn issue(
        proposal_id: Uuid,
        intent_hash: impl Into<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            token_id: Uuid::new_v4(),
            proposal_id,
            intent_hash: intent_hash.into(),
            issued_at: now,
            expires_at: now + ttl,
            used_at: None,
        }
    }

    /// Expiry is strict: a token presented exactly at `expires_at` is invalid.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    /// Valid ⇔ unused ∧ now < expires_at.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.is_used() && !self.is_expired(now)
    }
}
