//! Process-wide emergency halt.
//!
//! # Invariants
//!
//! - Every write path (submit, cancel, modify, auto-approval, token
//!   consumption) calls `check_or_fail` before committing anything.
//! - State is persisted as a small JSON record so a restart preserves an
//!   active halt. There is no fail-open path: a missing record means
//!   "not halted", an unreadable record refuses to boot.
//! - An environment override can force-activate independently of the stored
//!   record. Environment wins: while forced, `release` is refused.
//!
//! Activation and release are audited with reason + actor.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use tg_audit::{AuditError, AuditLog, EventType};
use tg_schemas::ErrorKind;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KillState {
    pub enabled: bool,
    pub reason: Option<String>,
    pub actor: Option<String>,
    pub since: Option<DateTime<Utc>>,
    /// True when the environment forced activation. Not persisted as such;
    /// recomputed at every boot from the environment.
    #[serde(skip)]
    pub env_forced: bool,
}

/// Environment override, resolved by the config layer from
/// `KILL_SWITCH_ENABLED` / `KILL_SWITCH_REASON`.
#[derive(Debug, Clone, Default)]
pub struct EnvOverride {
    pub enabled: bool,
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum KillSwitchError {
    #[error("KILL_SWITCH_ACTIVE: {op} refused ({reason})")]
    Active { op: String, reason: String },
    #[error("kill switch is forced by environment; release refused")]
    EnvForced,
    #[error("kill switch persistence failed: {0}")]
    Persist(#[from] std::io::Error),
    #[error("kill switch state record unreadable: {0}")]
    CorruptRecord(String),
    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl KillSwitchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KillSwitchError::Active { .. } | KillSwitchError::EnvForced => ErrorKind::Policy,
            KillSwitchError::Persist(_)
            | KillSwitchError::CorruptRecord(_)
            | KillSwitchError::Audit(_) => ErrorKind::Internal,
        }
    }
}

// ---------------------------------------------------------------------------
// KillSwitch
// ---------------------------------------------------------------------------

/// Single writer (activate/release), unbounded readers.
pub struct KillSwitch {
    path: PathBuf,
    audit: Arc<AuditLog>,
    state: RwLock<KillState>,
}

impl KillSwitch {
    /// Load the persisted record and apply the environment override on top.
    /// The override never writes through to the record: removing the env var
    /// and restarting restores the stored state.
    pub fn open(
        path: impl AsRef<Path>,
        audit: Arc<AuditLog>,
        env: EnvOverride,
    ) -> Result<Self, KillSwitchError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut state = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str::<KillState>(&raw)
                .map_err(|e| KillSwitchError::CorruptRecord(e.to_string()))?
        } else {
            KillState::default()
        };

        if env.enabled {
            warn!(reason = ?env.reason, "kill switch force-activated by environment");
            state.enabled = true;
            state.env_forced = true;
            state.reason = env
                .reason
                .or_else(|| state.reason.take())
                .or_else(|| Some("forced by environment".to_string()));
            state.actor = Some("environment".to_string());
            if state.since.is_none() {
                state.since = Some(Utc::now());
            }
            audit.append(
                EventType::KillSwitchActivated,
                None,
                json!({"reason": state.reason, "actor": "environment", "env_forced": true}),
            )?;
        }

        Ok(Self {
            path,
            audit,
            state: RwLock::new(state),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.state.read().expect("kill switch lock poisoned").enabled
    }

    pub fn status(&self) -> KillState {
        self.state
            .read()
            .expect("kill switch lock poisoned")
            .clone()
    }

    /// Gate helper used by every write path.
    pub fn check_or_fail(&self, op: &str) -> Result<(), KillSwitchError> {
        let state = self.state.read().expect("kill switch lock poisoned");
        if state.enabled {
            return Err(KillSwitchError::Active {
                op: op.to_string(),
                reason: state
                    .reason
                    .clone()
                    .unwrap_or_else(|| "no reason recorded".to_string()),
            });
        }
        Ok(())
    }

    /// Activate the halt. Idempotent: re-activating updates reason/actor.
    pub fn activate(&self, reason: &str, actor: &str) -> Result<(), KillSwitchError> {
        {
            let mut state = self.state.write().expect("kill switch lock poisoned");
            state.enabled = true;
            state.reason = Some(reason.to_string());
            state.actor = Some(actor.to_string());
            state.since = Some(Utc::now());
            self.persist(&state)?;
        }
        warn!(reason, actor, "kill switch ACTIVATED");
        self.audit.append(
            EventType::KillSwitchActivated,
            None,
            json!({"reason": reason, "actor": actor}),
        )?;
        Ok(())
    }

    /// Release the halt. Refused while the environment forces activation.
    pub fn release(&self, actor: &str) -> Result<(), KillSwitchError> {
        {
            let mut state = self.state.write().expect("kill switch lock poisoned");
            if state.env_forced {
                return Err(KillSwitchError::EnvForced);
            }
            state.enabled = false;
            state.reason = None;
            state.actor = Some(actor.to_string());
            state.since = None;
            self.persist(&state)?;
        }
        info!(actor, "kill switch released");
        self.audit
            .append(EventType::KillSwitchReleased, None, json!({"actor": actor}))?;
        Ok(())
    }

    fn persist(&self, state: &KillState) -> Result<(), KillSwitchError> {
        let raw = serde_json::to_string_pretty(state)
            .map_err(|e| KillSwitchError::CorruptRecord(e.to_string()))?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(env: EnvOverride) -> (tempfile::TempDir, Arc<AuditLog>, KillSwitch) {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(AuditLog::open(dir.path().join("events.jsonl")).unwrap());
        let ks = KillSwitch::open(dir.path().join("kill_switch.json"), Arc::clone(&audit), env)
            .unwrap();
        (dir, audit, ks)
    }

    #[test]
    fn default_is_released() {
        let (_d, _a, ks) = setup(EnvOverride::default());
        assert!(!ks.is_enabled());
        assert!(ks.check_or_fail("submit_order").is_ok());
    }

    #[test]
    fn activate_blocks_writes_and_audits() {
        let (_d, audit, ks) = setup(EnvOverride::default());
        ks.activate("manual halt for incident review", "ops").unwrap();

        let err = ks.check_or_fail("submit_order").unwrap_err();
        assert!(err.to_string().contains("KILL_SWITCH_ACTIVE"));
        assert_eq!(err.kind(), ErrorKind::Policy);

        let stats = audit.stats();
        assert_eq!(stats["KILL_SWITCH_ACTIVATED"], 1);
    }

    #[test]
    fn state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(AuditLog::open(dir.path().join("events.jsonl")).unwrap());
        let path = dir.path().join("kill_switch.json");
        {
            let ks =
                KillSwitch::open(&path, Arc::clone(&audit), EnvOverride::default()).unwrap();
            ks.activate("halting before maintenance", "ops").unwrap();
        }
        let ks = KillSwitch::open(&path, audit, EnvOverride::default()).unwrap();
        assert!(ks.is_enabled());
        assert_eq!(ks.status().reason.as_deref(), Some("halting before maintenance"));
    }

    #[test]
    fn env_override_wins_and_blocks_release() {
        let (_d, _a, ks) = setup(EnvOverride {
            enabled: true,
            reason: Some("forced in CI".to_string()),
        });
        assert!(ks.is_enabled());
        let err = ks.release("ops").unwrap_err();
        assert!(matches!(err, KillSwitchError::EnvForced));
        assert!(ks.is_enabled());
    }

    #[test]
    fn release_restores_writes() {
        let (_d, audit, ks) = setup(EnvOverride::default());
        ks.activate("brief halt", "ops").unwrap();
        ks.release("ops").unwrap();
        assert!(ks.check_or_fail("submit_order").is_ok());
        assert_eq!(audit.stats()["KILL_SWITCH_RELEASED"], 1);
    }
}
