//! Cancel / modify services for live broker orders.
//!
//! Mirrors the propose -> approve -> execute discipline: a mutation is first
//! requested with a reason, then a human grants or denies it, and only the
//! grant step talks to the broker. The kill switch blocks execution, not
//! requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use tg_audit::{AuditError, AuditLog, EventType};
use tg_broker::{BrokerAdapter, BrokerError};
use tg_killswitch::{KillSwitch, KillSwitchError};
use tg_schemas::{ErrorKind, OpenOrder};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationState {
    Requested,
    Granted,
    Denied,
    Executed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelIntent {
    pub cancel_id: Uuid,
    pub correlation_id: Uuid,
    pub broker_order_id: String,
    pub reason: String,
    pub state: MutationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModifyParams {
    pub quantity: Option<Decimal>,
    pub limit_price: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyIntent {
    pub modify_id: Uuid,
    pub correlation_id: Uuid,
    pub broker_order_id: String,
    pub params: ModifyParams,
    pub reason: String,
    pub state: MutationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("unknown mutation request {0}")]
    NotFound(Uuid),
    #[error("mutation is in state {state:?}, expected REQUESTED")]
    WrongState { state: MutationState },
    #[error("a reason is required")]
    ReasonRequired,
    #[error("modify must change at least one parameter")]
    EmptyModify,
    #[error(transparent)]
    KillSwitch(#[from] KillSwitchError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl MutationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MutationError::NotFound(_)
            | MutationError::ReasonRequired
            | MutationError::EmptyModify => ErrorKind::Validation,
            MutationError::WrongState { .. } => ErrorKind::State,
            MutationError::KillSwitch(e) => e.kind(),
            MutationError::Broker(e) => e.kind(),
            MutationError::Audit(e) => e.kind(),
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct CancelModifyService {
    broker: Arc<dyn BrokerAdapter>,
    audit: Arc<AuditLog>,
    kill: Arc<KillSwitch>,
    cancels: Mutex<HashMap<Uuid, CancelIntent>>,
    modifies: Mutex<HashMap<Uuid, ModifyIntent>>,
}

impl CancelModifyService {
    pub fn new(broker: Arc<dyn BrokerAdapter>, audit: Arc<AuditLog>, kill: Arc<KillSwitch>) -> Self {
        Self {
            broker,
            audit,
            kill,
            cancels: Mutex::new(HashMap::new()),
            modifies: Mutex::new(HashMap::new()),
        }
    }

    // -- cancel ---------------------------------------------------------------

    pub fn request_cancel(
        &self,
        broker_order_id: &str,
        reason: &str,
    ) -> Result<CancelIntent, MutationError> {
        if reason.trim().is_empty() {
            return Err(MutationError::ReasonRequired);
        }
        let now = Utc::now();
        let intent = CancelIntent {
            cancel_id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4(),
            broker_order_id: broker_order_id.to_string(),
            reason: reason.to_string(),
            state: MutationState::Requested,
            created_at: now,
            updated_at: now,
        };
        self.audit.append(
            EventType::CancelRequested,
            Some(intent.correlation_id),
            json!({"cancel_id": intent.cancel_id, "broker_order_id": broker_order_id, "reason": reason}),
        )?;
        self.cancels
            .lock()
            .expect("cancel lock poisoned")
            .insert(intent.cancel_id, intent.clone());
        Ok(intent)
    }

    /// Grant and execute: the broker call happens here and only here.
    pub async fn grant_cancel(
        &self,
        cancel_id: Uuid,
        actor: &str,
    ) -> Result<(CancelIntent, OpenOrder), MutationError> {
        self.kill.check_or_fail("cancel_order")?;

        let (correlation_id, broker_order_id) = {
            let mut cancels = self.cancels.lock().expect("cancel lock poisoned");
            let intent = cancels
                .get_mut(&cancel_id)
                .ok_or(MutationError::NotFound(cancel_id))?;
            if intent.state != MutationState::Requested {
                return Err(MutationError::WrongState {
                    state: intent.state,
                });
            }
            intent.state = MutationState::Granted;
            intent.updated_at = Utc::now();
            (intent.correlation_id, intent.broker_order_id.clone())
        };

        self.audit.append(
            EventType::CancelGranted,
            Some(correlation_id),
            json!({"cancel_id": cancel_id, "actor": actor}),
        )?;

        match self.broker.cancel_order(&broker_order_id).await {
            Ok(open) => {
                let intent = self.set_cancel_state(cancel_id, MutationState::Executed)?;
                info!(broker_order_id = %broker_order_id, "cancel executed");
                self.audit.append(
                    EventType::CancelExecuted,
                    Some(correlation_id),
                    json!({"cancel_id": cancel_id, "status": open.status}),
                )?;
                Ok((intent, open))
            }
            Err(e) => {
                self.set_cancel_state(cancel_id, MutationState::Failed)?;
                Err(MutationError::Broker(e))
            }
        }
    }

    pub fn deny_cancel(
        &self,
        cancel_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<CancelIntent, MutationError> {
        if reason.trim().is_empty() {
            return Err(MutationError::ReasonRequired);
        }
        let intent = {
            let mut cancels = self.cancels.lock().expect("cancel lock poisoned");
            let intent = cancels
                .get_mut(&cancel_id)
                .ok_or(MutationError::NotFound(cancel_id))?;
            if intent.state != MutationState::Requested {
                return Err(MutationError::WrongState {
                    state: intent.state,
                });
            }
            intent.state = MutationState::Denied;
            intent.updated_at = Utc::now();
            intent.clone()
        };
        self.audit.append(
            EventType::CancelDenied,
            Some(intent.correlation_id),
            json!({"cancel_id": cancel_id, "reason": reason, "actor": actor}),
        )?;
        Ok(intent)
    }

    pub fn get_cancel(&self, cancel_id: Uuid) -> Result<CancelIntent, MutationError> {
        self.cancels
            .lock()
            .expect("cancel lock poisoned")
            .get(&cancel_id)
            .cloned()
            .ok_or(MutationError::NotFound(cancel_id))
    }

    fn set_cancel_state(
        &self,
        cancel_id: Uuid,
        state: MutationState,
    ) -> Result<CancelIntent, MutationError> {
        let mut cancels = self.cancels.lock().expect("cancel lock poisoned");
        let intent = cancels
            .get_mut(&cancel_id)
            .ok_or(MutationError::NotFound(cancel_id))?;
        intent.state = state;
        intent.updated_at = Utc::now();
        Ok(intent.clone())
    }

    // -- modify ---------------------------------------------------------------

    pub fn request_modify(
        &self,
        broker_order_id: &str,
        params: ModifyParams,
        reason: &str,
    ) -> Result<ModifyIntent, MutationError> {
        if reason.trim().is_empty() {
            return Err(MutationError::ReasonRequired);
        }
        if params.quantity.is_none() && params.limit_price.is_none() {
            return Err(MutationError::EmptyModify);
        }
        let now = Utc::now();
        let intent = ModifyIntent {
            modify_id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4(),
            broker_order_id: broker_order_id.to_string(),
            params: params.clone(),
            reason: reason.to_string(),
            state: MutationState::Requested,
            created_at: now,
            updated_at: now,
        };
        self.audit.append(
            EventType::ModifyRequested,
            Some(intent.correlation_id),
            json!({
                "modify_id": intent.modify_id,
                "broker_order_id": broker_order_id,
                "params": params,
                "reason": reason,
            }),
        )?;
        self.modifies
            .lock()
            .expect("modify lock poisoned")
            .insert(intent.modify_id, intent.clone());
        Ok(intent)
    }

    pub async fn grant_modify(
        &self,
        modify_id: Uuid,
        actor: &str,
    ) -> Result<(ModifyIntent, OpenOrder), MutationError> {
        self.kill.check_or_fail("modify_order")?;

        let (correlation_id, broker_order_id, params) = {
            let mut modifies = self.modifies.lock().expect("modify lock poisoned");
            let intent = modifies
                .get_mut(&modify_id)
                .ok_or(MutationError::NotFound(modify_id))?;
            if intent.state != MutationState::Requested {
                return Err(MutationError::WrongState {
                    state: intent.state,
                });
            }
            intent.state = MutationState::Granted;
            intent.updated_at = Utc::now();
            (
                intent.correlation_id,
                intent.broker_order_id.clone(),
                intent.params.clone(),
            )
        };

        self.audit.append(
            EventType::ModifyGranted,
            Some(correlation_id),
            json!({"modify_id": modify_id, "actor": actor}),
        )?;

        match self
            .broker
            .modify_order(&broker_order_id, params.quantity, params.limit_price)
            .await
        {
            Ok(open) => {
                let intent = self.set_modify_state(modify_id, MutationState::Executed)?;
                info!(broker_order_id = %broker_order_id, "modify executed");
                self.audit.append(
                    EventType::ModifyExecuted,
                    Some(correlation_id),
                    json!({"modify_id": modify_id, "quantity": open.quantity}),
                )?;
                Ok((intent, open))
            }
            Err(e) => {
                self.set_modify_state(modify_id, MutationState::Failed)?;
                Err(MutationError::Broker(e))
            }
        }
    }

    pub fn deny_modify(
        &self,
        modify_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<ModifyIntent, MutationError> {
        if reason.trim().is_empty() {
            return Err(MutationError::ReasonRequired);
        }
        let intent = {
            let mut modifies = self.modifies.lock().expect("modify lock poisoned");
            let intent = modifies
                .get_mut(&modify_id)
                .ok_or(MutationError::NotFound(modify_id))?;
            if intent.state != MutationState::Requested {
                return Err(MutationError::WrongState {
                    state: intent.state,
                });
            }
            intent.state = MutationState::Denied;
            intent.updated_at = Utc::now();
            intent.clone()
        };
        self.audit.append(
            EventType::ModifyDenied,
            Some(intent.correlation_id),
            json!({"modify_id": modify_id, "reason": reason, "actor": actor}),
        )?;
        Ok(intent)
    }

    pub fn get_modify(&self, modify_id: Uuid) -> Result<ModifyIntent, MutationError> {
        self.modifies
            .lock()
            .expect("modify lock poisoned")
            .get(&modify_id)
            .cloned()
            .ok_or(MutationError::NotFound(modify_id))
    }

    fn set_modify_state(
        &self,
        modify_id: Uuid,
        state: MutationState,
    ) -> Result<ModifyIntent, MutationError> {
        let mut modifies = self.modifies.lock().expect("modify lock poisoned");
        let intent = modifies
            .get_mut(&modify_id)
            .ok_or(MutationError::NotFound(modify_id))?;
        intent.state = state;
        intent.updated_at = Utc::now();
        Ok(intent.clone())
    }
}
