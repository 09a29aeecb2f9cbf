//! Tool gateway: the only entry point for the model-driven tool surface.
//!
//! Every call passes four stages in order: allowlist policy, strict schema
//! validation, rate limiting with a denial breaker, and (after the handler
//! runs) output redaction. Denials are audited as TOOL_REJECTED with a
//! stable machine-readable reason; successes as TOOL_CALLED.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use tg_audit::{AuditError, AuditLog, EventType};
use tg_schemas::ErrorKind;

pub mod policy;
pub mod rate_limit;
pub mod redact;
pub mod schema;

pub use policy::{default_policy, GatewayPolicy, ToolPolicy};
pub use rate_limit::{DenialBreaker, LimitDimension, RateLimiter, RateLimits};
pub use redact::{redact, redacted};
pub use schema::{default_schemas, FieldSpec, FieldType, ToolSchema};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A downstream handler failure, carried through with its own kind.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ToolFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl ToolFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("parameter {param} is forbidden for {tool}")]
    ForbiddenParam { tool: String, param: String },
    #[error("session budget for {tool} exhausted ({budget} calls)")]
    SessionBudgetExhausted { tool: String, budget: u32 },
    #[error("VALIDATION_FAILED: {reason}")]
    ValidationFailed { reason: String },
    #[error("rate limit exceeded ({dimension})")]
    RateLimited { dimension: &'static str },
    #[error("BREAKER_OPEN: cooling down for {retry_in_secs}s")]
    BreakerOpen { retry_in_secs: u64 },
    #[error("tool call timed out after {after_secs}s")]
    CallTimeout { after_secs: u64 },
    #[error(transparent)]
    Tool(#[from] ToolFailure),
    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::UnknownTool(_)
            | GatewayError::ForbiddenParam { .. }
            | GatewayError::SessionBudgetExhausted { .. }
            | GatewayError::RateLimited { .. }
            | GatewayError::BreakerOpen { .. } => ErrorKind::Policy,
            GatewayError::ValidationFailed { .. } => ErrorKind::Validation,
            GatewayError::CallTimeout { .. } => ErrorKind::Resource,
            GatewayError::Tool(f) => f.kind,
            GatewayError::Audit(e) => e.kind(),
        }
    }

    /// Stable reason code for audit payloads and HTTP bodies.
    pub fn reason_code(&self) -> &'static str {
        match self {
            GatewayError::UnknownTool(_) => "UNKNOWN_TOOL",
            GatewayError::ForbiddenParam { .. } => "FORBIDDEN_PARAM",
            GatewayError::SessionBudgetExhausted { .. } => "SESSION_BUDGET_EXHAUSTED",
            GatewayError::ValidationFailed { .. } => "VALIDATION_FAILED",
            GatewayError::RateLimited { .. } => "RATE_LIMITED",
            GatewayError::BreakerOpen { .. } => "BREAKER_OPEN",
            GatewayError::CallTimeout { .. } => "CALL_TIMEOUT",
            GatewayError::Tool(_) => "TOOL_FAILED",
            GatewayError::Audit(_) => "AUDIT_FAILED",
        }
    }
}

// ---------------------------------------------------------------------------
// ToolGateway
// ---------------------------------------------------------------------------

pub struct ToolGateway {
    policy: GatewayPolicy,
    schemas: BTreeMap<&'static str, ToolSchema>,
    limiter: RateLimiter,
    breaker: DenialBreaker,
    audit: Arc<AuditLog>,
    call_timeout: Duration,
    /// (session, tool) -> lifetime call count, for session budgets.
    session_counts: Mutex<HashMap<(String, String), u32>>,
}

impl ToolGateway {
    pub fn new(audit: Arc<AuditLog>, limits: RateLimits) -> Self {
        Self {
            policy: default_policy(),
            schemas: default_schemas(),
            limiter: RateLimiter::new(limits),
            breaker: DenialBreaker::default(),
            audit,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            session_counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_breaker(mut self, breaker: DenialBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Run one tool call through the gate. `handler` is only invoked when
    /// every check passes; its output is redacted before being returned.
    pub async fn call<F, Fut>(
        &self,
        session_id: &str,
        tool: &str,
        params: Value,
        handler: F,
    ) -> Result<Value, GatewayError>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, ToolFailure>>,
    {
        match self.admit(session_id, tool, &params) {
            Ok(()) => {}
            Err(denial) => {
                self.breaker.record_denial();
                self.audit.append(
                    EventType::ToolRejected,
                    None,
                    json!({
                        "tool": tool,
                        "session_id": session_id,
                        "reason": denial.reason_code(),
                        "detail": denial.to_string(),
                    }),
                )?;
                return Err(denial);
            }
        }
        self.breaker.record_allowed();

        let event = self.audit.append(
            EventType::ToolCalled,
            None,
            json!({"tool": tool, "session_id": session_id}),
        )?;
        debug!(tool, session_id, correlation_id = %event.correlation_id, "tool call admitted");

        let output = match tokio::time::timeout(self.call_timeout, handler(params)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(GatewayError::CallTimeout {
                    after_secs: self.call_timeout.as_secs(),
                })
            }
        };

        Ok(redacted(output))
    }

    /// The ordered admission checks; pure policy, no handler involvement.
    fn admit(&self, session_id: &str, tool: &str, params: &Value) -> Result<(), GatewayError> {
        // Breaker first: while open, everything is rejected regardless of
        // budget or validity.
        if let Some(retry_in_secs) = self.breaker.open_for() {
            return Err(GatewayError::BreakerOpen { retry_in_secs });
        }

        // 1. Allowlist policy.
        let tool_policy = self
            .policy
            .get(tool)
            .ok_or_else(|| GatewayError::UnknownTool(tool.to_string()))?;
        if let Some(obj) = params.as_object() {
            for forbidden in &tool_policy.forbidden_params {
                if obj.contains_key(*forbidden) {
                    return Err(GatewayError::ForbiddenParam {
                        tool: tool.to_string(),
                        param: (*forbidden).to_string(),
                    });
                }
            }
        }
        if let Some(budget) = tool_policy.session_budget {
            let counts = self.session_counts.lock().expect("budget lock poisoned");
            let used = counts
                .get(&(session_id.to_string(), tool.to_string()))
                .copied()
                .unwrap_or(0);
            if used >= budget {
                return Err(GatewayError::SessionBudgetExhausted {
                    tool: tool.to_string(),
                    budget,
                });
            }
        }

        // 2. Strict input schema.
        let schema = self
            .schemas
            .get(tool)
            .ok_or_else(|| GatewayError::UnknownTool(tool.to_string()))?;
        schema
            .validate(params)
            .map_err(|reason| GatewayError::ValidationFailed { reason })?;

        // 3. Rate limits.
        self.limiter
            .check_and_record(tool, session_id)
            .map_err(|dimension| GatewayError::RateLimited {
                dimension: dimension.as_str(),
            })?;

        // Only an admitted call spends session budget.
        if tool_policy.session_budget.is_some() {
            let mut counts = self.session_counts.lock().expect("budget lock poisoned");
            *counts
                .entry((session_id.to_string(), tool.to_string()))
                .or_insert(0) += 1;
        }

        Ok(())
    }
}
