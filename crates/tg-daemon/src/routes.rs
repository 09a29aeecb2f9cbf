//! Axum router and all HTTP handlers.
//!
//! `build_router` is the single entry point; `main.rs` attaches middleware
//! layers after it so the scenario tests can drive the bare router via
//! `tower::ServiceExt::oneshot`. A per-request correlation id is accepted
//! from `x-correlation-id`, generated when absent, and echoed back.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, Request, State},
    http::HeaderValue,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use tg_broker::{BarRange, ResolveHint, SearchQuery};
use tg_gateway::ToolFailure;
use tg_schemas::{
    ErrorKind, Instrument, MarketSnapshot, Ohlc, OrderIntent, OrderProposal, SecType, Timeframe,
};

use crate::api_types::*;
use crate::core::{Core, RequestApprovalOutcome};
use crate::error::ApiError;
use tg_audit::EventType;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(core: Arc<Core>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/portfolio", get(portfolio))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/market/snapshot", get(market_snapshot))
        .route("/api/v1/market/bars", get(market_bars))
        .route("/api/v1/instruments/search", get(instruments_search))
        .route("/api/v1/propose", post(propose))
        .route("/api/v1/simulate", post(simulate))
        .route("/api/v1/risk/evaluate", post(risk_evaluate))
        .route("/api/v1/proposals/create", post(proposals_create))
        .route("/api/v1/approval/request", post(approval_request))
        .route("/api/v1/approval/grant", post(approval_grant))
        .route("/api/v1/approval/deny", post(approval_deny))
        .route("/api/v1/approval/pending", get(approval_pending))
        .route("/api/v1/orders/submit", post(orders_submit))
        .route("/api/v1/orders/:broker_order_id", get(order_status))
        .route("/api/v1/cancel/request", post(cancel_request))
        .route("/api/v1/cancel/grant", post(cancel_grant))
        .route("/api/v1/cancel/deny", post(cancel_deny))
        .route("/api/v1/modify/request", post(modify_request))
        .route("/api/v1/modify/grant", post(modify_grant))
        .route("/api/v1/modify/deny", post(modify_deny))
        .route("/api/v1/kill-switch/activate", post(kill_switch_activate))
        .route("/api/v1/kill-switch/deactivate", post(kill_switch_deactivate))
        .route("/api/v1/kill-switch/status", get(kill_switch_status))
        .route("/api/v1/feature-flags", get(feature_flags))
        .route("/api/v1/tools/call", post(tools_call))
        .layer(middleware::from_fn(correlation_layer))
        .with_state(core)
}

// ---------------------------------------------------------------------------
// Correlation id middleware
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

pub async fn correlation_layer(mut req: Request, next: Next) -> Response {
    let cid = req
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);
    req.extensions_mut().insert(CorrelationId(cid));

    let mut res = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&cid.to_string()) {
        res.headers_mut().insert("x-correlation-id", value);
    }
    res
}

// ---------------------------------------------------------------------------
// Health / flags
// ---------------------------------------------------------------------------

async fn health(State(core): State<Arc<Core>>) -> impl IntoResponse {
    let broker_connected = core.broker.ping().await.is_ok();
    let audit_writable = core.audit.is_writable();
    Json(HealthResponse {
        ok: broker_connected && audit_writable,
        service: "tg-daemon",
        version: env!("CARGO_PKG_VERSION"),
        components: ComponentHealth {
            broker_connected,
            audit_writable,
            approval_store_len: core.approval.store_len(),
            kill_switch_enabled: core.kill.is_enabled(),
        },
    })
}

async fn feature_flags(State(core): State<Arc<Core>>) -> impl IntoResponse {
    Json(core.config.feature_flags())
}

// ---------------------------------------------------------------------------
// Read-only market/account data
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AccountQuery {
    account_id: Option<String>,
}

async fn portfolio(
    State(core): State<Arc<Core>>,
    Extension(cid): Extension<CorrelationId>,
    Query(q): Query<AccountQuery>,
) -> Result<Json<tg_schemas::Portfolio>, ApiError> {
    let account = q.account_id.unwrap_or_else(|| core.default_account.clone());
    let portfolio = core.broker.get_portfolio(&account).await?;
    core.note_portfolio(&portfolio);
    core.audit.append(
        EventType::PortfolioSnapshotTaken,
        Some(cid.0),
        json!({"account_id": account, "total_value": portfolio.total_value}),
    )?;
    Ok(Json(portfolio))
}

async fn positions(
    State(core): State<Arc<Core>>,
    Query(q): Query<AccountQuery>,
) -> Result<Json<Vec<tg_schemas::Position>>, ApiError> {
    let account = q.account_id.unwrap_or_else(|| core.default_account.clone());
    Ok(Json(core.broker.get_positions(&account).await?))
}

#[derive(Debug, Deserialize)]
struct SnapshotQuery {
    instrument: String,
    sec_type: Option<SecType>,
    exchange: Option<String>,
    currency: Option<String>,
}

impl SnapshotQuery {
    fn instrument(&self) -> Instrument {
        Instrument::new(
            &self.instrument,
            self.sec_type.unwrap_or(SecType::Stk),
            self.exchange.as_deref().unwrap_or("SMART"),
            self.currency.as_deref().unwrap_or("USD"),
        )
    }
}

async fn market_snapshot(
    State(core): State<Arc<Core>>,
    Extension(cid): Extension<CorrelationId>,
    Query(q): Query<SnapshotQuery>,
) -> Result<Json<MarketSnapshot>, ApiError> {
    let instrument = q.instrument();
    let snapshot = core.broker.get_market_snapshot(&instrument).await?;
    core.audit.append(
        EventType::MarketSnapshotTaken,
        Some(cid.0),
        json!({"symbol": instrument.symbol, "mid": snapshot.mid()}),
    )?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
struct BarsQuery {
    instrument: String,
    timeframe: String,
    limit: Option<usize>,
}

async fn market_bars(
    State(core): State<Arc<Core>>,
    Query(q): Query<BarsQuery>,
) -> Result<Json<Vec<tg_schemas::Bar>>, ApiError> {
    let timeframe = Timeframe::from_str(&q.timeframe).map_err(ApiError::validation)?;
    let bars = core
        .broker
        .get_market_bars(
            &Instrument::stock(&q.instrument),
            timeframe,
            BarRange {
                limit: q.limit.unwrap_or(100).min(1000),
            },
        )
        .await?;
    Ok(Json(bars))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    #[serde(rename = "type")]
    sec_type: Option<SecType>,
    exchange: Option<String>,
    currency: Option<String>,
    limit: Option<usize>,
}

async fn instruments_search(
    State(core): State<Arc<Core>>,
    Query(p): Query<SearchParams>,
) -> Result<Json<Vec<tg_broker::InstrumentCandidate>>, ApiError> {
    let candidates = core
        .broker
        .instrument_search(&SearchQuery {
            q: p.q,
            sec_type: p.sec_type,
            exchange: p.exchange,
            currency: p.currency,
            limit: p.limit,
        })
        .await?;
    Ok(Json(candidates))
}

// ---------------------------------------------------------------------------
// Propose / simulate / risk
// ---------------------------------------------------------------------------

async fn propose(
    State(core): State<Arc<Core>>,
    Extension(cid): Extension<CorrelationId>,
    Json(req): Json<ProposeRequest>,
) -> Result<Json<ProposeResponse>, ApiError> {
    let intent = req.intent.normalized();
    if let Err(e) = intent.validate() {
        core.audit.append(
            EventType::ValidationFailed,
            Some(cid.0),
            json!({"error": e.to_string(), "surface": "propose"}),
        )?;
        return Err(e.into());
    }
    let intent_hash = intent.intent_hash();
    core.audit.append(
        EventType::OrderProposed,
        Some(cid.0),
        json!({"intent_hash": intent_hash, "symbol": intent.instrument.symbol}),
    )?;
    Ok(Json(ProposeResponse {
        intent_hash,
        intent,
    }))
}

async fn simulate(
    State(core): State<Arc<Core>>,
    Extension(cid): Extension<CorrelationId>,
    Json(req): Json<SimulateRequest>,
) -> Result<Json<tg_schemas::SimulationResult>, ApiError> {
    let intent = req.intent.normalized();
    intent.validate().map_err(ApiError::from)?;

    let snapshot = match (req.market_snapshot, req.market_price) {
        (Some(snapshot), _) => Some(snapshot),
        (None, Some(price)) => Some(flat_snapshot(&intent.instrument, price)),
        (None, None) => core.broker.get_market_snapshot(&intent.instrument).await.ok(),
    };
    let portfolio = core.fetch_portfolio().await?;
    let result = tg_sim::simulate(&portfolio, snapshot.as_ref(), &intent, &core.sim_config);

    core.audit.append(
        EventType::OrderSimulated,
        Some(cid.0),
        json!({"status": result.status, "net_notional": result.net_notional}),
    )?;
    Ok(Json(result))
}

/// A bare price stands in for a flat quote (bid == ask == last).
fn flat_snapshot(instrument: &Instrument, price: Decimal) -> MarketSnapshot {
    MarketSnapshot {
        instrument: instrument.clone(),
        bid: price,
        ask: price,
        last: price,
        volume: Decimal::ZERO,
        ohlc: Ohlc {
            open: price,
            high: price,
            low: price,
            close: price,
        },
        prev_close: price,
        ts_utc: Utc::now(),
    }
}

async fn risk_evaluate(
    State(core): State<Arc<Core>>,
    Extension(cid): Extension<CorrelationId>,
    Json(req): Json<RiskEvaluateRequest>,
) -> Result<Json<tg_schemas::RiskDecision>, ApiError> {
    let intent = req.intent.normalized();
    intent.validate().map_err(ApiError::from)?;

    let mut portfolio = core.fetch_portfolio().await?;
    if let Some(value) = req.portfolio_value {
        portfolio.total_value = value;
    }
    let decision = core.risk_gate(&intent, &portfolio, &req.simulation, Utc::now())?;
    core.audit.append(
        EventType::RiskGateEvaluated,
        Some(cid.0),
        json!({"verdict": decision.verdict, "violated_rules": decision.violated_rules}),
    )?;
    Ok(Json(decision))
}

// ---------------------------------------------------------------------------
// Proposals / approvals
// ---------------------------------------------------------------------------

async fn proposals_create(
    State(core): State<Arc<Core>>,
    Extension(cid): Extension<CorrelationId>,
    Json(req): Json<ProposalCreateRequest>,
) -> Result<Json<ProposalResponse>, ApiError> {
    if req.risk_decision.verdict == tg_schemas::RiskVerdict::Reject {
        return Err(ApiError::new(
            ErrorKind::Policy,
            format!(
                "risk decision is REJECT ({}); proposal refused",
                req.risk_decision.reason
            ),
        ));
    }

    let now = Utc::now();
    let proposal = OrderProposal::new(req.intent, cid.0, now)?;
    let proposal = core.approval.store(proposal)?;
    core.approval
        .attach_simulation(proposal.proposal_id, req.simulation, now)?;
    let proposal = core
        .approval
        .attach_risk_decision(proposal.proposal_id, req.risk_decision, now)?;

    Ok(Json(ProposalResponse {
        proposal_id: proposal.proposal_id,
        correlation_id: proposal.correlation_id,
        state: proposal.state,
        intent_hash: proposal.intent_hash,
    }))
}

async fn approval_request(
    State(core): State<Arc<Core>>,
    Json(req): Json<ApprovalRequestRequest>,
) -> Result<Json<ApprovalRequestResponse>, ApiError> {
    let portfolio = core.fetch_portfolio().await.ok();
    let (proposal, token) =
        core.approval
            .request(req.proposal_id, portfolio.as_ref(), Utc::now())?;
    Ok(Json(ApprovalRequestResponse {
        proposal_id: proposal.proposal_id,
        state: proposal.state,
        auto_approved: token.is_some(),
    }))
}

async fn approval_grant(
    State(core): State<Arc<Core>>,
    Json(req): Json<ApprovalGrantRequest>,
) -> Result<Json<ApprovalGrantResponse>, ApiError> {
    let (proposal, token) = core
        .approval
        .grant(req.proposal_id, &req.reason, &req.actor, Utc::now())?;
    Ok(Json(ApprovalGrantResponse {
        proposal_id: proposal.proposal_id,
        state: proposal.state,
        token_id: token.token_id,
        expires_at: token.expires_at,
    }))
}

async fn approval_deny(
    State(core): State<Arc<Core>>,
    Json(req): Json<ApprovalDenyRequest>,
) -> Result<Json<ProposalResponse>, ApiError> {
    let proposal = core
        .approval
        .deny(req.proposal_id, &req.reason, &req.actor, Utc::now())?;
    Ok(Json(ProposalResponse {
        proposal_id: proposal.proposal_id,
        correlation_id: proposal.correlation_id,
        state: proposal.state,
        intent_hash: proposal.intent_hash,
    }))
}

#[derive(Debug, Deserialize)]
struct PendingQuery {
    limit: Option<usize>,
}

async fn approval_pending(
    State(core): State<Arc<Core>>,
    Query(q): Query<PendingQuery>,
) -> Json<Vec<OrderProposal>> {
    Json(core.approval.pending(q.limit.unwrap_or(50)))
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

async fn orders_submit(
    State(core): State<Arc<Core>>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let open = core.submitter.submit(req.proposal_id, req.token_id).await?;

    // Poll to the terminal state on a background task; the poller owns no
    // request-handler locks.
    if !open.status.is_terminal() {
        let submitter = Arc::clone(&core.submitter);
        let proposal_id = req.proposal_id;
        let broker_order_id = open.broker_order_id.clone();
        tokio::spawn(async move {
            let _ = submitter.poll(proposal_id, &broker_order_id).await;
        });
    }

    let proposal = core.approval.get(req.proposal_id)?;
    info!(proposal_id = %req.proposal_id, broker_order_id = %open.broker_order_id, "submission accepted");
    Ok(Json(SubmitResponse {
        proposal_id: req.proposal_id,
        broker_order_id: open.broker_order_id,
        broker_status: open.status,
        proposal_state: proposal.state,
    }))
}

async fn order_status(
    State(core): State<Arc<Core>>,
    Path(broker_order_id): Path<String>,
) -> Result<Json<tg_schemas::OpenOrder>, ApiError> {
    Ok(Json(core.broker.get_order_status(&broker_order_id).await?))
}

// ---------------------------------------------------------------------------
// Cancel / modify
// ---------------------------------------------------------------------------

async fn cancel_request(
    State(core): State<Arc<Core>>,
    Json(req): Json<CancelRequestRequest>,
) -> Result<Json<tg_execution::CancelIntent>, ApiError> {
    Ok(Json(
        core.mutations
            .request_cancel(&req.broker_order_id, &req.reason)?,
    ))
}

async fn cancel_grant(
    State(core): State<Arc<Core>>,
    Json(req): Json<CancelGrantRequest>,
) -> Result<Json<tg_execution::CancelIntent>, ApiError> {
    let (intent, _open) = core.mutations.grant_cancel(req.cancel_id, &req.actor).await?;
    Ok(Json(intent))
}

async fn cancel_deny(
    State(core): State<Arc<Core>>,
    Json(req): Json<CancelDenyRequest>,
) -> Result<Json<tg_execution::CancelIntent>, ApiError> {
    Ok(Json(core.mutations.deny_cancel(
        req.cancel_id,
        &req.reason,
        &req.actor,
    )?))
}

async fn modify_request(
    State(core): State<Arc<Core>>,
    Json(req): Json<ModifyRequestRequest>,
) -> Result<Json<tg_execution::ModifyIntent>, ApiError> {
    Ok(Json(core.mutations.request_modify(
        &req.broker_order_id,
        req.params,
        &req.reason,
    )?))
}

async fn modify_grant(
    State(core): State<Arc<Core>>,
    Json(req): Json<ModifyGrantRequest>,
) -> Result<Json<tg_execution::ModifyIntent>, ApiError> {
    let (intent, _open) = core.mutations.grant_modify(req.modify_id, &req.actor).await?;
    Ok(Json(intent))
}

async fn modify_deny(
    State(core): State<Arc<Core>>,
    Json(req): Json<ModifyDenyRequest>,
) -> Result<Json<tg_execution::ModifyIntent>, ApiError> {
    Ok(Json(core.mutations.deny_modify(
        req.modify_id,
        &req.reason,
        &req.actor,
    )?))
}

// ---------------------------------------------------------------------------
// Kill switch
// ---------------------------------------------------------------------------

async fn kill_switch_activate(
    State(core): State<Arc<Core>>,
    Json(req): Json<KillSwitchActivateRequest>,
) -> Result<Json<tg_killswitch::KillState>, ApiError> {
    core.kill.activate(&req.reason, &req.actor)?;
    Ok(Json(core.kill.status()))
}

async fn kill_switch_deactivate(
    State(core): State<Arc<Core>>,
    Json(req): Json<KillSwitchReleaseRequest>,
) -> Result<Json<tg_killswitch::KillState>, ApiError> {
    core.kill.release(&req.actor)?;
    Ok(Json(core.kill.status()))
}

async fn kill_switch_status(State(core): State<Arc<Core>>) -> Json<tg_killswitch::KillState> {
    Json(core.kill.status())
}

// ---------------------------------------------------------------------------
// Tool gateway surface
// ---------------------------------------------------------------------------

async fn tools_call(
    State(core): State<Arc<Core>>,
    Json(req): Json<ToolCallRequest>,
) -> Result<Json<Value>, ApiError> {
    let tool = req.tool.clone();
    let core_for_dispatch = Arc::clone(&core);
    let out = core
        .gateway
        .call(&req.session_id, &req.tool, req.params, move |params| async move {
            dispatch_tool(core_for_dispatch, &tool, params).await
        })
        .await?;
    Ok(Json(out))
}

fn tool_fail(e: ApiError) -> ToolFailure {
    ToolFailure::new(e.kind, e.message)
}

fn parse_field<T: serde::de::DeserializeOwned>(
    params: &Value,
    field: &str,
) -> Result<T, ToolFailure> {
    let value = params.get(field).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value)
        .map_err(|e| ToolFailure::new(ErrorKind::Validation, format!("bad {field}: {e}")))
}

/// The model-facing tool surface. Read-only tools mirror the HTTP GETs;
/// gated writes create requests that humans resolve. Nothing here returns
/// a token or touches a broker write call.
async fn dispatch_tool(
    core: Arc<Core>,
    tool: &str,
    params: Value,
) -> Result<Value, ToolFailure> {
    match tool {
        "get_portfolio" => {
            let account: String = parse_field(&params, "account_id")?;
            let portfolio = core.broker.get_portfolio(&account).await.map_err(|e| tool_fail(e.into()))?;
            core.note_portfolio(&portfolio);
            to_value(&portfolio)
        }
        "get_positions" => {
            let account: String = parse_field(&params, "account_id")?;
            let positions = core.broker.get_positions(&account).await.map_err(|e| tool_fail(e.into()))?;
            to_value(&positions)
        }
        "get_cash" => {
            let account: String = parse_field(&params, "account_id")?;
            let cash = core.broker.get_cash(&account).await.map_err(|e| tool_fail(e.into()))?;
            to_value(&cash)
        }
        "get_open_orders" => {
            let account: String = parse_field(&params, "account_id")?;
            let orders = core.broker.get_open_orders(&account).await.map_err(|e| tool_fail(e.into()))?;
            to_value(&orders)
        }
        "get_market_snapshot" => {
            let symbol: String = parse_field(&params, "symbol")?;
            let snapshot = core
                .broker
                .get_market_snapshot(&Instrument::stock(symbol))
                .await
                .map_err(|e| tool_fail(e.into()))?;
            to_value(&snapshot)
        }
        "get_market_bars" => {
            let symbol: String = parse_field(&params, "symbol")?;
            let timeframe: String = parse_field(&params, "timeframe")?;
            let timeframe = Timeframe::from_str(&timeframe)
                .map_err(|e| ToolFailure::new(ErrorKind::Validation, e))?;
            let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(100) as usize;
            let bars = core
                .broker
                .get_market_bars(&Instrument::stock(symbol), timeframe, BarRange { limit })
                .await
                .map_err(|e| tool_fail(e.into()))?;
            to_value(&bars)
        }
        "instrument_search" => {
            let query = SearchQuery {
                q: params.get("q").and_then(Value::as_str).map(str::to_string),
                sec_type: params
                    .get("type")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| ToolFailure::new(ErrorKind::Validation, e.to_string()))?,
                exchange: params.get("exchange").and_then(Value::as_str).map(str::to_string),
                currency: params.get("currency").and_then(Value::as_str).map(str::to_string),
                limit: params.get("limit").and_then(Value::as_u64).map(|v| v as usize),
            };
            let candidates = core
                .broker
                .instrument_search(&query)
                .await
                .map_err(|e| tool_fail(e.into()))?;
            to_value(&candidates)
        }
        "instrument_resolve" => {
            let hint = ResolveHint {
                con_id: params.get("con_id").and_then(Value::as_i64),
                symbol: params.get("symbol").and_then(Value::as_str).map(str::to_string),
            };
            let contract = core
                .broker
                .instrument_resolve(&hint)
                .await
                .map_err(|e| tool_fail(e.into()))?;
            to_value(&contract)
        }
        "simulate_order" => {
            let intent: OrderIntent = parse_field(&params, "intent")?;
            let intent = intent.normalized();
            intent.validate().map_err(|e| tool_fail(e.into()))?;
            let portfolio = core.fetch_portfolio().await.map_err(tool_fail)?;
            let snapshot = core.broker.get_market_snapshot(&intent.instrument).await.ok();
            let result = tg_sim::simulate(&portfolio, snapshot.as_ref(), &intent, &core.sim_config);
            to_value(&result)
        }
        "evaluate_risk" => {
            let intent: OrderIntent = parse_field(&params, "intent")?;
            let intent = intent.normalized();
            intent.validate().map_err(|e| tool_fail(e.into()))?;
            let portfolio = core.fetch_portfolio().await.map_err(tool_fail)?;
            let snapshot = core.broker.get_market_snapshot(&intent.instrument).await.ok();
            let simulation =
                tg_sim::simulate(&portfolio, snapshot.as_ref(), &intent, &core.sim_config);
            let decision = core
                .risk_gate(&intent, &portfolio, &simulation, Utc::now())
                .map_err(tool_fail)?;
            to_value(&json!({"simulation": simulation, "risk_decision": decision}))
        }
        "request_approval" => {
            let intent: OrderIntent = parse_field(&params, "intent")?;
            match core.propose_and_request(intent, None).await.map_err(tool_fail)? {
                RequestApprovalOutcome::SimulationFailed { simulation, .. } => to_value(&json!({
                    "stored": false,
                    "simulation_status": simulation.status,
                    "error": simulation.error_message,
                })),
                RequestApprovalOutcome::Rejected { decision, .. } => to_value(&json!({
                    "stored": false,
                    "verdict": decision.verdict,
                    "violated_rules": decision.violated_rules,
                    "reason": decision.reason,
                })),
                RequestApprovalOutcome::Queued {
                    proposal,
                    auto_approved,
                } => to_value(&json!({
                    "stored": true,
                    "proposal_id": proposal.proposal_id,
                    "state": proposal.state,
                    "auto_approved": auto_approved,
                })),
            }
        }
        "request_order_cancel" => {
            let broker_order_id: String = parse_field(&params, "broker_order_id")?;
            let reason: String = parse_field(&params, "reason")?;
            let intent = core
                .mutations
                .request_cancel(&broker_order_id, &reason)
                .map_err(|e| tool_fail(e.into()))?;
            to_value(&json!({"cancel_id": intent.cancel_id, "state": intent.state}))
        }
        "request_order_modify" => {
            let broker_order_id: String = parse_field(&params, "broker_order_id")?;
            let reason: String = parse_field(&params, "reason")?;
            let modify = tg_execution::ModifyParams {
                quantity: params
                    .get("quantity")
                    .cloned()
                    .filter(|v| !v.is_null())
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| ToolFailure::new(ErrorKind::Validation, e.to_string()))?,
                limit_price: params
                    .get("limit_price")
                    .cloned()
                    .filter(|v| !v.is_null())
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| ToolFailure::new(ErrorKind::Validation, e.to_string()))?,
            };
            let intent = core
                .mutations
                .request_modify(&broker_order_id, modify, &reason)
                .map_err(|e| tool_fail(e.into()))?;
            to_value(&json!({"modify_id": intent.modify_id, "state": intent.state}))
        }
        other => Err(ToolFailure::new(
            ErrorKind::Policy,
            format!("tool {other} has no dispatcher"),
        )),
    }
}

fn to_value<T: serde::Serialize>(v: &T) -> Result<Value, ToolFailure> {
    serde_json::to_value(v)
        .map_err(|e| ToolFailure::new(ErrorKind::Internal, format!("serialize: {e}")))
}
