//! The `Core` aggregate: every component constructed once at startup and
//! passed to handlers by `Arc`. No globals anywhere; tests build a fresh
//! `Core` per test against a temp data directory.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use tg_approval::{ApprovalService, AutoApprovalPolicy};
use tg_audit::{AuditLog, EventFilter, EventType};
use tg_broker::{BrokerAdapter, BrokerClient, BrokerConfig, LiveBroker, MockBroker};
use tg_config::AppConfig;
use tg_execution::{CancelModifyService, OrderSubmitter};
use tg_gateway::{RateLimits, ToolGateway};
use tg_killswitch::{EnvOverride, KillSwitch};
use tg_risk::{RiskContext, RiskEngine, RiskPolicy};
use tg_scheduler::{JobConfig, Scheduler};
use tg_schemas::{
    OrderIntent, OrderProposal, Portfolio, RiskDecision, SimulationResult,
};
use tg_sim::SimConfig;

use crate::error::ApiError;

pub struct Core {
    pub config: AppConfig,
    pub audit: Arc<AuditLog>,
    pub kill: Arc<KillSwitch>,
    pub broker: Arc<dyn BrokerAdapter>,
    pub sim_config: SimConfig,
    pub risk: Arc<RiskEngine>,
    pub approval: Arc<ApprovalService>,
    pub submitter: Arc<OrderSubmitter>,
    pub mutations: Arc<CancelModifyService>,
    pub gateway: Arc<ToolGateway>,
    pub scheduler: Option<Arc<Scheduler>>,
    pub default_account: String,
    /// High-water mark of observed portfolio value; feeds the drawdown rule.
    peak_value: Mutex<Option<Decimal>>,
}

impl Core {
    /// Build the full aggregate. Any failure here is unrecoverable: the
    /// process must exit non-zero rather than run partially wired.
    pub fn init(config: AppConfig) -> anyhow::Result<Arc<Self>> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("create data dir {:?}", config.data_dir))?;

        let audit = Arc::new(
            AuditLog::open(config.audit_log_path()).context("audit storage unreachable")?,
        );

        let kill = Arc::new(
            KillSwitch::open(
                config.kill_switch_path(),
                Arc::clone(&audit),
                EnvOverride {
                    enabled: config.kill_switch_enabled,
                    reason: config.kill_switch_reason.clone(),
                },
            )
            .context("kill switch record unreadable")?,
        );

        let broker_cfg = BrokerConfig {
            read_only: config.readonly_mode,
            ..BrokerConfig::default()
        };
        let broker: Arc<dyn BrokerAdapter> = if config.env.uses_mock_broker() {
            Arc::new(BrokerClient::new(MockBroker::new(42), broker_cfg))
        } else {
            Arc::new(BrokerClient::new(
                LiveBroker::new(
                    &config.broker_host,
                    config.broker_port,
                    config.broker_client_id.clone(),
                ),
                broker_cfg,
            ))
        };

        let risk = match &config.risk_policy_path {
            Some(path) => Arc::new(
                RiskEngine::from_path(path)
                    .with_context(|| format!("risk policy malformed: {path:?}"))?,
            ),
            None => Arc::new(RiskEngine::new(RiskPolicy::default())),
        };
        audit.append(
            EventType::PolicyLoaded,
            None,
            json!({
                "policy_hash": risk.policy().policy_hash(),
                "source": config.risk_policy_path,
            }),
        )?;

        let mut approval = ApprovalService::new(Arc::clone(&audit), Arc::clone(&kill));
        if config.auto_approval {
            approval = approval.with_auto_policy(AutoApprovalPolicy {
                enabled: true,
                max_notional: config.auto_approval_max_notional,
                ..AutoApprovalPolicy::default()
            });
        }
        let approval = Arc::new(approval);

        let submitter = Arc::new(OrderSubmitter::new(
            Arc::clone(&broker),
            Arc::clone(&approval),
            Arc::clone(&audit),
            Arc::clone(&kill),
        ));
        let mutations = Arc::new(CancelModifyService::new(
            Arc::clone(&broker),
            Arc::clone(&audit),
            Arc::clone(&kill),
        ));

        let gateway = Arc::new(ToolGateway::new(
            Arc::clone(&audit),
            RateLimits {
                per_tool: config.rate_limit_per_tool,
                per_session: config.rate_limit_per_session,
                global: config.rate_limit_global,
                window: Duration::from_secs(60),
            },
        ));

        let scheduler = load_jobs(&config)?
            .map(|jobs| {
                Scheduler::new(
                    Arc::clone(&broker),
                    Arc::clone(&audit),
                    config.scheduler_timezone,
                    config.export_dir(),
                    jobs,
                )
                .context("scheduler jobs malformed")
            })
            .transpose()?
            .map(Arc::new);

        info!(env = config.env.as_str(), "core wired");
        Ok(Arc::new(Self {
            default_account: default_account_for(&config),
            config,
            audit,
            kill,
            broker,
            sim_config: SimConfig::default(),
            risk,
            approval,
            submitter,
            mutations,
            gateway,
            scheduler,
            peak_value: Mutex::new(None),
        }))
    }

    // -----------------------------------------------------------------------
    // Portfolio bookkeeping
    // -----------------------------------------------------------------------

    pub async fn fetch_portfolio(&self) -> Result<Portfolio, ApiError> {
        let portfolio = self.broker.get_portfolio(&self.default_account).await?;
        self.note_portfolio(&portfolio);
        Ok(portfolio)
    }

    /// Track the value high-water mark for the drawdown rule.
    pub fn note_portfolio(&self, portfolio: &Portfolio) {
        let mut peak = self.peak_value.lock().expect("peak lock poisoned");
        match *peak {
            Some(p) if p >= portfolio.total_value => {}
            _ => *peak = Some(portfolio.total_value),
        }
    }

    pub fn peak_value(&self) -> Option<Decimal> {
        *self.peak_value.lock().expect("peak lock poisoned")
    }

    /// Orders submitted since midnight UTC, from the audit log.
    pub fn daily_trades_count(&self, now: DateTime<Utc>) -> u32 {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .unwrap_or(now);
        self.audit
            .query(&EventFilter {
                event_types: Some(vec![EventType::OrderSubmitted]),
                from: Some(midnight),
                ..EventFilter::default()
            })
            .len() as u32
    }

    // -----------------------------------------------------------------------
    // Composite flows
    // -----------------------------------------------------------------------

    /// Run the risk gate and honor a drawdown halt request.
    pub fn risk_gate(
        &self,
        intent: &OrderIntent,
        portfolio: &Portfolio,
        simulation: &SimulationResult,
        now: DateTime<Utc>,
    ) -> Result<RiskDecision, ApiError> {
        let daily_pnl: Decimal = portfolio.positions.iter().map(|p| p.realized_pnl).sum();
        let ctx = RiskContext {
            intent,
            portfolio,
            simulation,
            now,
            daily_trades_count: self.daily_trades_count(now),
            daily_pnl,
            peak_portfolio_value: self.peak_value(),
            liquidity: None,
            volatility: None,
            correlation_exposure: None,
            kill_switch_enabled: self.kill.is_enabled(),
        };
        let decision = self.risk.evaluate(&ctx);
        if decision.halt_requested && !self.kill.is_enabled() {
            self.kill
                .activate("drawdown limit breached", "risk-engine")?;
        }
        Ok(decision)
    }

    /// The gated-write path behind `request_approval` and
    /// `/proposals/create` + `/approval/request`: validate, simulate,
    /// risk-gate, store, and move into the approval queue.
    pub async fn propose_and_request(
        &self,
        intent: OrderIntent,
        correlation_id: Option<Uuid>,
    ) -> Result<RequestApprovalOutcome, ApiError> {
        let now = Utc::now();
        let correlation_id = correlation_id.unwrap_or_else(Uuid::new_v4);

        let proposal = OrderProposal::new(intent, correlation_id, now)?;
        self.audit.append(
            EventType::OrderProposed,
            Some(correlation_id),
            json!({"intent_hash": proposal.intent_hash, "symbol": proposal.intent.instrument.symbol}),
        )?;

        let portfolio = self.fetch_portfolio().await?;
        let snapshot = self
            .broker
            .get_market_snapshot(&proposal.intent.instrument)
            .await
            .ok();
        let simulation = tg_sim::simulate(
            &portfolio,
            snapshot.as_ref(),
            &proposal.intent,
            &self.sim_config,
        );
        if !simulation.status.is_success() {
            self.audit.append(
                EventType::OrderSimulated,
                Some(correlation_id),
                json!({"status": simulation.status, "error": simulation.error_message, "stored": false}),
            )?;
            return Ok(RequestApprovalOutcome::SimulationFailed {
                correlation_id,
                simulation,
            });
        }

        let decision = self.risk_gate(&proposal.intent, &portfolio, &simulation, now)?;

        if !decision.is_approved() {
            // Nothing is stored for a rejected proposal; the evaluation is
            // still fully audited under the proposal's correlation id.
            self.audit.append(
                EventType::RiskGateEvaluated,
                Some(correlation_id),
                json!({
                    "verdict": decision.verdict,
                    "violated_rules": decision.violated_rules,
                    "stored": false,
                }),
            )?;
            return Ok(RequestApprovalOutcome::Rejected {
                correlation_id,
                simulation,
                decision,
            });
        }

        let proposal = self.approval.store(proposal)?;
        self.approval
            .attach_simulation(proposal.proposal_id, simulation, now)?;
        self.approval
            .attach_risk_decision(proposal.proposal_id, decision, now)?;
        let (proposal, token) =
            self.approval
                .request(proposal.proposal_id, Some(&portfolio), now)?;

        Ok(RequestApprovalOutcome::Queued {
            proposal,
            auto_approved: token.is_some(),
        })
    }
}

pub enum RequestApprovalOutcome {
    /// The simulation itself failed (no price, constraint breach, bad
    /// quantity, unaffordable): nothing is stored.
    SimulationFailed {
        correlation_id: Uuid,
        simulation: SimulationResult,
    },
    /// Risk said no: not stored, terminal at the gate.
    Rejected {
        correlation_id: Uuid,
        simulation: SimulationResult,
        decision: RiskDecision,
    },
    /// Stored and waiting (or auto-granted). The token, if any, is never
    /// part of this value: it lives in the approval service only.
    Queued {
        proposal: OrderProposal,
        auto_approved: bool,
    },
}

fn default_account_for(config: &AppConfig) -> String {
    match config.env.uses_mock_broker() {
        true => "DU123456".to_string(),
        false => format!("ACCT-{}", config.broker_client_id),
    }
}

fn load_jobs(config: &AppConfig) -> anyhow::Result<Option<Vec<JobConfig>>> {
    let path = config.data_dir.join("jobs.yaml");
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path).with_context(|| format!("read jobs {path:?}"))?;
    let jobs: Vec<JobConfig> =
        serde_yaml::from_str(&raw).with_context(|| format!("parse jobs {path:?}"))?;
    Ok(Some(jobs))
}
