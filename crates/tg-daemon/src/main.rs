//! tg-daemon entry point.
//!
//! Thin by design: load env, build the `Core` aggregate, wire middleware,
//! serve. Exit codes: 0 on a normal shutdown, non-zero when init fails
//! (storage unreachable, policy malformed); `anyhow::Result` from `main`
//! produces exit code 1 on error.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use serde_json::json;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, Level};

use tg_audit::EventType;
use tg_config::AppConfig;
use tg_daemon::{core::Core, routes};

const AUDIT_BACKUP_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    let config = AppConfig::from_env().context("configuration invalid")?;
    init_tracing(&config.log_level);

    let core = Core::init(config).context("core init failed")?;

    // Connectivity probe, recorded either way.
    match core.broker.ping().await {
        Ok(()) => {
            core.audit
                .append(EventType::BrokerConnected, None, json!({"env": core.config.env}))?;
        }
        Err(e) => {
            error!(error = %e, "broker unreachable at startup");
            core.audit.append(
                EventType::BrokerDisconnected,
                None,
                json!({"env": core.config.env, "error": e.to_string()}),
            )?;
        }
    }

    if let Some(scheduler) = &core.scheduler {
        scheduler.start();
    }
    spawn_audit_backup(Arc::clone(&core));

    let app = routes::build_router(Arc::clone(&core))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8080)));
    info!("tg-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&core)))
        .await
        .context("server crashed")?;

    Ok(())
}

/// Periodic audit backup with chain verification; the first tick runs at
/// startup so a fresh deployment has a verified copy immediately.
fn spawn_audit_backup(core: Arc<Core>) {
    let dest = core.config.data_dir.join("audit/backup/events.jsonl");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(AUDIT_BACKUP_INTERVAL);
        loop {
            ticker.tick().await;
            match core.audit.backup_to(&dest) {
                Ok(report) => {
                    let _ = core.audit.append(
                        EventType::BackupCreated,
                        None,
                        json!({"path": report.path.display().to_string(), "events": report.events}),
                    );
                }
                Err(e) => error!(error = %e, "audit backup failed"),
            }
        }
    });
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("TG_DAEMON_ADDR").ok()?.parse().ok()
}

async fn shutdown_signal(core: Arc<Core>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    if let Some(scheduler) = &core.scheduler {
        scheduler.stop(true).await;
    }
}

/// CORS: the approval dashboard runs on localhost; nothing else is allowed.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
