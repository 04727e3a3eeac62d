use anyhow::{Context, Result};
use evald_core::capability::CapabilityGate;
use evald_core::interpreter::ScriptInterpreter;
use evald_core::service::{EvalService, ServiceOptions};
use evald_server::config::Config;
use evald_server::web::{AppState, create_router};
use evald_store::GitHistoryStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(&config_path)?;

    info!(path = %config.history.state_path.display(), "opening history store");
    let store = Arc::new(GitHistoryStore::open(&config.history.state_path)?);

    let gate = CapabilityGate::new(&config.security.denied_commands);
    let options = ServiceOptions {
        page_size: config.pagination.page_size,
        eval_timeout: Duration::from_millis(config.security.eval_timeout_ms),
        commit_policy: config.history.commit_policy,
    };

    // The interpreter gets the same gate: it re-checks the tier at
    // dispatch time for names that only appear after substitution.
    let interpreter = ScriptInterpreter::with_gate(gate.clone());
    let service = EvalService::start(Box::new(interpreter), gate, store, options)
        .await
        .context("Failed to start evaluation service")?;

    let state = AppState {
        service: Arc::new(service),
    };
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.port)
        .parse()
        .context("Invalid bind address")?;

    info!("evald listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
