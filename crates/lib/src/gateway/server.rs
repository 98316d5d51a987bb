//! Gateway HTTP server: NLU webhook and health check.

use crate::config::Config;
use crate::messaging::{self, MessagingConnection};
use crate::nlu::{ApiAiClient, NluService};
use crate::processor::{MessageProcessor, Reply};
use crate::session::SessionRegistry;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared state for the gateway (config, processor, messaging connection).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub processor: Arc<MessageProcessor>,
    /// Set once the startup bootstrap succeeds. None while pending or after a failure.
    pub messaging: Arc<RwLock<Option<MessagingConnection>>>,
}

impl GatewayState {
    /// Build state with the given NLU backend and a fresh session registry.
    pub fn new(config: Config, nlu: Arc<dyn NluService>) -> Self {
        let processor = MessageProcessor::new(
            Arc::new(SessionRegistry::new()),
            nlu,
            config.bot.dev_config,
        );
        Self {
            config: Arc::new(config),
            processor: Arc::new(processor),
            messaging: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn messaging_connected(&self) -> bool {
        self.messaging.read().await.is_some()
    }
}

/// Routes: `GET /` health, `POST /webhook` NLU relay.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/webhook", post(webhook))
        .with_state(state)
}

/// Issue a token and connect to the messaging platform in the background.
/// Requests are served while this runs; a failure is logged and not retried.
pub fn spawn_messaging_bootstrap(state: &GatewayState) -> tokio::task::JoinHandle<()> {
    let config = state.config.clone();
    let slot = state.messaging.clone();
    tokio::spawn(async move {
        match messaging::start_messaging(&config).await {
            Ok(conn) => {
                *slot.write().await = Some(conn);
            }
            Err(e) => {
                log::warn!("messaging bootstrap failed, continuing without messaging: {}", e);
            }
        }
    })
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Refuses to start without bot credentials. Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config) -> Result<()> {
    let missing = config.bot.missing_credentials();
    if !missing.is_empty() {
        anyhow::bail!(
            "bot credentials not configured: {} (set them under \"bot\" in the config file or via environment)",
            missing.join(", ")
        );
    }

    let nlu: Arc<dyn NluService> = Arc::new(ApiAiClient::new(&config.bot, &config.nlu));
    let state = GatewayState::new(config.clone(), nlu);
    if config.bot.dev_config {
        log::info!("dev mode: logging raw webhook bodies");
    }
    spawn_messaging_bootstrap(&state);

    let app = router(state);
    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// POST /webhook — NLU callback; replies with the agent's speech or a plain-text error.
async fn webhook(State(state): State<GatewayState>, body: Bytes) -> Reply {
    state.processor.process_message(&body).await
}

/// GET / returns a simple health JSON.
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let messaging = if state.messaging_connected().await {
        "connected"
    } else {
        "disconnected"
    };
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
        "messaging": messaging,
    }))
}
