//! HTTP server assembly
//!
//! Builds the shared application state, wires the socket endpoints and the
//! health route into an axum router, and runs it with graceful shutdown.

use axum::extract::State;
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use rdkafka::producer::FutureProducer;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::auth::Authenticator;
use crate::config::ProxyConfig;
use crate::error::{error_body, Result, WsGateError};
use crate::kafka;
use crate::session::{EvictionNotice, KafkaSessionLog, SessionHandler};
use crate::socket;

/// How long startup waits for the session registry to replay the log
const STARTUP_CATCH_UP_TIMEOUT: Duration = Duration::from_secs(60);

/// Capacity of the eviction notice channel
const EVICTION_CHANNEL_SIZE: usize = 256;

/// How long the session handler gets to drain its mailbox on shutdown
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state behind every request handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub handler: SessionHandler,
    pub evictions: broadcast::Sender<EvictionNotice>,
    /// Flips once on shutdown; socket tasks subscribe and close their
    /// streams (flushing commit stacks) when it does
    pub shutdown: watch::Sender<()>,
    pub authenticator: Arc<Authenticator>,
    pub producer: FutureProducer,
}

/// The wsgate proxy server
pub struct ProxyServer {
    state: AppState,
}

impl ProxyServer {
    /// Connect to Kafka, start the session registry, and wait for it to
    /// catch up with the session-state log.
    pub async fn new(config: ProxyConfig) -> Result<Self> {
        let config = Arc::new(config);
        info!(
            server_id = %config.server_id,
            bootstrap = %config.kafka_bootstrap_urls,
            topic = %config.session_handler.session_state_topic_name,
            "Starting session registry"
        );
        if let Some(registry) = &config.schema_registry_url {
            info!(url = %registry, "Schema registry configured");
        }

        let log = Arc::new(KafkaSessionLog::create(config.clone()).await?);
        let (evictions, _) = broadcast::channel(EVICTION_CHANNEL_SIZE);
        let (shutdown, _) = watch::channel(());
        let handler = SessionHandler::spawn(&config, log, evictions.clone()).await?;
        handler.await_up_to(STARTUP_CATCH_UP_TIMEOUT).await?;

        let authenticator = Arc::new(Authenticator::from_config(&config)?);
        let producer = kafka::future_producer(&config)?;

        Ok(Self {
            state: AppState {
                config,
                handler,
                evictions,
                shutdown,
                authenticator,
                producer,
            },
        })
    }

    /// The session handler handle, for embedding and tests
    pub fn session_handler(&self) -> &SessionHandler {
        &self.state.handler
    }

    /// Build the router with all routes attached
    pub fn router(&self) -> Router {
        Router::new()
            .route("/socket/in", get(socket::socket_in))
            .route("/socket/out", get(socket::socket_out))
            .route("/health", get(health))
            .fallback(not_found)
            .with_state(self.state.clone())
    }

    /// Bind and serve until a shutdown signal arrives.
    ///
    /// Shutdown runs in order: the signal is fanned out to every open socket
    /// task, which breaks its loop, flushes its commit stack, and
    /// deregisters; axum waits for those connections to finish; then the
    /// session handler mailbox is drained and its Kafka clients dropped.
    pub async fn run(self) -> Result<()> {
        let port = self.state.config.port;
        let router = self.router();
        let listener = TcpListener::bind(("0.0.0.0", port)).await.map_err(|e| {
            WsGateError::Server(format!("failed to bind port {port}: {e}"))
        })?;
        info!(port, "wsgate listening");

        let shutdown = self.state.shutdown.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                let _ = shutdown.send(());
            })
            .await
            .map_err(|e| WsGateError::Server(format!("server error: {e}")))?;

        if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, self.state.handler.shutdown())
            .await
            .is_err()
        {
            warn!("Session handler drain timed out");
        }
        info!("wsgate shut down cleanly");
        Ok(())
    }
}

async fn health(State(state): State<AppState>) -> Response {
    let body = serde_json::json!({
        "status": "ok",
        "serverId": state.config.server_id,
    });
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

async fn not_found(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "application/json")],
        error_body(&format!("no route for {uri}")),
    )
        .into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => warn!(error = %e, "Failed to listen for SIGTERM"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c; shutting down"),
        _ = terminate => info!("Received SIGTERM; shutting down"),
    }
}
