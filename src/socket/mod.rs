//! WebSocket endpoints and socket lifecycle
//!
//! `/socket/in` opens a producer socket, `/socket/out` a consumer socket.
//! Both follow the same lifecycle: authenticate, validate parameters, check
//! the topic, register with the session handler, and only then upgrade and
//! open the Kafka stream. Any rejection answers with the mapped status and
//! never opens a stream. Deregistration runs exactly once per socket on every
//! exit path, through a guard whose teardown fires the removal.

pub mod consumer;
pub mod frame;
pub mod params;
pub mod producer;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use tracing::{debug, info, warn};

use crate::error::{Result, WsGateError};
use crate::kafka;
use crate::server::AppState;
use crate::session::{
    FullClientId, ServerId, SessionHandler, SessionId, SessionKind, SessionOpResult,
};
use params::{ConsumerParams, ProducerParams, RawConsumerParams, RawProducerParams};

/// Producer endpoint: records flow from the client into Kafka
pub async fn socket_in(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(raw): Query<RawProducerParams>,
) -> Response {
    match prepare_producer(&state, &headers, raw).await {
        Ok(setup) => ws.on_upgrade(move |socket| producer::run(socket, state, setup)),
        Err(e) => {
            warn!(uri = "/socket/in", error = %e, "Rejected producer socket");
            e.into_response()
        }
    }
}

/// Consumer endpoint: records flow from Kafka out to the client
pub async fn socket_out(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(raw): Query<RawConsumerParams>,
) -> Response {
    match prepare_consumer(&state, &headers, raw).await {
        Ok(setup) => ws.on_upgrade(move |socket| consumer::run(socket, state, setup)),
        Err(e) => {
            warn!(uri = "/socket/out", error = %e, "Rejected consumer socket");
            e.into_response()
        }
    }
}

/// Everything a producer socket task needs after registration
pub(crate) struct ProducerSetup {
    pub params: ProducerParams,
    pub session_id: SessionId,
    pub guard: RegistrationGuard,
}

/// Everything a consumer socket task needs after registration
pub(crate) struct ConsumerSetup {
    pub params: ConsumerParams,
    pub session_id: SessionId,
    pub guard: RegistrationGuard,
}

async fn prepare_producer(
    state: &AppState,
    headers: &HeaderMap,
    raw: RawProducerParams,
) -> Result<ProducerSetup> {
    let principal = state.authenticator.authenticate(headers).await?;
    let params = raw.validate()?;
    if let Some(topic) = &params.topic {
        if !kafka::topic_exists(&state.config, topic.as_str()).await? {
            return Err(WsGateError::TopicNotFound(topic.to_string()));
        }
    }

    let session_id = params.session_id();
    check_registration(
        &session_id,
        state
            .handler
            .init_session(
                session_id.clone(),
                SessionKind::Producer,
                state.config.session_handler.max_connections_per_session,
                None,
            )
            .await,
    )?;
    let server_id = ServerId::new(state.config.server_id.clone());
    let result = state
        .handler
        .add_producer(params.client_id.clone(), server_id.clone())
        .await;
    // The guard exists from here on: if registration is rejected (or timed
    // out with the op possibly still landing in the log), dropping it runs
    // the idempotent remove path.
    let guard = RegistrationGuard::new(
        state.handler.clone(),
        server_id,
        FullClientId::Producer(params.client_id.clone()),
    );
    check_registration(&session_id, result)?;

    info!(
        principal = %principal.name,
        client = %params.client_id,
        session = %session_id,
        "Producer socket registered"
    );
    Ok(ProducerSetup {
        params,
        session_id,
        guard,
    })
}

async fn prepare_consumer(
    state: &AppState,
    headers: &HeaderMap,
    raw: RawConsumerParams,
) -> Result<ConsumerSetup> {
    let principal = state.authenticator.authenticate(headers).await?;
    let params = raw.validate(&state.config)?;
    if !kafka::topic_exists(&state.config, params.topic.as_str()).await? {
        return Err(WsGateError::TopicNotFound(params.topic.to_string()));
    }

    let session_id = params.session_id();
    check_registration(
        &session_id,
        state
            .handler
            .init_session(
                session_id.clone(),
                SessionKind::Consumer,
                state.config.session_handler.max_connections_per_session,
                Some(params.client_id.group_id.clone()),
            )
            .await,
    )?;
    let server_id = ServerId::new(state.config.server_id.clone());
    let result = state
        .handler
        .add_consumer(params.client_id.clone(), server_id.clone())
        .await;
    // The guard exists from here on: if registration is rejected (or timed
    // out with the op possibly still landing in the log), dropping it runs
    // the idempotent remove path.
    let guard = RegistrationGuard::new(
        state.handler.clone(),
        server_id,
        FullClientId::Consumer(params.client_id.clone()),
    );
    check_registration(&session_id, result)?;

    info!(
        principal = %principal.name,
        client = %params.client_id,
        topic = %params.topic,
        session = %session_id,
        "Consumer socket registered"
    );
    Ok(ConsumerSetup {
        params,
        session_id,
        guard,
    })
}

/// Turn a registration outcome into the socket-setup decision. `Unchanged`
/// is a success: the registration was already in place.
fn check_registration(session_id: &SessionId, result: SessionOpResult) -> Result<()> {
    match result {
        SessionOpResult::Updated(_) | SessionOpResult::Unchanged(_) => Ok(()),
        SessionOpResult::InstanceLimitReached(_) => {
            Err(WsGateError::InstanceLimitReached(session_id.to_string()))
        }
        SessionOpResult::InstanceTypeForSessionIncorrect(_) => Err(
            WsGateError::InstanceTypeForSessionIncorrect(session_id.to_string()),
        ),
        SessionOpResult::SessionNotFound(id) => Err(WsGateError::IncompleteOp(format!(
            "session {id} disappeared during registration"
        ))),
        SessionOpResult::IncompleteOp(message) => Err(WsGateError::IncompleteOp(message)),
    }
}

/// Deregisters a socket when dropped. Dropping is the one cleanup path, so
/// removal runs exactly once whether the socket ended in a clean close, a
/// client disconnect, an upstream error, or a panic unwinding the task; the
/// remove operation itself is idempotent on the handler side.
pub(crate) struct RegistrationGuard {
    handler: SessionHandler,
    server_id: ServerId,
    client: Option<FullClientId>,
}

impl RegistrationGuard {
    pub(crate) fn new(
        handler: SessionHandler,
        server_id: ServerId,
        client: FullClientId,
    ) -> Self {
        Self {
            handler,
            server_id,
            client: Some(client),
        }
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        let handler = self.handler.clone();
        let server_id = self.server_id.clone();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(client = %client, "No runtime available for socket deregistration");
            return;
        };
        runtime.spawn(async move {
            let result = match client.clone() {
                FullClientId::Consumer(id) => handler.remove_consumer(id, server_id).await,
                FullClientId::Producer(id) => handler.remove_producer(id, server_id).await,
            };
            match result {
                SessionOpResult::Updated(_)
                | SessionOpResult::Unchanged(_)
                | SessionOpResult::SessionNotFound(_) => {
                    debug!(client = %client, "Socket deregistered");
                }
                other => {
                    warn!(client = %client, result = ?other, "Socket deregistration incomplete");
                }
            }
        });
    }
}
