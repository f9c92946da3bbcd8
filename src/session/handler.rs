//! Session handler
//!
//! One handler instance runs per proxy process as a single-writer actor: it
//! exclusively owns the in-memory session map and serializes every mutation
//! through its mailbox, so no locks guard the registry. Socket handlers talk
//! to it through the cheap-to-clone [`SessionHandler`] handle.
//!
//! The actor couples two flows. The consumer flow replays the session-state
//! topic into the map: requests are held until the replay reaches the high
//! watermark observed at startup, after which the map converges to the log
//! tail with best-effort latency. The producer flow turns mutation requests
//! into log events: the pure state machine screens the request against the
//! current map, rejected requests are answered without touching the log, and
//! accepted ones are published and answered only once the node consumes its
//! own event back. The log, not the local map, is the source of ordering.
//!
//! When replay surfaces a quota conflict (two nodes raced the last seat), the
//! losing instance is kept in the map but marked over-quota, and the node
//! hosting it publishes a compensating removal and evicts the local socket.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::codec::{self, EventEnvelope, SessionEvent};
use super::log::{LogFeed, LogRecord, SessionLog};
use super::state::SessionOpResult;
use super::types::{
    FullClientId, FullConsumerId, FullProducerId, GroupId, Instance, ServerId, Session,
    SessionId, SessionKind,
};
use crate::config::{ProxyConfig, SESSION_RPC_TIMEOUT_MS};
use crate::error::{Result, WsGateError};

/// Emit a full-session snapshot after this many incremental events per
/// session, so compaction of the single-key event stream cannot starve
/// replay of the session's creation parameters.
const SNAPSHOT_EVERY: u64 = 64;

/// Mailbox capacity for socket-handler requests
const COMMAND_QUEUE_SIZE: usize = 256;

/// Mailbox capacity for the log feed
const FEED_QUEUE_SIZE: usize = 1024;

/// Notice that the handler wants a locally hosted socket closed because its
/// registration lost a cross-node quota race.
#[derive(Debug, Clone)]
pub struct EvictionNotice {
    pub session_id: SessionId,
    pub client_id: FullClientId,
}

/// Requests served by the handler actor
pub enum SessionCommand {
    InitSession {
        session_id: SessionId,
        kind: SessionKind,
        max_connections: u32,
        group_id: Option<GroupId>,
        reply: oneshot::Sender<SessionOpResult>,
    },
    AddConsumer {
        id: FullConsumerId,
        server_id: ServerId,
        reply: oneshot::Sender<SessionOpResult>,
    },
    AddProducer {
        id: FullProducerId,
        server_id: ServerId,
        reply: oneshot::Sender<SessionOpResult>,
    },
    RemoveConsumer {
        id: FullConsumerId,
        reply: oneshot::Sender<SessionOpResult>,
    },
    RemoveProducer {
        id: FullProducerId,
        reply: oneshot::Sender<SessionOpResult>,
    },
    SessionFor {
        session_id: SessionId,
        reply: oneshot::Sender<SessionOpResult>,
    },
    AwaitCaughtUp {
        reply: oneshot::Sender<()>,
    },
    /// Drain the mailbox and stop the actor
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the session handler actor. Cloning is cheap; all clones feed the
/// same mailbox.
#[derive(Clone)]
pub struct SessionHandler {
    tx: mpsc::Sender<SessionCommand>,
    rpc_timeout: Duration,
}

impl SessionHandler {
    /// Start the handler actor and its log pump.
    pub async fn spawn(
        config: &ProxyConfig,
        log: Arc<dyn SessionLog>,
        evictions: broadcast::Sender<EvictionNotice>,
    ) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let (feed_tx, feed_rx) = mpsc::channel(FEED_QUEUE_SIZE);
        log.spawn_pump(feed_tx).await?;

        let task = HandlerTask {
            server_id: ServerId::new(config.server_id.clone()),
            default_max_connections: config.session_handler.max_connections_per_session,
            log,
            evictions,
            sessions: HashMap::new(),
            pending: HashMap::new(),
            seq: 0,
            caught_up: false,
        };
        tokio::spawn(task.run(cmd_rx, feed_rx));

        Ok(Self {
            tx: cmd_tx,
            rpc_timeout: Duration::from_millis(SESSION_RPC_TIMEOUT_MS),
        })
    }

    /// Create the session bucket if it does not exist yet
    pub async fn init_session(
        &self,
        session_id: SessionId,
        kind: SessionKind,
        max_connections: u32,
        group_id: Option<GroupId>,
    ) -> SessionOpResult {
        self.call(|reply| SessionCommand::InitSession {
            session_id,
            kind,
            max_connections,
            group_id,
            reply,
        })
        .await
    }

    /// Register a consumer socket hosted on `server_id`
    pub async fn add_consumer(&self, id: FullConsumerId, server_id: ServerId) -> SessionOpResult {
        self.call(|reply| SessionCommand::AddConsumer {
            id,
            server_id,
            reply,
        })
        .await
    }

    /// Register a producer socket hosted on `server_id`
    pub async fn add_producer(&self, id: FullProducerId, server_id: ServerId) -> SessionOpResult {
        self.call(|reply| SessionCommand::AddProducer {
            id,
            server_id,
            reply,
        })
        .await
    }

    /// Deregister a consumer socket. Safe to call more than once.
    pub async fn remove_consumer(&self, id: FullConsumerId, _server_id: ServerId) -> SessionOpResult {
        self.call(|reply| SessionCommand::RemoveConsumer { id, reply }).await
    }

    /// Deregister a producer socket. Safe to call more than once.
    pub async fn remove_producer(&self, id: FullProducerId, _server_id: ServerId) -> SessionOpResult {
        self.call(|reply| SessionCommand::RemoveProducer { id, reply }).await
    }

    /// Look up the current view of a session
    pub async fn session_for(&self, session_id: SessionId) -> SessionOpResult {
        self.call(|reply| SessionCommand::SessionFor { session_id, reply })
            .await
    }

    /// Stop accepting new commands, serve everything already queued in the
    /// mailbox, and stop the actor. Returns once the mailbox is drained;
    /// operations issued afterwards answer `IncompleteOp`.
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(SessionCommand::Shutdown { reply: reply_tx })
            .await
            .is_err()
        {
            // Actor already gone; nothing left to drain.
            return;
        }
        let _ = reply_rx.await;
    }

    /// Wait until the local view has caught up to the log tail observed at
    /// handler startup.
    pub async fn await_up_to(&self, timeout: Duration) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let fut = async {
            if self
                .tx
                .send(SessionCommand::AwaitCaughtUp { reply: reply_tx })
                .await
                .is_err()
            {
                return Err(WsGateError::IncompleteOp(
                    "session handler is not running".to_string(),
                ));
            }
            reply_rx.await.map_err(|_| {
                WsGateError::IncompleteOp("session handler dropped the request".to_string())
            })
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| WsGateError::IncompleteOp("catch-up wait timed out".to_string()))?
    }

    async fn call(
        &self,
        build: impl FnOnce(oneshot::Sender<SessionOpResult>) -> SessionCommand,
    ) -> SessionOpResult {
        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = build(reply_tx);
        let fut = async {
            if self.tx.send(cmd).await.is_err() {
                return SessionOpResult::IncompleteOp(
                    "session handler is not running".to_string(),
                );
            }
            match reply_rx.await {
                Ok(result) => result,
                Err(_) => SessionOpResult::IncompleteOp(
                    "session handler dropped the request".to_string(),
                ),
            }
        };
        match tokio::time::timeout(self.rpc_timeout, fut).await {
            Ok(result) => result,
            Err(_) => SessionOpResult::IncompleteOp(format!(
                "session operation timed out after {}ms",
                self.rpc_timeout.as_millis()
            )),
        }
    }
}

/// One session's slot in the handler map
struct SessionEntry {
    session: Session,
    /// Instances kept after a quota-violating replay, awaiting compensation
    over_quota: BTreeSet<FullClientId>,
    events_since_snapshot: u64,
}

impl SessionEntry {
    fn new(session: Session) -> Self {
        Self {
            session,
            over_quota: BTreeSet::new(),
            events_since_snapshot: 0,
        }
    }
}

/// The actor behind [`SessionHandler`]; exclusive owner of the session map
struct HandlerTask {
    server_id: ServerId,
    default_max_connections: u32,
    log: Arc<dyn SessionLog>,
    evictions: broadcast::Sender<EvictionNotice>,
    sessions: HashMap<SessionId, SessionEntry>,
    /// Replies deferred until the node consumes its own event back, keyed by
    /// the event's per-node sequence number
    pending: HashMap<u64, oneshot::Sender<SessionOpResult>>,
    seq: u64,
    caught_up: bool,
}

fn session_id_for_consumer(id: &FullConsumerId) -> SessionId {
    SessionId::new(id.group_id.as_str())
}

fn session_id_for_producer(id: &FullProducerId) -> SessionId {
    SessionId::new(id.producer_id.as_str())
}

impl HandlerTask {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<SessionCommand>,
        mut feed_rx: mpsc::Receiver<LogFeed>,
    ) {
        let mut feed_open = true;
        loop {
            tokio::select! {
                biased;
                feed = feed_rx.recv(), if feed_open => match feed {
                    Some(LogFeed::Record(record)) => self.on_record(record).await,
                    Some(LogFeed::CaughtUp) => self.on_caught_up().await,
                    None => {
                        feed_open = false;
                        warn!("Session log pump stopped; serving from last-known state");
                    }
                },
                cmd = cmd_rx.recv(), if self.caught_up => match cmd {
                    Some(SessionCommand::Shutdown { reply }) => {
                        self.drain(&mut cmd_rx).await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.on_command(cmd).await,
                    None => break,
                },
                else => break,
            }
        }
        // Dropping the task drops the feed receiver, which stops the log
        // pump and releases its Kafka consumer; the log handle goes with it.
        debug!(server_id = %self.server_id, "Session handler stopped");
    }

    /// Close the mailbox and serve what was already queued, so callers that
    /// made it in before shutdown still get answers. Replies deferred on
    /// in-flight log publishes are dropped and surface as `IncompleteOp`.
    async fn drain(&mut self, cmd_rx: &mut mpsc::Receiver<SessionCommand>) {
        cmd_rx.close();
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                SessionCommand::Shutdown { reply } => {
                    let _ = reply.send(());
                }
                cmd => self.on_command(cmd).await,
            }
        }
        debug!(server_id = %self.server_id, "Session handler mailbox drained");
    }

    async fn on_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::InitSession {
                session_id,
                kind,
                max_connections,
                group_id,
                reply,
            } => {
                if let Some(entry) = self.sessions.get(&session_id) {
                    let result = if entry.session.kind() == kind {
                        SessionOpResult::Unchanged(entry.session.clone())
                    } else {
                        SessionOpResult::InstanceTypeForSessionIncorrect(entry.session.clone())
                    };
                    let _ = reply.send(result);
                } else {
                    let event = SessionEvent::SessionCreated {
                        session_id,
                        kind,
                        group_id,
                        max_connections,
                    };
                    self.publish_event(event, Some(reply)).await;
                }
            }
            SessionCommand::AddConsumer { id, server_id, reply } => {
                let instance = Instance::Consumer { id, server_id };
                self.on_add(instance, reply).await;
            }
            SessionCommand::AddProducer { id, server_id, reply } => {
                let instance = Instance::Producer { id, server_id };
                self.on_add(instance, reply).await;
            }
            SessionCommand::RemoveConsumer { id, reply } => {
                let session_id = session_id_for_consumer(&id);
                self.on_remove(session_id, FullClientId::Consumer(id), reply)
                    .await;
            }
            SessionCommand::RemoveProducer { id, reply } => {
                let session_id = session_id_for_producer(&id);
                self.on_remove(session_id, FullClientId::Producer(id), reply)
                    .await;
            }
            SessionCommand::SessionFor { session_id, reply } => {
                let result = match self.sessions.get(&session_id) {
                    Some(entry) => SessionOpResult::Unchanged(entry.session.clone()),
                    None => SessionOpResult::SessionNotFound(session_id),
                };
                let _ = reply.send(result);
            }
            SessionCommand::AwaitCaughtUp { reply } => {
                // Commands are only drained after the catch-up barrier, so
                // reaching this point is the answer.
                let _ = reply.send(());
            }
            SessionCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn on_add(&mut self, instance: Instance, reply: oneshot::Sender<SessionOpResult>) {
        let session_id = match &instance {
            Instance::Consumer { id, .. } => session_id_for_consumer(id),
            Instance::Producer { id, .. } => session_id_for_producer(id),
        };
        let Some(entry) = self.sessions.get(&session_id) else {
            let _ = reply.send(SessionOpResult::SessionNotFound(session_id));
            return;
        };
        match entry.session.add_instance(instance.clone()) {
            SessionOpResult::Updated(_) => {
                let event = SessionEvent::InstanceAdded {
                    session_id,
                    instance,
                };
                self.publish_event(event, Some(reply)).await;
            }
            other => {
                let _ = reply.send(other);
            }
        }
    }

    async fn on_remove(
        &mut self,
        session_id: SessionId,
        client_id: FullClientId,
        reply: oneshot::Sender<SessionOpResult>,
    ) {
        let Some(entry) = self.sessions.get(&session_id) else {
            let _ = reply.send(SessionOpResult::SessionNotFound(session_id));
            return;
        };
        match entry.session.remove_instance(&client_id) {
            SessionOpResult::Updated(_) => {
                let event = SessionEvent::InstanceRemoved {
                    session_id,
                    client_id,
                };
                self.publish_event(event, Some(reply)).await;
            }
            other => {
                let _ = reply.send(other);
            }
        }
    }

    /// Publish an event and defer the reply until the event is consumed back
    /// from the log, which is what makes replies read-your-writes.
    async fn publish_event(
        &mut self,
        event: SessionEvent,
        reply: Option<oneshot::Sender<SessionOpResult>>,
    ) {
        self.seq += 1;
        let seq = self.seq;
        let envelope = EventEnvelope::new(self.server_id.as_str(), seq, event);
        let key = envelope.event.session_id().clone();
        let payload = match codec::encode(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                if let Some(reply) = reply {
                    let _ = reply.send(SessionOpResult::IncompleteOp(format!(
                        "failed to encode session event: {e}"
                    )));
                }
                return;
            }
        };
        match self.log.publish(key.as_str(), payload).await {
            Ok(()) => {
                if let Some(reply) = reply {
                    self.pending.retain(|_, r| !r.is_closed());
                    self.pending.insert(seq, reply);
                }
            }
            Err(e) => {
                warn!(session = %key, error = %e, "Session log publish failed");
                if let Some(reply) = reply {
                    let _ = reply.send(SessionOpResult::IncompleteOp(format!(
                        "session log publish failed: {e}"
                    )));
                }
            }
        }
    }

    async fn on_record(&mut self, record: LogRecord) {
        let envelope = match codec::decode(&record.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(key = %record.key, error = %e, "Skipping undecodable session event");
                return;
            }
        };
        let own = envelope.server_id == self.server_id.as_str();
        let outcome = self.apply_event(&envelope, own).await;
        if own {
            if let Some(reply) = self.pending.remove(&envelope.seq) {
                let _ = reply.send(outcome);
            }
        }
    }

    /// Fold one log event into the map. Never drops an instance another node
    /// accepted: a quota-violating add is kept and marked over-quota, and the
    /// hosting node publishes the compensating removal.
    async fn apply_event(&mut self, envelope: &EventEnvelope, own: bool) -> SessionOpResult {
        match &envelope.event {
            SessionEvent::SessionCreated {
                session_id,
                kind,
                group_id,
                max_connections,
            } => {
                if let Some(entry) = self.sessions.get(session_id) {
                    return SessionOpResult::Unchanged(entry.session.clone());
                }
                let session = match kind {
                    SessionKind::Consumer => Session::consumer(
                        session_id.as_str(),
                        group_id
                            .as_ref()
                            .map(|g| g.as_str())
                            .unwrap_or(session_id.as_str()),
                        *max_connections,
                    ),
                    SessionKind::Producer => {
                        Session::producer(session_id.as_str(), *max_connections)
                    }
                };
                debug!(session = %session_id, kind = %kind, "Session created");
                self.sessions
                    .insert(session_id.clone(), SessionEntry::new(session.clone()));
                SessionOpResult::Updated(session)
            }
            SessionEvent::InstanceAdded {
                session_id,
                instance,
            } => {
                let default_max = self.default_max_connections;
                let entry = self
                    .sessions
                    .entry(session_id.clone())
                    .or_insert_with(|| {
                        // The creating event may have been compacted away;
                        // rebuild the shell from the instance itself.
                        let session = match instance {
                            Instance::Consumer { id, .. } => Session::consumer(
                                session_id.as_str(),
                                id.group_id.as_str(),
                                default_max,
                            ),
                            Instance::Producer { .. } => {
                                Session::producer(session_id.as_str(), default_max)
                            }
                        };
                        SessionEntry::new(session)
                    });

                let inserted = entry.session.force_add_instance(instance.clone());
                entry.events_since_snapshot += 1;
                let max = entry.session.max_connections();
                let violated = inserted && max > 0 && (entry.session.len() as u32) > max;

                if violated {
                    let client_id = instance.full_client_id();
                    entry.over_quota.insert(client_id.clone());
                    let mut converged = entry.session.clone();
                    converged.instances_mut().remove(&client_id);
                    warn!(
                        session = %session_id,
                        client = %client_id,
                        hosted_on = %instance.server_id(),
                        "Replayed instance exceeds session quota"
                    );
                    if self.caught_up && instance.server_id() == &self.server_id {
                        self.compensate(session_id.clone(), client_id).await;
                    }
                    SessionOpResult::InstanceLimitReached(converged)
                } else {
                    let session = entry.session.clone();
                    self.maybe_snapshot(session_id.clone(), own).await;
                    SessionOpResult::Updated(session)
                }
            }
            SessionEvent::InstanceRemoved {
                session_id,
                client_id,
            } => {
                let Some(entry) = self.sessions.get_mut(session_id) else {
                    return SessionOpResult::SessionNotFound(session_id.clone());
                };
                entry.session.instances_mut().remove(client_id);
                entry.over_quota.remove(client_id);
                entry.events_since_snapshot += 1;
                let session = entry.session.clone();
                self.maybe_snapshot(session_id.clone(), own).await;
                SessionOpResult::Updated(session)
            }
            SessionEvent::SessionRemoved { session_id } => {
                self.sessions.remove(session_id);
                debug!(session = %session_id, "Session removed");
                SessionOpResult::SessionNotFound(session_id.clone())
            }
            SessionEvent::Snapshot { session } => {
                let session_id = session.session_id().clone();
                let entry = self
                    .sessions
                    .entry(session_id)
                    .or_insert_with(|| SessionEntry::new(session.clone()));
                entry.session = session.clone();
                entry.over_quota.clear();
                entry.events_since_snapshot = 0;
                SessionOpResult::Updated(session.clone())
            }
        }
    }

    /// Periodically replace the session's single-key event stream with a full
    /// snapshot. Only the node that produced the triggering event snapshots,
    /// and only while no compensation is outstanding.
    async fn maybe_snapshot(&mut self, session_id: SessionId, own: bool) {
        if !own || !self.caught_up {
            return;
        }
        let Some(entry) = self.sessions.get_mut(&session_id) else {
            return;
        };
        if entry.events_since_snapshot < SNAPSHOT_EVERY || !entry.over_quota.is_empty() {
            return;
        }
        entry.events_since_snapshot = 0;
        let session = entry.session.clone();
        debug!(session = %session_id, "Emitting session snapshot");
        self.publish_event(SessionEvent::Snapshot { session }, None)
            .await;
    }

    /// Evict the local socket behind an over-quota registration and publish
    /// the compensating removal.
    async fn compensate(&mut self, session_id: SessionId, client_id: FullClientId) {
        info!(
            session = %session_id,
            client = %client_id,
            "Evicting over-quota instance after losing a cross-node race"
        );
        let _ = self.evictions.send(EvictionNotice {
            session_id: session_id.clone(),
            client_id: client_id.clone(),
        });
        let event = SessionEvent::InstanceRemoved {
            session_id,
            client_id,
        };
        self.publish_event(event, None).await;
    }

    async fn on_caught_up(&mut self) {
        if self.caught_up {
            return;
        }
        self.caught_up = true;
        // Compensations deferred during replay: a crash may have interrupted
        // the original eviction, so sweep for over-quota instances this node
        // still hosts.
        let mut deferred = Vec::new();
        for (session_id, entry) in &self.sessions {
            for client_id in &entry.over_quota {
                if let Some(instance) = entry.session.instances().get(client_id) {
                    if instance.server_id() == &self.server_id {
                        deferred.push((session_id.clone(), client_id.clone()));
                    }
                }
            }
        }
        for (session_id, client_id) in deferred {
            self.compensate(session_id, client_id).await;
        }
        info!(
            server_id = %self.server_id,
            sessions = self.sessions.len(),
            "Session registry caught up with the log"
        );
    }
}
