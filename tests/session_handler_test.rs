//! Session handler integration tests
//!
//! Runs the handler actor against the in-memory session log. Several handler
//! instances attached to one log behave like proxy nodes sharing the
//! session-state topic, which is how the cross-node scenarios are driven.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use wsgate::config::{ProxyArgs, ProxyConfig};
use wsgate::session::codec::{self, EventEnvelope, SessionEvent};
use wsgate::session::{
    EvictionNotice, FullConsumerId, FullProducerId, GroupId, Instance, InMemorySessionLog,
    ServerId, SessionHandler, SessionId, SessionKind, SessionLog, SessionOpResult,
};

use clap::Parser;

fn config(server_id: &str) -> ProxyConfig {
    ProxyConfig::from_args(ProxyArgs::parse_from(["wsgate", "--server-id", server_id])).unwrap()
}

struct Node {
    handler: SessionHandler,
    evictions: broadcast::Receiver<EvictionNotice>,
}

async fn spawn_node(server_id: &str, log: &InMemorySessionLog) -> Node {
    let (evictions_tx, evictions_rx) = broadcast::channel(64);
    let handler = SessionHandler::spawn(
        &config(server_id),
        Arc::new(log.clone()),
        evictions_tx,
    )
    .await
    .unwrap();
    handler.await_up_to(Duration::from_secs(5)).await.unwrap();
    Node {
        handler,
        evictions: evictions_rx,
    }
}

async fn init_consumer_session(handler: &SessionHandler, group: &str, cap: u32) {
    let result = handler
        .init_session(
            SessionId::new(group),
            SessionKind::Consumer,
            cap,
            Some(GroupId::new(group)),
        )
        .await;
    assert!(result.is_success(), "init failed: {:?}", result);
}

/// Poll until the condition holds or the deadline passes
async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if condition().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met before deadline"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn session_len(result: &SessionOpResult) -> usize {
    result.session().map(|s| s.len()).unwrap_or(0)
}

async fn snapshot_count(log: &InMemorySessionLog) -> usize {
    log.records()
        .await
        .iter()
        .filter_map(|record| codec::decode(&record.payload).ok())
        .filter(|envelope| matches!(envelope.event, SessionEvent::Snapshot { .. }))
        .count()
}

#[tokio::test]
async fn test_quota_enforced_locally() {
    let log = InMemorySessionLog::new();
    let node = spawn_node("n1", &log).await;
    init_consumer_session(&node.handler, "g1", 2).await;

    let server = ServerId::new("n1");
    for client in ["c1", "c2"] {
        let result = node
            .handler
            .add_consumer(FullConsumerId::new("g1", client), server.clone())
            .await;
        assert!(matches!(result, SessionOpResult::Updated(_)), "{result:?}");
    }

    let result = node
        .handler
        .add_consumer(FullConsumerId::new("g1", "c3"), server)
        .await;
    match result {
        SessionOpResult::InstanceLimitReached(session) => {
            assert_eq!(session.len(), 2);
            assert!(session.contains(&wsgate::session::FullClientId::Consumer(
                FullConsumerId::new("g1", "c1")
            )));
            assert!(session.contains(&wsgate::session::FullClientId::Consumer(
                FullConsumerId::new("g1", "c2")
            )));
        }
        other => panic!("expected InstanceLimitReached, got {other:?}"),
    }
}

#[tokio::test]
async fn test_kind_mismatch_rejected() {
    let log = InMemorySessionLog::new();
    let node = spawn_node("nA", &log).await;
    init_consumer_session(&node.handler, "s1", 1).await;

    let result = node
        .handler
        .add_producer(
            FullProducerId::new("s1", Some("i1".to_string())),
            ServerId::new("nA"),
        )
        .await;
    match result {
        SessionOpResult::InstanceTypeForSessionIncorrect(session) => {
            assert!(session.is_empty());
        }
        other => panic!("expected InstanceTypeForSessionIncorrect, got {other:?}"),
    }
}

#[tokio::test]
async fn test_remove_then_re_add() {
    let log = InMemorySessionLog::new();
    let node = spawn_node("n1", &log).await;
    init_consumer_session(&node.handler, "g1", 2).await;

    let server = ServerId::new("n1");
    for client in ["c1", "c2"] {
        node.handler
            .add_consumer(FullConsumerId::new("g1", client), server.clone())
            .await;
    }

    let result = node
        .handler
        .remove_consumer(FullConsumerId::new("g1", "c1"), server.clone())
        .await;
    match &result {
        SessionOpResult::Updated(session) => assert_eq!(session.len(), 1),
        other => panic!("expected Updated, got {other:?}"),
    }

    let result = node
        .handler
        .add_consumer(FullConsumerId::new("g1", "c1"), ServerId::new("nZ"))
        .await;
    assert_eq!(session_len(&result), 2, "{result:?}");
}

#[tokio::test]
async fn test_remove_is_idempotent() {
    let log = InMemorySessionLog::new();
    let node = spawn_node("n1", &log).await;
    init_consumer_session(&node.handler, "g1", 2).await;

    let server = ServerId::new("n1");
    node.handler
        .add_consumer(FullConsumerId::new("g1", "c1"), server.clone())
        .await;

    let first = node
        .handler
        .remove_consumer(FullConsumerId::new("g1", "c1"), server.clone())
        .await;
    assert!(matches!(first, SessionOpResult::Updated(_)), "{first:?}");

    let second = node
        .handler
        .remove_consumer(FullConsumerId::new("g1", "c1"), server)
        .await;
    match second {
        SessionOpResult::Unchanged(session) => assert!(session.is_empty()),
        other => panic!("expected Unchanged, got {other:?}"),
    }
}

#[tokio::test]
async fn test_read_your_writes() {
    let log = InMemorySessionLog::new();
    let node = spawn_node("n1", &log).await;
    init_consumer_session(&node.handler, "g1", 0).await;

    let result = node
        .handler
        .add_consumer(FullConsumerId::new("g1", "c1"), ServerId::new("n1"))
        .await;
    assert!(matches!(result, SessionOpResult::Updated(_)), "{result:?}");

    // No settling sleep: the reply already implies the local map was updated.
    let result = node.handler.session_for(SessionId::new("g1")).await;
    assert_eq!(session_len(&result), 1, "{result:?}");
}

#[tokio::test]
async fn test_duplicate_add_is_unchanged_and_not_logged() {
    let log = InMemorySessionLog::new();
    let node = spawn_node("n1", &log).await;
    init_consumer_session(&node.handler, "g1", 2).await;

    let id = FullConsumerId::new("g1", "c1");
    node.handler
        .add_consumer(id.clone(), ServerId::new("n1"))
        .await;
    let records_before = log.len().await;

    let result = node.handler.add_consumer(id, ServerId::new("n1")).await;
    assert!(matches!(result, SessionOpResult::Unchanged(_)), "{result:?}");
    // A rejected or no-op request never reaches the log.
    assert_eq!(log.len().await, records_before);
}

#[tokio::test]
async fn test_session_not_found() {
    let log = InMemorySessionLog::new();
    let node = spawn_node("n1", &log).await;

    let result = node.handler.session_for(SessionId::new("ghost")).await;
    assert!(
        matches!(result, SessionOpResult::SessionNotFound(ref id) if id.as_str() == "ghost"),
        "{result:?}"
    );

    let result = node
        .handler
        .add_consumer(FullConsumerId::new("ghost", "c1"), ServerId::new("n1"))
        .await;
    assert!(
        matches!(result, SessionOpResult::SessionNotFound(_)),
        "{result:?}"
    );
}

#[tokio::test]
async fn test_publish_failure_yields_incomplete_op() {
    let log = InMemorySessionLog::new();
    let node = spawn_node("n1", &log).await;
    init_consumer_session(&node.handler, "g1", 2).await;

    log.set_fail_publishes(true);
    let result = node
        .handler
        .add_consumer(FullConsumerId::new("g1", "c1"), ServerId::new("n1"))
        .await;
    assert!(matches!(result, SessionOpResult::IncompleteOp(_)), "{result:?}");

    // The local map was not mutated.
    log.set_fail_publishes(false);
    let result = node.handler.session_for(SessionId::new("g1")).await;
    assert_eq!(session_len(&result), 0, "{result:?}");
}

#[tokio::test]
async fn test_catch_up_replays_existing_log() {
    let log = InMemorySessionLog::new();

    // Another node's history, written before this node starts.
    let events = [
        SessionEvent::SessionCreated {
            session_id: SessionId::new("g1"),
            kind: SessionKind::Consumer,
            group_id: Some(GroupId::new("g1")),
            max_connections: 5,
        },
        SessionEvent::InstanceAdded {
            session_id: SessionId::new("g1"),
            instance: Instance::consumer(FullConsumerId::new("g1", "c1"), "n-old"),
        },
        SessionEvent::InstanceAdded {
            session_id: SessionId::new("g1"),
            instance: Instance::consumer(FullConsumerId::new("g1", "c2"), "n-old"),
        },
        SessionEvent::InstanceRemoved {
            session_id: SessionId::new("g1"),
            client_id: wsgate::session::FullClientId::Consumer(FullConsumerId::new("g1", "c1")),
        },
    ];
    for (seq, event) in events.into_iter().enumerate() {
        let envelope = EventEnvelope::new("n-old", seq as u64 + 1, event);
        log.publish("g1", codec::encode(&envelope).unwrap())
            .await
            .unwrap();
    }

    let node = spawn_node("n-new", &log).await;
    let result = node.handler.session_for(SessionId::new("g1")).await;
    let session = result.session().expect("session should exist after replay");
    assert_eq!(session.len(), 1);
    assert!(session.contains(&wsgate::session::FullClientId::Consumer(
        FullConsumerId::new("g1", "c2")
    )));
}

#[tokio::test]
async fn test_replay_determinism_across_nodes() {
    let log = InMemorySessionLog::new();
    let writer = spawn_node("n1", &log).await;

    init_consumer_session(&writer.handler, "g1", 3).await;
    let server = ServerId::new("n1");
    for client in ["c1", "c2", "c3"] {
        writer
            .handler
            .add_consumer(FullConsumerId::new("g1", client), server.clone())
            .await;
    }
    writer
        .handler
        .remove_consumer(FullConsumerId::new("g1", "c2"), server)
        .await;

    // Two more nodes fold the same log from scratch.
    let node2 = spawn_node("n2", &log).await;
    let node3 = spawn_node("n3", &log).await;

    let view1 = writer.handler.session_for(SessionId::new("g1")).await;
    let view2 = node2.handler.session_for(SessionId::new("g1")).await;
    let view3 = node3.handler.session_for(SessionId::new("g1")).await;

    let s1 = view1.session().unwrap();
    assert_eq!(Some(s1), view2.session());
    assert_eq!(Some(s1), view3.session());
    assert_eq!(s1.len(), 2);
}

#[tokio::test]
async fn test_cross_node_race_converges_to_quota() {
    let log = InMemorySessionLog::new();
    let node1 = spawn_node("n1", &log).await;
    let node2 = spawn_node("n2", &log).await;
    init_consumer_session(&node1.handler, "g1", 1).await;

    wait_for(|| {
        let handler = node2.handler.clone();
        async move {
            handler
                .session_for(SessionId::new("g1"))
                .await
                .is_success()
        }
    })
    .await;

    // Both nodes accept an add for the single seat at the same time.
    let (r1, r2) = tokio::join!(
        node1
            .handler
            .add_consumer(FullConsumerId::new("g1", "c1"), ServerId::new("n1")),
        node2
            .handler
            .add_consumer(FullConsumerId::new("g1", "c2"), ServerId::new("n2")),
    );

    let updated = [&r1, &r2]
        .iter()
        .filter(|r| matches!(r, SessionOpResult::Updated(_)))
        .count();
    let rejected = [&r1, &r2]
        .iter()
        .filter(|r| matches!(r, SessionOpResult::InstanceLimitReached(_)))
        .count();
    assert_eq!(updated, 1, "exactly one add wins: {r1:?} / {r2:?}");
    assert_eq!(rejected, 1, "exactly one add loses: {r1:?} / {r2:?}");

    // Every node converges to a single registered instance.
    wait_for(|| {
        let h1 = node1.handler.clone();
        let h2 = node2.handler.clone();
        async move {
            let v1 = h1.session_for(SessionId::new("g1")).await;
            let v2 = h2.session_for(SessionId::new("g1")).await;
            session_len(&v1) == 1 && v1.session() == v2.session()
        }
    })
    .await;
}

#[tokio::test]
async fn test_compensation_sweep_after_restart() {
    let log = InMemorySessionLog::new();

    // A log left behind by a crashed cluster: capacity one, but two adds were
    // appended, the second hosted by the node about to start.
    let events = [
        SessionEvent::SessionCreated {
            session_id: SessionId::new("g1"),
            kind: SessionKind::Consumer,
            group_id: Some(GroupId::new("g1")),
            max_connections: 1,
        },
        SessionEvent::InstanceAdded {
            session_id: SessionId::new("g1"),
            instance: Instance::consumer(FullConsumerId::new("g1", "c1"), "n-other"),
        },
        SessionEvent::InstanceAdded {
            session_id: SessionId::new("g1"),
            instance: Instance::consumer(FullConsumerId::new("g1", "c2"), "n-me"),
        },
    ];
    for (seq, event) in events.into_iter().enumerate() {
        let envelope = EventEnvelope::new("n-other", seq as u64 + 1, event);
        log.publish("g1", codec::encode(&envelope).unwrap())
            .await
            .unwrap();
    }

    let mut node = spawn_node("n-me", &log).await;

    // The restarted node notices it hosts the over-quota instance, evicts the
    // socket, and publishes the compensating removal.
    let notice = tokio::time::timeout(Duration::from_secs(5), node.evictions.recv())
        .await
        .expect("expected an eviction notice")
        .unwrap();
    assert_eq!(notice.session_id, SessionId::new("g1"));
    assert_eq!(
        notice.client_id,
        wsgate::session::FullClientId::Consumer(FullConsumerId::new("g1", "c2"))
    );

    wait_for(|| {
        let handler = node.handler.clone();
        async move {
            let view = handler.session_for(SessionId::new("g1")).await;
            view.session().map(|s| {
                s.len() == 1
                    && s.contains(&wsgate::session::FullClientId::Consumer(
                        FullConsumerId::new("g1", "c1"),
                    ))
            }) == Some(true)
        }
    })
    .await;
}

#[tokio::test]
async fn test_periodic_snapshot_emission_and_fold() {
    let log = InMemorySessionLog::new();
    let node1 = spawn_node("n1", &log).await;
    init_consumer_session(&node1.handler, "g1", 0).await;
    let server = ServerId::new("n1");

    // 32 add/remove pairs are 64 incremental events; the 64th triggers the
    // first snapshot, published before the op's reply resolves.
    for round in 0..32 {
        let client = format!("c{round}");
        let added = node1
            .handler
            .add_consumer(FullConsumerId::new("g1", &client), server.clone())
            .await;
        assert!(matches!(added, SessionOpResult::Updated(_)), "{added:?}");
        let removed = node1
            .handler
            .remove_consumer(FullConsumerId::new("g1", &client), server.clone())
            .await;
        assert!(matches!(removed, SessionOpResult::Updated(_)), "{removed:?}");
    }
    assert_eq!(snapshot_count(&log).await, 1);
    // SessionCreated + 64 incremental events + the snapshot
    assert_eq!(log.len().await, 66);

    let added = node1
        .handler
        .add_consumer(FullConsumerId::new("g1", "c-keep"), server.clone())
        .await;
    assert!(matches!(added, SessionOpResult::Updated(_)), "{added:?}");

    // The per-session event counter restarted at the snapshot: another 64
    // incremental events later the second snapshot appears, no earlier.
    for round in 0..32 {
        let client = format!("d{round}");
        node1
            .handler
            .add_consumer(FullConsumerId::new("g1", &client), server.clone())
            .await;
        node1
            .handler
            .remove_consumer(FullConsumerId::new("g1", &client), server.clone())
            .await;
    }
    assert_eq!(snapshot_count(&log).await, 2);

    // A node attaching later folds snapshots plus the incremental tail to
    // the same view the writer holds.
    let node2 = spawn_node("n2", &log).await;
    let view1 = node1.handler.session_for(SessionId::new("g1")).await;
    let view2 = node2.handler.session_for(SessionId::new("g1")).await;
    assert_eq!(view1.session(), view2.session());
    let session = view2.session().unwrap();
    assert_eq!(session.len(), 1);
    assert!(session.contains(&wsgate::session::FullClientId::Consumer(
        FullConsumerId::new("g1", "c-keep")
    )));
}

#[tokio::test]
async fn test_snapshot_replaces_session_on_apply() {
    let log = InMemorySessionLog::new();

    let created = EventEnvelope::new(
        "n-old",
        1,
        SessionEvent::SessionCreated {
            session_id: SessionId::new("g1"),
            kind: SessionKind::Consumer,
            group_id: Some(GroupId::new("g1")),
            max_connections: 3,
        },
    );
    log.publish("g1", codec::encode(&created).unwrap())
        .await
        .unwrap();
    let added = EventEnvelope::new(
        "n-old",
        2,
        SessionEvent::InstanceAdded {
            session_id: SessionId::new("g1"),
            instance: Instance::consumer(FullConsumerId::new("g1", "c1"), "n-old"),
        },
    );
    log.publish("g1", codec::encode(&added).unwrap())
        .await
        .unwrap();

    // A snapshot is a wholesale replacement of the folded state: c1 is gone,
    // c2 is in, regardless of what the incremental prefix said.
    let snapshot = serde_json::json!({
        "serverId": "n-old",
        "seq": 3,
        "tsMs": 1_700_000_000_000i64,
        "type": "snapshot",
        "session": {
            "kind": "consumer",
            "sessionId": "g1",
            "groupId": "g1",
            "maxConnections": 3,
            "instances": [
                {
                    "kind": "consumer",
                    "id": {"groupId": "g1", "clientId": "c2"},
                    "serverId": "n-old"
                }
            ]
        }
    });
    log.publish("g1", snapshot.to_string().into_bytes())
        .await
        .unwrap();

    let node = spawn_node("n-new", &log).await;
    let view = node.handler.session_for(SessionId::new("g1")).await;
    let session = view.session().expect("session should exist after replay");
    assert_eq!(session.len(), 1);
    assert!(session.contains(&wsgate::session::FullClientId::Consumer(
        FullConsumerId::new("g1", "c2")
    )));
    assert!(!session.contains(&wsgate::session::FullClientId::Consumer(
        FullConsumerId::new("g1", "c1")
    )));
    assert_eq!(session.max_connections(), 3);
}

#[tokio::test]
async fn test_shutdown_drains_mailbox() {
    let log = InMemorySessionLog::new();
    let node = spawn_node("n1", &log).await;
    init_consumer_session(&node.handler, "g1", 2).await;

    node.handler.shutdown().await;

    // The actor is gone; further operations fail fast as IncompleteOp.
    let result = node
        .handler
        .add_consumer(FullConsumerId::new("g1", "c1"), ServerId::new("n1"))
        .await;
    assert!(matches!(result, SessionOpResult::IncompleteOp(_)), "{result:?}");

    // A second shutdown is a no-op.
    node.handler.shutdown().await;
}

#[tokio::test]
async fn test_init_session_is_idempotent_across_nodes() {
    let log = InMemorySessionLog::new();
    let node1 = spawn_node("n1", &log).await;
    let node2 = spawn_node("n2", &log).await;

    let (r1, r2) = tokio::join!(
        node1.handler.init_session(
            SessionId::new("g1"),
            SessionKind::Consumer,
            2,
            Some(GroupId::new("g1")),
        ),
        node2.handler.init_session(
            SessionId::new("g1"),
            SessionKind::Consumer,
            2,
            Some(GroupId::new("g1")),
        ),
    );
    assert!(r1.is_success(), "{r1:?}");
    assert!(r2.is_success(), "{r2:?}");

    wait_for(|| {
        let h1 = node1.handler.clone();
        let h2 = node2.handler.clone();
        async move {
            let v1 = h1.session_for(SessionId::new("g1")).await;
            let v2 = h2.session_for(SessionId::new("g1")).await;
            v1.is_success() && v1.session() == v2.session()
        }
    })
    .await;
}
