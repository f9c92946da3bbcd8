//! Replicated log codec
//!
//! Session changes are serialized as JSON envelopes on a compacted Kafka
//! topic keyed by session id. The encoding is deterministic and forwards
//! compatible: unknown fields are ignored on read, so a newer node can add
//! fields without breaking older readers.

use serde::{Deserialize, Serialize};

use super::types::{FullClientId, GroupId, Instance, Session, SessionId, SessionKind};
use crate::error::Result;

/// One session change, replicated through the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// A session bucket came into existence
    #[serde(rename_all = "camelCase")]
    SessionCreated {
        session_id: SessionId,
        kind: SessionKind,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        group_id: Option<GroupId>,
        max_connections: u32,
    },
    /// A socket registered into the session
    #[serde(rename_all = "camelCase")]
    InstanceAdded {
        session_id: SessionId,
        instance: Instance,
    },
    /// A socket deregistered (or was evicted) from the session
    #[serde(rename_all = "camelCase")]
    InstanceRemoved {
        session_id: SessionId,
        client_id: FullClientId,
    },
    /// The session bucket was dropped entirely
    #[serde(rename_all = "camelCase")]
    SessionRemoved { session_id: SessionId },
    /// Wholesale replacement of a session, emitted as a periodic snapshot
    #[serde(rename_all = "camelCase")]
    Snapshot { session: Session },
}

impl SessionEvent {
    /// The session this event belongs to; also the log key, so compaction
    /// keeps the latest state per session.
    pub fn session_id(&self) -> &SessionId {
        match self {
            SessionEvent::SessionCreated { session_id, .. }
            | SessionEvent::InstanceAdded { session_id, .. }
            | SessionEvent::InstanceRemoved { session_id, .. }
            | SessionEvent::SessionRemoved { session_id } => session_id,
            SessionEvent::Snapshot { session } => session.session_id(),
        }
    }
}

/// Envelope around a [`SessionEvent`]: the emitting node and a per-node
/// monotonic sequence number, carried for observability and read-your-writes
/// matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub server_id: String,
    pub seq: u64,
    pub ts_ms: i64,
    #[serde(flatten)]
    pub event: SessionEvent,
}

impl EventEnvelope {
    pub fn new(server_id: impl Into<String>, seq: u64, event: SessionEvent) -> Self {
        Self {
            server_id: server_id.into(),
            seq,
            ts_ms: chrono::Utc::now().timestamp_millis(),
            event,
        }
    }
}

/// Encode an envelope for the session-state topic
pub fn encode(envelope: &EventEnvelope) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Decode an envelope read from the session-state topic
pub fn decode(payload: &[u8]) -> Result<EventEnvelope> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::{FullConsumerId, FullProducerId};

    fn envelope(event: SessionEvent) -> EventEnvelope {
        EventEnvelope::new("n1", 7, event)
    }

    #[test]
    fn test_roundtrip_session_created() {
        let env = envelope(SessionEvent::SessionCreated {
            session_id: SessionId::new("g1"),
            kind: SessionKind::Consumer,
            group_id: Some(GroupId::new("g1")),
            max_connections: 2,
        });
        let decoded = decode(&encode(&env).unwrap()).unwrap();
        assert_eq!(decoded.event, env.event);
        assert_eq!(decoded.server_id, "n1");
        assert_eq!(decoded.seq, 7);
    }

    #[test]
    fn test_roundtrip_instance_added() {
        let env = envelope(SessionEvent::InstanceAdded {
            session_id: SessionId::new("p1"),
            instance: Instance::producer(FullProducerId::new("p1", Some("i1".into())), "n2"),
        });
        let decoded = decode(&encode(&env).unwrap()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_roundtrip_instance_removed() {
        let env = envelope(SessionEvent::InstanceRemoved {
            session_id: SessionId::new("g1"),
            client_id: FullClientId::Consumer(FullConsumerId::new("g1", "c1")),
        });
        let decoded = decode(&encode(&env).unwrap()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_roundtrip_snapshot() {
        let mut session = Session::consumer("g1", "g1", 3);
        session.force_add_instance(Instance::consumer(FullConsumerId::new("g1", "c1"), "n1"));
        let env = envelope(SessionEvent::Snapshot { session });
        let decoded = decode(&encode(&env).unwrap()).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        // A future node may attach fields this version does not know about.
        let payload = r#"{
            "serverId": "n9",
            "seq": 3,
            "tsMs": 1700000000000,
            "type": "sessionRemoved",
            "sessionId": "g1",
            "futureField": {"nested": true}
        }"#;
        let decoded = decode(payload.as_bytes()).unwrap();
        assert_eq!(
            decoded.event,
            SessionEvent::SessionRemoved {
                session_id: SessionId::new("g1")
            }
        );
    }

    #[test]
    fn test_log_key_is_session_id() {
        let event = SessionEvent::InstanceAdded {
            session_id: SessionId::new("g7"),
            instance: Instance::consumer(FullConsumerId::new("g7", "c1"), "n1"),
        };
        assert_eq!(event.session_id().as_str(), "g7");
    }
}
