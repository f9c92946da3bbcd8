//! Distributed session registry
//!
//! This module is the proxy's core: a cluster-wide view of which sockets are
//! open for which session, replicated through a compacted Kafka topic.
//!
//! - `types` - session records and identifier newtypes
//! - `state` - the pure session state machine
//! - `codec` - the replicated log event encoding
//! - `log` - the log transport (Kafka or in-memory)
//! - `handler` - the single-writer registry actor

pub mod codec;
pub mod handler;
pub mod log;
pub mod state;
pub mod types;

pub use codec::{EventEnvelope, SessionEvent};
pub use handler::{EvictionNotice, SessionHandler};
pub use log::{InMemorySessionLog, KafkaSessionLog, SessionLog};
pub use state::SessionOpResult;
pub use types::{
    ClientId, FullClientId, FullConsumerId, FullProducerId, GroupId, Instance, ProducerId,
    ServerId, Session, SessionId, SessionKind, TopicName, WsMessageId,
};
