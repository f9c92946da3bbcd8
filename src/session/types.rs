//! Session data structures
//!
//! Sessions are the unit of connection quota: a bucket of socket registrations
//! sharing one session id. For consumers the session id equals the consumer
//! group id; for producers it equals the producer id. Each live socket is
//! represented by an [`Instance`] tagged with the proxy node hosting it.
//!
//! All identifier types are opaque-string newtypes so a group id can never be
//! passed where a client id is expected.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(
    /// Identity of one proxy node
    ServerId
);
id_newtype!(
    /// Identity of a session bucket (consumer group id or producer id)
    SessionId
);
id_newtype!(
    /// Consumer group id
    GroupId
);
id_newtype!(
    /// Per-client id within a consumer group
    ClientId
);
id_newtype!(
    /// Producer id
    ProducerId
);
id_newtype!(
    /// Kafka topic name
    TopicName
);

/// Globally unique identifier of a consumer socket
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullConsumerId {
    pub group_id: GroupId,
    pub client_id: ClientId,
}

impl FullConsumerId {
    pub fn new(group_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            group_id: GroupId::new(group_id),
            client_id: ClientId::new(client_id),
        }
    }
}

impl fmt::Display for FullConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group_id, self.client_id)
    }
}

/// Globally unique identifier of a producer socket
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullProducerId {
    pub producer_id: ProducerId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub instance_id: Option<String>,
}

impl FullProducerId {
    pub fn new(producer_id: impl Into<String>, instance_id: Option<String>) -> Self {
        Self {
            producer_id: ProducerId::new(producer_id),
            instance_id,
        }
    }
}

impl fmt::Display for FullProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance_id {
            Some(instance) => write!(f, "{}/{}", self.producer_id, instance),
            None => f.write_str(self.producer_id.as_str()),
        }
    }
}

/// Globally unique identifier of any socket, consumer or producer
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FullClientId {
    Consumer(FullConsumerId),
    Producer(FullProducerId),
}

impl fmt::Display for FullClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FullClientId::Consumer(id) => id.fmt(f),
            FullClientId::Producer(id) => id.fmt(f),
        }
    }
}

/// One live socket's registration inside a session, tagged with the hosting node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Instance {
    #[serde(rename_all = "camelCase")]
    Consumer {
        id: FullConsumerId,
        server_id: ServerId,
    },
    #[serde(rename_all = "camelCase")]
    Producer {
        id: FullProducerId,
        server_id: ServerId,
    },
}

impl Instance {
    pub fn consumer(id: FullConsumerId, server_id: impl Into<String>) -> Self {
        Instance::Consumer {
            id,
            server_id: ServerId::new(server_id),
        }
    }

    pub fn producer(id: FullProducerId, server_id: impl Into<String>) -> Self {
        Instance::Producer {
            id,
            server_id: ServerId::new(server_id),
        }
    }

    /// The node currently hosting this socket
    pub fn server_id(&self) -> &ServerId {
        match self {
            Instance::Consumer { server_id, .. } => server_id,
            Instance::Producer { server_id, .. } => server_id,
        }
    }

    /// The socket's globally unique client id, which keys the instance set
    pub fn full_client_id(&self) -> FullClientId {
        match self {
            Instance::Consumer { id, .. } => FullClientId::Consumer(id.clone()),
            Instance::Producer { id, .. } => FullClientId::Producer(id.clone()),
        }
    }

    /// Whether this instance matches the session kind
    pub fn matches_kind(&self, kind: SessionKind) -> bool {
        matches!(
            (self, kind),
            (Instance::Consumer { .. }, SessionKind::Consumer)
                | (Instance::Producer { .. }, SessionKind::Producer)
        )
    }
}

/// Whether a session buckets consumer or producer sockets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionKind {
    Consumer,
    Producer,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Consumer => f.write_str("consumer"),
            SessionKind::Producer => f.write_str("producer"),
        }
    }
}

/// Serialize the instance map as a plain list; the key is derived from each
/// instance on deserialize. JSON map keys must be strings, and the instance
/// already carries its own id.
mod instance_map_serde {
    use super::*;

    pub fn serialize<S>(
        map: &BTreeMap<FullClientId, Instance>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(map.values())
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<BTreeMap<FullClientId, Instance>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let instances: Vec<Instance> = Vec::deserialize(deserializer)?;
        Ok(instances
            .into_iter()
            .map(|inst| (inst.full_client_id(), inst))
            .collect())
    }
}

/// A bucket of socket connections sharing one session id; the unit of quota.
///
/// `max_connections` bounds the instance set when greater than zero; zero
/// disables the limit. The session id and limit are immutable after creation.
/// The instance map is keyed by client id, so duplicate adds are no-ops, and
/// ordered, so log replay folds to the same map on every node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Session {
    #[serde(rename_all = "camelCase")]
    Consumer {
        session_id: SessionId,
        group_id: GroupId,
        max_connections: u32,
        #[serde(with = "instance_map_serde")]
        instances: BTreeMap<FullClientId, Instance>,
    },
    #[serde(rename_all = "camelCase")]
    Producer {
        session_id: SessionId,
        max_connections: u32,
        #[serde(with = "instance_map_serde")]
        instances: BTreeMap<FullClientId, Instance>,
    },
}

impl Session {
    /// Create an empty consumer session
    pub fn consumer(
        session_id: impl Into<String>,
        group_id: impl Into<String>,
        max_connections: u32,
    ) -> Self {
        Session::Consumer {
            session_id: SessionId::new(session_id),
            group_id: GroupId::new(group_id),
            max_connections,
            instances: BTreeMap::new(),
        }
    }

    /// Create an empty producer session
    pub fn producer(session_id: impl Into<String>, max_connections: u32) -> Self {
        Session::Producer {
            session_id: SessionId::new(session_id),
            max_connections,
            instances: BTreeMap::new(),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        match self {
            Session::Consumer { session_id, .. } => session_id,
            Session::Producer { session_id, .. } => session_id,
        }
    }

    pub fn kind(&self) -> SessionKind {
        match self {
            Session::Consumer { .. } => SessionKind::Consumer,
            Session::Producer { .. } => SessionKind::Producer,
        }
    }

    pub fn max_connections(&self) -> u32 {
        match self {
            Session::Consumer {
                max_connections, ..
            } => *max_connections,
            Session::Producer {
                max_connections, ..
            } => *max_connections,
        }
    }

    pub fn instances(&self) -> &BTreeMap<FullClientId, Instance> {
        match self {
            Session::Consumer { instances, .. } => instances,
            Session::Producer { instances, .. } => instances,
        }
    }

    pub(crate) fn instances_mut(&mut self) -> &mut BTreeMap<FullClientId, Instance> {
        match self {
            Session::Consumer { instances, .. } => instances,
            Session::Producer { instances, .. } => instances,
        }
    }

    /// Number of registered instances
    pub fn len(&self) -> usize {
        self.instances().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances().is_empty()
    }

    pub fn contains(&self, id: &FullClientId) -> bool {
        self.instances().contains_key(id)
    }
}

/// Identity of one record delivered over a socket: topic coordinates plus the
/// broker timestamp, echoed back by the client on acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsMessageId {
    pub topic: TopicName,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: i64,
}

impl WsMessageId {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, timestamp: i64) -> Self {
        Self {
            topic: TopicName::new(topic),
            partition,
            offset,
            timestamp,
        }
    }
}

impl fmt::Display for WsMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}",
            self.topic, self.partition, self.offset
        )
    }
}
