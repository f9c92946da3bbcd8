//! Kafka client plumbing
//!
//! Builders for the rdkafka clients the proxy uses: the session-log producer
//! and consumer, the per-socket data producer and consumer, and the admin
//! client that creates the compacted session-state topic at startup.

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::producer::FutureProducer;
use rdkafka::types::RDKafkaErrorCode;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ProxyConfig;
use crate::error::{Result, WsGateError};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

fn base_config(config: &ProxyConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", &config.kafka_bootstrap_urls);
    client_config.set("client.id", &config.server_id);
    client_config
}

/// Producer used for socket payloads and the session-state log. Full acks:
/// a session event answered to a caller must survive broker failover.
pub fn future_producer(config: &ProxyConfig) -> Result<FutureProducer> {
    let mut client_config = base_config(config);
    client_config.set("acks", "all");
    client_config.set("request.timeout.ms", "5000");
    client_config.set("message.timeout.ms", "10000");
    client_config.set("compression.type", "none");
    client_config.create().map_err(WsGateError::Kafka)
}

/// Consumer that replays and tails the session-state log. Every node reads
/// the whole log, so each gets its own single-member group and never commits.
pub fn session_log_consumer(config: &ProxyConfig) -> Result<StreamConsumer> {
    let mut client_config = base_config(config);
    client_config.set(
        "group.id",
        format!("wsgate.session.{}", config.server_id),
    );
    client_config.set("enable.auto.commit", "false");
    client_config.set("auto.offset.reset", "earliest");
    client_config.set("enable.partition.eof", "false");
    client_config.create().map_err(WsGateError::Kafka)
}

/// Consumer backing one consumer socket. Offsets are committed explicitly by
/// the commit stack, never by the client library.
pub fn socket_consumer(
    config: &ProxyConfig,
    group_id: &str,
    client_id: &str,
) -> Result<StreamConsumer> {
    let mut client_config = base_config(config);
    client_config.set("group.id", group_id);
    client_config.set("client.id", format!("{}.{}", config.server_id, client_id));
    client_config.set("enable.auto.commit", "false");
    client_config.set("auto.offset.reset", "earliest");
    client_config.set("enable.partition.eof", "false");
    client_config.create().map_err(WsGateError::Kafka)
}

/// Create the compacted session-state topic if it does not exist.
///
/// Single partition: the log is the cluster's only total order. Compaction
/// keeps the latest record per session id, with the configured delete
/// retention as a fallback.
pub async fn ensure_session_topic(config: &ProxyConfig) -> Result<()> {
    let admin: AdminClient<DefaultClientContext> =
        base_config(config).create().map_err(WsGateError::Kafka)?;

    let topic_name = config.session_handler.session_state_topic_name.clone();
    let retention = config.session_handler.session_state_retention_ms.to_string();
    let new_topic = NewTopic::new(
        &topic_name,
        1,
        TopicReplication::Fixed(config.session_handler.session_state_replication_factor),
    )
    .set("cleanup.policy", "compact,delete")
    .set("retention.ms", &retention);

    let results = admin
        .create_topics(&[new_topic], &AdminOptions::new())
        .await
        .map_err(WsGateError::Kafka)?;

    for result in results {
        match result {
            Ok(name) => {
                info!(topic = %name, "Created session-state topic");
            }
            Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                debug!(topic = %name, "Session-state topic already exists");
            }
            Err((name, code)) => {
                return Err(WsGateError::Server(format!(
                    "failed to create session-state topic {name}: {code}"
                )));
            }
        }
    }
    Ok(())
}

/// Whether a topic exists on the cluster. Socket setup rejects unknown
/// topics before any session state is touched.
pub async fn topic_exists(config: &ProxyConfig, topic: &str) -> Result<bool> {
    let mut client_config = base_config(config);
    // librdkafka insists on a group id even for a metadata-only consumer.
    client_config.set("group.id", format!("wsgate.metadata.{}", config.server_id));
    let consumer: BaseConsumer = client_config.create().map_err(WsGateError::Kafka)?;
    let topic = topic.to_string();
    let metadata = tokio::task::spawn_blocking(move || {
        consumer
            .fetch_metadata(Some(&topic), METADATA_TIMEOUT)
            .map(|metadata| {
                metadata
                    .topics()
                    .iter()
                    .any(|t| t.error().is_none() && !t.partitions().is_empty())
            })
    })
    .await
    .map_err(|e| WsGateError::Server(format!("metadata fetch task failed: {e}")))?;
    metadata.map_err(WsGateError::Kafka)
}
