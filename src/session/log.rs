//! Session-state log transport
//!
//! The session registry replicates through a compacted Kafka topic. This
//! module hides the transport behind [`SessionLog`] so the handler can run
//! against the real topic in production and an in-memory log in tests and
//! embedded setups.

use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::{ProxyConfig, SESSION_LOG_PUBLISH_TIMEOUT_MS};
use crate::error::{Result, WsGateError};
use crate::kafka;

/// One record read back from the session-state log
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub key: String,
    pub payload: Vec<u8>,
}

/// What the log pump feeds into the handler mailbox
#[derive(Debug)]
pub enum LogFeed {
    /// A log record, in log order
    Record(LogRecord),
    /// The pump has replayed up to the high watermark observed at startup
    CaughtUp,
}

/// Transport seam for the session-state log.
///
/// `publish` suspends until the broker acknowledges the write. `spawn_pump`
/// starts a background task that replays the log from the earliest retained
/// record, emits [`LogFeed::CaughtUp`] once the startup tail is reached, and
/// then follows the live tail until the receiver is dropped.
#[async_trait]
pub trait SessionLog: Send + Sync + 'static {
    async fn publish(&self, key: &str, payload: Vec<u8>) -> Result<()>;
    async fn spawn_pump(&self, feed: mpsc::Sender<LogFeed>) -> Result<()>;
}

/// Kafka-backed session log over the compacted session-state topic
pub struct KafkaSessionLog {
    producer: FutureProducer,
    config: Arc<ProxyConfig>,
}

impl KafkaSessionLog {
    /// Create the log client and make sure the compacted topic exists
    pub async fn create(config: Arc<ProxyConfig>) -> Result<Self> {
        kafka::ensure_session_topic(&config).await?;
        let producer = kafka::future_producer(&config)?;
        Ok(Self { producer, config })
    }
}

#[async_trait]
impl SessionLog for KafkaSessionLog {
    async fn publish(&self, key: &str, payload: Vec<u8>) -> Result<()> {
        let topic = &self.config.session_handler.session_state_topic_name;
        let record = FutureRecord::to(topic.as_str())
            .key(key.as_bytes())
            .payload(&payload);
        self.producer
            .send(
                record,
                Timeout::After(Duration::from_millis(SESSION_LOG_PUBLISH_TIMEOUT_MS)),
            )
            .await
            .map_err(|(e, _)| WsGateError::Kafka(e))?;
        Ok(())
    }

    async fn spawn_pump(&self, feed: mpsc::Sender<LogFeed>) -> Result<()> {
        let topic = self.config.session_handler.session_state_topic_name.clone();
        let consumer: StreamConsumer = kafka::session_log_consumer(&self.config)?;
        consumer
            .subscribe(&[topic.as_str()])
            .map_err(WsGateError::Kafka)?;
        let consumer = Arc::new(consumer);

        // The session-state topic has a single partition; its high watermark
        // at startup is the catch-up barrier.
        let watermark_consumer = consumer.clone();
        let watermark_topic = topic.clone();
        let (low, high) = tokio::task::spawn_blocking(move || {
            watermark_consumer.fetch_watermarks(
                &watermark_topic,
                0,
                Duration::from_secs(10),
            )
        })
        .await
        .map_err(|e| WsGateError::Server(format!("watermark fetch task failed: {e}")))?
        .map_err(WsGateError::Kafka)?;

        info!(
            topic = %topic,
            low_watermark = low,
            high_watermark = high,
            "Replaying session-state log"
        );

        tokio::spawn(async move {
            use rdkafka::message::Message;

            let mut caught_up = high <= low;
            if caught_up && feed.send(LogFeed::CaughtUp).await.is_err() {
                return;
            }
            loop {
                match consumer.recv().await {
                    Ok(message) => {
                        let key = message
                            .key()
                            .map(|k| String::from_utf8_lossy(k).into_owned())
                            .unwrap_or_default();
                        let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();
                        let offset = message.offset();
                        if feed
                            .send(LogFeed::Record(LogRecord { key, payload }))
                            .await
                            .is_err()
                        {
                            debug!("Session handler dropped its feed; stopping log pump");
                            return;
                        }
                        if !caught_up && offset + 1 >= high {
                            caught_up = true;
                            if feed.send(LogFeed::CaughtUp).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        // librdkafka reconnects on its own; errors here are
                        // transient and the pump keeps following the tail.
                        warn!(error = %e, "Session-state log read error");
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        });
        Ok(())
    }
}

/// In-memory session log for tests and single-node embedded use.
///
/// Publishes append to a shared vector and fan out to every pump, so several
/// handler instances attached to one `InMemorySessionLog` behave like proxy
/// nodes sharing one Kafka topic.
#[derive(Clone, Default)]
pub struct InMemorySessionLog {
    inner: Arc<Mutex<InMemoryInner>>,
    fail_publishes: Arc<AtomicBool>,
}

#[derive(Default)]
struct InMemoryInner {
    records: Vec<LogRecord>,
    taps: Vec<mpsc::UnboundedSender<LogRecord>>,
}

impl InMemorySessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail, to exercise the IncompleteOp path
    pub fn set_fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Number of records appended so far
    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    /// Copy of the appended records, oldest first
    pub async fn records(&self) -> Vec<LogRecord> {
        self.inner.lock().await.records.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SessionLog for InMemorySessionLog {
    async fn publish(&self, key: &str, payload: Vec<u8>) -> Result<()> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(WsGateError::IncompleteOp(
                "session log publish failed".to_string(),
            ));
        }
        let record = LogRecord {
            key: key.to_string(),
            payload,
        };
        let mut inner = self.inner.lock().await;
        inner.records.push(record.clone());
        inner.taps.retain(|tap| tap.send(record.clone()).is_ok());
        Ok(())
    }

    async fn spawn_pump(&self, feed: mpsc::Sender<LogFeed>) -> Result<()> {
        let (tap_tx, mut tap_rx) = mpsc::unbounded_channel();
        let replay: Vec<LogRecord> = {
            let mut inner = self.inner.lock().await;
            inner.taps.push(tap_tx);
            inner.records.clone()
        };
        tokio::spawn(async move {
            for record in replay {
                if feed.send(LogFeed::Record(record)).await.is_err() {
                    return;
                }
            }
            if feed.send(LogFeed::CaughtUp).await.is_err() {
                return;
            }
            while let Some(record) = tap_rx.recv().await {
                if feed.send(LogFeed::Record(record)).await.is_err() {
                    return;
                }
            }
        });
        Ok(())
    }
}
