//! Commit stack
//!
//! The WebSocket protocol lets a client acknowledge delivered records in any
//! order, while the Kafka commit API wants per-partition monotonically
//! non-decreasing offsets. Each consumer socket owns one [`CommitStack`] that
//! buffers delivered-but-unacknowledged records in delivery order and
//! reconciles the two: acknowledging a record commits its offset and
//! tombstones every older entry on the same partition, since a Kafka commit
//! of offset O implicitly covers all offsets below O.

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{Offset, TopicPartitionList};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::Result;
use crate::session::{TopicName, WsMessageId};

/// Seam for committing consumer offsets. The value committed is the
/// next-to-read offset, per Kafka convention.
#[async_trait]
pub trait OffsetCommitter: Send + Sync {
    async fn commit(&self, topic: &TopicName, partition: i32, next_offset: i64) -> Result<()>;
}

/// Commits offsets through a live Kafka consumer
pub struct KafkaCommitter {
    consumer: Arc<StreamConsumer>,
}

impl KafkaCommitter {
    pub fn new(consumer: Arc<StreamConsumer>) -> Self {
        Self { consumer }
    }
}

#[async_trait]
impl OffsetCommitter for KafkaCommitter {
    async fn commit(&self, topic: &TopicName, partition: i32, next_offset: i64) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic.as_str(), partition, Offset::Offset(next_offset))?;
        self.consumer.commit(&tpl, CommitMode::Async)?;
        Ok(())
    }
}

/// One delivered-but-unacknowledged record
#[derive(Debug, Clone)]
pub struct CommitEntry {
    pub ws_id: WsMessageId,
    pub committable: bool,
    pub enqueued_at: Instant,
}

/// Ordered buffer of pending offset acknowledgements for one consumer socket.
///
/// Entries are kept in delivery order and bounded by `max_size`; when full,
/// the oldest entry is force-committed and evicted. For each partition the
/// committed offsets are monotonically non-decreasing.
pub struct CommitStack {
    committer: Arc<dyn OffsetCommitter>,
    entries: VecDeque<CommitEntry>,
    max_size: usize,
    /// Highest next-to-read offset committed per (topic, partition)
    committed_high: HashMap<(TopicName, i32), i64>,
}

impl CommitStack {
    pub fn new(committer: Arc<dyn OffsetCommitter>, max_size: usize) -> Self {
        Self {
            committer,
            entries: VecDeque::new(),
            max_size: max_size.max(1),
            committed_high: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a delivery. When the stack is full the oldest entry is
    /// force-committed first so redelivery windows stay bounded.
    pub async fn push(&mut self, ws_id: WsMessageId) -> Result<()> {
        if self.entries.len() >= self.max_size {
            if let Some(oldest) = self.entries.front().cloned() {
                debug!(ws_id = %oldest.ws_id, "Commit stack full; force-committing oldest entry");
                self.commit_covered(&oldest.ws_id).await?;
            }
        }
        self.entries.push_back(CommitEntry {
            ws_id,
            committable: true,
            enqueued_at: Instant::now(),
        });
        Ok(())
    }

    /// Acknowledge one delivered record by its message id. Commits the
    /// record's offset and evicts every entry on the same partition at or
    /// below it without committing those twice. Returns false when no entry
    /// matches, which happens when an earlier commit already covered it.
    pub async fn acknowledge(&mut self, ws_id: &WsMessageId) -> Result<bool> {
        let found = self
            .entries
            .iter()
            .any(|entry| entry.committable && entry.ws_id == *ws_id);
        if !found {
            debug!(ws_id = %ws_id, "Acknowledgement for unknown or already-covered entry");
            return Ok(false);
        }
        self.commit_covered(ws_id).await?;
        Ok(true)
    }

    /// Commit every entry older than `max_age`, oldest first per partition.
    /// Bounds the at-least-once redelivery window on silent clients. Returns
    /// the number of entries retired.
    pub async fn sweep(&mut self, max_age: Duration) -> Result<usize> {
        let now = Instant::now();
        let before = self.entries.len();

        // Per partition the max aged offset covers all older aged entries.
        let mut aged: HashMap<(TopicName, i32), WsMessageId> = HashMap::new();
        for entry in &self.entries {
            if !entry.committable || now.duration_since(entry.enqueued_at) < max_age {
                continue;
            }
            let key = (entry.ws_id.topic.clone(), entry.ws_id.partition);
            match aged.get(&key) {
                Some(existing) if existing.offset >= entry.ws_id.offset => {}
                _ => {
                    aged.insert(key, entry.ws_id.clone());
                }
            }
        }
        for ws_id in aged.into_values() {
            self.commit_covered(&ws_id).await?;
        }
        Ok(before - self.entries.len())
    }

    /// Commit everything still committable and drop the buffer. Called when
    /// the socket closes on any path.
    pub async fn close(mut self) -> Result<()> {
        let mut highest: HashMap<(TopicName, i32), WsMessageId> = HashMap::new();
        for entry in &self.entries {
            if !entry.committable {
                continue;
            }
            let key = (entry.ws_id.topic.clone(), entry.ws_id.partition);
            match highest.get(&key) {
                Some(existing) if existing.offset >= entry.ws_id.offset => {}
                _ => {
                    highest.insert(key, entry.ws_id.clone());
                }
            }
        }
        for ws_id in highest.into_values() {
            self.commit_covered(&ws_id).await?;
        }
        self.entries.clear();
        Ok(())
    }

    /// Commit `ws_id`'s offset (as next-to-read) and tombstone every entry on
    /// the same partition it covers. The per-partition high watermark keeps
    /// the committed sequence non-decreasing even when acknowledgements
    /// arrive out of order.
    async fn commit_covered(&mut self, ws_id: &WsMessageId) -> Result<()> {
        let key = (ws_id.topic.clone(), ws_id.partition);
        let next = ws_id.offset + 1;
        let already = self.committed_high.get(&key).copied().unwrap_or(-1);
        if next > already {
            self.committer
                .commit(&ws_id.topic, ws_id.partition, next)
                .await?;
            self.committed_high.insert(key, next);
        }
        for entry in &mut self.entries {
            if entry.ws_id.topic == ws_id.topic
                && entry.ws_id.partition == ws_id.partition
                && entry.ws_id.offset <= ws_id.offset
            {
                entry.committable = false;
            }
        }
        self.entries.retain(|entry| entry.committable);
        Ok(())
    }
}

impl Drop for CommitStack {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            warn!(
                pending = self.entries.len(),
                "Commit stack dropped with pending entries; they will be redelivered"
            );
        }
    }
}
