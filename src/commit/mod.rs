//! Offset acknowledgement handling for consumer sockets

mod stack;

pub use stack::{CommitEntry, CommitStack, KafkaCommitter, OffsetCommitter};
