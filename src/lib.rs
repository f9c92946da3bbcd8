#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # wsgate
//!
//! wsgate is a WebSocket-to-Kafka proxy. External clients open long-lived
//! duplex WebSocket connections and either publish records to Kafka topics
//! (`/socket/in`) or consume records from Kafka topics (`/socket/out`).
//!
//! A cluster of wsgate nodes cooperatively enforces per-client and per-group
//! connection quotas without a central coordinator: every node folds a
//! compacted Kafka topic of session events into an in-memory registry, and
//! the log's total order resolves cross-node races.
//!
//! ## Architecture
//!
//! - [`session`]: the distributed session registry - records, the pure state
//!   machine, the replicated log codec, and the single-writer handler actor
//! - [`commit`]: per-consumer commit stacks reconciling out-of-order client
//!   acknowledgements with Kafka's monotonic offset commits
//! - [`socket`]: the WebSocket endpoints and per-socket lifecycle
//! - [`auth`]: basic and OpenID Connect request authentication
//! - [`kafka`]: rdkafka client builders and topic administration
//! - [`server`]: axum router assembly and graceful shutdown
//! - [`config`]: CLI, environment, and TOML file configuration
//! - [`error`]: error types and the `Result` alias
//!
//! ## Delivery semantics
//!
//! Consumers get at-least-once delivery: offsets are committed when the
//! client acknowledges a record over the socket, when the commit stack
//! overflows, or when an entry exceeds the auto-commit age. A client that
//! disconnects before acknowledging sees the record again.
//!
//! ## Running
//!
//! ```bash
//! # Proxy in front of a local broker, defaults everywhere
//! $ ./wsgate
//!
//! # Explicit node identity and broker list, as in a cluster deployment
//! $ ./wsgate --server-id proxy-1 --kafka-bootstrap-urls kafka-1:9092,kafka-2:9092
//! ```

pub mod auth;
pub mod commit;
pub mod config;
pub mod error;
pub mod kafka;
pub mod server;
pub mod session;
pub mod socket;

pub use config::{ProxyArgs, ProxyConfig};
pub use error::{Result, WsGateError};
pub use server::ProxyServer;
pub use session::{SessionHandler, SessionOpResult};
