//! Default constants for wsgate configuration
//!
//! These constants define the default values used throughout the configuration
//! system when no explicit value is provided.

/// Default HTTP/WebSocket listen port
pub const DEFAULT_PORT: u16 = 8080;

/// Default Kafka bootstrap URLs
pub const DEFAULT_KAFKA_BOOTSTRAP_URLS: &str = "localhost:9092";

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default session-state topic name
pub const DEFAULT_SESSION_STATE_TOPIC: &str = "_wsproxy.session.state";

/// Default session-state topic replication factor
pub const DEFAULT_SESSION_STATE_REPLICATION_FACTOR: i32 = 3;

/// Default session-state delete-retention fallback (30 days, in milliseconds)
pub const DEFAULT_SESSION_STATE_RETENTION_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// Default per-session connection limit (0 disables the limit)
pub const DEFAULT_MAX_CONNECTIONS_PER_SESSION: u32 = 1;

/// Default maximum number of pending entries per commit stack
pub const DEFAULT_MAX_STACK_SIZE: usize = 1000;

/// Default auto-commit enabled state
pub const DEFAULT_AUTO_COMMIT_ENABLED: bool = true;

/// Default auto-commit sweep interval in milliseconds
pub const DEFAULT_AUTO_COMMIT_INTERVAL_MS: u64 = 5_000;

/// Default maximum age of an unacknowledged entry before auto-commit, in milliseconds
pub const DEFAULT_AUTO_COMMIT_MAX_AGE_MS: u64 = 20_000;

/// Default consumer delivery rate limit in records per second (0 = unpaced)
pub const DEFAULT_RATE_LIMIT: u32 = 10;

/// Default consumer delivery batch size
pub const DEFAULT_BATCH_SIZE: usize = 1;

/// Default basic-auth realm
pub const DEFAULT_BASIC_AUTH_REALM: &str = "wsgate";

/// Default JWKS refresh interval in seconds
pub const DEFAULT_JWKS_REFRESH_SECS: u64 = 300;

/// Session handler RPC timeout
pub const SESSION_RPC_TIMEOUT_MS: u64 = 3_000;

/// Session log publish timeout
pub const SESSION_LOG_PUBLISH_TIMEOUT_MS: u64 = 5_000;
