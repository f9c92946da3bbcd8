//! Command-line arguments for the wsgate proxy
//!
//! This module defines the CLI arguments structure using clap.

use clap::Parser;
use std::path::PathBuf;

use super::defaults::*;

/// Command-line arguments for the wsgate proxy
#[derive(Parser, Debug, Clone)]
#[command(name = "wsgate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "WebSocket-to-Kafka proxy with a log-replicated session registry")]
pub struct ProxyArgs {
    /// Path to configuration file (TOML format).
    /// If not specified, looks for wsgate.toml in the current directory,
    /// /etc/wsgate/, or ~/.config/wsgate/
    #[arg(short, long, env = "WSGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Generate example configuration file and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Identity of this proxy node within the cluster.
    /// Generated randomly when unset; set it explicitly in production so
    /// a restarted node keeps ownership of its session instances.
    #[arg(long, env = "WSGATE_SERVER_ID")]
    pub server_id: Option<String>,

    /// Port to listen on for HTTP and WebSocket traffic
    #[arg(long, env = "WSGATE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Kafka bootstrap URLs (comma-separated host:port pairs)
    #[arg(long, env = "WSGATE_KAFKA_BOOTSTRAP_URLS", default_value = DEFAULT_KAFKA_BOOTSTRAP_URLS)]
    pub kafka_bootstrap_urls: String,

    /// Schema registry URL (informational; schemas are not registered unless
    /// auto-register-schemas is set)
    #[arg(long, env = "WSGATE_SCHEMA_REGISTRY_URL")]
    pub schema_registry_url: Option<String>,

    /// Automatically register Avro schemas with the schema registry
    #[arg(long, env = "WSGATE_AUTO_REGISTER_SCHEMAS", default_value_t = false)]
    pub auto_register_schemas: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "WSGATE_LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Name of the compacted session-state topic
    #[arg(long, env = "WSGATE_SESSION_STATE_TOPIC", default_value = DEFAULT_SESSION_STATE_TOPIC)]
    pub session_state_topic_name: String,

    /// Replication factor for the session-state topic
    #[arg(long, env = "WSGATE_SESSION_STATE_REPLICATION_FACTOR", default_value_t = DEFAULT_SESSION_STATE_REPLICATION_FACTOR)]
    pub session_state_replication_factor: i32,

    /// Delete-retention fallback for the session-state topic in milliseconds
    #[arg(long, env = "WSGATE_SESSION_STATE_RETENTION_MS", default_value_t = DEFAULT_SESSION_STATE_RETENTION_MS)]
    pub session_state_retention_ms: u64,

    /// Connection limit applied to newly created sessions (0 = unlimited)
    #[arg(long, env = "WSGATE_MAX_CONNECTIONS_PER_SESSION", default_value_t = DEFAULT_MAX_CONNECTIONS_PER_SESSION)]
    pub max_connections_per_session: u32,

    /// Maximum number of pending entries per commit stack
    #[arg(long, env = "WSGATE_MAX_STACK_SIZE", default_value_t = DEFAULT_MAX_STACK_SIZE)]
    pub max_stack_size: usize,

    /// Enable periodic age-based auto-commit of unacknowledged offsets
    #[arg(long, env = "WSGATE_AUTO_COMMIT_ENABLED", default_value_t = DEFAULT_AUTO_COMMIT_ENABLED)]
    pub auto_commit_enabled: bool,

    /// Auto-commit sweep interval in milliseconds
    #[arg(long, env = "WSGATE_AUTO_COMMIT_INTERVAL_MS", default_value_t = DEFAULT_AUTO_COMMIT_INTERVAL_MS)]
    pub auto_commit_interval_ms: u64,

    /// Maximum age of an unacknowledged entry before it is auto-committed, in milliseconds
    #[arg(long, env = "WSGATE_AUTO_COMMIT_MAX_AGE_MS", default_value_t = DEFAULT_AUTO_COMMIT_MAX_AGE_MS)]
    pub auto_commit_max_age_ms: u64,

    /// Default consumer delivery rate limit in records per second (0 = unpaced)
    #[arg(long, env = "WSGATE_DEFAULT_RATE_LIMIT", default_value_t = DEFAULT_RATE_LIMIT)]
    pub default_rate_limit: u32,

    /// Default consumer delivery batch size
    #[arg(long, env = "WSGATE_DEFAULT_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub default_batch_size: usize,

    /// Enable HTTP basic authentication
    #[arg(long, env = "WSGATE_BASIC_AUTH_ENABLED", default_value_t = false)]
    pub basic_auth_enabled: bool,

    /// Basic authentication realm
    #[arg(long, env = "WSGATE_BASIC_AUTH_REALM", default_value = DEFAULT_BASIC_AUTH_REALM)]
    pub basic_auth_realm: String,

    /// Basic authentication username
    #[arg(long, env = "WSGATE_BASIC_AUTH_USERNAME")]
    pub basic_auth_username: Option<String>,

    /// Basic authentication password
    #[arg(long, env = "WSGATE_BASIC_AUTH_PASSWORD")]
    pub basic_auth_password: Option<String>,

    /// Enable OpenID Connect bearer-token authentication
    #[arg(long, env = "WSGATE_OIDC_ENABLED", default_value_t = false)]
    pub oidc_enabled: bool,

    /// OpenID Connect issuer URL (realm)
    #[arg(long, env = "WSGATE_OIDC_ISSUER")]
    pub oidc_issuer: Option<String>,

    /// Expected audience claim for OpenID Connect tokens
    #[arg(long, env = "WSGATE_OIDC_AUDIENCE")]
    pub oidc_audience: Option<String>,

    /// JWKS refresh interval in seconds
    #[arg(long, env = "WSGATE_OIDC_JWKS_REFRESH_SECS", default_value_t = DEFAULT_JWKS_REFRESH_SECS)]
    pub oidc_jwks_refresh_secs: u64,
}
