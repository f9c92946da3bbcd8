//! Configuration module for wsgate
//!
//! This module is organized into submodules:
//! - `defaults` - Default constants and values
//! - `args` - CLI argument definitions
//! - `file` - TOML configuration file support
//! - `merge` - CLI / file merging

mod args;
mod defaults;
pub mod file;
mod merge;

pub use args::ProxyArgs;
pub use defaults::*;
pub use file::ConfigFile;
pub use merge::merge_config_with_args;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, WsGateError};

/// Session registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHandlerConfig {
    /// Name of the compacted session-state topic
    pub session_state_topic_name: String,
    /// Replication factor for the session-state topic
    pub session_state_replication_factor: i32,
    /// Delete-retention fallback in milliseconds
    pub session_state_retention_ms: u64,
    /// Connection limit applied to newly created sessions (0 = unlimited)
    pub max_connections_per_session: u32,
}

/// Commit stack settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitHandlerConfig {
    /// Maximum number of pending entries per commit stack
    pub max_stack_size: usize,
    /// Whether the periodic age-based sweep runs
    pub auto_commit_enabled: bool,
    /// Sweep interval in milliseconds
    pub auto_commit_interval_ms: u64,
    /// Maximum age of an unacknowledged entry in milliseconds
    pub auto_commit_max_age_ms: u64,
}

impl CommitHandlerConfig {
    pub fn auto_commit_interval(&self) -> Duration {
        Duration::from_millis(self.auto_commit_interval_ms)
    }

    pub fn auto_commit_max_age(&self) -> Duration {
        Duration::from_millis(self.auto_commit_max_age_ms)
    }
}

/// Per-consumer delivery defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Records per second delivered to one socket (0 = unpaced)
    pub default_rate_limit: u32,
    /// Records per delivery batch
    pub default_batch_size: usize,
}

/// Basic authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuthConfig {
    pub enabled: bool,
    pub realm: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// OpenID Connect settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenIdConnectConfig {
    pub enabled: bool,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub jwks_refresh_secs: u64,
}

/// Complete proxy configuration.
///
/// One `ProxyConfig` value is constructed at startup from CLI arguments,
/// environment variables, and an optional TOML file, then threaded through
/// constructors. It is read-only after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Identity of this proxy node
    pub server_id: String,
    /// HTTP/WebSocket listen port
    pub port: u16,
    /// Kafka bootstrap URLs
    pub kafka_bootstrap_urls: String,
    /// Schema registry URL, if any
    pub schema_registry_url: Option<String>,
    /// Register Avro schemas automatically
    pub auto_register_schemas: bool,
    /// Log level used when RUST_LOG is not set
    pub log_level: String,

    pub session_handler: SessionHandlerConfig,
    pub commit_handler: CommitHandlerConfig,
    pub consumer: ConsumerConfig,
    pub basic_auth: BasicAuthConfig,
    pub openid_connect: OpenIdConnectConfig,
}

impl ProxyConfig {
    /// Build the configuration from parsed (and merged) CLI arguments
    pub fn from_args(args: ProxyArgs) -> Result<Self> {
        let server_id = args
            .server_id
            .unwrap_or_else(|| format!("wsgate-{}", uuid::Uuid::new_v4()));

        let config = Self {
            server_id,
            port: args.port,
            kafka_bootstrap_urls: args.kafka_bootstrap_urls,
            schema_registry_url: args.schema_registry_url,
            auto_register_schemas: args.auto_register_schemas,
            log_level: args.log_level,
            session_handler: SessionHandlerConfig {
                session_state_topic_name: args.session_state_topic_name,
                session_state_replication_factor: args.session_state_replication_factor,
                session_state_retention_ms: args.session_state_retention_ms,
                max_connections_per_session: args.max_connections_per_session,
            },
            commit_handler: CommitHandlerConfig {
                max_stack_size: args.max_stack_size,
                auto_commit_enabled: args.auto_commit_enabled,
                auto_commit_interval_ms: args.auto_commit_interval_ms,
                auto_commit_max_age_ms: args.auto_commit_max_age_ms,
            },
            consumer: ConsumerConfig {
                default_rate_limit: args.default_rate_limit,
                default_batch_size: args.default_batch_size,
            },
            basic_auth: BasicAuthConfig {
                enabled: args.basic_auth_enabled,
                realm: args.basic_auth_realm,
                username: args.basic_auth_username,
                password: args.basic_auth_password,
            },
            openid_connect: OpenIdConnectConfig {
                enabled: args.oidc_enabled,
                issuer: args.oidc_issuer,
                audience: args.oidc_audience,
                jwks_refresh_secs: args.oidc_jwks_refresh_secs,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.kafka_bootstrap_urls.trim().is_empty() {
            return Err(WsGateError::config_msg("kafka-bootstrap-urls is empty"));
        }
        if self.session_handler.session_state_topic_name.trim().is_empty() {
            return Err(WsGateError::config_msg(
                "session-handler.session-state-topic-name is empty",
            ));
        }
        if self.session_handler.session_state_replication_factor < 1 {
            return Err(WsGateError::config_msg(
                "session-handler.session-state-replication-factor must be at least 1",
            ));
        }
        if self.commit_handler.max_stack_size == 0 {
            return Err(WsGateError::config_msg(
                "commit-handler.max-stack-size must be at least 1",
            ));
        }
        if self.basic_auth.enabled && self.openid_connect.enabled {
            return Err(WsGateError::config_msg(
                "basic-auth and openid-connect cannot both be enabled",
            ));
        }
        if self.basic_auth.enabled
            && (self.basic_auth.username.is_none() || self.basic_auth.password.is_none())
        {
            return Err(WsGateError::config_msg(
                "basic-auth requires username and password",
            ));
        }
        if self.openid_connect.enabled && self.openid_connect.issuer.is_none() {
            return Err(WsGateError::config_msg("openid-connect requires an issuer"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn default_config() -> ProxyConfig {
        ProxyConfig::from_args(ProxyArgs::parse_from(["wsgate"])).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = default_config();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(
            config.session_handler.session_state_topic_name,
            "_wsproxy.session.state"
        );
        assert_eq!(config.session_handler.max_connections_per_session, 1);
        assert_eq!(config.commit_handler.max_stack_size, 1000);
        assert!(config.commit_handler.auto_commit_enabled);
        assert!(config.server_id.starts_with("wsgate-"));
    }

    #[test]
    fn test_both_auth_modes_rejected() {
        let args = ProxyArgs::parse_from([
            "wsgate",
            "--basic-auth-enabled",
            "--basic-auth-username",
            "u",
            "--basic-auth-password",
            "p",
            "--oidc-enabled",
            "--oidc-issuer",
            "https://auth.example.com",
        ]);
        assert!(ProxyConfig::from_args(args).is_err());
    }

    #[test]
    fn test_basic_auth_requires_credentials() {
        let args = ProxyArgs::parse_from(["wsgate", "--basic-auth-enabled"]);
        assert!(ProxyConfig::from_args(args).is_err());
    }
}
