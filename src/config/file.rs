//! TOML configuration file support
//!
//! Configuration can be provided via a TOML file in addition to CLI arguments
//! and environment variables. CLI arguments take precedence over file values.
//!
//! ```toml
//! # wsgate.toml
//! kafka-bootstrap-urls = "kafka-1:9092,kafka-2:9092"
//!
//! [server]
//! server-id = "proxy-1"
//! port = 8080
//!
//! [session-handler]
//! session-state-topic-name = "_wsproxy.session.state"
//! session-state-replication-factor = 3
//!
//! [commit-handler]
//! max-stack-size = 1000
//! auto-commit-enabled = true
//!
//! [basic-auth]
//! enabled = true
//! username = "proxy"
//! password = "secret"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, WsGateError};

/// `[server]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerSection {
    pub server_id: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
}

/// `[session-handler]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SessionHandlerSection {
    pub session_state_topic_name: Option<String>,
    pub session_state_replication_factor: Option<i32>,
    pub session_state_retention_ms: Option<u64>,
    pub max_connections_per_session: Option<u32>,
}

/// `[commit-handler]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommitHandlerSection {
    pub max_stack_size: Option<usize>,
    pub auto_commit_enabled: Option<bool>,
    pub auto_commit_interval_ms: Option<u64>,
    pub auto_commit_max_age_ms: Option<u64>,
}

/// `[consumer]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConsumerSection {
    pub default_rate_limit: Option<u32>,
    pub default_batch_size: Option<usize>,
}

/// `[basic-auth]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BasicAuthSection {
    pub enabled: Option<bool>,
    pub realm: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// `[openid-connect]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OpenIdConnectSection {
    pub enabled: Option<bool>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub jwks_refresh_secs: Option<u64>,
}

/// Parsed TOML configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConfigFile {
    pub kafka_bootstrap_urls: Option<String>,
    pub schema_registry_url: Option<String>,
    pub auto_register_schemas: Option<bool>,

    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub session_handler: SessionHandlerSection,
    #[serde(default)]
    pub commit_handler: CommitHandlerSection,
    #[serde(default)]
    pub consumer: ConsumerSection,
    #[serde(default)]
    pub basic_auth: BasicAuthSection,
    #[serde(default)]
    pub openid_connect: OpenIdConnectSection,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&contents).map_err(|e| {
            WsGateError::Config(format!(
                "failed to parse {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Look for a configuration file in the default locations:
    /// 1. ./wsgate.toml
    /// 2. /etc/wsgate/wsgate.toml
    /// 3. ~/.config/wsgate/wsgate.toml
    pub fn load_default() -> Option<Self> {
        let mut candidates = vec![
            PathBuf::from("wsgate.toml"),
            PathBuf::from("/etc/wsgate/wsgate.toml"),
        ];
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("wsgate/wsgate.toml"));
        }
        for path in candidates {
            if path.exists() {
                match Self::load(&path) {
                    Ok(config) => {
                        tracing::debug!(path = %path.display(), "Loaded configuration file");
                        return Some(config);
                    }
                    Err(e) => {
                        eprintln!("Ignoring config file {}: {}", path.display(), e);
                    }
                }
            }
        }
        None
    }

    /// Generate an example configuration file with commented defaults
    pub fn generate_example() -> String {
        r#"# wsgate configuration
# Copy to wsgate.toml and customize as needed.
# CLI arguments and WSGATE_* environment variables take precedence.

kafka-bootstrap-urls = "localhost:9092"
# schema-registry-url = "http://localhost:8081"
# auto-register-schemas = false

[server]
# server-id = "proxy-1"   # random when unset
port = 8080
log-level = "info"

[session-handler]
session-state-topic-name = "_wsproxy.session.state"
session-state-replication-factor = 3
session-state-retention-ms = 2592000000   # 30 days
max-connections-per-session = 1           # 0 = unlimited

[commit-handler]
max-stack-size = 1000
auto-commit-enabled = true
auto-commit-interval-ms = 5000
auto-commit-max-age-ms = 20000

[consumer]
default-rate-limit = 10   # records per second, 0 = unpaced
default-batch-size = 1

[basic-auth]
enabled = false
realm = "wsgate"
# username = "proxy"
# password = "secret"

[openid-connect]
enabled = false
# issuer = "https://auth.example.com/realms/wsgate"
# audience = "wsgate"
jwks-refresh-secs = 300
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_parses() {
        let config: ConfigFile = toml::from_str("").unwrap();
        assert!(config.kafka_bootstrap_urls.is_none());
        assert!(config.server.port.is_none());
    }

    #[test]
    fn test_full_file_parses() {
        let toml_str = r#"
kafka-bootstrap-urls = "k1:9092,k2:9092"

[server]
server-id = "proxy-7"
port = 9000

[session-handler]
session-state-topic-name = "_custom.sessions"
session-state-replication-factor = 1

[commit-handler]
max-stack-size = 64
auto-commit-enabled = false

[basic-auth]
enabled = true
username = "u"
password = "p"
"#;
        let config: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(config.kafka_bootstrap_urls.as_deref(), Some("k1:9092,k2:9092"));
        assert_eq!(config.server.server_id.as_deref(), Some("proxy-7"));
        assert_eq!(config.server.port, Some(9000));
        assert_eq!(
            config.session_handler.session_state_topic_name.as_deref(),
            Some("_custom.sessions")
        );
        assert_eq!(config.commit_handler.max_stack_size, Some(64));
        assert_eq!(config.basic_auth.enabled, Some(true));
    }

    #[test]
    fn test_example_config_parses() {
        let example = ConfigFile::generate_example();
        let config: ConfigFile = toml::from_str(&example).unwrap();
        assert_eq!(config.server.port, Some(8080));
        assert_eq!(config.commit_handler.auto_commit_enabled, Some(true));
    }
}
