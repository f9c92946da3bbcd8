//! Configuration merging utilities
//!
//! Merges configuration file values into CLI arguments, where CLI arguments
//! take precedence. A file value is applied only where the CLI argument still
//! carries its built-in default.

use super::args::ProxyArgs;
use super::defaults::*;
use super::file::ConfigFile;

/// Merge configuration file values with CLI arguments.
/// CLI arguments take precedence over config file values.
pub fn merge_config_with_args(mut args: ProxyArgs, config: &ConfigFile) -> ProxyArgs {
    macro_rules! apply_if_default {
        ($field:ident, $config_val:expr, $default:expr) => {
            if let Some(val) = $config_val {
                if args.$field == $default {
                    args.$field = val;
                }
            }
        };
    }

    macro_rules! apply_if_default_string {
        ($field:ident, $config_val:expr, $default:expr) => {
            if let Some(ref val) = $config_val {
                if args.$field == $default {
                    args.$field = val.clone();
                }
            }
        };
    }

    macro_rules! apply_option {
        ($field:ident, $config_val:expr) => {
            if args.$field.is_none() {
                if let Some(ref val) = $config_val {
                    args.$field = Some(val.clone());
                }
            }
        };
    }

    // Top-level
    apply_if_default_string!(
        kafka_bootstrap_urls,
        config.kafka_bootstrap_urls,
        DEFAULT_KAFKA_BOOTSTRAP_URLS
    );
    apply_option!(schema_registry_url, config.schema_registry_url);
    apply_if_default!(
        auto_register_schemas,
        config.auto_register_schemas,
        false
    );

    // [server]
    apply_option!(server_id, config.server.server_id);
    apply_if_default!(port, config.server.port, DEFAULT_PORT);
    apply_if_default_string!(log_level, config.server.log_level, DEFAULT_LOG_LEVEL);

    // [session-handler]
    apply_if_default_string!(
        session_state_topic_name,
        config.session_handler.session_state_topic_name,
        DEFAULT_SESSION_STATE_TOPIC
    );
    apply_if_default!(
        session_state_replication_factor,
        config.session_handler.session_state_replication_factor,
        DEFAULT_SESSION_STATE_REPLICATION_FACTOR
    );
    apply_if_default!(
        session_state_retention_ms,
        config.session_handler.session_state_retention_ms,
        DEFAULT_SESSION_STATE_RETENTION_MS
    );
    apply_if_default!(
        max_connections_per_session,
        config.session_handler.max_connections_per_session,
        DEFAULT_MAX_CONNECTIONS_PER_SESSION
    );

    // [commit-handler]
    apply_if_default!(
        max_stack_size,
        config.commit_handler.max_stack_size,
        DEFAULT_MAX_STACK_SIZE
    );
    apply_if_default!(
        auto_commit_enabled,
        config.commit_handler.auto_commit_enabled,
        DEFAULT_AUTO_COMMIT_ENABLED
    );
    apply_if_default!(
        auto_commit_interval_ms,
        config.commit_handler.auto_commit_interval_ms,
        DEFAULT_AUTO_COMMIT_INTERVAL_MS
    );
    apply_if_default!(
        auto_commit_max_age_ms,
        config.commit_handler.auto_commit_max_age_ms,
        DEFAULT_AUTO_COMMIT_MAX_AGE_MS
    );

    // [consumer]
    apply_if_default!(
        default_rate_limit,
        config.consumer.default_rate_limit,
        DEFAULT_RATE_LIMIT
    );
    apply_if_default!(
        default_batch_size,
        config.consumer.default_batch_size,
        DEFAULT_BATCH_SIZE
    );

    // [basic-auth]
    apply_if_default!(basic_auth_enabled, config.basic_auth.enabled, false);
    apply_if_default_string!(
        basic_auth_realm,
        config.basic_auth.realm,
        DEFAULT_BASIC_AUTH_REALM
    );
    apply_option!(basic_auth_username, config.basic_auth.username);
    apply_option!(basic_auth_password, config.basic_auth.password);

    // [openid-connect]
    apply_if_default!(oidc_enabled, config.openid_connect.enabled, false);
    apply_option!(oidc_issuer, config.openid_connect.issuer);
    apply_option!(oidc_audience, config.openid_connect.audience);
    apply_if_default!(
        oidc_jwks_refresh_secs,
        config.openid_connect.jwks_refresh_secs,
        DEFAULT_JWKS_REFRESH_SECS
    );

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_file_fills_defaults() {
        let args = ProxyArgs::parse_from(["wsgate"]);
        let mut file = ConfigFile::default();
        file.server.port = Some(9100);
        file.kafka_bootstrap_urls = Some("k:9092".to_string());
        file.basic_auth.username = Some("u".to_string());

        let merged = merge_config_with_args(args, &file);
        assert_eq!(merged.port, 9100);
        assert_eq!(merged.kafka_bootstrap_urls, "k:9092");
        assert_eq!(merged.basic_auth_username.as_deref(), Some("u"));
    }

    #[test]
    fn test_cli_wins_over_file() {
        let args = ProxyArgs::parse_from(["wsgate", "--port", "7777"]);
        let mut file = ConfigFile::default();
        file.server.port = Some(9100);

        let merged = merge_config_with_args(args, &file);
        assert_eq!(merged.port, 7777);
    }
}
