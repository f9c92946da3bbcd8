//! Query-parameter parsing for the socket endpoints
//!
//! Raw parameters are deserialized as optional strings and validated here so
//! a missing or malformed parameter always produces the standard JSON error
//! body with a 400 status, before any session state is touched.

use serde::Deserialize;

use super::frame::{DataFormat, PayloadFormat};
use crate::config::ProxyConfig;
use crate::error::{Result, WsGateError};
use crate::session::{FullConsumerId, FullProducerId, SessionId, TopicName};

/// Raw query parameters for `/socket/in`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProducerParams {
    pub client_id: Option<String>,
    pub instance_id: Option<String>,
    pub topic: Option<String>,
    pub key_type: Option<String>,
    pub val_type: Option<String>,
    pub socket_payload: Option<String>,
}

/// Raw query parameters for `/socket/out`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConsumerParams {
    pub client_id: Option<String>,
    pub group_id: Option<String>,
    pub topic: Option<String>,
    pub key_type: Option<String>,
    pub val_type: Option<String>,
    pub socket_payload: Option<String>,
    pub rate: Option<String>,
    pub batch_size: Option<String>,
    pub auto_commit: Option<String>,
}

/// Validated parameters for a producer socket
#[derive(Debug, Clone)]
pub struct ProducerParams {
    pub client_id: FullProducerId,
    /// Default topic for frames that do not name one
    pub topic: Option<TopicName>,
    pub key_type: Option<DataFormat>,
    pub val_type: DataFormat,
    pub payload_format: PayloadFormat,
}

impl ProducerParams {
    /// The session bucket this socket registers into
    pub fn session_id(&self) -> SessionId {
        SessionId::new(self.client_id.producer_id.as_str())
    }
}

/// Validated parameters for a consumer socket
#[derive(Debug, Clone)]
pub struct ConsumerParams {
    pub client_id: FullConsumerId,
    pub topic: TopicName,
    pub key_type: Option<DataFormat>,
    pub val_type: DataFormat,
    pub payload_format: PayloadFormat,
    /// Records per second delivered over the socket (0 = unpaced)
    pub rate: u32,
    pub batch_size: usize,
    pub auto_commit: bool,
}

impl ConsumerParams {
    /// The session bucket this socket registers into; for consumers it is the
    /// group id.
    pub fn session_id(&self) -> SessionId {
        SessionId::new(self.client_id.group_id.as_str())
    }
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(WsGateError::invalid_request(format!(
            "missing required query parameter '{name}'"
        ))),
    }
}

fn parse_format(value: Option<String>, name: &str) -> Result<Option<DataFormat>> {
    value
        .map(|v| {
            v.parse::<DataFormat>().map_err(|_| {
                WsGateError::invalid_request(format!("invalid value for '{name}': {v}"))
            })
        })
        .transpose()
}

fn parse_number<T: std::str::FromStr>(value: Option<String>, name: &str, default: T) -> Result<T> {
    match value {
        None => Ok(default),
        Some(v) => v.parse::<T>().map_err(|_| {
            WsGateError::invalid_request(format!("invalid value for '{name}': {v}"))
        }),
    }
}

fn parse_bool(value: Option<String>, name: &str, default: bool) -> Result<bool> {
    match value.as_deref() {
        None => Ok(default),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(v) => Err(WsGateError::invalid_request(format!(
            "invalid value for '{name}': {v}"
        ))),
    }
}

impl RawProducerParams {
    pub fn validate(self) -> Result<ProducerParams> {
        let client_id = required(self.client_id, "clientId")?;
        let payload_format = match self.socket_payload {
            Some(v) => v.parse()?,
            None => PayloadFormat::default(),
        };
        Ok(ProducerParams {
            client_id: FullProducerId::new(client_id, self.instance_id),
            topic: self.topic.map(TopicName::new),
            key_type: parse_format(self.key_type, "keyType")?,
            val_type: parse_format(self.val_type, "valType")?.unwrap_or_default(),
            payload_format,
        })
    }
}

impl RawConsumerParams {
    pub fn validate(self, config: &ProxyConfig) -> Result<ConsumerParams> {
        let client_id = required(self.client_id, "clientId")?;
        let group_id = required(self.group_id, "groupId")?;
        let topic = required(self.topic, "topic")?;
        let payload_format = match self.socket_payload {
            Some(v) => v.parse()?,
            None => PayloadFormat::default(),
        };
        let batch_size = parse_number(
            self.batch_size,
            "batchSize",
            config.consumer.default_batch_size,
        )?;
        if batch_size == 0 {
            return Err(WsGateError::invalid_request("batchSize must be at least 1"));
        }
        Ok(ConsumerParams {
            client_id: FullConsumerId::new(group_id, client_id),
            topic: TopicName::new(topic),
            key_type: parse_format(self.key_type, "keyType")?,
            val_type: parse_format(self.val_type, "valType")?.unwrap_or_default(),
            payload_format,
            rate: parse_number(self.rate, "rate", config.consumer.default_rate_limit)?,
            batch_size,
            auto_commit: parse_bool(
                self.auto_commit,
                "autoCommit",
                config.commit_handler.auto_commit_enabled,
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyArgs;
    use clap::Parser;

    fn config() -> ProxyConfig {
        ProxyConfig::from_args(ProxyArgs::parse_from(["wsgate"])).unwrap()
    }

    #[test]
    fn test_producer_requires_client_id() {
        let err = RawProducerParams::default().validate().unwrap_err();
        assert!(err.to_string().contains("clientId"));
    }

    #[test]
    fn test_producer_defaults() {
        let params = RawProducerParams {
            client_id: Some("p1".to_string()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(params.client_id, FullProducerId::new("p1", None));
        assert!(params.topic.is_none());
        assert_eq!(params.val_type, DataFormat::Json);
        assert_eq!(params.payload_format, PayloadFormat::Json);
        assert_eq!(params.session_id(), SessionId::new("p1"));
    }

    #[test]
    fn test_consumer_requires_group_and_topic() {
        let raw = RawConsumerParams {
            client_id: Some("c1".to_string()),
            ..Default::default()
        };
        let err = raw.validate(&config()).unwrap_err();
        assert!(err.to_string().contains("groupId"));
    }

    #[test]
    fn test_consumer_full_parse() {
        let raw = RawConsumerParams {
            client_id: Some("c1".to_string()),
            group_id: Some("g1".to_string()),
            topic: Some("orders".to_string()),
            key_type: Some("string".to_string()),
            val_type: Some("json".to_string()),
            socket_payload: Some("avro".to_string()),
            rate: Some("50".to_string()),
            batch_size: Some("5".to_string()),
            auto_commit: Some("false".to_string()),
        };
        let params = raw.validate(&config()).unwrap();
        assert_eq!(params.client_id, FullConsumerId::new("g1", "c1"));
        assert_eq!(params.topic, TopicName::new("orders"));
        assert_eq!(params.key_type, Some(DataFormat::String));
        assert_eq!(params.payload_format, PayloadFormat::Avro);
        assert_eq!(params.rate, 50);
        assert_eq!(params.batch_size, 5);
        assert!(!params.auto_commit);
        assert_eq!(params.session_id(), SessionId::new("g1"));
    }

    #[test]
    fn test_consumer_defaults_from_config() {
        let cfg = config();
        let raw = RawConsumerParams {
            client_id: Some("c1".to_string()),
            group_id: Some("g1".to_string()),
            topic: Some("orders".to_string()),
            ..Default::default()
        };
        let params = raw.validate(&cfg).unwrap();
        assert_eq!(params.rate, cfg.consumer.default_rate_limit);
        assert_eq!(params.batch_size, cfg.consumer.default_batch_size);
        assert_eq!(params.auto_commit, cfg.commit_handler.auto_commit_enabled);
    }

    #[test]
    fn test_invalid_rate_rejected() {
        let raw = RawConsumerParams {
            client_id: Some("c1".to_string()),
            group_id: Some("g1".to_string()),
            topic: Some("orders".to_string()),
            rate: Some("fast".to_string()),
            ..Default::default()
        };
        let err = raw.validate(&config()).unwrap_err();
        assert!(err.to_string().contains("rate"));
    }
}
