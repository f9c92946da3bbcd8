//! Record frame envelopes
//!
//! Every record crossing a socket travels as an envelope carrying the message
//! id, topic coordinates, headers, and the key/value pair. The envelope is
//! encoded as JSON text frames or Avro binary frames depending on the
//! `socketPayload` parameter. Control frames from the client (acknowledgements)
//! are always JSON text.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::{Result, WsGateError};
use crate::session::{TopicName, WsMessageId};

/// Envelope encoding selected per socket via `socketPayload`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    #[default]
    Json,
    Avro,
}

impl FromStr for PayloadFormat {
    type Err = WsGateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(PayloadFormat::Json),
            "avro" => Ok(PayloadFormat::Avro),
            other => Err(WsGateError::invalid_request(format!(
                "unsupported socketPayload '{other}' (expected json or avro)"
            ))),
        }
    }
}

/// How a record key or value maps to Kafka bytes, selected per socket via
/// `keyType` / `valType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFormat {
    /// UTF-8 text
    String,
    /// JSON document
    #[default]
    Json,
    /// Raw bytes, base64 in the envelope
    Bytes,
}

impl FromStr for DataFormat {
    type Err = WsGateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "string" => Ok(DataFormat::String),
            "json" => Ok(DataFormat::Json),
            "bytes" => Ok(DataFormat::Bytes),
            other => Err(WsGateError::invalid_request(format!(
                "unsupported data format '{other}' (expected string, json or bytes)"
            ))),
        }
    }
}

/// One record envelope, in either direction.
///
/// Outbound (consumer) frames always carry `ws_message_id` and the topic
/// coordinates. Inbound (producer) frames may omit the topic when the socket
/// was opened with a `topic` parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFrame {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ws_message_id: Option<WsMessageId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub topic: Option<TopicName>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub partition: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key: Option<String>,
    pub value: serde_json::Value,
}

/// Acknowledgement sent by a consumer client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckFrame {
    pub ack: WsMessageId,
}

/// An encoded frame, ready for the socket
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Avro rendition of [`RecordFrame`]: identical shape except the value rides
/// as JSON text, so one writer schema covers every `valType`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvroRecordFrame {
    ws_message_id: Option<WsMessageId>,
    topic: Option<String>,
    partition: Option<i32>,
    timestamp: Option<i64>,
    headers: HashMap<String, String>,
    key: Option<String>,
    value: String,
}

const AVRO_FRAME_SCHEMA: &str = r#"
{
  "type": "record",
  "name": "RecordFrame",
  "namespace": "wsgate",
  "fields": [
    {"name": "wsMessageId", "type": ["null", {
      "type": "record",
      "name": "WsMessageId",
      "fields": [
        {"name": "topic", "type": "string"},
        {"name": "partition", "type": "int"},
        {"name": "offset", "type": "long"},
        {"name": "timestamp", "type": "long"}
      ]
    }], "default": null},
    {"name": "topic", "type": ["null", "string"], "default": null},
    {"name": "partition", "type": ["null", "int"], "default": null},
    {"name": "timestamp", "type": ["null", "long"], "default": null},
    {"name": "headers", "type": {"type": "map", "values": "string"}, "default": {}},
    {"name": "key", "type": ["null", "string"], "default": null},
    {"name": "value", "type": "string"}
  ]
}
"#;

fn avro_frame_schema() -> &'static apache_avro::Schema {
    static SCHEMA: OnceLock<apache_avro::Schema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        apache_avro::Schema::parse_str(AVRO_FRAME_SCHEMA)
            .unwrap_or_else(|e| panic!("frame schema is invalid: {e}"))
    })
}

/// Encodes and decodes record envelopes for one socket
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    format: PayloadFormat,
}

impl FrameCodec {
    pub fn new(format: PayloadFormat) -> Self {
        Self { format }
    }

    pub fn encode(&self, frame: &RecordFrame) -> Result<EncodedFrame> {
        match self.format {
            PayloadFormat::Json => Ok(EncodedFrame::Text(serde_json::to_string(frame)?)),
            PayloadFormat::Avro => {
                let avro_frame = AvroRecordFrame {
                    ws_message_id: frame.ws_message_id.clone(),
                    topic: frame.topic.as_ref().map(|t| t.as_str().to_string()),
                    partition: frame.partition,
                    timestamp: frame.timestamp,
                    headers: frame.headers.clone(),
                    key: frame.key.clone(),
                    value: serde_json::to_string(&frame.value)?,
                };
                let schema = avro_frame_schema();
                let value = apache_avro::to_value(&avro_frame)?.resolve(schema)?;
                Ok(EncodedFrame::Binary(apache_avro::to_avro_datum(
                    schema, value,
                )?))
            }
        }
    }

    pub fn decode_text(&self, text: &str) -> Result<RecordFrame> {
        match self.format {
            PayloadFormat::Json => Ok(serde_json::from_str(text)?),
            PayloadFormat::Avro => Err(WsGateError::Codec(
                "expected an Avro binary frame on this socket".to_string(),
            )),
        }
    }

    pub fn decode_binary(&self, data: &[u8]) -> Result<RecordFrame> {
        match self.format {
            PayloadFormat::Json => Ok(serde_json::from_slice(data)?),
            PayloadFormat::Avro => {
                let schema = avro_frame_schema();
                let mut reader = data;
                let value = apache_avro::from_avro_datum(schema, &mut reader, None)?;
                let avro_frame: AvroRecordFrame = apache_avro::from_value(&value)?;
                Ok(RecordFrame {
                    ws_message_id: avro_frame.ws_message_id,
                    topic: avro_frame.topic.map(TopicName::new),
                    partition: avro_frame.partition,
                    timestamp: avro_frame.timestamp,
                    headers: avro_frame.headers,
                    key: avro_frame.key,
                    value: serde_json::from_str(&avro_frame.value)?,
                })
            }
        }
    }
}

/// Map an envelope key to Kafka key bytes. An unspecified key format falls
/// back to raw bytes (base64 in the envelope).
pub fn key_to_bytes(key: &str, format: Option<DataFormat>) -> Result<Vec<u8>> {
    match format {
        Some(DataFormat::String) | Some(DataFormat::Json) => Ok(key.as_bytes().to_vec()),
        Some(DataFormat::Bytes) | None => BASE64
            .decode(key)
            .map_err(|e| WsGateError::Codec(format!("key is not valid base64: {e}"))),
    }
}

/// Map Kafka key bytes to an envelope key
pub fn key_from_bytes(key: &[u8], format: Option<DataFormat>) -> String {
    match format {
        Some(DataFormat::String) | Some(DataFormat::Json) => {
            String::from_utf8_lossy(key).into_owned()
        }
        Some(DataFormat::Bytes) | None => BASE64.encode(key),
    }
}

/// Map an envelope value to Kafka value bytes
pub fn value_to_bytes(value: &serde_json::Value, format: DataFormat) -> Result<Vec<u8>> {
    match format {
        DataFormat::Json => Ok(serde_json::to_vec(value)?),
        DataFormat::String => match value {
            serde_json::Value::String(s) => Ok(s.as_bytes().to_vec()),
            other => Ok(other.to_string().into_bytes()),
        },
        DataFormat::Bytes => match value {
            serde_json::Value::String(s) => BASE64
                .decode(s)
                .map_err(|e| WsGateError::Codec(format!("value is not valid base64: {e}"))),
            _ => Err(WsGateError::Codec(
                "a bytes value must be a base64 string".to_string(),
            )),
        },
    }
}

/// Map Kafka value bytes to an envelope value
pub fn value_from_bytes(value: &[u8], format: DataFormat) -> serde_json::Value {
    match format {
        DataFormat::Json => serde_json::from_slice(value).unwrap_or_else(|_| {
            // Not actually JSON; deliver the raw text rather than dropping
            // the record.
            serde_json::Value::String(String::from_utf8_lossy(value).into_owned())
        }),
        DataFormat::String => serde_json::Value::String(String::from_utf8_lossy(value).into_owned()),
        DataFormat::Bytes => serde_json::Value::String(BASE64.encode(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> RecordFrame {
        let mut headers = HashMap::new();
        headers.insert("origin".to_string(), "n1".to_string());
        RecordFrame {
            ws_message_id: Some(WsMessageId::new("orders", 0, 42, 1_700_000_000_000)),
            topic: Some(TopicName::new("orders")),
            partition: Some(0),
            timestamp: Some(1_700_000_000_000),
            headers,
            key: Some("k1".to_string()),
            value: serde_json::json!({"amount": 12}),
        }
    }

    #[test]
    fn test_json_roundtrip() {
        let codec = FrameCodec::new(PayloadFormat::Json);
        let frame = sample_frame();
        let encoded = codec.encode(&frame).unwrap();
        let EncodedFrame::Text(text) = encoded else {
            panic!("json frames must be text");
        };
        assert_eq!(codec.decode_text(&text).unwrap(), frame);
    }

    #[test]
    fn test_avro_roundtrip() {
        let codec = FrameCodec::new(PayloadFormat::Avro);
        let frame = sample_frame();
        let encoded = codec.encode(&frame).unwrap();
        let EncodedFrame::Binary(data) = encoded else {
            panic!("avro frames must be binary");
        };
        assert_eq!(codec.decode_binary(&data).unwrap(), frame);
    }

    #[test]
    fn test_ack_frame_parses() {
        let text = r#"{"ack":{"topic":"orders","partition":0,"offset":42,"timestamp":1700000000000}}"#;
        let ack: AckFrame = serde_json::from_str(text).unwrap();
        assert_eq!(ack.ack, WsMessageId::new("orders", 0, 42, 1_700_000_000_000));
    }

    #[test]
    fn test_key_negotiation_defaults_to_raw_bytes() {
        let bytes = key_to_bytes(&BASE64.encode(b"\x00\x01"), None).unwrap();
        assert_eq!(bytes, vec![0, 1]);
        assert_eq!(key_from_bytes(&[0, 1], None), BASE64.encode([0, 1]));

        let text = key_to_bytes("plain", Some(DataFormat::String)).unwrap();
        assert_eq!(text, b"plain");
    }

    #[test]
    fn test_value_formats() {
        let json = serde_json::json!({"a": 1});
        assert_eq!(value_to_bytes(&json, DataFormat::Json).unwrap(), b"{\"a\":1}");
        assert_eq!(value_from_bytes(b"{\"a\":1}", DataFormat::Json), json);

        let text = serde_json::Value::String("hi".to_string());
        assert_eq!(value_to_bytes(&text, DataFormat::String).unwrap(), b"hi");
        assert_eq!(
            value_from_bytes(b"not json", DataFormat::Json),
            serde_json::Value::String("not json".to_string())
        );
    }
}
