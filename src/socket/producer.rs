//! Producer socket flow
//!
//! One task per `/socket/in` connection: client frames are decoded to
//! records and produced to Kafka, with the broker acknowledgement awaited per
//! record. A frame that fails to decode or produce is answered with an error
//! frame; the socket stays open.

use axum::extract::ws::{Message, WebSocket};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::FutureRecord;
use rdkafka::util::Timeout;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::frame::{key_to_bytes, value_to_bytes, FrameCodec, RecordFrame};
use super::params::ProducerParams;
use super::ProducerSetup;
use crate::error::{error_body, Result, WsGateError};
use crate::server::AppState;
use crate::session::FullClientId;

const PRODUCE_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) async fn run(mut socket: WebSocket, state: AppState, setup: ProducerSetup) {
    let ProducerSetup {
        params,
        session_id,
        guard,
    } = setup;
    let codec = FrameCodec::new(params.payload_format);

    let mut evictions = state.evictions.subscribe();
    let mut evictions_open = true;
    let mut shutdown = state.shutdown.subscribe();
    let our_id = FullClientId::Producer(params.client_id.clone());

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!(client = %params.client_id, "Closing producer socket for shutdown");
                let _ = socket.send(Message::Close(None)).await;
                break;
            },
            notice = evictions.recv(), if evictions_open => match notice {
                Ok(notice) if notice.client_id == our_id => {
                    info!(client = %params.client_id, session = %session_id, "Closing evicted producer socket");
                    let _ = socket
                        .send(Message::Text(error_body(
                            "connection closed: session connection limit exceeded",
                        )))
                        .await;
                    break;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Eviction notices lagged");
                }
                Err(broadcast::error::RecvError::Closed) => evictions_open = false,
            },
            msg = socket.recv() => {
                let frame = match msg {
                    Some(Ok(Message::Text(text))) => codec.decode_text(&text),
                    Some(Ok(Message::Binary(data))) => codec.decode_binary(&data),
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(client = %params.client_id, "Client closed producer socket");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(client = %params.client_id, error = %e, "Producer socket read failed");
                        break;
                    }
                };
                let outcome = match frame {
                    Ok(frame) => produce_frame(&state, &params, frame).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = outcome {
                    warn!(client = %params.client_id, error = %e, "Failed to produce client frame");
                    if socket
                        .send(Message::Text(error_body(&e.to_string())))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            },
        }
    }

    info!(client = %params.client_id, session = %session_id, "Producer socket closed");
    drop(guard);
}

/// Produce one decoded frame and await the broker acknowledgement
async fn produce_frame(
    state: &AppState,
    params: &ProducerParams,
    frame: RecordFrame,
) -> Result<()> {
    let topic = frame
        .topic
        .clone()
        .or_else(|| params.topic.clone())
        .ok_or_else(|| {
            WsGateError::invalid_request("frame names no topic and the socket has no default")
        })?;

    let value = value_to_bytes(&frame.value, params.val_type)?;
    let key = frame
        .key
        .as_deref()
        .map(|k| key_to_bytes(k, params.key_type))
        .transpose()?;

    let mut record: FutureRecord<'_, Vec<u8>, Vec<u8>> =
        FutureRecord::to(topic.as_str()).payload(&value);
    if let Some(ref key) = key {
        record = record.key(key);
    }
    if let Some(partition) = frame.partition {
        record = record.partition(partition);
    }
    if !frame.headers.is_empty() {
        let mut headers = OwnedHeaders::new();
        for (name, value) in &frame.headers {
            headers = headers.insert(Header {
                key: name,
                value: Some(value),
            });
        }
        record = record.headers(headers);
    }

    let (partition, offset) = state
        .producer
        .send(record, Timeout::After(PRODUCE_TIMEOUT))
        .await
        .map_err(|(e, _)| WsGateError::Kafka(e))?;
    debug!(
        topic = %topic,
        partition,
        offset,
        client = %params.client_id,
        "Produced record from socket"
    );
    Ok(())
}
