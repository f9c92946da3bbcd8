//! Consumer socket flow
//!
//! One task per `/socket/out` connection. A pump task reads from Kafka into a
//! bounded channel sized to the delivery batch, so peer backpressure on the
//! WebSocket propagates upstream and stops the consumer polling. The socket
//! task paces delivery by the `rate` parameter, pushes every delivered record
//! onto the commit stack, and applies client acknowledgements and the
//! periodic auto-commit sweep.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use rdkafka::consumer::{Consumer, StreamConsumer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::frame::{
    key_from_bytes, value_from_bytes, AckFrame, EncodedFrame, FrameCodec, RecordFrame,
};
use super::params::ConsumerParams;
use super::ConsumerSetup;
use crate::commit::{CommitStack, KafkaCommitter};
use crate::error::error_body;
use crate::kafka;
use crate::server::AppState;
use crate::session::{FullClientId, TopicName, WsMessageId};

pub(crate) async fn run(mut socket: WebSocket, state: AppState, setup: ConsumerSetup) {
    let ConsumerSetup {
        params,
        session_id,
        guard,
    } = setup;

    let consumer = match kafka::socket_consumer(
        &state.config,
        params.client_id.group_id.as_str(),
        params.client_id.client_id.as_str(),
    ) {
        Ok(consumer) => Arc::new(consumer),
        Err(e) => {
            warn!(client = %params.client_id, error = %e, "Failed to create Kafka consumer");
            close_with_error(&mut socket, "failed to attach to Kafka").await;
            return;
        }
    };
    if let Err(e) = consumer.subscribe(&[params.topic.as_str()]) {
        warn!(client = %params.client_id, error = %e, "Failed to subscribe");
        close_with_error(&mut socket, "failed to subscribe to topic").await;
        return;
    }

    let committer = Arc::new(KafkaCommitter::new(consumer.clone()));
    let mut stack = CommitStack::new(committer, state.config.commit_handler.max_stack_size);
    let codec = FrameCodec::new(params.payload_format);

    // The channel bound doubles as the backpressure window: when the peer
    // stops reading, sends below block, the channel fills, and the pump stops
    // polling Kafka.
    let (frame_tx, mut frame_rx) = mpsc::channel::<RecordFrame>(params.batch_size);
    let pump = tokio::spawn(pump_records(consumer, params.clone(), frame_tx));

    let pace_period = if params.rate > 0 {
        Duration::from_secs_f64(params.batch_size as f64 / params.rate as f64)
    } else {
        Duration::from_millis(10)
    };
    let mut pace = tokio::time::interval(pace_period);
    pace.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sweep = tokio::time::interval(state.config.commit_handler.auto_commit_interval());
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let max_age = state.config.commit_handler.auto_commit_max_age();

    let mut evictions = state.evictions.subscribe();
    let mut evictions_open = true;
    let mut shutdown = state.shutdown.subscribe();
    let our_id = FullClientId::Consumer(params.client_id.clone());

    let (mut ws_tx, mut ws_rx) = socket.split();

    'session: loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!(client = %params.client_id, "Closing consumer socket for shutdown");
                let _ = ws_tx.send(Message::Close(None)).await;
                break 'session;
            },
            notice = evictions.recv(), if evictions_open => match notice {
                Ok(notice) if notice.client_id == our_id => {
                    info!(client = %params.client_id, session = %session_id, "Closing evicted consumer socket");
                    let _ = ws_tx
                        .send(Message::Text(error_body(
                            "connection closed: session connection limit exceeded",
                        )))
                        .await;
                    break 'session;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Eviction notices lagged");
                }
                Err(broadcast::error::RecvError::Closed) => evictions_open = false,
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<AckFrame>(&text) {
                    Ok(ack) => on_ack(&mut stack, &ack.ack).await,
                    Err(e) => warn!(error = %e, "Ignoring unparseable client frame"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    debug!(client = %params.client_id, "Client closed consumer socket");
                    break 'session;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(client = %params.client_id, error = %e, "Consumer socket read failed");
                    break 'session;
                }
            },
            _ = sweep.tick(), if params.auto_commit => {
                if let Err(e) = stack.sweep(max_age).await {
                    warn!(client = %params.client_id, error = %e, "Auto-commit sweep failed");
                }
            },
            _ = pace.tick() => {
                for _ in 0..params.batch_size {
                    let Ok(frame) = frame_rx.try_recv() else {
                        break;
                    };
                    let ws_id = frame.ws_message_id.clone();
                    let message = match codec.encode(&frame) {
                        Ok(EncodedFrame::Text(text)) => Message::Text(text),
                        Ok(EncodedFrame::Binary(data)) => Message::Binary(data),
                        Err(e) => {
                            warn!(error = %e, "Failed to encode record frame");
                            continue;
                        }
                    };
                    if ws_tx.send(message).await.is_err() {
                        break 'session;
                    }
                    if let Some(ws_id) = ws_id {
                        if let Err(e) = stack.push(ws_id).await {
                            warn!(client = %params.client_id, error = %e, "Commit stack push failed");
                        }
                    }
                }
            },
        }
    }

    pump.abort();
    if let Err(e) = stack.close().await {
        warn!(client = %params.client_id, error = %e, "Commit stack flush failed on close");
    }
    info!(client = %params.client_id, session = %session_id, "Consumer socket closed");
    drop(guard);
}

async fn on_ack(stack: &mut CommitStack, ws_id: &WsMessageId) {
    match stack.acknowledge(ws_id).await {
        Ok(true) => {}
        Ok(false) => debug!(ws_id = %ws_id, "Acknowledgement matched no pending entry"),
        Err(e) => warn!(ws_id = %ws_id, error = %e, "Offset commit failed"),
    }
}

/// Read records from Kafka and hand them to the socket task as ready-made
/// frames. Exits when the socket task drops its receiver.
async fn pump_records(
    consumer: Arc<StreamConsumer>,
    params: ConsumerParams,
    frame_tx: mpsc::Sender<RecordFrame>,
) {
    use rdkafka::message::{Headers, Message as KafkaMessage};

    loop {
        match consumer.recv().await {
            Ok(message) => {
                let timestamp = message.timestamp().to_millis().unwrap_or(-1);
                let mut headers = HashMap::new();
                if let Some(borrowed) = message.headers() {
                    for header in borrowed.iter() {
                        if let Some(value) = header.value {
                            headers.insert(
                                header.key.to_string(),
                                String::from_utf8_lossy(value).into_owned(),
                            );
                        }
                    }
                }
                let frame = RecordFrame {
                    ws_message_id: Some(WsMessageId::new(
                        message.topic(),
                        message.partition(),
                        message.offset(),
                        timestamp,
                    )),
                    topic: Some(TopicName::new(message.topic())),
                    partition: Some(message.partition()),
                    timestamp: Some(timestamp),
                    headers,
                    key: message.key().map(|k| key_from_bytes(k, params.key_type)),
                    value: message
                        .payload()
                        .map(|p| value_from_bytes(p, params.val_type))
                        .unwrap_or(serde_json::Value::Null),
                };
                if frame_tx.send(frame).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "Kafka read error on consumer socket");
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}

async fn close_with_error(socket: &mut WebSocket, message: &str) {
    let _ = socket.send(Message::Text(error_body(message))).await;
    let _ = socket.send(Message::Close(None)).await;
}
