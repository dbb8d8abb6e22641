//! Postgres change feed over the platform's Phoenix-channel websocket.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use shared::{
    domain::{ConversationKey, MessageId},
    protocol::{ChangeEvent, MessageRow, PostgresChangesPayload, RealtimeFrame},
};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::{
    backend::{BackendResult, Subscription},
    error::BackendError,
};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const EVENT_BUFFER: usize = 256;

pub fn realtime_url(base_url: &str, anon_key: &str) -> BackendResult<Url> {
    let ws_base = if base_url.starts_with("https://") {
        base_url.replacen("https://", "wss://", 1)
    } else if base_url.starts_with("http://") {
        base_url.replacen("http://", "ws://", 1)
    } else {
        return Err(BackendError::Realtime(
            "backend url must start with http:// or https://".into(),
        ));
    };
    let mut url = Url::parse(&format!(
        "{}/realtime/v1/websocket",
        ws_base.trim_end_matches('/')
    ))
    .map_err(|err| BackendError::Realtime(format!("invalid realtime url: {err}")))?;
    url.query_pairs_mut()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

pub fn topic_for(conversation: &ConversationKey) -> String {
    format!("realtime:chat_{conversation}")
}

pub fn join_frame(conversation: &ConversationKey, access_token: &str) -> RealtimeFrame {
    RealtimeFrame {
        topic: topic_for(conversation),
        event: "phx_join".into(),
        payload: json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "*",
                    "schema": "public",
                    "table": "messages",
                    "filter": format!("chat_id=eq.{conversation}"),
                }],
            },
            "access_token": access_token,
        }),
        reference: Some("1".into()),
    }
}

fn heartbeat_frame(reference: u64) -> RealtimeFrame {
    RealtimeFrame {
        topic: "phoenix".into(),
        event: "heartbeat".into(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

/// Decodes a `postgres_changes` frame. Anything else, or a frame that does not
/// decode, yields `None`.
pub fn parse_change_frame(text: &str) -> Option<ChangeEvent> {
    let frame = match serde_json::from_str::<RealtimeFrame>(text) {
        Ok(frame) => frame,
        Err(err) => {
            debug!("dropping malformed realtime frame: {err}");
            return None;
        }
    };

    if frame.event != "postgres_changes" {
        if frame.event == "phx_reply" && frame.payload["status"] == "error" {
            warn!(topic = %frame.topic, payload = %frame.payload, "realtime channel rejected");
        }
        return None;
    }

    let change = match serde_json::from_value::<PostgresChangesPayload>(frame.payload) {
        Ok(payload) => payload.data,
        Err(err) => {
            debug!(topic = %frame.topic, "dropping malformed change payload: {err}");
            return None;
        }
    };
    if change.table.as_deref().is_some_and(|table| table != "messages") {
        return None;
    }

    match change.change_type.to_ascii_uppercase().as_str() {
        "INSERT" => decode_row(change.record).map(ChangeEvent::Insert),
        "UPDATE" => decode_row(change.record).map(ChangeEvent::Update),
        "DELETE" => {
            let id = change
                .old_record
                .as_ref()
                .and_then(|old| old.get("id"))
                .and_then(Value::as_i64);
            if id.is_none() {
                debug!("dropping delete event without an id");
            }
            id.map(|id| ChangeEvent::Delete { id: MessageId(id) })
        }
        other => {
            debug!(change_type = other, "ignoring unknown change type");
            None
        }
    }
}

fn decode_row(record: Option<Value>) -> Option<MessageRow> {
    let record = record?;
    match serde_json::from_value::<MessageRow>(record) {
        Ok(row) => Some(row),
        Err(err) => {
            debug!("dropping malformed realtime row: {err}");
            None
        }
    }
}

/// Connects, joins the conversation's channel and forwards decoded changes
/// until the returned [`Subscription`] is closed or the socket goes away.
pub async fn subscribe(
    base_url: &str,
    anon_key: &str,
    access_token: Option<&str>,
    conversation: &ConversationKey,
) -> BackendResult<Subscription> {
    let url = realtime_url(base_url, anon_key)?;
    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .map_err(|err| BackendError::Realtime(format!("failed to connect websocket: {err}")))?;
    let (mut writer, mut reader) = ws_stream.split();

    let join = join_frame(conversation, access_token.unwrap_or(anon_key));
    let join = serde_json::to_string(&join).map_err(|err| BackendError::Decode(err.to_string()))?;
    writer
        .send(Message::Text(join))
        .await
        .map_err(|err| BackendError::Realtime(format!("failed to join channel: {err}")))?;

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let conversation = conversation.clone();
    let task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut next_ref: u64 = 2;

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                _ = heartbeat.tick() => {
                    let frame = heartbeat_frame(next_ref);
                    next_ref += 1;
                    let Ok(text) = serde_json::to_string(&frame) else { continue };
                    if let Err(err) = writer.send(Message::Text(text)).await {
                        warn!(conversation = %conversation, "realtime heartbeat failed: {err}");
                        break;
                    }
                }
                msg = reader.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = parse_change_frame(&text) {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(conversation = %conversation, "realtime receive failed: {err}");
                        break;
                    }
                },
            }
        }
        debug!(conversation = %conversation, "realtime feed closed");
    });

    Ok(Subscription::new(rx, task))
}

#[cfg(test)]
#[path = "tests/realtime_tests.rs"]
mod tests;
