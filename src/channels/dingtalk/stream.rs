use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info, warn};

use crate::bridge::BridgeHandler;
use crate::config::{Config, BOT_MESSAGE_TOPIC};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const USER_AGENT: &str = concat!("dingbridge/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct StreamRuntimeContext {
    pub channel_name: String,
    pub stream_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
}

impl StreamRuntimeContext {
    pub fn from_config(config: &Config) -> Self {
        StreamRuntimeContext {
            channel_name: "dingtalk".into(),
            stream_endpoint: config.stream_endpoint.clone(),
            client_id: config.dingtalk_app_key.clone(),
            client_secret: config.dingtalk_app_secret.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct StreamFrame {
    #[serde(rename = "type", default)]
    pub frame_type: String,
    #[serde(default)]
    pub headers: Value,
    /// Usually a JSON document encoded as a string; anything else is kept as-is.
    #[serde(default)]
    pub data: Value,
}

impl StreamFrame {
    fn header(&self, key: &str) -> &str {
        self.headers.get(key).and_then(|v| v.as_str()).unwrap_or("")
    }

    pub fn topic(&self) -> &str {
        self.header("topic")
    }

    pub fn message_id(&self) -> &str {
        self.header("messageId")
    }

    /// `data` as text for the bridge: strings verbatim, `null` as empty,
    /// anything else re-serialized.
    pub fn data_text(&self) -> String {
        match &self.data {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameAction {
    /// Send the ack and nothing else.
    Ack(Value),
    /// Send the ack, then hand `data` to the bridge.
    Dispatch { ack: Value, data: String },
    /// Server asked us to drop the connection.
    Disconnect,
}

fn callback_ack(message_id: &str) -> Value {
    json!({
        "code": 200,
        "headers": {
            "contentType": "application/json",
            "messageId": message_id,
        },
        "message": "OK",
        "data": json!({ "response": null }).to_string(),
    })
}

pub fn classify_frame(frame: &StreamFrame) -> FrameAction {
    match (frame.frame_type.as_str(), frame.topic()) {
        ("SYSTEM", "ping") => FrameAction::Ack(json!({
            "code": 200,
            "headers": frame.headers,
            "message": "OK",
            "data": frame.data,
        })),
        ("SYSTEM", "disconnect") => FrameAction::Disconnect,
        ("CALLBACK", BOT_MESSAGE_TOPIC) => FrameAction::Dispatch {
            ack: callback_ack(frame.message_id()),
            data: frame.data_text(),
        },
        _ => FrameAction::Ack(callback_ack(frame.message_id())),
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OpenConnectionResponse {
    endpoint: String,
    ticket: String,
}

/// Register the bot-message subscription and obtain a one-time ticket.
pub async fn open_connection(
    http_client: &reqwest::Client,
    ctx: &StreamRuntimeContext,
) -> Result<(String, String), String> {
    let body = json!({
        "clientId": ctx.client_id,
        "clientSecret": ctx.client_secret,
        "subscriptions": [{ "type": "CALLBACK", "topic": BOT_MESSAGE_TOPIC }],
        "ua": USER_AGENT,
    });
    let resp = http_client
        .post(&ctx.stream_endpoint)
        .json(&body)
        .send()
        .await
        .map_err(|e| format!("Failed to open stream connection: {e}"))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(format!("Stream gateway error {status}: {body}"));
    }
    let opened: OpenConnectionResponse = resp
        .json()
        .await
        .map_err(|e| format!("Failed to parse stream gateway response: {e}"))?;
    Ok((opened.endpoint, opened.ticket))
}

pub fn ws_url(endpoint: &str, ticket: &str) -> String {
    let sep = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{sep}ticket={}", urlencoding::encode(ticket))
}

/// One connected session. Returns `Ok` when the server asks for a reconnect.
async fn run_stream_session(
    handler: Arc<BridgeHandler>,
    ctx: &StreamRuntimeContext,
    http_client: &reqwest::Client,
) -> Result<(), String> {
    let (endpoint, ticket) = open_connection(http_client, ctx).await?;
    info!("DingTalk stream: connecting to {endpoint}");
    let (mut ws, _) = tokio_tungstenite::connect_async(ws_url(&endpoint, &ticket))
        .await
        .map_err(|e| format!("WebSocket connect failed: {e}"))?;
    info!("DingTalk stream '{}': connected", ctx.channel_name);

    while let Some(msg_result) = ws.next().await {
        let msg = msg_result.map_err(|e| format!("WebSocket read error: {e}"))?;
        match msg {
            WsMessage::Text(text) => {
                let frame: StreamFrame = match serde_json::from_str(&text) {
                    Ok(f) => f,
                    Err(e) => {
                        warn!("DingTalk stream: failed to parse frame: {e}");
                        continue;
                    }
                };
                match classify_frame(&frame) {
                    FrameAction::Ack(ack) => {
                        ws.send(WsMessage::Text(ack.to_string()))
                            .await
                            .map_err(|e| format!("Failed to send ack: {e}"))?;
                    }
                    FrameAction::Dispatch { ack, data } => {
                        ws.send(WsMessage::Text(ack.to_string()))
                            .await
                            .map_err(|e| format!("Failed to send ack: {e}"))?;
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            handler.handle(&Value::String(data)).await;
                        });
                    }
                    FrameAction::Disconnect => {
                        info!("DingTalk stream: server requested disconnect");
                        let _ = ws.close(None).await;
                        return Ok(());
                    }
                }
            }
            WsMessage::Ping(data) => {
                if let Err(e) = ws.send(WsMessage::Pong(data)).await {
                    warn!("DingTalk stream: pong send failed: {e}");
                }
            }
            WsMessage::Close(_) => return Err("WebSocket closed by server".to_string()),
            _ => {}
        }
    }
    Err("WebSocket stream ended".to_string())
}

pub async fn start_stream_client(handler: Arc<BridgeHandler>, ctx: StreamRuntimeContext) {
    let http_client = reqwest::Client::new();
    info!("DingTalk stream '{}': starting", ctx.channel_name);
    loop {
        match run_stream_session(handler.clone(), &ctx, &http_client).await {
            Ok(()) => info!("DingTalk stream: reconnecting"),
            Err(e) => {
                error!("DingTalk stream disconnected: {e}");
                info!(
                    "DingTalk stream: reconnecting in {}s...",
                    RECONNECT_DELAY.as_secs()
                );
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
