use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{info, warn};

use super::CompletionBackend;
use crate::completion_types::{CompletionRequest, CompletionResponse, RpcRequest, RpcResponse};
use crate::error::BridgeError;
use crate::text::truncate_for_display;

/// Gateway RPC over WebSocket: one connection and one `chat.send` call per request.
pub struct WsBackend {
    url: String,
    token: Option<String>,
    timeout: Duration,
}

impl WsBackend {
    pub fn new(url: String, token: Option<String>, timeout: Duration) -> Self {
        WsBackend {
            url,
            token,
            timeout,
        }
    }

    /// Send the envelope and wait for the first data frame.
    async fn exchange(&self, envelope: &RpcRequest) -> Result<String, BridgeError> {
        let (mut ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| BridgeError::WebSocket(format!("connect to {} failed: {e}", self.url)))?;

        let payload = serde_json::to_string(envelope)?;
        ws.send(WsMessage::Text(payload))
            .await
            .map_err(|e| BridgeError::WebSocket(format!("send failed: {e}")))?;

        let reply = loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => break Ok(text),
                Some(Ok(WsMessage::Binary(data))) => {
                    break String::from_utf8(data).map_err(|_| {
                        BridgeError::WebSocket("binary reply is not UTF-8".into())
                    })
                }
                Some(Ok(WsMessage::Close(_))) => {
                    break Err(BridgeError::WebSocket(
                        "connection closed before a reply arrived".into(),
                    ))
                }
                // ping / pong / raw frames
                Some(Ok(_)) => continue,
                Some(Err(e)) => break Err(BridgeError::WebSocket(format!("read failed: {e}"))),
                None => {
                    break Err(BridgeError::WebSocket(
                        "stream ended before a reply arrived".into(),
                    ))
                }
            }
        };

        let _ = ws.close(None).await;
        reply
    }
}

#[async_trait]
impl CompletionBackend for WsBackend {
    fn name(&self) -> &str {
        "websocket"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, BridgeError> {
        let id = uuid::Uuid::new_v4().to_string();
        let envelope =
            RpcRequest::chat_send(request.messages.clone(), self.token.clone(), id.clone());
        info!(
            "Forwarding to completion backend over WebSocket: {} (id={id})",
            self.url
        );

        let frame = tokio::time::timeout(self.timeout, self.exchange(&envelope))
            .await
            .map_err(|_| BridgeError::Timeout(self.timeout))??;

        let response: RpcResponse = serde_json::from_str(&frame).map_err(|e| {
            BridgeError::Backend(format!(
                "Failed to parse RPC reply: {e} (frame: {})",
                truncate_for_display(&frame, 300)
            ))
        })?;
        if !response.matches_id(&id) {
            warn!("RPC reply id {:?} does not match request id {id}", response.id);
        }
        if let Some(err) = response.error {
            return Err(match err.code {
                Some(code) => BridgeError::Backend(format!("RPC error {code}: {}", err.message)),
                None => BridgeError::Backend(format!("RPC error: {}", err.message)),
            });
        }
        Ok(response.result.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    /// Accepts one connection, records the first frame, and answers with the
    /// frames `reply` returns, in order. No frames means the server stays silent.
    async fn serve_once<F>(reply: F) -> (String, Arc<Mutex<Option<Value>>>)
    where
        F: Fn(&Value) -> Vec<WsMessage> + Send + 'static,
    {
        let seen = Arc::new(Mutex::new(None));
        let seen_in_task = seen.clone();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            if let Some(Ok(WsMessage::Text(text))) = ws.next().await {
                let request: Value = serde_json::from_str(&text).unwrap();
                *seen_in_task.lock().unwrap() = Some(request.clone());
                let frames = reply(&request);
                if frames.is_empty() {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
                for msg in frames {
                    let _ = ws.send(msg).await;
                }
                // drain until the client closes
                while let Some(Ok(_)) = ws.next().await {}
            }
        });
        (format!("ws://{addr}"), seen)
    }

    fn result_frame(id: &Value, content: &str) -> WsMessage {
        WsMessage::Text(
            json!({
                "id": id,
                "result": {"choices": [{"message": {"content": content}}]}
            })
            .to_string(),
        )
    }

    fn request() -> CompletionRequest {
        CompletionRequest::single_turn("qwen", "hello", "u-1")
    }

    #[tokio::test]
    async fn test_complete_reads_result_choices() {
        let (url, seen) = serve_once(|req| vec![result_frame(&req["id"], "ws reply")]).await;
        let backend = WsBackend::new(url, Some("tok".into()), Duration::from_secs(5));
        let resp = backend.complete(&request()).await.unwrap();
        assert_eq!(resp.first_content(), Some("ws reply"));

        let sent = seen.lock().unwrap().clone().unwrap();
        assert_eq!(sent["method"], "chat.send");
        assert_eq!(sent["params"]["token"], "tok");
        assert_eq!(sent["params"]["messages"][0]["content"], "hello");
        assert!(uuid::Uuid::parse_str(sent["id"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_complete_skips_ping_before_reply() {
        let (url, _) = serve_once(|req| {
            vec![
                WsMessage::Ping(b"keepalive".to_vec()),
                result_frame(&req["id"], "after ping"),
            ]
        })
        .await;
        let backend = WsBackend::new(url, None, Duration::from_secs(5));
        let resp = backend.complete(&request()).await.unwrap();
        assert_eq!(resp.first_content(), Some("after ping"));
    }

    #[tokio::test]
    async fn test_complete_uses_reply_with_mismatched_id() {
        let (url, _) =
            serve_once(|_| vec![result_frame(&json!("some-other-id"), "still used")]).await;
        let backend = WsBackend::new(url, None, Duration::from_secs(5));
        let resp = backend.complete(&request()).await.unwrap();
        assert_eq!(resp.first_content(), Some("still used"));
    }

    #[tokio::test]
    async fn test_complete_accepts_binary_utf8_reply() {
        let (url, _) = serve_once(|req| {
            let body = json!({
                "id": req["id"],
                "result": {"choices": [{"message": {"content": "二进制"}}]}
            });
            vec![WsMessage::Binary(body.to_string().into_bytes())]
        })
        .await;
        let backend = WsBackend::new(url, None, Duration::from_secs(5));
        let resp = backend.complete(&request()).await.unwrap();
        assert_eq!(resp.first_content(), Some("二进制"));
    }

    #[tokio::test]
    async fn test_complete_rejects_binary_non_utf8_reply() {
        let (url, _) = serve_once(|_| vec![WsMessage::Binary(vec![0xff, 0xfe, 0x00])]).await;
        let backend = WsBackend::new(url, None, Duration::from_secs(5));
        let err = backend.complete(&request()).await.unwrap_err();
        assert!(matches!(err, BridgeError::WebSocket(_)));
    }

    #[tokio::test]
    async fn test_complete_missing_result_is_empty() {
        let (url, _) =
            serve_once(|req| vec![WsMessage::Text(json!({"id": req["id"]}).to_string())]).await;
        let backend = WsBackend::new(url, None, Duration::from_secs(5));
        let resp = backend.complete(&request()).await.unwrap();
        assert!(resp.choices.is_empty());
    }

    #[tokio::test]
    async fn test_complete_rpc_error_object() {
        let (url, _) = serve_once(|req| {
            vec![WsMessage::Text(
                json!({"id": req["id"], "error": {"code": 401, "message": "unauthorized"}})
                    .to_string(),
            )]
        })
        .await;
        let backend = WsBackend::new(url, None, Duration::from_secs(5));
        let err = backend.complete(&request()).await.unwrap_err();
        assert_eq!(err.to_string(), "Backend error: RPC error 401: unauthorized");
    }

    #[tokio::test]
    async fn test_complete_close_before_reply() {
        let (url, _) = serve_once(|_| vec![WsMessage::Close(None)]).await;
        let backend = WsBackend::new(url, None, Duration::from_secs(5));
        let err = backend.complete(&request()).await.unwrap_err();
        assert!(matches!(err, BridgeError::WebSocket(_)));
    }

    #[tokio::test]
    async fn test_complete_malformed_frame() {
        let (url, _) = serve_once(|_| vec![WsMessage::Text("not json".into())]).await;
        let backend = WsBackend::new(url, None, Duration::from_secs(5));
        let err = backend.complete(&request()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse RPC reply"));
    }

    #[tokio::test]
    async fn test_complete_times_out_when_backend_is_silent() {
        let (url, _) = serve_once(|_| Vec::new()).await;
        let backend = WsBackend::new(url, None, Duration::from_millis(200));
        let err = backend.complete(&request()).await.unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_complete_connect_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let backend = WsBackend::new(format!("ws://{addr}"), None, Duration::from_secs(5));
        let err = backend.complete(&request()).await.unwrap_err();
        assert!(err.to_string().contains("connect to"));
    }
}
