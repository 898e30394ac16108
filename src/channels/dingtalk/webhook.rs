use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::{Json, Router};
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{info, warn};

use crate::bridge::BridgeHandler;
use crate::config::Config;

type HmacSha256 = Hmac<Sha256>;

/// DingTalk rejects callbacks older than one hour; so do we.
const MAX_CLOCK_SKEW_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct WebhookRuntimeContext {
    pub host: String,
    pub port: u16,
    pub path: String,
    /// App secret used to check `sign`; `None` disables verification.
    pub verify_secret: Option<String>,
}

impl WebhookRuntimeContext {
    pub fn from_config(config: &Config) -> Self {
        WebhookRuntimeContext {
            host: config.webhook_host.clone(),
            port: config.webhook_port,
            path: config.webhook_path.clone(),
            verify_secret: config
                .enable_sign_verify
                .then(|| config.dingtalk_app_secret.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignError {
    Missing,
    BadTimestamp,
    Expired,
    Mismatch,
}

/// `base64(HMAC-SHA256(secret, "{timestamp}\n{secret}"))`
pub fn compute_sign(timestamp: &str, secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(format!("{timestamp}\n{secret}").as_bytes());
    Some(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

pub fn verify_sign(
    timestamp: Option<&str>,
    sign: Option<&str>,
    secret: &str,
    now_ms: i64,
) -> Result<(), SignError> {
    let (Some(timestamp), Some(sign)) = (timestamp, sign) else {
        return Err(SignError::Missing);
    };
    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| SignError::BadTimestamp)?;
    if now_ms.abs_diff(ts) > MAX_CLOCK_SKEW_MS {
        return Err(SignError::Expired);
    }
    let provided = base64::engine::general_purpose::STANDARD
        .decode(sign.trim())
        .map_err(|_| SignError::Mismatch)?;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignError::Mismatch)?;
    mac.update(format!("{}\n{secret}", timestamp.trim()).as_bytes());
    mac.verify_slice(&provided).map_err(|_| SignError::Mismatch)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn dingtalk_callback_handler(
    handler: Arc<BridgeHandler>,
    verify_secret: Option<Arc<str>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, Json<Value>) {
    if let Some(secret) = verify_secret {
        let checked = verify_sign(
            header(&headers, "timestamp"),
            header(&headers, "sign"),
            &secret,
            chrono::Utc::now().timestamp_millis(),
        );
        if let Err(e) = checked {
            warn!("DingTalk callback rejected: signature check failed ({e:?})");
            return (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "invalid signature" })),
            );
        }
    }
    tokio::spawn(async move {
        handler.handle(&Value::String(body)).await;
    });
    (StatusCode::OK, Json(json!({})))
}

pub fn build_webhook_router(ctx: &WebhookRuntimeContext, handler: Arc<BridgeHandler>) -> Router {
    let verify_secret: Option<Arc<str>> = ctx.verify_secret.as_deref().map(Arc::from);
    Router::new().route(
        &ctx.path,
        axum::routing::post(move |headers: HeaderMap, body: String| {
            let handler = handler.clone();
            let verify_secret = verify_secret.clone();
            async move { dingtalk_callback_handler(handler, verify_secret, headers, body).await }
        }),
    )
}

pub async fn start_webhook_server(
    handler: Arc<BridgeHandler>,
    ctx: WebhookRuntimeContext,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", ctx.host, ctx.port);
    let router = build_webhook_router(&ctx, handler);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind DingTalk callback server on {addr}: {e}"))?;
    info!(
        "DingTalk callback endpoint listening on http://{addr}{} (sign verification {})",
        ctx.path,
        if ctx.verify_secret.is_some() { "on" } else { "off" }
    );
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CompletionBackend;
    use crate::bridge::ReplyTexts;
    use crate::completion_types::{CompletionRequest, CompletionResponse};
    use crate::content_filter::ContentFilter;
    use crate::error::BridgeError;
    use crate::inbound::InboundMessage;
    use crate::reply_sender::ReplySender;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    const SECRET: &str = "test-app-secret";

    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionBackend for CountingBackend {
        fn name(&self) -> &str {
            "counting"
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, BridgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse::default())
        }
    }

    struct SilentReplier;

    #[async_trait]
    impl ReplySender for SilentReplier {
        fn name(&self) -> &str {
            "silent"
        }

        async fn send_reply(&self, _inbound: &InboundMessage, _text: &str) -> Result<(), String> {
            Ok(())
        }
    }

    fn router(verify: bool) -> (Router, Arc<CountingBackend>) {
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
        });
        let handler = Arc::new(BridgeHandler::new(
            backend.clone(),
            Arc::new(SilentReplier),
            ContentFilter::default(),
            "qwen".into(),
            ReplyTexts {
                blocked: "B".into(),
                empty: "E".into(),
                error_prefix: "X: ".into(),
            },
        ));
        let ctx = WebhookRuntimeContext {
            host: "127.0.0.1".into(),
            port: 0,
            path: "/dingtalk/callback".into(),
            verify_secret: verify.then(|| SECRET.to_string()),
        };
        (build_webhook_router(&ctx, handler), backend)
    }

    fn callback(timestamp: Option<&str>, sign: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/dingtalk/callback")
            .header("content-type", "application/json");
        if let Some(ts) = timestamp {
            builder = builder.header("timestamp", ts);
        }
        if let Some(sign) = sign {
            builder = builder.header("sign", sign);
        }
        builder
            .body(Body::from(
                r#"{"text":{"content":"hello"},"senderId":"u-1","msgId":"m-1"}"#,
            ))
            .unwrap()
    }

    async fn wait_for_calls(backend: &CountingBackend, expected: usize) -> usize {
        for _ in 0..50 {
            if backend.calls.load(Ordering::SeqCst) >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        backend.calls.load(Ordering::SeqCst)
    }

    #[test]
    fn test_compute_sign_roundtrips_through_verify() {
        let ts = "1700000000000";
        let sign = compute_sign(ts, SECRET).unwrap();
        assert_eq!(
            verify_sign(Some(ts), Some(&sign), SECRET, 1_700_000_000_000),
            Ok(())
        );
    }

    #[test]
    fn test_verify_sign_rejections() {
        let ts = "1700000000000";
        let now = 1_700_000_000_000;
        let sign = compute_sign(ts, SECRET).unwrap();
        assert_eq!(
            verify_sign(None, Some(&sign), SECRET, now),
            Err(SignError::Missing)
        );
        assert_eq!(
            verify_sign(Some("yesterday"), Some(&sign), SECRET, now),
            Err(SignError::BadTimestamp)
        );
        assert_eq!(
            verify_sign(Some(ts), Some(&sign), SECRET, now + 2 * MAX_CLOCK_SKEW_MS as i64),
            Err(SignError::Expired)
        );
        for extreme in ["-9223372036854775808", "9223372036854775807"] {
            assert_eq!(
                verify_sign(Some(extreme), Some("AAAA"), SECRET, now),
                Err(SignError::Expired)
            );
        }
        assert_eq!(
            verify_sign(Some(ts), Some(&sign), "other-secret", now),
            Err(SignError::Mismatch)
        );
        assert_eq!(
            verify_sign(Some(ts), Some("!!not base64!!"), SECRET, now),
            Err(SignError::Mismatch)
        );
    }

    #[tokio::test]
    async fn test_signed_callback_is_handled() {
        let (app, backend) = router(true);
        let ts = chrono::Utc::now().timestamp_millis().to_string();
        let sign = compute_sign(&ts, SECRET).unwrap();
        let resp = app.oneshot(callback(Some(&ts), Some(&sign))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(wait_for_calls(&backend, 1).await, 1);
    }

    #[tokio::test]
    async fn test_unsigned_callback_is_forbidden() {
        let (app, backend) = router(true);
        let resp = app.oneshot(callback(None, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tampered_sign_is_forbidden() {
        let (app, _) = router(true);
        let ts = chrono::Utc::now().timestamp_millis().to_string();
        let sign = compute_sign(&ts, "wrong-secret").unwrap();
        let resp = app.oneshot(callback(Some(&ts), Some(&sign))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_verification_disabled_accepts_unsigned() {
        let (app, backend) = router(false);
        let resp = app.oneshot(callback(None, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(wait_for_calls(&backend, 1).await, 1);
    }

    #[tokio::test]
    async fn test_malformed_body_is_acknowledged_but_dropped() {
        let (app, backend) = router(false);
        let req = Request::builder()
            .method("POST")
            .uri("/dingtalk/callback")
            .body(Body::from("not json at all"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }
}
