use async_trait::async_trait;
use tracing::info;

use crate::inbound::InboundMessage;
use crate::reply_sender::ReplySender;

/// Replies through the session webhook DingTalk attaches to each bot callback,
/// falling back to a fixed robot webhook when the message carries none.
pub struct DingTalkReplier {
    name: String,
    fallback_robot_webhook: Option<String>,
    http_client: reqwest::Client,
}

impl DingTalkReplier {
    pub fn new(name: String, fallback_robot_webhook: Option<String>) -> Self {
        Self {
            name,
            fallback_robot_webhook,
            http_client: reqwest::Client::new(),
        }
    }

    fn target_url<'a>(&'a self, inbound: &'a InboundMessage) -> Option<&'a str> {
        inbound
            .session_webhook
            .as_deref()
            .or(self.fallback_robot_webhook.as_deref())
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }
}

pub fn text_message_body(text: &str) -> serde_json::Value {
    serde_json::json!({
        "msgtype": "text",
        "text": { "content": text }
    })
}

#[async_trait]
impl ReplySender for DingTalkReplier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_reply(&self, inbound: &InboundMessage, text: &str) -> Result<(), String> {
        let Some(url) = self.target_url(inbound) else {
            return Err(
                "message has no sessionWebhook and robot_webhook_url is not configured".to_string(),
            );
        };
        let resp = self
            .http_client
            .post(url)
            .json(&text_message_body(text))
            .send()
            .await
            .map_err(|e| format!("DingTalk send failed: {e}"))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(format!("DingTalk send error {status}: {body}"));
        }
        // The robot API reports failures in-band with HTTP 200.
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(&body) {
            let errcode = json.get("errcode").and_then(|v| v.as_i64()).unwrap_or(0);
            if errcode != 0 {
                let errmsg = json
                    .get("errmsg")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown");
                return Err(format!("DingTalk send error: errcode={errcode} errmsg={errmsg}"));
            }
        }
        info!(
            "DingTalk: delivered reply ({} bytes) for msg_id={}",
            text.len(),
            inbound.message_id.as_deref().unwrap_or("-")
        );
        Ok(())
    }
}
