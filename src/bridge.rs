//! Per-message bridging: inbound chat event → completion backend → chat reply.
//!
//! A [`BridgeHandler`] is immutable once built and is shared across tasks
//! behind an `Arc`; every inbound event is handled independently.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::backend::CompletionBackend;
use crate::completion_types::CompletionRequest;
use crate::config::Config;
use crate::content_filter::ContentFilter;
use crate::error::BridgeError;
use crate::inbound::InboundMessage;
use crate::reply_sender::ReplySender;

/// Fixed user-visible texts for the non-AI replies.
#[derive(Debug, Clone)]
pub struct ReplyTexts {
    pub blocked: String,
    pub empty: String,
    pub error_prefix: String,
}

impl ReplyTexts {
    pub fn from_config(config: &Config) -> Self {
        ReplyTexts {
            blocked: config.blocked_reply.clone(),
            empty: config.empty_reply.clone(),
            error_prefix: config.error_reply_prefix.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Unparseable or empty input; nothing was sent anywhere.
    Dropped(String),
    /// Text hit the content filter; the warning reply was attempted.
    Blocked { term: String },
    Replied { reply: String },
    ReplyFailed { reply: String, error: String },
}

pub struct BridgeHandler {
    backend: Arc<dyn CompletionBackend>,
    replier: Arc<dyn ReplySender>,
    filter: ContentFilter,
    model: String,
    texts: ReplyTexts,
}

impl BridgeHandler {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        replier: Arc<dyn ReplySender>,
        filter: ContentFilter,
        model: String,
        texts: ReplyTexts,
    ) -> Self {
        BridgeHandler {
            backend,
            replier,
            filter,
            model,
            texts,
        }
    }

    pub fn from_config(
        config: &Config,
        backend: Arc<dyn CompletionBackend>,
        replier: Arc<dyn ReplySender>,
    ) -> Self {
        let filter = ContentFilter::new(&config.sensitive_words);
        if filter.is_empty() {
            info!("Content filter disabled (no sensitive_words configured)");
        } else {
            info!("Content filter active with {} term(s)", filter.len());
        }
        Self::new(
            backend,
            replier,
            filter,
            config.model.clone(),
            ReplyTexts::from_config(config),
        )
    }

    pub fn content_filter(&self) -> &ContentFilter {
        &self.filter
    }

    /// Handle one raw platform event. Never fails; the outcome is informational.
    pub async fn handle(&self, payload: &Value) -> HandleOutcome {
        let inbound = match InboundMessage::from_payload(payload) {
            Ok(m) => m,
            Err(BridgeError::EmptyMessage) => {
                return HandleOutcome::Dropped("empty text content".into());
            }
            Err(e) => {
                error!("Failed to parse inbound message: {e}");
                return HandleOutcome::Dropped(e.to_string());
            }
        };
        info!(
            "Received message from {} (msg_id={}, conversation={}): {}",
            inbound.sender_id,
            inbound.message_id.as_deref().unwrap_or("-"),
            inbound
                .conversation_kind
                .map(|k| k.as_str())
                .unwrap_or("unknown"),
            inbound.text_content
        );

        if let Some(term) = self.filter.find_blocked(&inbound.text_content) {
            warn!(
                "Blocked message from {}: matched a sensitive term",
                inbound.sender_id
            );
            let term = term.to_string();
            if let Err(e) = self.replier.send_reply(&inbound, &self.texts.blocked).await {
                error!("Failed to send blocked-content warning: {e}");
            }
            return HandleOutcome::Blocked { term };
        }

        let reply = self.forward(&inbound).await;
        match self.replier.send_reply(&inbound, &reply).await {
            Ok(()) => {
                info!("Reply sent to {} via {}", inbound.sender_id, self.replier.name());
                HandleOutcome::Replied { reply }
            }
            Err(e) => {
                error!("Failed to send reply via {}: {e}", self.replier.name());
                HandleOutcome::ReplyFailed { reply, error: e }
            }
        }
    }

    /// Ask the backend and turn any outcome into reply text.
    async fn forward(&self, inbound: &InboundMessage) -> String {
        let request =
            CompletionRequest::single_turn(&self.model, &inbound.text_content, &inbound.sender_id);
        match self.backend.complete(&request).await {
            Ok(response) => match response.first_content() {
                Some(content) => content.to_string(),
                None => {
                    warn!(
                        "Backend '{}' returned no usable choices",
                        self.backend.name()
                    );
                    self.texts.empty.clone()
                }
            },
            Err(e) => {
                error!("Backend '{}' call failed: {e}", self.backend.name());
                format!("{}{e}", self.texts.error_prefix)
            }
        }
    }
}
