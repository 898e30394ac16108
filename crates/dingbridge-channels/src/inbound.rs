use dingbridge_core::error::BridgeError;
use serde_json::Value;

pub const UNKNOWN_SENDER: &str = "unknown_user";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationKind {
    Private,
    Group,
}

impl ConversationKind {
    /// DingTalk uses "1" for one-to-one chats and "2" for groups.
    fn from_dingtalk(raw: &str) -> Option<Self> {
        match raw.trim() {
            "1" => Some(ConversationKind::Private),
            "2" => Some(ConversationKind::Group),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConversationKind::Private => "private",
            ConversationKind::Group => "group",
        }
    }
}

/// One user chat event, normalized from the platform payload.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub sender_id: String,
    pub text_content: String,
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
    pub conversation_kind: Option<ConversationKind>,
    pub sender_nick: Option<String>,
    /// Per-conversation reply URL attached by DingTalk to every bot callback.
    pub session_webhook: Option<String>,
    pub raw_payload: Value,
}

fn str_field<'a>(data: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| data.get(*k).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|v| !v.is_empty())
}

impl InboundMessage {
    /// Normalize a raw platform event.
    ///
    /// The stream SDK hands over either a JSON-encoded string or an already
    /// decoded object; both are accepted. Text content is trimmed, and an
    /// event without text yields [`BridgeError::EmptyMessage`].
    pub fn from_payload(payload: &Value) -> Result<Self, BridgeError> {
        let data = match payload {
            Value::String(s) => serde_json::from_str::<Value>(s)
                .map_err(|e| BridgeError::InvalidPayload(format!("not JSON: {e}")))?,
            other => other.clone(),
        };
        if !data.is_object() {
            return Err(BridgeError::InvalidPayload(
                "payload is not a JSON object".into(),
            ));
        }

        let text_content = match data.get("text") {
            None | Some(Value::Null) => String::new(),
            Some(Value::Object(text)) => match text.get("content") {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.trim().to_string(),
                Some(_) => {
                    return Err(BridgeError::InvalidPayload(
                        "text.content is not a string".into(),
                    ))
                }
            },
            Some(_) => {
                return Err(BridgeError::InvalidPayload(
                    "text is not an object".into(),
                ))
            }
        };
        if text_content.is_empty() {
            return Err(BridgeError::EmptyMessage);
        }

        let sender_id = str_field(&data, &["senderId", "sender_id"])
            .unwrap_or(UNKNOWN_SENDER)
            .to_string();
        let message_id = str_field(&data, &["msgId", "messageId"]).map(ToOwned::to_owned);
        let conversation_id = str_field(&data, &["conversationId"]).map(ToOwned::to_owned);
        let conversation_kind =
            str_field(&data, &["conversationType"]).and_then(ConversationKind::from_dingtalk);
        let sender_nick = str_field(&data, &["senderNick"]).map(ToOwned::to_owned);
        let session_webhook = str_field(&data, &["sessionWebhook"]).map(ToOwned::to_owned);

        Ok(InboundMessage {
            sender_id,
            text_content,
            message_id,
            conversation_id,
            conversation_kind,
            sender_nick,
            session_webhook,
            raw_payload: data,
        })
    }
}
