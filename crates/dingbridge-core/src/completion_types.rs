use serde::{Deserialize, Serialize};

pub const RPC_METHOD_CHAT_SEND: &str = "chat.send";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// OpenAI-style chat completion request body.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub user: String,
}

impl CompletionRequest {
    /// Single user-role turn attributed to `user`.
    pub fn single_turn(model: &str, prompt: &str, user: &str) -> Self {
        CompletionRequest {
            model: model.to_string(),
            messages: vec![ChatMessage::user(prompt)],
            user: user.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl CompletionResponse {
    /// Content of the first choice, if the backend produced any text.
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .filter(|s| !s.is_empty())
    }
}

// ---------------------------------------------------------------------------
// WebSocket RPC envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: RpcParams,
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcParams {
    pub messages: Vec<ChatMessage>,
    pub token: Option<String>,
}

impl RpcRequest {
    pub fn chat_send(messages: Vec<ChatMessage>, token: Option<String>, id: String) -> Self {
        RpcRequest {
            method: RPC_METHOD_CHAT_SEND.to_string(),
            params: RpcParams { messages, token },
            id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub result: Option<CompletionResponse>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

impl RpcResponse {
    /// Whether the response echoes the request correlation id.
    pub fn matches_id(&self, id: &str) -> bool {
        match &self.id {
            Some(serde_json::Value::String(s)) => s == id,
            _ => false,
        }
    }
}
