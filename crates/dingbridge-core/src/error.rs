use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid inbound payload: {0}")]
    InvalidPayload(String),

    #[error("Inbound message has no text content")]
    EmptyMessage,

    #[error("Backend returned HTTP {status}: {body}")]
    BackendStatus { status: u16, body: String },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Backend timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
