use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::completion_types::{CompletionRequest, CompletionResponse};
use crate::config::{BackendTransport, Config};
use crate::error::BridgeError;

pub mod http;
pub mod ws;

pub use http::HttpBackend;
pub use ws::WsBackend;

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// A completion service reachable from the bridge.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, BridgeError>;
}

pub fn create_backend(config: &Config) -> Result<Arc<dyn CompletionBackend>, BridgeError> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let backend: Arc<dyn CompletionBackend> = match config.backend_transport {
        BackendTransport::Http => Arc::new(HttpBackend::new(
            config.backend_url.clone(),
            config.backend_token.clone(),
            timeout,
        )?),
        BackendTransport::Websocket => Arc::new(WsBackend::new(
            config.backend_ws_url.clone(),
            config.backend_token.clone(),
            timeout,
        )),
    };
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(transport: &str) -> Config {
        let yaml = format!(
            "dingtalk_app_key: k\ndingtalk_app_secret: s\nbackend_transport: {transport}\n"
        );
        let mut config = Config::from_yaml_str(&yaml).unwrap();
        config.post_deserialize().unwrap();
        config
    }

    #[test]
    fn test_create_backend_http() {
        let backend = create_backend(&config("http")).unwrap();
        assert_eq!(backend.name(), "http");
    }

    #[test]
    fn test_create_backend_websocket() {
        let backend = create_backend(&config("websocket")).unwrap();
        assert_eq!(backend.name(), "websocket");
    }
}
