use std::sync::Arc;

use anyhow::anyhow;
use tracing::info;

use crate::backend::create_backend;
use crate::bridge::BridgeHandler;
use crate::channels::dingtalk::{
    start_stream_client, start_webhook_server, DingTalkReplier, StreamRuntimeContext,
    WebhookRuntimeContext,
};
use crate::config::{BackendTransport, Config, ConnectionMode};

/// Build the shared handler from `config`.
pub fn build_handler(config: &Config) -> anyhow::Result<Arc<BridgeHandler>> {
    let backend = create_backend(config)?;
    let target = match config.backend_transport {
        BackendTransport::Http => config.backend_url.as_str(),
        BackendTransport::Websocket => config.backend_ws_url.as_str(),
    };
    info!(
        "Completion backend: {} -> {target} (model={}, timeout={}s)",
        backend.name(),
        config.model,
        config.request_timeout_secs
    );
    let replier = Arc::new(DingTalkReplier::new(
        "dingtalk".into(),
        config.robot_webhook_url.clone(),
    ));
    Ok(Arc::new(BridgeHandler::from_config(config, backend, replier)))
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let handler = build_handler(&config)?;

    let channel = async {
        match config.connection_mode {
            ConnectionMode::Stream => {
                let ctx = StreamRuntimeContext::from_config(&config);
                info!(
                    "Starting DingTalk adapter '{}' (Stream mode, client_id={})",
                    ctx.channel_name, ctx.client_id
                );
                start_stream_client(handler.clone(), ctx).await;
                Ok(())
            }
            ConnectionMode::Webhook => {
                let ctx = WebhookRuntimeContext::from_config(&config);
                info!(
                    "Starting DingTalk adapter (HTTP callback mode) on {}:{}",
                    ctx.host, ctx.port
                );
                start_webhook_server(handler.clone(), ctx).await
            }
        }
    };

    info!("Runtime active; waiting for Ctrl-C");
    tokio::select! {
        result = channel => result,
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|e| anyhow!("Failed to listen for Ctrl-C: {e}"))?;
            info!("Ctrl-C received, shutting down");
            Ok(())
        }
    }
}
