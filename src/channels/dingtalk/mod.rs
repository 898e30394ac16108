pub mod reply;
pub mod stream;
pub mod webhook;

pub use reply::DingTalkReplier;
pub use stream::{start_stream_client, StreamRuntimeContext};
pub use webhook::{start_webhook_server, WebhookRuntimeContext};
