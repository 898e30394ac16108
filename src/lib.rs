pub mod backend;
pub mod bridge;
pub mod channels;
pub mod config;
pub mod content_filter;
pub mod runtime;

pub use dingbridge_app::logging;
pub use dingbridge_channels::inbound;
pub use dingbridge_channels::reply_sender;
pub use dingbridge_core::completion_types;
pub use dingbridge_core::error;
pub use dingbridge_core::text;
