pub mod inbound;
pub mod reply_sender;
