pub mod dingtalk;

// Re-export adapter types
pub use dingtalk::DingTalkReplier;
