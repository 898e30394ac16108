use async_trait::async_trait;

use crate::inbound::InboundMessage;

/// The one reply capability a bridge handler is bound to at setup.
#[async_trait]
pub trait ReplySender: Send + Sync {
    /// Unique name: "dingtalk", "recording", ...
    fn name(&self) -> &str;

    /// Deliver `text` to the conversation `inbound` came from.
    async fn send_reply(&self, inbound: &InboundMessage, text: &str) -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Collecting {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ReplySender for Collecting {
        fn name(&self) -> &str {
            "collecting"
        }

        async fn send_reply(&self, inbound: &InboundMessage, text: &str) -> Result<(), String> {
            self.sent
                .lock()
                .map_err(|_| "poisoned".to_string())?
                .push((inbound.sender_id.clone(), text.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reply_sender_is_object_safe() {
        let collecting = std::sync::Arc::new(Collecting {
            sent: Mutex::new(Vec::new()),
        });
        let sender: std::sync::Arc<dyn ReplySender> = collecting.clone();
        let inbound =
            InboundMessage::from_payload(&json!({"text": {"content": "q"}, "senderId": "u"}))
                .unwrap();
        sender.send_reply(&inbound, "a").await.unwrap();
        assert_eq!(sender.name(), "collecting");
        assert_eq!(
            collecting.sent.lock().unwrap().as_slice(),
            &[("u".to_string(), "a".to_string())]
        );
    }
}
