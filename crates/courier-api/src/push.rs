//! Push notification delivery for recipients without a live socket.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use courier_db::models::MessageRow;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    pub data: Value,
}

impl PushNotification {
    /// Notification announcing `message`, titled with the author's name.
    pub fn new_message(sender_name: &str, message: &MessageRow) -> Self {
        Self {
            title: sender_name.to_string(),
            body: message.content.summary().to_string(),
            data: json!({
                "eventType": "NewMessage",
                "chatId": message.chat_id,
                "messageId": message.id,
            }),
        }
    }
}

/// Best-effort delivery of a notification to one device.
///
/// Implementations report failure through the return value and must not
/// panic; callers log and move on.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, device_token: &str, notification: &PushNotification, badge: u64) -> bool;
}

/// FCM legacy HTTP API sender.
pub struct FcmPushSender {
    client: reqwest::Client,
    endpoint: String,
    server_key: String,
}

impl FcmPushSender {
    pub fn new(endpoint: String, server_key: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            server_key,
        })
    }
}

#[async_trait]
impl PushSender for FcmPushSender {
    async fn send(&self, device_token: &str, notification: &PushNotification, badge: u64) -> bool {
        let body = json!({
            "to": device_token,
            "notification": {
                "title": notification.title,
                "body": notification.body,
                "badge": badge,
            },
            "data": notification.data,
        });

        let result = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("key={}", self.server_key))
            .json(&body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!("FCM rejected push: HTTP {}", resp.status());
                false
            }
            Err(e) => {
                warn!("FCM request failed: {}", e);
                false
            }
        }
    }
}

/// Used when no push credentials are configured.
pub struct DisabledPushSender;

#[async_trait]
impl PushSender for DisabledPushSender {
    async fn send(&self, _device_token: &str, notification: &PushNotification, _badge: u64) -> bool {
        debug!("Push disabled, dropping notification '{}'", notification.title);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use courier_types::models::{ImageRef, MessageContent, MessageStatus};

    fn row(content: MessageContent) -> MessageRow {
        MessageRow {
            id: 12,
            chat_id: 3,
            creator_id: 1,
            created_at: Utc::now(),
            content,
            status: MessageStatus::Sent,
            is_active: true,
        }
    }

    #[test]
    fn text_body_is_the_text() {
        let n = PushNotification::new_message("alice", &row(MessageContent::Text { text: "hi".into() }));
        assert_eq!(n.title, "alice");
        assert_eq!(n.body, "hi");
        assert_eq!(n.data["chatId"], 3);
        assert_eq!(n.data["messageId"], 12);
    }

    #[test]
    fn image_body_is_generic() {
        let image = ImageRef {
            id: 4,
            path: "a.png".into(),
            compact_path: None,
        };
        let n = PushNotification::new_message("alice", &row(MessageContent::Image { image }));
        assert_eq!(n.body, "Image");
    }

    #[tokio::test]
    async fn disabled_sender_reports_failure() {
        let n = PushNotification::new_message("alice", &row(MessageContent::Text { text: "hi".into() }));
        assert!(!DisabledPushSender.send("token", &n, 1).await);
    }
}
