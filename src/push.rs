// src/push.rs
// Best-effort topic notifications through the external push gateway

use async_trait::async_trait;
use tracing::{debug, warn};

/// Fire-and-forget notification to everyone subscribed to a chat topic.
/// Delivery failures are logged and otherwise ignored; nothing in the core
/// depends on a push arriving.
#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn notify(&self, topic: &str, title: &str, body: &str, image: &str);
}

/// Notifier POSTing topic messages to an FCM-style HTTP gateway.
pub struct HttpPushNotifier {
    client: reqwest::Client,
    endpoint: String,
    server_key: String,
}

impl HttpPushNotifier {
    pub fn new(endpoint: String, server_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            server_key,
        }
    }
}

#[async_trait]
impl PushNotifier for HttpPushNotifier {
    async fn notify(&self, topic: &str, title: &str, body: &str, image: &str) {
        let message = serde_json::json!({
            "to": format!("/topics/{topic}"),
            "android": { "priority": "high" },
            "notification": {
                "title": title,
                "body": body,
                "image": image,
                "sound": "default",
            },
        });

        let result = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("key={}", self.server_key))
            .json(&message)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(topic, "push notification sent");
            }
            Ok(response) => {
                warn!(topic, status = %response.status(), "push gateway rejected notification");
            }
            Err(e) => {
                warn!(topic, "push notification failed: {e}");
            }
        }
    }
}

/// Notifier used when no gateway is configured.
#[derive(Default)]
pub struct NoopNotifier;

#[async_trait]
impl PushNotifier for NoopNotifier {
    async fn notify(&self, topic: &str, _title: &str, _body: &str, _image: &str) {
        debug!(topic, "push gateway not configured, notification dropped");
    }
}
