//! Outbound notifications.
//!
//! Delivery is fire-and-forget: failures are logged and dropped, never
//! retried and never surfaced to the engine.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, warn};

/// Upper bound on one delivery, so a stalled endpoint cannot hold up a tick.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

/// POSTs each message as a `text/plain` body.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Option<String>,
}

impl WebhookNotifier {
    /// A notifier for `url`; with no URL every message is discarded.
    pub fn new(url: Option<String>) -> reqwest::Result<Self> {
        Self::with_timeout(url, DELIVERY_TIMEOUT)
    }

    pub fn with_timeout(url: Option<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, message: &str) {
        let Some(url) = &self.url else {
            return;
        };

        let sent = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(message.to_string())
            .send()
            .await;

        match sent {
            Ok(resp) if resp.status().as_u16() >= 400 => {
                warn!("Notification failed with status: {}", resp.status());
            }
            Ok(_) => debug!("Notification sent successfully"),
            Err(e) => error!("Error sending notification: {}", e),
        }
    }
}

/// Collects messages in memory for assertions.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingNotifier {
    messages: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
