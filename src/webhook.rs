//! Outbound webhook notifier
//!
//! Fire-and-forget delivery: `send` spawns the request and returns
//! immediately, so the router is never blocked on a slow or dead
//! receiver. Each event is attempted at offsets 0 s, 1 s and 3 s; any
//! 2xx response counts as delivered.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::router::WebhookSink;

const RETRY_DELAYS: [Duration; 3] = [
    Duration::ZERO,
    Duration::from_secs(1),
    Duration::from_secs(3),
];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Wire format of a webhook event
#[derive(Debug, Serialize)]
struct Event {
    event: String,
    timestamp: String,
    source: String,
    payload: Value,
}

/// Sends events to a remote endpoint.
#[derive(Clone)]
pub struct Webhook {
    url: String,
    secret: String,
    source: String,
    client: reqwest::Client,
}

impl Webhook {
    pub fn new(
        url: impl Into<String>,
        secret: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");

        Self {
            url: url.into(),
            secret: secret.into(),
            source: source.into(),
            client,
        }
    }

    async fn send_once(&self, event: &Event) -> Result<(), String> {
        let response = self
            .client
            .post(&self.url)
            .header("X-Webhook-Secret", &self.secret)
            .json(event)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("server returned {}", response.status().as_u16()));
        }
        Ok(())
    }

    async fn send_with_retry(self, name: String, payload: Value) {
        let event = Event {
            event: name.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            source: self.source.clone(),
            payload,
        };

        let mut last_err = String::new();
        for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
            if !delay.is_zero() {
                tokio::time::sleep(*delay).await;
            }

            match self.send_once(&event).await {
                Ok(()) => {
                    info!("Webhook sent: {}", name);
                    return;
                }
                Err(e) => {
                    last_err = e;
                    if attempt + 1 < RETRY_DELAYS.len() {
                        warn!("Webhook attempt {} failed: {}, retrying", attempt + 1, last_err);
                    }
                }
            }
        }

        error!(
            "Webhook failed after {} attempts: {} - {}",
            RETRY_DELAYS.len(),
            name,
            last_err
        );
    }
}

impl WebhookSink for Webhook {
    fn send(&self, event: &str, payload: Value) {
        let this = self.clone();
        tokio::spawn(this.send_with_retry(event.to_string(), payload));
    }
}
