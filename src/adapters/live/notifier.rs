//! Live adapters for the `Notifier` port.

use reqwest::Client;
use serde::Deserialize;

use crate::ports::notifier::{Notification, Notifier, NotifyFuture};

/// Posts notifications as JSON to a webhook that performs the delivery.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    /// Creates a notifier posting to `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { client: Client::new(), url: url.into() }
    }
}

/// Body returned by the webhook on success.
#[derive(Deserialize)]
struct WebhookReceipt {
    delivery_id: String,
}

impl Notifier for WebhookNotifier {
    fn send(&self, notification: &Notification) -> NotifyFuture<'_> {
        let body = notification.clone();

        Box::pin(async move {
            let response = self.client.post(&self.url).json(&body).send().await.map_err(
                |e| -> Box<dyn std::error::Error + Send + Sync> {
                    format!("webhook request failed: {e}").into()
                },
            )?;

            let status = response.status();
            let text =
                response.text().await.map_err(|e| -> Box<dyn std::error::Error + Send + Sync> {
                    format!("failed to read webhook response: {e}").into()
                })?;

            if !status.is_success() {
                return Err(format!("webhook error ({}): {text}", status.as_u16()).into());
            }

            let receipt: WebhookReceipt = serde_json::from_str(&text).map_err(
                |e| -> Box<dyn std::error::Error + Send + Sync> {
                    format!("failed to parse webhook receipt: {e}").into()
                },
            )?;
            Ok(receipt.delivery_id)
        })
    }
}

/// Writes notifications to the log instead of delivering them.
///
/// Used by the CLI when no webhook is configured.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, notification: &Notification) -> NotifyFuture<'_> {
        let recipient = notification.recipient.clone();
        let template = notification.template.clone();
        Box::pin(async move {
            tracing::info!(%recipient, %template, "notification logged (no webhook configured)");
            Ok(format!("log:{recipient}:{template}"))
        })
    }
}
