//! Notifier port for delivering alerts to people.

use std::error::Error;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// Boxed future type alias used by [`Notifier`] to keep the trait dyn-compatible.
pub type NotifyFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, Box<dyn Error + Send + Sync>>> + Send + 'a>>;

/// Delivery channel for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Email.
    Email,
    /// Chat message.
    Chat,
}

/// A single notification to deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Recipient address.
    pub recipient: String,
    /// Delivery channel.
    pub channel: Channel,
    /// Template name understood by the delivery service.
    pub template: String,
    /// Template variables.
    pub payload: serde_json::Value,
}

/// Delivers notifications. The core only records outcomes.
pub trait Notifier: Send + Sync {
    /// Sends a notification, returning the delivery id.
    ///
    /// # Errors
    ///
    /// Returns an error if the delivery service rejects or cannot be reached.
    fn send(&self, notification: &Notification) -> NotifyFuture<'_>;
}
