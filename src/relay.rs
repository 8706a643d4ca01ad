//! Message relay boundary.
//!
//! Signaling rides on whatever realtime fan-out the surrounding application
//! already has (a broadcast channel service, a pub/sub bus). The core only
//! assumes best-effort, at-most-once-per-send delivery of JSON payloads on
//! named topics: no replay, no delivery guarantee, no ordering across
//! distinct connections. A subscriber must not receive its own published
//! messages.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CallError;

/// Topic prefix for voice-call signaling; both parties derive the same
/// topic from the conversation id.
pub const TOPIC_PREFIX: &str = "voice:";

/// Relay topic for one conversation.
pub fn call_topic(conversation_id: &str) -> String {
    format!("{TOPIC_PREFIX}{conversation_id}")
}

#[async_trait]
pub trait SignalRelay: Send + Sync {
    /// Start receiving messages published to `topic` by other parties.
    /// Delivery order within one subscription is preserved.
    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<mpsc::UnboundedReceiver<serde_json::Value>, CallError>;

    /// Best-effort publish. An `Err` means the message was not delivered;
    /// the caller decides whether that is fatal (for signaling it is not).
    async fn publish(&self, topic: &str, message: serde_json::Value) -> Result<(), CallError>;

    /// Stop receiving messages for `topic` and release the subscription.
    async fn unsubscribe(&self, topic: &str);
}
