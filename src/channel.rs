//! Signal channel: relay binding, outbound delivery, inbound filtering.

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::error::CallError;
use crate::relay::{SignalRelay, call_topic};
use crate::signal::{SignalBody, SignalMessage};

/// Signaling endpoint for exactly one conversation.
///
/// Owns the topic derivation and the addressing: every outbound signal is
/// stamped with the local/remote party ids, and every inbound payload is
/// decoded and checked against them before the session sees it.
pub struct SignalChannel {
    relay: Arc<dyn SignalRelay>,
    topic: String,
    conversation_id: String,
    local_party: String,
    remote_party: String,
}

impl SignalChannel {
    /// Subscribe to the conversation's signaling topic. Returns the channel
    /// plus the raw inbound feed for the session's pump task.
    pub async fn bind(
        relay: Arc<dyn SignalRelay>,
        conversation_id: &str,
        local_party: &str,
        remote_party: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<serde_json::Value>), CallError> {
        let topic = call_topic(conversation_id);
        let inbound = relay.subscribe(&topic).await?;
        debug!(target: "Call/Signal", "bound to {topic}");
        Ok((
            Self {
                relay,
                topic,
                conversation_id: conversation_id.to_string(),
                local_party: local_party.to_string(),
                remote_party: remote_party.to_string(),
            },
            inbound,
        ))
    }

    /// Best-effort send to the remote party. A failed delivery degrades the
    /// call (the peer may stall in calling/ringing) but never aborts it, so
    /// failures are logged and not retried.
    pub async fn send(&self, body: SignalBody) {
        let kind = body.kind();
        let message = SignalMessage {
            from: self.local_party.clone(),
            to: self.remote_party.clone(),
            conversation_id: self.conversation_id.clone(),
            body,
        };
        let payload = match message.to_value() {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "Call/Signal", "could not encode {kind} signal: {e}");
                return;
            }
        };
        debug!(target: "Call/Signal", "sending {kind} on {}", self.topic);
        if let Err(e) = self.relay.publish(&self.topic, payload).await {
            warn!(target: "Call/Signal", "failed to deliver {kind} signal: {e}");
        }
    }

    /// Decode a raw relay payload. Malformed messages and messages meant
    /// for another party or conversation are dropped here.
    pub fn decode(&self, raw: serde_json::Value) -> Option<SignalMessage> {
        let message = match SignalMessage::from_value(raw) {
            Ok(m) => m,
            Err(e) => {
                debug!(target: "Call/Signal", "discarding malformed signal: {e}");
                return None;
            }
        };
        if message.to != self.local_party || message.conversation_id != self.conversation_id {
            debug!(
                target: "Call/Signal",
                "discarding {} signal addressed to {}/{}",
                message.body.kind(),
                message.to,
                message.conversation_id
            );
            return None;
        }
        Some(message)
    }

    pub async fn unbind(&self) {
        self.relay.unsubscribe(&self.topic).await;
        debug!(target: "Call/Signal", "unbound from {}", self.topic);
    }
}
