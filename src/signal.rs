//! Signaling message wire types.
//!
//! Signals travel between the two parties as flat JSON objects on the
//! per-conversation relay topic:
//!
//! ```json
//! { "type": "offer" | "answer" | "ice-candidate" | "end-call",
//!   "from": "...", "to": "...", "conversationId": "...",
//!   "data": { ... } }
//! ```
//!
//! `data` carries a session description for offer/answer and a transport
//! candidate for ice-candidate; end-call has no payload.

use serde::{Deserialize, Serialize};

use crate::error::CallError;

/// A single signaling message addressed between the two parties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMessage {
    pub from: String,
    pub to: String,
    pub conversation_id: String,
    #[serde(flatten)]
    pub body: SignalBody,
}

/// The type-dependent part of a signal: discriminator plus payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum SignalBody {
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidateInit),
    EndCall,
}

impl SignalBody {
    /// Wire name of the signal type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer(_) => "offer",
            Self::Answer(_) => "answer",
            Self::IceCandidate(_) => "ice-candidate",
            Self::EndCall => "end-call",
        }
    }
}

impl SignalMessage {
    pub fn to_value(&self) -> Result<serde_json::Value, CallError> {
        serde_json::to_value(self).map_err(|e| CallError::Codec(e.to_string()))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, CallError> {
        serde_json::from_value(value).map_err(|e| CallError::Codec(e.to_string()))
    }
}

/// One half of the offer/answer negotiation exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// A transport candidate proposed by one side for the media path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidateInit {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Default::default()
        }
    }
}
