//! Call state machine implementation.

use serde::Serialize;
use thiserror::Error;

/// Current state of a call session.
///
/// This is the single source of truth the UI observes; everything else
/// (mute flag, duration, buffered offer) hangs off the session itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    /// No call in progress.
    #[default]
    Idle,
    /// Outgoing call: offer sent, waiting for the remote party.
    Calling,
    /// Incoming call: offer received, waiting for a local accept/reject.
    Ringing,
    /// Media session established (or being established after accept).
    Connected,
    /// Transient label shown while teardown runs; always followed by `Idle`.
    Ended,
}

impl CallState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether any call activity is in progress.
    pub fn in_call(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    pub fn can_accept(&self) -> bool {
        matches!(self, Self::Ringing)
    }

    pub fn can_reject(&self) -> bool {
        matches!(self, Self::Ringing)
    }

    /// Apply a transition. Returns the next state, or an error if the edge
    /// does not exist.
    pub fn apply(self, transition: CallTransition) -> Result<CallState, InvalidTransition> {
        use CallTransition::*;
        let next = match (self, transition) {
            (Self::Idle, DialStarted) => Self::Calling,
            // An offer landing mid-dial is the glare case; the session
            // decides which side yields before applying this edge.
            (Self::Idle | Self::Calling, OfferReceived) => Self::Ringing,
            (Self::Ringing, LocalAccepted) => Self::Connected,
            (Self::Ringing, LocalRejected) => Self::Idle,
            (Self::Calling | Self::Ringing | Self::Connected, TransportConnected) => {
                Self::Connected
            }
            (Self::Calling | Self::Ringing | Self::Connected | Self::Ended, HangUp) => Self::Ended,
            (Self::Ended, Reset) => Self::Idle,
            (current, attempted) => {
                return Err(InvalidTransition { current, attempted });
            }
        };
        Ok(next)
    }
}

/// State transitions for call sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTransition {
    /// Local user started dialing.
    DialStarted,
    /// Remote offer arrived and was adopted.
    OfferReceived,
    /// Local user accepted the buffered offer.
    LocalAccepted,
    /// Local user rejected the buffered offer.
    LocalRejected,
    /// The transport engine reported a connected media path.
    TransportConnected,
    /// Teardown started (local hang-up, remote hang-up, or transport failure).
    HangUp,
    /// Teardown finished; session is reusable.
    Reset,
}

#[derive(Debug, Clone, Copy, Error)]
#[error("invalid transition {attempted:?} in state {current:?}")]
pub struct InvalidTransition {
    pub current: CallState,
    pub attempted: CallTransition,
}
