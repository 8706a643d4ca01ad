//! Transport engine boundary.
//!
//! The engine performs the low-level negotiation (connectivity checks,
//! encryption, media transport) given a standard offer/answer/candidate
//! exchange. Its internal algorithm is its own business; the core relies
//! only on this contract. Engine callbacks are restated as [`EngineEvent`]s
//! pushed into a channel the session owns, so all reactions to them happen
//! in one place.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CallError;
use crate::media::MediaStream;
use crate::signal::{IceCandidateInit, SessionDescription};

/// STUN/TURN servers handed to the engine at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServers {
    pub urls: Vec<String>,
}

impl Default for IceServers {
    fn default() -> Self {
        Self {
            urls: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
        }
    }
}

/// Connection state reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Events an engine pushes to the session that owns it.
pub enum EngineEvent {
    /// A locally gathered transport candidate, to be forwarded to the peer.
    LocalCandidate(IceCandidateInit),
    /// The remote audio stream arrived.
    RemoteTrack(Arc<dyn MediaStream>),
    /// The engine's connection state changed.
    StateChanged(TransportState),
}

impl fmt::Debug for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(&c.candidate).finish(),
            Self::RemoteTrack(_) => f.write_str("RemoteTrack"),
            Self::StateChanged(s) => f.debug_tuple("StateChanged").field(s).finish(),
        }
    }
}

/// One live negotiation session. A call session holds at most one.
#[async_trait]
pub trait TransportEngine: Send + Sync {
    /// Wire a locally captured audio stream into the engine. Must happen
    /// before any offer/answer is generated.
    async fn attach_local_audio(&self, stream: Arc<dyn MediaStream>) -> Result<(), CallError>;

    async fn create_offer(&self) -> Result<SessionDescription, CallError>;

    async fn create_answer(&self) -> Result<SessionDescription, CallError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), CallError>;

    async fn add_remote_candidate(&self, candidate: IceCandidateInit) -> Result<(), CallError>;

    /// Release all engine resources. Must be idempotent.
    async fn close(&self);
}

/// Creates engines. Injected so the core stays independent of the concrete
/// negotiation stack.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create_engine(
        &self,
        ice: &IceServers,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Arc<dyn TransportEngine>, CallError>;
}
