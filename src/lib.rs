//! Two-party voice-call signaling core.
//!
//! Establishes, maintains and tears down a real-time audio session between
//! the two participants of a conversation. The heavy lifting (connectivity,
//! encryption, media) is delegated to a pluggable transport engine; this
//! crate owns the part that is easy to get wrong around it: the offer/
//! answer/candidate exchange over a best-effort message relay, the call
//! state machine, and the lifecycle of the media and transport resources.
//!
//! # Architecture
//!
//! - [`SignalMessage`] & [`SignalChannel`]: wire codec plus relay binding,
//!   scoped to one conversation
//! - [`CallState`] & [`CallSession`]: the state machine and the session
//!   object that owns all transitions and side effects
//! - [`TransportSession`]: wraps the one engine instance per call and
//!   queues candidates that outrun the remote description
//! - [`SignalRelay`], [`MediaSource`], [`TransportEngine`]: the boundaries
//!   the surrounding application implements

pub mod channel;
pub mod engine;
pub mod error;
pub mod media;
pub mod relay;
pub mod session;
pub mod signal;
pub mod state;
pub mod transport;

pub use channel::SignalChannel;
pub use engine::{EngineEvent, IceServers, TransportEngine, TransportFactory, TransportState};
pub use error::CallError;
pub use media::{MediaSource, MediaStream, PlaybackSink};
pub use relay::{SignalRelay, call_topic};
pub use session::{CallConfig, CallSession, CallSnapshot};
pub use signal::{IceCandidateInit, SdpType, SessionDescription, SignalBody, SignalMessage};
pub use state::{CallState, CallTransition, InvalidTransition};
pub use transport::TransportSession;
