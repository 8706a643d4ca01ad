//! Local media boundary.
//!
//! The core never touches capture hardware directly; it drives these traits
//! and owns the returned handles for the lifetime of one call session.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CallError;

/// Source of the local audio stream (microphone capture).
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire a live local audio stream. Fails if the user denies the
    /// capture permission or no device is available.
    async fn capture_audio(&self) -> Result<Arc<dyn MediaStream>, CallError>;
}

/// A live audio stream handle, local or remote.
pub trait MediaStream: Send + Sync {
    /// Enable or disable the outbound audio without releasing the device.
    /// Disabling is how mute works; the stream keeps running.
    fn set_enabled(&self, enabled: bool);

    /// Stop the stream and release the underlying hardware resources.
    /// Must be idempotent.
    fn stop(&self);
}

/// The process-wide audio output. Bound to the most recent remote stream;
/// a new call simply rebinds it.
pub trait PlaybackSink: Send + Sync {
    fn bind(&self, stream: Arc<dyn MediaStream>);
}
