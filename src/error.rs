//! Call-related error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("invalid call state transition: {0}")]
    InvalidTransition(#[from] crate::state::InvalidTransition),

    #[error("media acquisition failed: {0}")]
    Media(String),

    #[error("transport engine error: {0}")]
    Engine(String),

    #[error("signal relay error: {0}")]
    Relay(String),

    #[error("malformed signal payload: {0}")]
    Codec(String),
}
