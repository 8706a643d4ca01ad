//! Transport session management.
//!
//! Wraps exactly one transport engine per call session and papers over the
//! one ordering hazard in the signaling exchange: candidates routinely
//! arrive before the remote description on a best-effort relay. Those are
//! queued here and flushed the moment the description lands.

use std::sync::Arc;

use log::{debug, warn};

use crate::engine::TransportEngine;
use crate::error::CallError;
use crate::signal::{IceCandidateInit, SessionDescription};

pub struct TransportSession {
    engine: Arc<dyn TransportEngine>,
    have_remote_description: bool,
    pending_candidates: Vec<IceCandidateInit>,
    closed: bool,
}

impl TransportSession {
    pub fn new(engine: Arc<dyn TransportEngine>) -> Self {
        Self {
            engine,
            have_remote_description: false,
            pending_candidates: Vec::new(),
            closed: false,
        }
    }

    pub fn engine(&self) -> &Arc<dyn TransportEngine> {
        &self.engine
    }

    /// Apply the remote offer/answer, then flush every candidate that was
    /// queued while it was missing, in arrival order.
    pub async fn apply_remote_description(
        &mut self,
        desc: SessionDescription,
    ) -> Result<(), CallError> {
        self.engine.set_remote_description(desc).await?;
        self.have_remote_description = true;

        for candidate in std::mem::take(&mut self.pending_candidates) {
            // A single bad candidate degrades connectivity, it does not
            // abort the negotiation.
            if let Err(e) = self.engine.add_remote_candidate(candidate).await {
                warn!(target: "Call/Transport", "queued candidate rejected: {e}");
            }
        }
        Ok(())
    }

    /// Hand a remote candidate to the engine, or queue it if the remote
    /// description has not been applied yet.
    pub async fn apply_remote_candidate(
        &mut self,
        candidate: IceCandidateInit,
    ) -> Result<(), CallError> {
        if !self.have_remote_description {
            debug!(
                target: "Call/Transport",
                "queueing candidate until remote description is set ({} queued)",
                self.pending_candidates.len() + 1
            );
            self.pending_candidates.push(candidate);
            return Ok(());
        }
        self.engine.add_remote_candidate(candidate).await
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Close the engine. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pending_candidates.clear();
        self.engine.close().await;
    }
}
