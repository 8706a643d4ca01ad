//! Call session orchestration.
//!
//! One [`CallSession`] per conversation pair. The session owns every
//! resource with call lifetime (relay subscription, local media, transport
//! engine, duration timer) and is the only place state transitions happen:
//! relay messages and engine callbacks are funneled into a single pump
//! task, so inbound handling follows relay delivery order, and public
//! operations serialize against the same session lock.
//!
//! Async suspensions (microphone acquisition, engine negotiation) can be
//! superseded by a hang-up or a simultaneous-dial resolution while they are
//! in flight. Each call attempt carries a generation number; a suspended
//! operation re-checks it after resuming and discards its result when the
//! attempt is no longer live.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{Mutex, Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, interval_at};

use crate::channel::SignalChannel;
use crate::engine::{EngineEvent, IceServers, TransportFactory, TransportState};
use crate::error::CallError;
use crate::media::{MediaSource, MediaStream, PlaybackSink};
use crate::relay::SignalRelay;
use crate::signal::{IceCandidateInit, SessionDescription, SignalBody, SignalMessage};
use crate::state::{CallState, CallTransition, InvalidTransition};
use crate::transport::TransportSession;

/// Identities for one call session.
#[derive(Debug, Clone)]
pub struct CallConfig {
    pub conversation_id: String,
    pub local_party: String,
    pub remote_party: String,
    pub ice_servers: IceServers,
}

impl CallConfig {
    pub fn new(
        conversation_id: impl Into<String>,
        local_party: impl Into<String>,
        remote_party: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            local_party: local_party.into(),
            remote_party: remote_party.into(),
            ice_servers: IceServers::default(),
        }
    }
}

/// Observable session snapshot, published on every change.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallSnapshot {
    pub state: CallState,
    pub is_muted: bool,
    pub duration_secs: u64,
    pub connected_at: Option<DateTime<Utc>>,
}

/// Why a teardown ran; decides whether the peer is notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    /// Local hang-up.
    Hangup,
    /// Inbound end-call signal. Stays silent: echoing an end-call back
    /// would bounce between the two parties forever.
    RemoteHangup,
    /// The engine reported disconnected/failed.
    TransportFailed,
    /// Media acquisition or negotiation setup failed before the call was
    /// established; nothing useful to tell the peer.
    SetupFailed,
}

impl EndReason {
    fn notifies_peer(self) -> bool {
        matches!(self, Self::Hangup | Self::TransportFailed)
    }
}

enum SessionEvent {
    Engine { generation: u64, event: EngineEvent },
}

struct SessionInner {
    state: CallState,
    is_muted: bool,
    duration_secs: u64,
    connected_at: Option<DateTime<Utc>>,
    /// At most one buffered inbound offer, awaiting accept/reject.
    pending_remote_offer: Option<SessionDescription>,
    /// Candidates that arrived while no transport session exists yet
    /// (typically while ringing); handed to the one accept_call creates.
    early_candidates: Vec<IceCandidateInit>,
    local_media: Option<Arc<dyn MediaStream>>,
    transport: Option<TransportSession>,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever the current call attempt is superseded.
    generation: u64,
}

pub struct CallSession {
    config: CallConfig,
    channel: SignalChannel,
    media: Arc<dyn MediaSource>,
    factory: Arc<dyn TransportFactory>,
    sink: Arc<dyn PlaybackSink>,
    inner: Mutex<SessionInner>,
    snapshot: watch::Sender<CallSnapshot>,
    events: mpsc::UnboundedSender<SessionEvent>,
    shutdown: Notify,
}

impl CallSession {
    /// Bind to the conversation's signaling topic and start the pump task.
    pub async fn open(
        config: CallConfig,
        relay: Arc<dyn SignalRelay>,
        media: Arc<dyn MediaSource>,
        factory: Arc<dyn TransportFactory>,
        sink: Arc<dyn PlaybackSink>,
    ) -> Result<Arc<Self>, CallError> {
        let (channel, signals) = SignalChannel::bind(
            relay,
            &config.conversation_id,
            &config.local_party,
            &config.remote_party,
        )
        .await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(CallSnapshot::default());

        let session = Arc::new(Self {
            config,
            channel,
            media,
            factory,
            sink,
            inner: Mutex::new(SessionInner {
                state: CallState::Idle,
                is_muted: false,
                duration_secs: 0,
                connected_at: None,
                pending_remote_offer: None,
                early_candidates: Vec::new(),
                local_media: None,
                transport: None,
                timer: None,
                generation: 0,
            }),
            snapshot: snapshot_tx,
            events: events_tx,
            shutdown: Notify::new(),
        });
        tokio::spawn(session.clone().pump(signals, events_rx));
        Ok(session)
    }

    // ---- public operations ------------------------------------------------

    /// Dial the remote party: acquire the microphone, set up the transport
    /// session and send the offer. A no-op unless the session is idle.
    pub async fn start_call(self: &Arc<Self>) -> Result<(), CallError> {
        let generation = {
            let mut inner = self.inner.lock().await;
            if !inner.state.is_idle() {
                debug!(
                    target: "Call/Session",
                    "{}: start_call ignored while {:?}",
                    self.config.conversation_id, inner.state
                );
                return Ok(());
            }
            self.advance(&mut inner, CallTransition::DialStarted);
            inner.generation += 1;
            inner.generation
        };
        info!(
            target: "Call/Session",
            "{}: calling {}", self.config.conversation_id, self.config.remote_party
        );

        let stream = match self.media.capture_audio().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    target: "Call/Session",
                    "{}: microphone unavailable: {e}", self.config.conversation_id
                );
                self.teardown_attempt(generation, EndReason::SetupFailed).await;
                return Err(e);
            }
        };

        let mut inner = self.inner.lock().await;
        if inner.generation != generation || inner.state != CallState::Calling {
            // Superseded while waiting on the microphone.
            stream.stop();
            return Ok(());
        }
        stream.set_enabled(!inner.is_muted);
        inner.local_media = Some(stream);

        let offer = match self.open_transport(&mut inner, generation).await {
            Ok(()) => match inner.transport.as_ref() {
                Some(transport) => transport.engine().create_offer().await,
                None => Err(CallError::Engine("transport session missing".into())),
            },
            Err(e) => Err(e),
        };
        match offer {
            Ok(offer) => {
                drop(inner);
                self.channel.send(SignalBody::Offer(offer)).await;
                Ok(())
            }
            Err(e) => {
                drop(inner);
                warn!(
                    target: "Call/Session",
                    "{}: call setup failed: {e}", self.config.conversation_id
                );
                self.teardown_attempt(generation, EndReason::SetupFailed).await;
                Err(e)
            }
        }
    }

    /// Accept the buffered inbound offer: acquire the microphone, set up
    /// the transport session in answer mode and send the answer.
    pub async fn accept_call(self: &Arc<Self>) -> Result<(), CallError> {
        let (generation, offer) = {
            let mut inner = self.inner.lock().await;
            if !inner.state.can_accept() {
                return Err(CallError::InvalidTransition(InvalidTransition {
                    current: inner.state,
                    attempted: CallTransition::LocalAccepted,
                }));
            }
            let offer = match inner.pending_remote_offer.take() {
                Some(offer) => offer,
                None => {
                    return Err(CallError::InvalidTransition(InvalidTransition {
                        current: inner.state,
                        attempted: CallTransition::LocalAccepted,
                    }));
                }
            };
            inner.generation += 1;
            (inner.generation, offer)
        };
        info!(
            target: "Call/Session",
            "{}: accepting call from {}", self.config.conversation_id, self.config.remote_party
        );

        let stream = match self.media.capture_audio().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    target: "Call/Session",
                    "{}: microphone unavailable: {e}", self.config.conversation_id
                );
                self.teardown_attempt(generation, EndReason::SetupFailed).await;
                return Err(e);
            }
        };

        let mut inner = self.inner.lock().await;
        if inner.generation != generation || inner.state != CallState::Ringing {
            stream.stop();
            return Ok(());
        }
        stream.set_enabled(!inner.is_muted);
        inner.local_media = Some(stream);

        let answer = match self.open_transport(&mut inner, generation).await {
            Ok(()) => match inner.transport.as_mut() {
                Some(transport) => match transport.apply_remote_description(offer).await {
                    Ok(()) => transport.engine().create_answer().await,
                    Err(e) => Err(e),
                },
                None => Err(CallError::Engine("transport session missing".into())),
            },
            Err(e) => Err(e),
        };
        match answer {
            Ok(answer) => {
                self.advance(&mut inner, CallTransition::LocalAccepted);
                drop(inner);
                self.channel.send(SignalBody::Answer(answer)).await;
                Ok(())
            }
            Err(e) => {
                drop(inner);
                warn!(
                    target: "Call/Session",
                    "{}: call setup failed: {e}", self.config.conversation_id
                );
                self.teardown_attempt(generation, EndReason::SetupFailed).await;
                Err(e)
            }
        }
    }

    /// Decline the buffered inbound offer. No media was acquired while
    /// ringing, so there is nothing to release.
    pub async fn reject_call(&self) -> Result<(), CallError> {
        {
            let mut inner = self.inner.lock().await;
            if !inner.state.can_reject() {
                return Err(CallError::InvalidTransition(InvalidTransition {
                    current: inner.state,
                    attempted: CallTransition::LocalRejected,
                }));
            }
            inner.generation += 1;
            inner.pending_remote_offer = None;
            inner.early_candidates.clear();
            self.advance(&mut inner, CallTransition::LocalRejected);
        }
        info!(target: "Call/Session", "{}: call rejected", self.config.conversation_id);
        self.channel.send(SignalBody::EndCall).await;
        Ok(())
    }

    /// Hang up. Safe to call in any state, any number of times.
    pub async fn end_call(&self) {
        self.teardown(EndReason::Hangup).await;
    }

    /// Flip the local mute flag; applies to the live microphone stream if
    /// one exists. Independent of call state.
    pub async fn toggle_mute(&self) -> bool {
        let mut inner = self.inner.lock().await;
        inner.is_muted = !inner.is_muted;
        if let Some(stream) = &inner.local_media {
            stream.set_enabled(!inner.is_muted);
        }
        self.publish(&inner);
        debug!(
            target: "Call/Session",
            "{}: muted={}", self.config.conversation_id, inner.is_muted
        );
        inner.is_muted
    }

    /// End any active call, drop the relay subscription and stop the pump.
    /// The session is unusable afterwards.
    pub async fn close(&self) {
        self.end_call().await;
        self.channel.unbind().await;
        self.shutdown.notify_one();
    }

    // ---- observation ------------------------------------------------------

    /// Subscribe to snapshot updates.
    pub fn observe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn state(&self) -> CallState {
        self.snapshot.borrow().state
    }

    pub fn is_muted(&self) -> bool {
        self.snapshot.borrow().is_muted
    }

    pub fn duration_secs(&self) -> u64 {
        self.snapshot.borrow().duration_secs
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    // ---- event pump -------------------------------------------------------

    async fn pump(
        self: Arc<Self>,
        mut signals: mpsc::UnboundedReceiver<serde_json::Value>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let mut signals_open = true;
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(SessionEvent::Engine { generation, event }) => {
                        self.handle_engine_event(generation, event).await;
                    }
                    None => break,
                },
                raw = signals.recv(), if signals_open => match raw {
                    Some(raw) => {
                        if let Some(message) = self.channel.decode(raw) {
                            self.handle_signal(message).await;
                        }
                    }
                    None => {
                        debug!(
                            target: "Call/Session",
                            "{}: signal feed closed", self.config.conversation_id
                        );
                        signals_open = false;
                    }
                },
                _ = self.shutdown.notified() => break,
            }
        }
        debug!(target: "Call/Session", "{}: pump stopped", self.config.conversation_id);
    }

    async fn handle_signal(self: &Arc<Self>, message: SignalMessage) {
        debug!(
            target: "Call/Session",
            "{}: received {} from {}",
            self.config.conversation_id,
            message.body.kind(),
            message.from
        );
        match message.body {
            SignalBody::Offer(offer) => self.handle_remote_offer(offer).await,
            SignalBody::Answer(answer) => self.handle_remote_answer(answer).await,
            SignalBody::IceCandidate(candidate) => self.handle_remote_candidate(candidate).await,
            SignalBody::EndCall => {
                info!(
                    target: "Call/Session",
                    "{}: remote party ended the call", self.config.conversation_id
                );
                self.teardown(EndReason::RemoteHangup).await;
            }
        }
    }

    async fn handle_remote_offer(&self, offer: SessionDescription) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CallState::Idle => {
                inner.pending_remote_offer = Some(offer);
                self.advance(&mut inner, CallTransition::OfferReceived);
                info!(
                    target: "Call/Session",
                    "{}: incoming call from {}",
                    self.config.conversation_id, self.config.remote_party
                );
            }
            CallState::Calling => {
                // Simultaneous dial: the lexicographically smaller party id
                // keeps its offer, the other side adopts the inbound one.
                if self.config.remote_party < self.config.local_party {
                    info!(
                        target: "Call/Session",
                        "{}: simultaneous dial, yielding to {}",
                        self.config.conversation_id, self.config.remote_party
                    );
                    inner.generation += 1;
                    Self::release_resources(&mut inner).await;
                    inner.early_candidates.clear();
                    inner.pending_remote_offer = Some(offer);
                    self.advance(&mut inner, CallTransition::OfferReceived);
                } else {
                    debug!(
                        target: "Call/Session",
                        "{}: simultaneous dial, keeping our offer",
                        self.config.conversation_id
                    );
                }
            }
            state => {
                debug!(
                    target: "Call/Session",
                    "{}: ignoring offer while {:?}", self.config.conversation_id, state
                );
            }
        }
    }

    async fn handle_remote_answer(&self, answer: SessionDescription) {
        let mut inner = self.inner.lock().await;
        if inner.state != CallState::Calling {
            debug!(
                target: "Call/Session",
                "{}: ignoring answer while {:?}", self.config.conversation_id, inner.state
            );
            return;
        }
        let generation = inner.generation;
        let result = match inner.transport.as_mut() {
            Some(transport) => transport.apply_remote_description(answer).await,
            None => {
                debug!(
                    target: "Call/Session",
                    "{}: answer before transport setup, ignored", self.config.conversation_id
                );
                return;
            }
        };
        if let Err(e) = result {
            drop(inner);
            warn!(
                target: "Call/Session",
                "{}: remote answer rejected: {e}", self.config.conversation_id
            );
            self.teardown_attempt(generation, EndReason::TransportFailed).await;
        }
    }

    async fn handle_remote_candidate(&self, candidate: IceCandidateInit) {
        let mut inner = self.inner.lock().await;
        if let Some(transport) = inner.transport.as_mut() {
            if let Err(e) = transport.apply_remote_candidate(candidate).await {
                warn!(
                    target: "Call/Transport",
                    "{}: candidate rejected: {e}", self.config.conversation_id
                );
            }
        } else if inner.state.in_call() {
            inner.early_candidates.push(candidate);
            debug!(
                target: "Call/Transport",
                "{}: buffered candidate before transport setup", self.config.conversation_id
            );
        } else {
            debug!(
                target: "Call/Transport",
                "{}: ignoring candidate while idle", self.config.conversation_id
            );
        }
    }

    async fn handle_engine_event(self: &Arc<Self>, generation: u64, event: EngineEvent) {
        match event {
            EngineEvent::LocalCandidate(candidate) => {
                {
                    let inner = self.inner.lock().await;
                    if inner.generation != generation || inner.transport.is_none() {
                        return;
                    }
                }
                self.channel.send(SignalBody::IceCandidate(candidate)).await;
            }
            EngineEvent::RemoteTrack(stream) => {
                {
                    let inner = self.inner.lock().await;
                    if inner.generation != generation {
                        return;
                    }
                }
                debug!(
                    target: "Call/Transport",
                    "{}: remote audio stream attached", self.config.conversation_id
                );
                self.sink.bind(stream);
            }
            EngineEvent::StateChanged(state) => {
                debug!(
                    target: "Call/Transport",
                    "{}: transport state {:?}", self.config.conversation_id, state
                );
                match state {
                    TransportState::Connected => {
                        let mut inner = self.inner.lock().await;
                        if inner.generation != generation {
                            return;
                        }
                        if inner.connected_at.is_none() {
                            inner.connected_at = Some(Utc::now());
                        }
                        self.advance(&mut inner, CallTransition::TransportConnected);
                        self.publish(&inner);
                        self.start_timer(&mut inner);
                    }
                    TransportState::Disconnected | TransportState::Failed => {
                        self.teardown_attempt(generation, EndReason::TransportFailed).await;
                    }
                    _ => {}
                }
            }
        }
    }

    // ---- internals --------------------------------------------------------

    /// Create the transport session if none exists yet. A session never
    /// holds two engines.
    async fn open_transport(
        &self,
        inner: &mut SessionInner,
        generation: u64,
    ) -> Result<(), CallError> {
        if inner.transport.is_some() {
            return Ok(());
        }
        let (engine_tx, mut engine_rx) = mpsc::unbounded_channel();
        let engine = self
            .factory
            .create_engine(&self.config.ice_servers, engine_tx)
            .await?;

        // Tag engine events with the attempt they belong to before they
        // enter the pump; events from a closed engine go stale with it.
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(event) = engine_rx.recv().await {
                if events
                    .send(SessionEvent::Engine { generation, event })
                    .is_err()
                {
                    break;
                }
            }
        });

        // Local audio must be wired in before any negotiation starts.
        if let Some(stream) = inner.local_media.clone() {
            if let Err(e) = engine.attach_local_audio(stream).await {
                engine.close().await;
                return Err(e);
            }
        }

        let mut transport = TransportSession::new(engine);
        for candidate in std::mem::take(&mut inner.early_candidates) {
            if let Err(e) = transport.apply_remote_candidate(candidate).await {
                warn!(target: "Call/Transport", "buffered candidate rejected: {e}");
            }
        }
        inner.transport = Some(transport);
        Ok(())
    }

    /// (Re)start the one-second duration ticker. Any prior ticker is
    /// cleared first, so repeated connected reports never stack timers.
    fn start_timer(self: &Arc<Self>, inner: &mut SessionInner) {
        if let Some(handle) = inner.timer.take() {
            handle.abort();
        }
        let session = self.clone();
        inner.timer = Some(tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let mut inner = session.inner.lock().await;
                if !inner.state.is_connected() {
                    break;
                }
                inner.duration_secs += 1;
                session.publish(&inner);
            }
        }));
    }

    async fn teardown(&self, reason: EndReason) {
        self.teardown_inner(None, reason).await;
    }

    /// Teardown that only fires if the attempt it belongs to is still the
    /// live one; failure results of superseded async work land here.
    async fn teardown_attempt(&self, generation: u64, reason: EndReason) {
        self.teardown_inner(Some(generation), reason).await;
    }

    async fn teardown_inner(&self, only_generation: Option<u64>, reason: EndReason) {
        let mut inner = self.inner.lock().await;
        if let Some(generation) = only_generation {
            if inner.generation != generation {
                return;
            }
        }
        if inner.state.is_idle() {
            return;
        }
        info!(
            target: "Call/Session",
            "{}: ending call ({:?})", self.config.conversation_id, reason
        );
        inner.generation += 1;
        inner.duration_secs = 0;
        inner.connected_at = None;
        self.advance(&mut inner, CallTransition::HangUp);
        Self::release_resources(&mut inner).await;
        inner.pending_remote_offer = None;
        inner.early_candidates.clear();
        self.advance(&mut inner, CallTransition::Reset);
        drop(inner);
        if reason.notifies_peer() {
            self.channel.send(SignalBody::EndCall).await;
        }
    }

    async fn release_resources(inner: &mut SessionInner) {
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        if let Some(mut transport) = inner.transport.take() {
            transport.close().await;
        }
        if let Some(stream) = inner.local_media.take() {
            stream.stop();
        }
    }

    /// Run one state-machine transition and publish the change. Callers
    /// guard the edge beforehand, so a refused edge is only logged.
    fn advance(&self, inner: &mut SessionInner, transition: CallTransition) {
        match inner.state.apply(transition) {
            Ok(next) => {
                if next != inner.state {
                    debug!(
                        target: "Call/Session",
                        "{}: {:?} -> {:?}", self.config.conversation_id, inner.state, next
                    );
                    inner.state = next;
                    self.publish(inner);
                }
            }
            Err(err) => {
                warn!(target: "Call/Session", "{}: {err}", self.config.conversation_id);
            }
        }
    }

    fn publish(&self, inner: &SessionInner) {
        self.snapshot.send_replace(CallSnapshot {
            state: inner.state,
            is_muted: inner.is_muted,
            duration_secs: inner.duration_secs,
            connected_at: inner.connected_at,
        });
    }
}
