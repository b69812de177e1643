//! Peer session.
//!
//! A [`Peer`] is a cheap handle onto a session task that owns the engine and
//! every piece of negotiation state. Handle calls and engine callbacks are
//! turned into messages and processed one at a time, so the state machine
//! needs no locks. After each message the task drains its microtask queue
//! (negotiation batching, the deferred half of teardown) before it looks at
//! the next message.

use crate::config::{
    ChannelConfig, PeerConfig, TricklePolicy, BUFFERED_POLL_INTERVAL, CHANNEL_CLOSING_TIMEOUT,
    END_GRACE_PERIOD, MAX_BUFFERED_AMOUNT, STATS_RETRY_INTERVAL,
};
use crate::engine::{
    Capabilities, Channel, ChannelState, Engine, EngineEvent, EngineEventReceiver,
    IceConnectionState, IceGatheringState, PeerConnectionState, SdpType, SessionDescription,
    SignalingState, StatsApi,
};
use crate::error::{Error, Result};
use crate::logger::dump_selected_pair;
use crate::peer::connection::RtcEngine;
use crate::peer::data_channel::{complete, Completion, DataGate, ReleaseMode};
use crate::peer::ice::{classify_failure, log_ignored_candidate, CandidateFailure, IceCoordinator};
use crate::peer::negotiation::{NegotiateStep, Negotiator, StableOutcome};
use crate::peer::readiness::{Readiness, StatsOutcome};
use crate::peer::state::{Lifecycle, TimerKind, Timers};
use crate::peer::types::{CandidateInit, Payload, PeerAddress, PeerEvent, TransceiverRequest};
use crate::signaling::{InboundSignal, SignalData};
use crate::utils::random_id;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, info_span, warn, Instrument};

/// Messages posted to the session task.
pub(crate) enum Op {
    Signal(InboundSignal),
    Negotiate,
    Write(Payload, Completion),
    AddTransceiver(TransceiverRequest),
    End,
    Destroy(Option<Error>),
    Address(oneshot::Sender<Option<PeerAddress>>),
    BufferSize(oneshot::Sender<usize>),
    Timer(TimerKind),
    /// Offer creation, one task after the negotiation that asked for it
    CreateOffer,
}

/// Work that runs after the current message, before the next one.
enum Microtask {
    Negotiation,
    FinishDestroy(Option<Error>),
}

/// Handle onto a running session. Clones share the session; once every
/// handle is dropped the session is destroyed.
#[derive(Clone)]
pub struct Peer {
    id: String,
    ops: UnboundedSender<Op>,
    lifecycle: Lifecycle,
}

/// Notifications of one session, in emission order. Ends after `Close`.
pub struct PeerEvents {
    rx: UnboundedReceiver<PeerEvent>,
}

impl PeerEvents {
    pub async fn recv(&mut self) -> Option<PeerEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PeerEvent> {
        self.rx.try_recv().ok()
    }
}

impl Peer {
    /// Builds a webrtc-rs engine and starts the session on the current runtime.
    pub async fn new(config: PeerConfig) -> Result<(Peer, PeerEvents)> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let engine = RtcEngine::new(&config, events_tx)
            .await
            .map_err(|e| Error::PeerConnection(e.0))?;
        Ok(Peer::with_engine(config, Arc::new(engine), events_rx))
    }

    /// Starts a session over an existing engine whose callbacks arrive on
    /// `engine_events`.
    pub fn with_engine(
        config: PeerConfig,
        engine: Arc<dyn Engine>,
        engine_events: EngineEventReceiver,
    ) -> (Peer, PeerEvents) {
        let id = random_id(4);
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let lifecycle = Lifecycle::default();

        let task = PeerTask::new(
            config,
            engine,
            lifecycle.clone(),
            ops_tx.downgrade(),
            events_tx,
        );
        let span = info_span!("peer", id = %id);
        tokio::spawn(task.run(ops_rx, engine_events).instrument(span));

        (
            Peer {
                id,
                ops: ops_tx,
                lifecycle,
            },
            PeerEvents { rx: events_rx },
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_destroyed(&self) -> bool {
        self.lifecycle.is_destroyed()
    }

    /// Ok(false) while teardown is in progress: the call is silently ignored.
    fn accepts_calls(&self) -> Result<bool> {
        if self.lifecycle.is_destroyed() {
            return Err(Error::Destroyed);
        }
        Ok(self.lifecycle.is_live())
    }

    fn post(&self, op: Op) -> Result<()> {
        self.ops.send(op).map_err(|_| Error::Destroyed)
    }

    /// Hands a message from the remote peer to the session. Accepts
    /// [`SignalData`], raw JSON values and JSON strings.
    pub fn signal(&self, data: impl Into<InboundSignal>) -> Result<()> {
        if !self.accepts_calls()? {
            return Ok(());
        }
        let signal = data.into();
        if !signal.is_recognized() {
            let err = Error::Signaling("signal() called with invalid signal data".into());
            self.destroy(Some(err.clone()));
            return Err(err);
        }
        self.post(Op::Signal(signal))
    }

    /// Writes one message and waits until the channel accepted it. Writes
    /// issued before the link is usable are delivered once it is.
    pub async fn write(&self, payload: impl Into<Payload>) -> Result<()> {
        if !self.lifecycle.is_live() {
            return Err(Error::Destroyed);
        }
        let (tx, rx) = oneshot::channel();
        self.post(Op::Write(payload.into(), Some(tx)))?;
        rx.await.unwrap_or(Err(Error::Destroyed))
    }

    /// Like [`write`](Self::write) without waiting for completion.
    pub fn send(&self, payload: impl Into<Payload>) -> Result<()> {
        if !self.lifecycle.is_live() {
            return Err(Error::Destroyed);
        }
        self.post(Op::Write(payload.into(), None))
    }

    pub fn negotiate(&self) -> Result<()> {
        if !self.accepts_calls()? {
            return Ok(());
        }
        self.post(Op::Negotiate)
    }

    /// Initiator: adds a transceiver and renegotiates. Responder: asks the
    /// initiator to add it.
    pub fn add_transceiver(
        &self,
        kind: impl Into<String>,
        init: Option<serde_json::Value>,
    ) -> Result<()> {
        if !self.accepts_calls()? {
            return Ok(());
        }
        self.post(Op::AddTransceiver(TransceiverRequest {
            kind: kind.into(),
            init,
        }))
    }

    /// Destroys the session shortly after it connected, letting queued data flush.
    pub fn end(&self) -> Result<()> {
        if !self.accepts_calls()? {
            return Ok(());
        }
        self.post(Op::End)
    }

    /// Tears the session down. Only the first call has an effect; `err` is
    /// reported as an `Error` event before `Close`.
    pub fn destroy(&self, err: Option<Error>) {
        if self.lifecycle.begin_destroy() {
            let _ = self.ops.send(Op::Destroy(err));
        }
    }

    /// Addresses of the selected candidate pair, once connected.
    pub async fn address(&self) -> Option<PeerAddress> {
        let (tx, rx) = oneshot::channel();
        self.post(Op::Address(tx)).ok()?;
        rx.await.ok().flatten()
    }

    /// Bytes queued on the data channel.
    pub async fn buffer_size(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.post(Op::BufferSize(tx)).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

struct PeerTask {
    initiator: bool,
    object_mode: bool,
    creates_channel: bool,
    channel_name: String,
    channel_config: ChannelConfig,
    ice_complete_timeout: Duration,

    engine: Arc<dyn Engine>,
    capabilities: Capabilities,
    channel: Option<Arc<dyn Channel>>,

    lifecycle: Lifecycle,
    negotiator: Negotiator,
    ice: IceCoordinator,
    readiness: Readiness,
    gate: DataGate,
    timers: Timers,

    ice_state: IceConnectionState,
    gathering_state: IceGatheringState,
    closing_seen: bool,
    end_requested: bool,
    address: Option<PeerAddress>,

    ops: WeakUnboundedSender<Op>,
    events: UnboundedSender<PeerEvent>,
    microtasks: VecDeque<Microtask>,
}

impl PeerTask {
    fn new(
        config: PeerConfig,
        engine: Arc<dyn Engine>,
        lifecycle: Lifecycle,
        ops: WeakUnboundedSender<Op>,
        events: UnboundedSender<PeerEvent>,
    ) -> Self {
        let capabilities = engine.capabilities();
        // without engine support candidates can only travel inside the description
        let trickle = if capabilities.trickle {
            config.trickle
        } else {
            TricklePolicy::Disabled
        };
        Self {
            initiator: config.initiator,
            object_mode: config.object_mode,
            creates_channel: config.creates_channel(),
            channel_name: config.channel_name,
            channel_config: config.channel,
            ice_complete_timeout: config.ice_complete_timeout,
            engine,
            capabilities,
            channel: None,
            lifecycle,
            negotiator: Negotiator::new(config.initiator, trickle, config.sdp_transform),
            ice: IceCoordinator::new(trickle),
            readiness: Readiness::default(),
            gate: DataGate::new(),
            timers: Timers::default(),
            ice_state: IceConnectionState::New,
            gathering_state: IceGatheringState::New,
            closing_seen: false,
            end_requested: false,
            address: None,
            ops,
            events,
            microtasks: VecDeque::new(),
        }
    }

    async fn run(mut self, mut ops: UnboundedReceiver<Op>, mut engine_events: EngineEventReceiver) {
        debug!(initiator = self.initiator, "new peer");
        self.start().await;
        self.drain_microtasks().await;

        let mut engine_open = true;
        let mut handles_open = true;
        while !self.lifecycle.is_destroyed() {
            tokio::select! {
                biased;
                event = engine_events.recv(), if engine_open => match event {
                    Some(event) => self.on_engine_event(event).await,
                    None => engine_open = false,
                },
                op = ops.recv(), if handles_open => match op {
                    Some(op) => self.on_op(op).await,
                    None => {
                        debug!("every handle dropped");
                        handles_open = false;
                        self.destroy(None);
                    }
                },
                else => break,
            }
            self.drain_microtasks().await;
        }
        debug!("session task finished");
    }

    async fn drain_microtasks(&mut self) {
        while let Some(task) = self.microtasks.pop_front() {
            match task {
                Microtask::Negotiation => self.run_negotiation_batch(),
                Microtask::FinishDestroy(err) => self.finish_destroy(err).await,
            }
        }
    }

    fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    fn emit_signal(&self, signal: SignalData) {
        self.emit(PeerEvent::Signal(signal));
    }

    /// Posts `op` behind every message already queued.
    fn post(&self, op: Op) {
        if let Some(tx) = self.ops.upgrade() {
            let _ = tx.send(op);
        }
    }

    async fn start(&mut self) {
        if self.creates_channel {
            let created = self
                .engine
                .create_data_channel(&self.channel_name, &self.channel_config)
                .await;
            match created {
                Ok(channel) => self.setup_channel(channel).await,
                Err(e) => {
                    self.destroy(Some(Error::DataChannel(e.0)));
                    return;
                }
            }
        }
        self.request_negotiation();
    }

    async fn on_op(&mut self, op: Op) {
        match op {
            Op::Signal(signal) => self.on_signal(signal).await,
            Op::Negotiate => self.negotiate(),
            Op::Write(payload, done) => self.write(payload, done).await,
            Op::AddTransceiver(request) => self.add_transceiver(request).await,
            Op::End => self.end(),
            Op::Destroy(err) => self.microtasks.push_back(Microtask::FinishDestroy(err)),
            Op::Address(tx) => {
                let _ = tx.send(self.address.clone());
            }
            Op::BufferSize(tx) => {
                let size = match &self.channel {
                    Some(channel) => channel.buffered_amount().await,
                    None => 0,
                };
                let _ = tx.send(size);
            }
            Op::Timer(kind) => self.on_timer(kind).await,
            Op::CreateOffer => self.create_offer().await,
        }
    }

    async fn on_timer(&mut self, kind: TimerKind) {
        if !self.lifecycle.is_live() {
            return;
        }
        match kind {
            TimerKind::IceComplete => {
                if self.ice.on_timeout() {
                    self.emit(PeerEvent::IceTimeout);
                    self.on_ice_complete().await;
                }
            }
            TimerKind::StatsRetry => self.poll_stats().await,
            TimerKind::BufferedPoll => self.poll_buffered_amount().await,
            TimerKind::ChannelClosingPoll => self.check_channel_closing(),
            TimerKind::EndGrace => self.destroy(None),
        }
    }

    // ---- negotiation ----

    fn request_negotiation(&mut self) {
        if self.negotiator.request() {
            self.microtasks.push_back(Microtask::Negotiation);
        }
    }

    fn run_negotiation_batch(&mut self) {
        if !self.lifecycle.is_live() {
            return;
        }
        if self.negotiator.take_batch() {
            self.negotiate();
        } else {
            debug!("responder initial negotiation request discarded");
        }
    }

    fn negotiate(&mut self) {
        if !self.lifecycle.is_live() {
            return;
        }
        match self.negotiator.negotiate() {
            NegotiateStep::CreateOffer => {
                debug!("start negotiation");
                self.post(Op::CreateOffer);
            }
            NegotiateStep::RequestRenegotiation => {
                debug!("requesting negotiation from initiator");
                self.emit_signal(SignalData::Renegotiate { renegotiate: true });
            }
            NegotiateStep::Queued => debug!("already negotiating, queueing"),
        }
    }

    async fn create_offer(&mut self) {
        if !self.lifecycle.is_live() {
            return;
        }
        let offer = match self.engine.create_offer().await {
            Ok(offer) => offer,
            Err(e) => return self.destroy(Some(Error::CreateOffer(e.0))),
        };
        self.apply_local_description(offer).await;
    }

    async fn create_answer(&mut self) {
        if !self.lifecycle.is_live() {
            return;
        }
        let answer = match self.engine.create_answer().await {
            Ok(answer) => answer,
            Err(e) => return self.destroy(Some(Error::CreateAnswer(e.0))),
        };
        self.apply_local_description(answer).await;
    }

    async fn apply_local_description(&mut self, desc: SessionDescription) {
        if !self.lifecycle.is_live() {
            return;
        }
        let desc = self.negotiator.prepare_local(desc);
        if let Err(e) = self.engine.set_local_description(desc.clone()).await {
            return self.destroy(Some(Error::SetLocalDescription(e.0)));
        }
        if !self.lifecycle.is_live() {
            return;
        }
        debug!(kind = ?desc.kind, "local description set");
        if self.negotiator.emits_immediately(self.ice.is_complete()) {
            self.send_local_description(desc).await;
        } else {
            debug!("waiting for ice gathering to complete");
            self.negotiator.await_ice(desc);
        }
    }

    /// Signals the engine's current description, which carries the
    /// candidates gathered so far, falling back to the one that was set.
    async fn send_local_description(&mut self, prepared: SessionDescription) {
        if !self.lifecycle.is_live() {
            return;
        }
        let desc = self.engine.local_description().await.unwrap_or(prepared);
        debug!(kind = ?desc.kind, "signal");
        if let Some(signal) = SignalData::from_description(&desc) {
            self.emit_signal(signal);
        }
        if desc.kind == SdpType::Answer && !self.initiator {
            self.request_missing_transceivers().await;
        }
    }

    async fn request_missing_transceivers(&mut self) {
        for kind in self.engine.take_unrequested_transceivers().await {
            debug!(kind = %kind, "requesting missing transceiver");
            self.emit_signal(SignalData::TransceiverRequest {
                transceiver_request: TransceiverRequest { kind, init: None },
            });
        }
    }

    async fn add_transceiver(&mut self, request: TransceiverRequest) {
        if !self.lifecycle.is_live() {
            return;
        }
        debug!(kind = %request.kind, "add transceiver");
        if self.initiator {
            match self.engine.add_transceiver(&request).await {
                Ok(()) => self.request_negotiation(),
                Err(e) => self.destroy(Some(Error::AddTransceiver(e.0))),
            }
        } else {
            self.emit_signal(SignalData::TransceiverRequest {
                transceiver_request: request,
            });
        }
    }

    fn on_signaling_state_change(&mut self, state: SignalingState) {
        if !self.lifecycle.is_live() {
            return;
        }
        if state == SignalingState::Stable {
            match self.negotiator.on_stable() {
                StableOutcome::Renegotiate => {
                    debug!("flushing negotiation queue");
                    self.request_negotiation();
                }
                StableOutcome::Negotiated => {
                    debug!("negotiated");
                    self.emit(PeerEvent::Negotiated);
                }
            }
        }
        self.emit(PeerEvent::SignalingStateChange(state));
    }

    // ---- inbound signals ----

    async fn on_signal(&mut self, signal: InboundSignal) {
        if !self.lifecycle.is_live() {
            return;
        }
        if signal.renegotiate() && self.initiator {
            debug!("got request to renegotiate");
            self.request_negotiation();
        }
        if let Some(request) = signal.transceiver_request.clone() {
            if self.initiator {
                debug!("got request for transceiver");
                self.add_transceiver(request).await;
            }
        }
        if let Some(candidate) = signal.candidate.clone() {
            if let Some(candidate) = self.ice.on_remote_candidate(candidate) {
                self.add_ice_candidate(candidate).await;
            }
        }
        match signal.description() {
            Some(Some(desc)) => self.accept_remote_description(desc).await,
            Some(None) => self.destroy(Some(Error::SetRemoteDescription(
                "session description with missing or invalid type".into(),
            ))),
            None => {}
        }
    }

    async fn accept_remote_description(&mut self, desc: SessionDescription) {
        if !self.lifecycle.is_live() {
            return;
        }
        let is_offer = desc.kind == SdpType::Offer;
        if let Err(e) = self.engine.set_remote_description(desc).await {
            return self.destroy(Some(Error::SetRemoteDescription(e.0)));
        }
        if !self.lifecycle.is_live() {
            return;
        }
        for candidate in self.ice.on_remote_description_accepted() {
            self.add_ice_candidate(candidate).await;
            if !self.lifecycle.is_live() {
                return;
            }
        }
        if is_offer {
            self.create_answer().await;
        }
    }

    async fn add_ice_candidate(&mut self, candidate: CandidateInit) {
        if let Err(e) = self.engine.add_ice_candidate(candidate.clone()).await {
            match classify_failure(&candidate) {
                CandidateFailure::Benign => log_ignored_candidate(&candidate, &e.0),
                CandidateFailure::Fatal => self.destroy(Some(Error::AddIceCandidate(e.0))),
            }
        }
    }

    // ---- engine callbacks ----

    async fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::IceCandidate(Some(candidate)) => self.on_local_candidate(candidate),
            EngineEvent::IceCandidate(None) => {
                if self.lifecycle.is_live() && self.ice.on_gathering_complete() {
                    self.timers.cancel(TimerKind::IceComplete);
                    self.on_ice_complete().await;
                }
            }
            EngineEvent::IceConnectionStateChange(state) => {
                self.ice_state = state;
                self.on_ice_state_change().await;
            }
            EngineEvent::IceGatheringStateChange(state) => {
                self.gathering_state = state;
                self.on_ice_state_change().await;
            }
            EngineEvent::PeerConnectionStateChange(state) => {
                if state == PeerConnectionState::Failed && self.lifecycle.is_live() {
                    self.destroy(Some(Error::ConnectionFailure));
                }
            }
            EngineEvent::SignalingStateChange(state) => self.on_signaling_state_change(state),
            EngineEvent::NegotiationNeeded => {
                // the description being negotiated already reflects the change
                if self.lifecycle.is_live() && !self.negotiator.is_negotiating() {
                    self.request_negotiation();
                }
            }
            EngineEvent::DataChannel(channel) => {
                if self.lifecycle.is_live() {
                    self.setup_channel(channel).await;
                } else {
                    let _ = channel.close().await;
                }
            }
            EngineEvent::ChannelOpen => self.on_channel_open().await,
            EngineEvent::ChannelMessage(payload) => {
                if !self.lifecycle.is_live() {
                    return;
                }
                let payload = if self.object_mode {
                    payload
                } else {
                    payload.into_binary()
                };
                self.emit(PeerEvent::Data(payload));
            }
            EngineEvent::ChannelClose => self.on_channel_close(),
            EngineEvent::ChannelError(e) => {
                if self.lifecycle.is_live() {
                    self.destroy(Some(Error::DataChannel(e)));
                }
            }
            EngineEvent::BufferedAmountLow => {
                if self.lifecycle.is_live() {
                    self.release_backpressure().await;
                }
            }
        }
    }

    fn on_local_candidate(&mut self, candidate: CandidateInit) {
        if !self.lifecycle.is_live() {
            return;
        }
        let outcome = self.ice.on_local_candidate(&candidate);
        if outcome.emit {
            self.emit_signal(SignalData::Candidate { candidate });
        }
        if outcome.start_timer {
            debug!(timeout = ?self.ice_complete_timeout, "started ice complete timer");
            self.timers.once(
                TimerKind::IceComplete,
                self.ice_complete_timeout,
                self.ops.clone(),
            );
        }
    }

    async fn on_ice_complete(&mut self) {
        if let Some(desc) = self.negotiator.take_awaiting() {
            self.send_local_description(desc).await;
        }
    }

    async fn on_ice_state_change(&mut self) {
        if !self.lifecycle.is_live() {
            return;
        }
        debug!(connection = ?self.ice_state, gathering = ?self.gathering_state, "ice state change");
        self.emit(PeerEvent::ConnectionStateChange {
            connection: self.ice_state,
            gathering: self.gathering_state,
        });
        match self.ice_state {
            IceConnectionState::Connected | IceConnectionState::Completed => {
                self.readiness.set_transport_ready();
                self.maybe_ready().await;
            }
            IceConnectionState::Failed => self.destroy(Some(Error::IceConnectionFailure)),
            IceConnectionState::Closed => self.destroy(Some(Error::IceConnectionClosed)),
            _ => {}
        }
    }

    // ---- data channel ----

    async fn setup_channel(&mut self, channel: Arc<dyn Channel>) {
        if self.channel.is_some() {
            warn!(label = %channel.label(), "ignoring additional data channel");
            return;
        }
        self.channel_name = channel.label();
        let release = if self.capabilities.buffered_amount_low {
            channel
                .set_buffered_amount_low_threshold(MAX_BUFFERED_AMOUNT)
                .await;
            ReleaseMode::Native
        } else {
            ReleaseMode::Poll
        };
        self.gate.set_release_mode(release);
        let open = channel.ready_state() == ChannelState::Open;
        self.channel = Some(channel);
        self.timers.interval(
            TimerKind::ChannelClosingPoll,
            CHANNEL_CLOSING_TIMEOUT,
            self.ops.clone(),
        );
        if open {
            self.on_channel_open().await;
        }
    }

    async fn on_channel_open(&mut self) {
        if self.readiness.is_connected() || !self.lifecycle.is_live() {
            return;
        }
        debug!(label = %self.channel_name, "on channel open");
        self.readiness.set_channel_ready();
        self.maybe_ready().await;
    }

    fn on_channel_close(&mut self) {
        if !self.lifecycle.is_live() {
            return;
        }
        debug!("on channel close");
        self.destroy(None);
    }

    /// Channels that never leave `closing` are treated as closed on the
    /// second consecutive observation.
    fn check_channel_closing(&mut self) {
        let closing = self
            .channel
            .as_ref()
            .is_some_and(|channel| channel.ready_state() == ChannelState::Closing);
        if closing {
            if self.closing_seen {
                debug!("channel stuck in closing state");
                self.on_channel_close();
            }
            self.closing_seen = true;
        } else {
            self.closing_seen = false;
        }
    }

    // ---- readiness ----

    async fn maybe_ready(&mut self) {
        if !self.readiness.begin_confirming() {
            return;
        }
        debug!("maybe ready: confirming selected candidate pair");
        self.poll_stats().await;
    }

    async fn poll_stats(&mut self) {
        if !self.lifecycle.is_live() || !self.readiness.is_confirming() {
            return;
        }
        if self.capabilities.stats == StatsApi::Unavailable {
            return self.finish_connect(None).await;
        }
        let records = match self.engine.stats().await {
            Ok(records) => records,
            Err(e) => {
                debug!("stats query failed: {}", e);
                Vec::new()
            }
        };
        if !self.lifecycle.is_live() {
            return;
        }
        match self.readiness.on_stats(&records) {
            StatsOutcome::Retry => {
                self.timers
                    .once(TimerKind::StatsRetry, STATS_RETRY_INTERVAL, self.ops.clone());
            }
            StatsOutcome::Ready(address) => {
                dump_selected_pair(&records, "CONNECT");
                self.finish_connect(address).await;
            }
        }
    }

    async fn finish_connect(&mut self, address: Option<PeerAddress>) {
        self.address = address;
        self.readiness.mark_connected();

        if let Some((payload, done)) = self.gate.take_pending() {
            self.send_now(payload, done).await;
        }
        self.drain_queued().await;
        if !self.lifecycle.is_live() {
            return;
        }
        if self.gate.release_mode() == ReleaseMode::Poll
            && !self.timers.is_active(TimerKind::BufferedPoll)
        {
            self.timers.interval(
                TimerKind::BufferedPoll,
                BUFFERED_POLL_INTERVAL,
                self.ops.clone(),
            );
        }
        debug!(address = ?self.address, "connect");
        self.emit(PeerEvent::Connect);
        if self.end_requested {
            self.start_end_grace();
        }
    }

    // ---- write path ----

    async fn write(&mut self, payload: Payload, done: Completion) {
        if !self.lifecycle.is_live() {
            return complete(done, Err(Error::Destroyed));
        }
        if !self.readiness.is_connected() {
            self.gate.hold(payload, done);
        } else if self.gate.is_blocked() || self.gate.queued_len() > 0 {
            self.gate.defer(payload, done);
        } else {
            self.send_now(payload, done).await;
        }
    }

    async fn send_now(&mut self, payload: Payload, done: Completion) {
        let Some(channel) = self.channel.clone() else {
            return complete(done, Err(Error::DataChannel("no data channel".into())));
        };
        if let Err(e) = channel.send(&payload).await {
            let err = Error::DataChannel(e.0);
            complete(done, Err(err.clone()));
            return self.destroy(Some(err));
        }
        let buffered = channel.buffered_amount().await;
        self.gate.after_send(buffered, done);
    }

    async fn drain_queued(&mut self) {
        while self.lifecycle.is_live() && !self.gate.is_blocked() {
            let Some((payload, done)) = self.gate.pop_queued() else {
                break;
            };
            self.send_now(payload, done).await;
        }
    }

    async fn release_backpressure(&mut self) {
        if self.gate.release() {
            debug!("buffered amount low, write released");
            self.drain_queued().await;
        }
    }

    async fn poll_buffered_amount(&mut self) {
        if !self.gate.is_blocked() {
            return;
        }
        let Some(channel) = self.channel.clone() else {
            return;
        };
        if channel.buffered_amount().await > MAX_BUFFERED_AMOUNT {
            return;
        }
        self.release_backpressure().await;
    }

    // ---- teardown ----

    fn end(&mut self) {
        if !self.lifecycle.is_live() {
            return;
        }
        if self.readiness.is_connected() {
            self.start_end_grace();
        } else {
            self.end_requested = true;
        }
    }

    fn start_end_grace(&mut self) {
        self.timers
            .once(TimerKind::EndGrace, END_GRACE_PERIOD, self.ops.clone());
    }

    fn destroy(&mut self, err: Option<Error>) {
        if self.lifecycle.begin_destroy() {
            debug!(error = ?err, "destroying");
            self.microtasks.push_back(Microtask::FinishDestroy(err));
        }
    }

    async fn finish_destroy(&mut self, err: Option<Error>) {
        if self.lifecycle.is_destroyed() {
            return;
        }
        self.lifecycle.mark_destroyed();

        self.readiness.reset();
        self.negotiator.reset();
        self.ice.reset();
        self.gate.clear();
        self.timers.cancel_all();
        self.closing_seen = false;

        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                debug!("ignoring channel close error: {}", e);
            }
        }
        if let Err(e) = self.engine.close().await {
            debug!("ignoring engine close error: {}", e);
        }

        if let Some(err) = err {
            debug!(code = err.code(), "error: {}", err);
            self.emit(PeerEvent::Error(err));
        }
        self.emit(PeerEvent::Close);
        debug!("destroyed");
    }
}
