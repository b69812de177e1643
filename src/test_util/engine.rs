use crate::config::ChannelConfig;
use crate::engine::{
    Capabilities, Channel, ChannelState, Engine, EngineError, EngineEvent, EngineEventReceiver,
    EngineEventSender, EngineResult, SdpType, SessionDescription, SignalingState, StatsRecord,
};
use crate::peer::types::{CandidateInit, Payload, TransceiverRequest};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub const OFFER_SDP: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\na=ice-options:trickle\r\nm=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n";

/// Stats of a connection whose selected pair is known right away
pub fn selected_pair_stats() -> Vec<StatsRecord> {
    vec![
        StatsRecord::Transport {
            id: "T1".into(),
            selected_candidate_pair_id: Some("P1".into()),
        },
        StatsRecord::CandidatePair {
            id: "P1".into(),
            local_candidate_id: "L1".into(),
            remote_candidate_id: "R1".into(),
            selected: true,
        },
        StatsRecord::LocalCandidate {
            id: "L1".into(),
            address: Some("10.0.0.1".into()),
            port: Some(5000),
        },
        StatsRecord::RemoteCandidate {
            id: "R1".into(),
            address: Some("10.0.0.2".into()),
            port: Some(6000),
        },
    ]
}

#[derive(Default)]
struct MockState {
    calls: Vec<&'static str>,
    signaling: SignalingState,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    offers: usize,
    failing: HashSet<&'static str>,
    stats: VecDeque<Vec<StatsRecord>>,
    applied: Vec<CandidateInit>,
    /// (kind, reported) of transceivers added without negotiation
    local_transceivers: Vec<(String, bool)>,
    channel: Option<Arc<MockChannel>>,
    closed: bool,
}

/// Engine double: follows the signaling state machine, records every call
/// and fails the operations it is told to.
pub struct MockEngine {
    events: EngineEventSender,
    capabilities: Capabilities,
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new(capabilities: Capabilities) -> (Arc<Self>, EngineEventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            events: tx,
            capabilities,
            state: Mutex::new(MockState::default()),
        });
        (engine, rx)
    }

    pub fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    pub fn events(&self) -> EngineEventSender {
        self.events.clone()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    /// Makes every later call of `operation` fail.
    pub fn fail(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.insert(operation);
    }

    /// Queues one stats report; once the queue is empty the selected pair
    /// of [`selected_pair_stats`] is reported.
    pub fn push_stats(&self, records: Vec<StatsRecord>) {
        self.state.lock().unwrap().stats.push_back(records);
    }

    pub fn applied_candidates(&self) -> Vec<CandidateInit> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn add_local_transceiver(&self, kind: &str) {
        self.state
            .lock()
            .unwrap()
            .local_transceivers
            .push((kind.to_owned(), false));
    }

    pub fn channel(&self) -> Option<Arc<MockChannel>> {
        self.state.lock().unwrap().channel.clone()
    }

    pub fn set_channel(&self, channel: Arc<MockChannel>) {
        self.state.lock().unwrap().channel = Some(channel);
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn record(&self, call: &'static str) -> EngineResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.failing.contains(call) {
            return Err(EngineError(format!("{call} failed")));
        }
        Ok(())
    }

    fn transition(&self, next: SignalingState) {
        self.state.lock().unwrap().signaling = next;
        self.emit(EngineEvent::SignalingStateChange(next));
    }
}

#[async_trait]
impl Engine for MockEngine {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn create_offer(&self) -> EngineResult<SessionDescription> {
        self.record("create_offer")?;
        let mut state = self.state.lock().unwrap();
        state.offers += 1;
        let sdp = OFFER_SDP.replace("o=- 1 ", &format!("o=- {} ", state.offers));
        Ok(SessionDescription::new(SdpType::Offer, sdp))
    }

    async fn create_answer(&self) -> EngineResult<SessionDescription> {
        self.record("create_answer")?;
        if self.state.lock().unwrap().signaling != SignalingState::HaveRemoteOffer {
            return Err(EngineError("no remote offer".into()));
        }
        Ok(SessionDescription::new(SdpType::Answer, OFFER_SDP))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> EngineResult<()> {
        self.record("set_local_description")?;
        let next = match desc.kind {
            SdpType::Offer => SignalingState::HaveLocalOffer,
            _ => SignalingState::Stable,
        };
        self.state.lock().unwrap().local = Some(desc);
        self.transition(next);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> EngineResult<()> {
        self.record("set_remote_description")?;
        let next = match desc.kind {
            SdpType::Offer => SignalingState::HaveRemoteOffer,
            _ => SignalingState::Stable,
        };
        self.state.lock().unwrap().remote = Some(desc);
        self.transition(next);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().unwrap().local.clone()
    }

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> EngineResult<()> {
        self.record("add_ice_candidate")?;
        let mut state = self.state.lock().unwrap();
        if state.remote.is_none() {
            return Err(EngineError("remote description not set".into()));
        }
        state.applied.push(candidate);
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
        _config: &ChannelConfig,
    ) -> EngineResult<Arc<dyn Channel>> {
        self.record("create_data_channel")?;
        let channel = MockChannel::new(label);
        self.set_channel(channel.clone());
        Ok(channel as Arc<dyn Channel>)
    }

    async fn add_transceiver(&self, request: &TransceiverRequest) -> EngineResult<()> {
        self.record("add_transceiver")?;
        if request.kind != "audio" && request.kind != "video" {
            return Err(EngineError(format!("unknown kind {}", request.kind)));
        }
        Ok(())
    }

    async fn take_unrequested_transceivers(&self) -> Vec<String> {
        let mut state = self.state.lock().unwrap();
        state
            .local_transceivers
            .iter_mut()
            .filter(|(_, reported)| !*reported)
            .map(|(kind, reported)| {
                *reported = true;
                kind.clone()
            })
            .collect()
    }

    async fn stats(&self) -> EngineResult<Vec<StatsRecord>> {
        self.record("stats")?;
        let queued = self.state.lock().unwrap().stats.pop_front();
        Ok(queued.unwrap_or_else(selected_pair_stats))
    }

    async fn close(&self) -> EngineResult<()> {
        self.record("close")?;
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.signaling = SignalingState::Closed;
        Ok(())
    }
}

/// Channel double. Sent payloads are recorded and, once linked, delivered
/// to the other session as messages.
pub struct MockChannel {
    label: String,
    state: Mutex<ChannelState>,
    buffered: AtomicUsize,
    threshold: AtomicUsize,
    fail_send: AtomicBool,
    sent: Mutex<Vec<Payload>>,
    remote: Mutex<Option<EngineEventSender>>,
}

impl MockChannel {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_owned(),
            state: Mutex::new(ChannelState::Connecting),
            buffered: AtomicUsize::new(0),
            threshold: AtomicUsize::new(0),
            fail_send: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            remote: Mutex::new(None),
        })
    }

    pub fn sent(&self) -> Vec<Payload> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_buffered(&self, amount: usize) {
        self.buffered.store(amount, Ordering::SeqCst);
    }

    pub fn threshold(&self) -> usize {
        self.threshold.load(Ordering::SeqCst)
    }

    pub fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn fail_sends(&self) {
        self.fail_send.store(true, Ordering::SeqCst);
    }

    pub fn link(&self, remote: EngineEventSender) {
        *self.remote.lock().unwrap() = Some(remote);
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn ready_state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    async fn send(&self, payload: &Payload) -> EngineResult<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(EngineError("send failed".into()));
        }
        self.sent.lock().unwrap().push(payload.clone());
        if let Some(remote) = self.remote.lock().unwrap().as_ref() {
            let _ = remote.send(EngineEvent::ChannelMessage(payload.clone()));
        }
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    async fn set_buffered_amount_low_threshold(&self, threshold: usize) {
        self.threshold.store(threshold, Ordering::SeqCst);
    }

    async fn close(&self) -> EngineResult<()> {
        *self.state.lock().unwrap() = ChannelState::Closed;
        Ok(())
    }
}
