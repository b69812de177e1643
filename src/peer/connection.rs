//! webrtc-rs backed engine.
//!
//! Every callback of the peer connection and of its data channel is turned
//! into an [`EngineEvent`] on the session's event channel; nothing here keeps
//! negotiation state.

use crate::config::{ChannelConfig, PeerConfig};
use crate::engine::{
    Capabilities, Channel, ChannelState, Engine, EngineError, EngineEvent, EngineEventSender,
    EngineResult, IceConnectionState, IceGatheringState, PeerConnectionState, SdpType,
    SessionDescription, SignalingState, StatsApi, StatsRecord,
};
use crate::logger::dump_candidate;
use crate::peer::types::{CandidateInit, Payload, ServerConfig, TransceiverRequest};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::stats::StatsReportType;

pub struct RtcEngine {
    pc: Arc<RTCPeerConnection>,
    events: EngineEventSender,
    ice_restart: bool,
    /// Transceivers already reported by `take_unrequested_transceivers`
    requested: Mutex<HashSet<usize>>,
}

impl RtcEngine {
    pub async fn new(config: &PeerConfig, events: EngineEventSender) -> EngineResult<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(&config.ice_servers)).await?);
        attach_pc(&pc, &events);

        Ok(Self {
            pc,
            events,
            ice_restart: config.ice_restart,
            requested: Mutex::new(HashSet::new()),
        })
    }
}

/// Forwards every peer connection callback to the session.
fn attach_pc(pc: &Arc<RTCPeerConnection>, events: &EngineEventSender) {
    let tx = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        match cand.map(|c| c.to_json()) {
            Some(Ok(init)) => {
                let candidate = from_rtc_candidate(init);
                dump_candidate("LOCAL", &candidate);
                let _ = tx.send(EngineEvent::IceCandidate(Some(candidate)));
            }
            Some(Err(e)) => warn!("cannot serialize local candidate: {}", e),
            // end of gathering
            None => {
                let _ = tx.send(EngineEvent::IceCandidate(None));
            }
        }
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_ice_connection_state_change(Box::new(move |st: RTCIceConnectionState| {
        let _ = tx.send(EngineEvent::IceConnectionStateChange(ice_connection_state(st)));
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_ice_gathering_state_change(Box::new(move |st: RTCIceGathererState| {
        let _ = tx.send(EngineEvent::IceGatheringStateChange(ice_gathering_state(st)));
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        let _ = tx.send(EngineEvent::PeerConnectionStateChange(peer_connection_state(st)));
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_signaling_state_change(Box::new(move |st: RTCSignalingState| {
        let _ = tx.send(EngineEvent::SignalingStateChange(signaling_state(st)));
        Box::pin(async {})
    }));

    let tx = events.clone();
    pc.on_negotiation_needed(Box::new(move || {
        let _ = tx.send(EngineEvent::NegotiationNeeded);
        Box::pin(async {})
    }));

    let tx = events.clone();
    let announced = Arc::new(AtomicBool::new(false));
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let tx = tx.clone();
        let announced = announced.clone();
        Box::pin(async move {
            if announced.swap(true, Ordering::AcqRel) {
                warn!(label = dc.label(), "ignoring additional data channel");
                return;
            }
            let channel = RtcChannel::new(dc);
            // announce before attaching so open/message events follow it
            let _ = tx.send(EngineEvent::DataChannel(channel.clone()));
            channel.attach(&tx).await;
        })
    }));
}

/// Replaces every handler with a no-op.
fn detach_pc(pc: &RTCPeerConnection) {
    pc.on_ice_candidate(Box::new(|_| Box::pin(async {})));
    pc.on_ice_connection_state_change(Box::new(|_| Box::pin(async {})));
    pc.on_ice_gathering_state_change(Box::new(|_| Box::pin(async {})));
    pc.on_peer_connection_state_change(Box::new(|_| Box::pin(async {})));
    pc.on_signaling_state_change(Box::new(|_| Box::pin(async {})));
    pc.on_negotiation_needed(Box::new(|| Box::pin(async {})));
    pc.on_data_channel(Box::new(|_| Box::pin(async {})));
}

fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn to_rtc_description(desc: SessionDescription) -> EngineResult<RTCSessionDescription> {
    let rtc = match desc.kind {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
        SdpType::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            rollback
        }
    };
    Ok(rtc)
}

fn from_rtc_description(desc: RTCSessionDescription) -> Option<SessionDescription> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => return None,
    };
    Some(SessionDescription::new(kind, desc.sdp))
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> CandidateInit {
    CandidateInit {
        candidate: init.candidate,
        sdp_m_line_index: init.sdp_mline_index,
        sdp_mid: init.sdp_mid,
        username_fragment: init.username_fragment,
    }
}

fn ice_connection_state(st: RTCIceConnectionState) -> IceConnectionState {
    match st {
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => IceConnectionState::New,
    }
}

fn ice_gathering_state(st: RTCIceGathererState) -> IceGatheringState {
    match st {
        RTCIceGathererState::Gathering => IceGatheringState::Gathering,
        RTCIceGathererState::Complete | RTCIceGathererState::Closed => IceGatheringState::Complete,
        _ => IceGatheringState::New,
    }
}

fn peer_connection_state(st: RTCPeerConnectionState) -> PeerConnectionState {
    match st {
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        _ => PeerConnectionState::New,
    }
}

fn signaling_state(st: RTCSignalingState) -> SignalingState {
    match st {
        RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
        RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
        RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
        RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
        RTCSignalingState::Closed => SignalingState::Closed,
        _ => SignalingState::Stable,
    }
}

fn transceiver_init(request: &TransceiverRequest) -> Option<RTCRtpTransceiverInit> {
    let direction = request
        .init
        .as_ref()?
        .get("direction")?
        .as_str()
        .map(RTCRtpTransceiverDirection::from)?;
    Some(RTCRtpTransceiverInit {
        direction,
        send_encodings: vec![],
    })
}

#[async_trait]
impl Engine for RtcEngine {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            trickle: true,
            buffered_amount_low: true,
            stats: StatsApi::Standard,
        }
    }

    async fn create_offer(&self) -> EngineResult<SessionDescription> {
        let options = self.ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });
        let offer = self.pc.create_offer(options).await?;
        from_rtc_description(offer).ok_or_else(|| EngineError("offer without type".into()))
    }

    async fn create_answer(&self) -> EngineResult<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        from_rtc_description(answer).ok_or_else(|| EngineError("answer without type".into()))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> EngineResult<()> {
        self.pc.set_local_description(to_rtc_description(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> EngineResult<()> {
        self.pc.set_remote_description(to_rtc_description(desc)?).await?;
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.and_then(from_rtc_description)
    }

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> EngineResult<()> {
        dump_candidate("REMOTE", &candidate);
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
        config: &ChannelConfig,
    ) -> EngineResult<Arc<dyn Channel>> {
        let init = RTCDataChannelInit {
            ordered: config.ordered,
            max_packet_life_time: config.max_packet_life_time,
            max_retransmits: config.max_retransmits,
            protocol: config.protocol.clone(),
            negotiated: config.negotiated,
        };
        let dc = self.pc.create_data_channel(label, Some(init)).await?;
        let channel = RtcChannel::new(dc);
        channel.attach(&self.events).await;
        Ok(channel as Arc<dyn Channel>)
    }

    async fn add_transceiver(&self, request: &TransceiverRequest) -> EngineResult<()> {
        let kind = RTPCodecType::from(request.kind.as_str());
        if kind == RTPCodecType::Unspecified {
            return Err(EngineError(format!("unknown transceiver kind {}", request.kind)));
        }
        let transceiver = self
            .pc
            .add_transceiver_from_kind(kind, transceiver_init(request))
            .await?;
        // added on request, so never reported back
        self.requested
            .lock()
            .await
            .insert(Arc::as_ptr(&transceiver) as usize);
        Ok(())
    }

    async fn take_unrequested_transceivers(&self) -> Vec<String> {
        let mut requested = self.requested.lock().await;
        let mut kinds = Vec::new();
        for transceiver in self.pc.get_transceivers().await {
            let key = Arc::as_ptr(&transceiver) as usize;
            if transceiver.mid().is_none() && requested.insert(key) {
                kinds.push(transceiver.kind().to_string());
            }
        }
        kinds
    }

    async fn stats(&self) -> EngineResult<Vec<StatsRecord>> {
        let report = self.pc.get_stats().await;
        let records = report
            .reports
            .into_values()
            .filter_map(|entry| match entry {
                StatsReportType::CandidatePair(pair) => Some(StatsRecord::CandidatePair {
                    id: pair.id,
                    local_candidate_id: pair.local_candidate_id,
                    remote_candidate_id: pair.remote_candidate_id,
                    selected: pair.nominated,
                }),
                StatsReportType::LocalCandidate(c) => Some(StatsRecord::LocalCandidate {
                    id: c.id,
                    address: Some(c.ip),
                    port: Some(c.port),
                }),
                StatsReportType::RemoteCandidate(c) => Some(StatsRecord::RemoteCandidate {
                    id: c.id,
                    address: Some(c.ip),
                    port: Some(c.port),
                }),
                _ => None,
            })
            .collect();
        Ok(records)
    }

    async fn close(&self) -> EngineResult<()> {
        detach_pc(&self.pc);
        self.pc.close().await?;
        Ok(())
    }
}

pub struct RtcChannel {
    dc: Arc<RTCDataChannel>,
}

impl RtcChannel {
    fn new(dc: Arc<RTCDataChannel>) -> Arc<Self> {
        Arc::new(Self { dc })
    }

    async fn attach(&self, events: &EngineEventSender) {
        let tx = events.clone();
        self.dc.on_open(Box::new(move || {
            debug!("data channel opened");
            let _ = tx.send(EngineEvent::ChannelOpen);
            Box::pin(async {})
        }));

        let tx = events.clone();
        self.dc.on_close(Box::new(move || {
            debug!("data channel closed");
            let _ = tx.send(EngineEvent::ChannelClose);
            Box::pin(async {})
        }));

        let tx = events.clone();
        self.dc.on_error(Box::new(move |e| {
            let _ = tx.send(EngineEvent::ChannelError(e.to_string()));
            Box::pin(async {})
        }));

        let tx = events.clone();
        self.dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let payload = if msg.is_string {
                Payload::Text(String::from_utf8_lossy(&msg.data).into_owned())
            } else {
                Payload::Binary(msg.data)
            };
            let _ = tx.send(EngineEvent::ChannelMessage(payload));
            Box::pin(async {})
        }));

        let tx = events.clone();
        self.dc
            .on_buffered_amount_low(Box::new(move || {
                let _ = tx.send(EngineEvent::BufferedAmountLow);
                Box::pin(async {})
            }))
            .await;
    }
}

#[async_trait]
impl Channel for RtcChannel {
    fn label(&self) -> String {
        self.dc.label().to_owned()
    }

    fn ready_state(&self) -> ChannelState {
        match self.dc.ready_state() {
            RTCDataChannelState::Open => ChannelState::Open,
            RTCDataChannelState::Closing => ChannelState::Closing,
            RTCDataChannelState::Closed => ChannelState::Closed,
            _ => ChannelState::Connecting,
        }
    }

    async fn send(&self, payload: &Payload) -> EngineResult<()> {
        match payload {
            Payload::Text(text) => self.dc.send_text(text.clone()).await?,
            Payload::Binary(data) => self.dc.send(data).await?,
        };
        Ok(())
    }

    async fn buffered_amount(&self) -> usize {
        self.dc.buffered_amount().await
    }

    async fn set_buffered_amount_low_threshold(&self, threshold: usize) {
        self.dc.set_buffered_amount_low_threshold(threshold).await;
    }

    async fn close(&self) -> EngineResult<()> {
        self.dc.on_open(Box::new(|| Box::pin(async {})));
        self.dc.on_close(Box::new(|| Box::pin(async {})));
        self.dc.on_error(Box::new(|_| Box::pin(async {})));
        self.dc.on_message(Box::new(|_| Box::pin(async {})));
        self.dc
            .on_buffered_amount_low(Box::new(|| Box::pin(async {})))
            .await;
        self.dc.close().await?;
        Ok(())
    }
}
