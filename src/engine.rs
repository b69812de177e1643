//! Narrow seam between the session state machine and the connectivity engine.
//!
//! The session only calls into an [`Engine`] and a [`Channel`] and reacts to
//! [`EngineEvent`]s; everything protocol-level (ICE, DTLS, SCTP) stays behind
//! these traits. `crate::peer::connection` implements them over webrtc-rs.

use crate::config::ChannelConfig;
use crate::peer::types::{CandidateInit, Payload, TransceiverRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct EngineError(pub String);

impl From<webrtc::Error> for EngineError {
    fn from(e: webrtc::Error) -> Self {
        EngineError(e.to_string())
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

impl SdpType {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "offer" => Some(SdpType::Offer),
            "pranswer" => Some(SdpType::Pranswer),
            "answer" => Some(SdpType::Answer),
            "rollback" => Some(SdpType::Rollback),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn new(kind: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            kind,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalingState {
    #[default]
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IceConnectionState {
    #[default]
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IceGatheringState {
    #[default]
    New,
    Gathering,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    #[default]
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Flavor of the statistics interface offered by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsApi {
    /// Set-based report with transport / candidate-pair / candidate entries
    Standard,
    /// Callback/array report with `googCandidatePair` entries
    Legacy,
    Unavailable,
}

/// Features probed once when the engine is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub trickle: bool,
    pub buffered_amount_low: bool,
    pub stats: StatsApi,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            trickle: true,
            buffered_amount_low: true,
            stats: StatsApi::Standard,
        }
    }
}

/// One normalised statistics entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsRecord {
    Transport {
        id: String,
        selected_candidate_pair_id: Option<String>,
    },
    CandidatePair {
        id: String,
        local_candidate_id: String,
        remote_candidate_id: String,
        selected: bool,
    },
    LocalCandidate {
        id: String,
        address: Option<String>,
        port: Option<u16>,
    },
    RemoteCandidate {
        id: String,
        address: Option<String>,
        port: Option<u16>,
    },
    /// `googCandidatePair` entry; addresses are `ip:port` strings
    LegacyPair {
        id: String,
        active: bool,
        local_address: Option<String>,
        remote_address: Option<String>,
    },
}

/// Callbacks of the engine and of its data channel, in the order they fired
pub enum EngineEvent {
    /// Local candidate; `None` marks the end of gathering
    IceCandidate(Option<CandidateInit>),
    IceConnectionStateChange(IceConnectionState),
    IceGatheringStateChange(IceGatheringState),
    PeerConnectionStateChange(PeerConnectionState),
    SignalingStateChange(SignalingState),
    NegotiationNeeded,
    /// Channel announced by the remote side
    DataChannel(Arc<dyn Channel>),
    ChannelOpen,
    ChannelMessage(Payload),
    ChannelClose,
    ChannelError(String),
    BufferedAmountLow,
}

impl fmt::Debug for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::IceCandidate(c) => f.debug_tuple("IceCandidate").field(c).finish(),
            EngineEvent::IceConnectionStateChange(s) => {
                f.debug_tuple("IceConnectionStateChange").field(s).finish()
            }
            EngineEvent::IceGatheringStateChange(s) => {
                f.debug_tuple("IceGatheringStateChange").field(s).finish()
            }
            EngineEvent::PeerConnectionStateChange(s) => {
                f.debug_tuple("PeerConnectionStateChange").field(s).finish()
            }
            EngineEvent::SignalingStateChange(s) => {
                f.debug_tuple("SignalingStateChange").field(s).finish()
            }
            EngineEvent::NegotiationNeeded => f.write_str("NegotiationNeeded"),
            EngineEvent::DataChannel(ch) => f.debug_tuple("DataChannel").field(&ch.label()).finish(),
            EngineEvent::ChannelOpen => f.write_str("ChannelOpen"),
            EngineEvent::ChannelMessage(p) => f.debug_tuple("ChannelMessage").field(&p.len()).finish(),
            EngineEvent::ChannelClose => f.write_str("ChannelClose"),
            EngineEvent::ChannelError(e) => f.debug_tuple("ChannelError").field(e).finish(),
            EngineEvent::BufferedAmountLow => f.write_str("BufferedAmountLow"),
        }
    }
}

pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EngineEventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Connectivity engine owned exclusively by one session.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    fn capabilities(&self) -> Capabilities;

    async fn create_offer(&self) -> EngineResult<SessionDescription>;
    async fn create_answer(&self) -> EngineResult<SessionDescription>;
    async fn set_local_description(&self, desc: SessionDescription) -> EngineResult<()>;
    async fn set_remote_description(&self, desc: SessionDescription) -> EngineResult<()>;
    /// Current local description, including candidates gathered so far
    async fn local_description(&self) -> Option<SessionDescription>;
    async fn add_ice_candidate(&self, candidate: CandidateInit) -> EngineResult<()>;

    /// Creates the session's outbound channel; its callbacks are reported as events
    async fn create_data_channel(
        &self,
        label: &str,
        config: &ChannelConfig,
    ) -> EngineResult<Arc<dyn Channel>>;

    async fn add_transceiver(&self, request: &TransceiverRequest) -> EngineResult<()>;

    /// Kinds of locally added transceivers that have no negotiated mid and
    /// were not reported before. Each transceiver is reported at most once.
    async fn take_unrequested_transceivers(&self) -> Vec<String>;

    async fn stats(&self) -> EngineResult<Vec<StatsRecord>>;

    /// Detaches every callback and closes the connection.
    async fn close(&self) -> EngineResult<()>;
}

#[async_trait]
pub trait Channel: Send + Sync + 'static {
    fn label(&self) -> String;
    fn ready_state(&self) -> ChannelState;

    async fn send(&self, payload: &Payload) -> EngineResult<()>;
    async fn buffered_amount(&self) -> usize;
    async fn set_buffered_amount_low_threshold(&self, threshold: usize);

    /// Detaches every callback and closes the channel.
    async fn close(&self) -> EngineResult<()>;
}
