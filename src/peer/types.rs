use crate::engine::{IceConnectionState, IceGatheringState, SignalingState};
use crate::error::Error;
use crate::signaling::SignalData;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// ICE candidate as carried by signaling messages
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInit {
    pub candidate: String,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl CandidateInit {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_m_line_index: Some(0),
            sdp_mid: Some("0".into()),
            username_fragment: None,
        }
    }
}

/// Request for the initiator to add a transceiver of the given kind
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransceiverRequest {
    pub kind: String,
    /// Opaque transceiver init, passed to the engine unmodified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<serde_json::Value>,
}

/// ICE server entry as supplied by the application
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Message carried over the data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_binary(self) -> Self {
        match self {
            Payload::Text(text) => Payload::Binary(Bytes::from(text.into_bytes())),
            binary => binary,
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_owned())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Payload::Binary(data)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(data))
    }
}

/// Address of one side of the selected candidate pair
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Endpoint {
    pub address: String,
    pub port: Option<u16>,
    pub family: &'static str,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: Option<u16>) -> Self {
        let address = address.into();
        let family = if address.contains(':') { "IPv6" } else { "IPv4" };
        Self {
            address,
            port,
            family,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PeerAddress {
    pub local: Option<Endpoint>,
    pub remote: Option<Endpoint>,
}

/// Notifications delivered to the application, in emission order
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Signaling payload to forward to the remote peer
    Signal(SignalData),
    Connect,
    Data(Payload),
    Error(Error),
    Close,
    Negotiated,
    IceTimeout,
    ConnectionStateChange {
        connection: IceConnectionState,
        gathering: IceGatheringState,
    },
    SignalingStateChange(SignalingState),
}
