//! Signaling payloads exchanged out of band between the two peers.
//!
//! Outbound messages are a `type`-tagged union. Inbound messages are parsed
//! loosely: every recognised field is routed on its own, so a single message
//! may carry e.g. both a renegotiation flag and a description.

use crate::engine::{SdpType, SessionDescription};
use crate::peer::types::{CandidateInit, TransceiverRequest};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SignalData {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Candidate {
        candidate: CandidateInit,
    },
    Renegotiate {
        renegotiate: bool,
    },
    TransceiverRequest {
        #[serde(rename = "transceiverRequest")]
        transceiver_request: TransceiverRequest,
    },
}

impl SignalData {
    /// Signal announcing a local description; rollbacks are never signaled.
    pub fn from_description(desc: &SessionDescription) -> Option<Self> {
        match desc.kind {
            SdpType::Offer => Some(SignalData::Offer {
                sdp: desc.sdp.clone(),
            }),
            SdpType::Answer | SdpType::Pranswer => Some(SignalData::Answer {
                sdp: desc.sdp.clone(),
            }),
            SdpType::Rollback => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Inbound signal with every recognised field optional.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InboundSignal {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub sdp: Option<String>,
    #[serde(default)]
    pub candidate: Option<CandidateInit>,
    #[serde(default)]
    pub renegotiate: Option<bool>,
    #[serde(default)]
    pub transceiver_request: Option<TransceiverRequest>,
}

impl InboundSignal {
    pub fn renegotiate(&self) -> bool {
        self.renegotiate.unwrap_or(false)
    }

    /// True when at least one field can be acted upon.
    pub fn is_recognized(&self) -> bool {
        self.sdp.is_some()
            || self.candidate.is_some()
            || self.renegotiate()
            || self.transceiver_request.is_some()
    }

    /// Description carried by this signal; `None` when there is no `sdp`.
    /// An `sdp` without a usable `type` yields `Some(None)`.
    pub fn description(&self) -> Option<Option<SessionDescription>> {
        let sdp = self.sdp.as_ref()?;
        let kind = self.kind.as_deref().and_then(SdpType::parse);
        Some(kind.map(|kind| SessionDescription::new(kind, sdp.clone())))
    }
}

impl From<SignalData> for InboundSignal {
    fn from(data: SignalData) -> Self {
        match data {
            SignalData::Offer { sdp } => InboundSignal {
                kind: Some("offer".into()),
                sdp: Some(sdp),
                ..Default::default()
            },
            SignalData::Answer { sdp } => InboundSignal {
                kind: Some("answer".into()),
                sdp: Some(sdp),
                ..Default::default()
            },
            SignalData::Candidate { candidate } => InboundSignal {
                kind: Some("candidate".into()),
                candidate: Some(candidate),
                ..Default::default()
            },
            SignalData::Renegotiate { renegotiate } => InboundSignal {
                kind: Some("renegotiate".into()),
                renegotiate: Some(renegotiate),
                ..Default::default()
            },
            SignalData::TransceiverRequest {
                transceiver_request,
            } => InboundSignal {
                kind: Some("transceiverRequest".into()),
                transceiver_request: Some(transceiver_request),
                ..Default::default()
            },
        }
    }
}

impl From<serde_json::Value> for InboundSignal {
    fn from(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or_else(|e| {
            warn!("unparseable signal: {}", e);
            InboundSignal::default()
        })
    }
}

impl From<&str> for InboundSignal {
    fn from(json: &str) -> Self {
        serde_json::from_str(json).unwrap_or_else(|e| {
            warn!("unparseable signal: {}", e);
            InboundSignal::default()
        })
    }
}

impl From<String> for InboundSignal {
    fn from(json: String) -> Self {
        InboundSignal::from(json.as_str())
    }
}
