pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod negotiation;
pub mod readiness;
pub mod state;
pub mod types;

pub use connection::{RtcChannel, RtcEngine};
pub use state::{Lifecycle, TimerKind};
pub use types::{CandidateInit, Endpoint, Payload, PeerAddress, PeerEvent, ServerConfig, TransceiverRequest};
