pub mod config;
pub mod engine;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

#[cfg(test)]
mod tests;

pub use config::{ChannelConfig, PeerConfig, TricklePolicy};
pub use engine::{Capabilities, Channel, Engine, EngineEvent, StatsApi};
pub use error::{Error, Result};
pub use peer::types::{CandidateInit, Endpoint, Payload, PeerAddress, PeerEvent, ServerConfig};
pub use session::{Peer, PeerEvents};
pub use signaling::{InboundSignal, SignalData};
