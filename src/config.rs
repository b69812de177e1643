// Session configuration.
// Everything the engine needs to build the connection and the data channel
// is passed through untouched; the rest drives negotiation policy.

use crate::peer::types::ServerConfig;
use crate::utils::random_id;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Time to wait for the end-of-candidates marker after the first local candidate
pub const ICE_COMPLETE_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Buffered bytes above which a write's completion is withheld
pub const MAX_BUFFERED_AMOUNT: usize = 64 * 1024;

/// Fallback poll period when the channel has no native low-buffer event
pub const BUFFERED_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Period of the stuck-in-closing channel check
pub const CHANNEL_CLOSING_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Delay between statistics queries while the selected pair is not known yet
pub const STATS_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound of statistics queries before the link is declared usable anyway
pub const MAX_STATS_ATTEMPTS: u32 = 50;

/// Flush period between `end()` and teardown
pub const END_GRACE_PERIOD: Duration = Duration::from_millis(1_000);

/// How local candidates travel to the remote side.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TricklePolicy {
    /// Every candidate is signaled as soon as it is discovered
    #[default]
    Enabled,
    /// Candidates are bundled into the description and trickle support is not advertised
    Disabled,
    /// Candidates are bundled, but the remote side may still trickle to us
    Half,
}

impl TricklePolicy {
    pub fn emits_candidates(self) -> bool {
        self == TricklePolicy::Enabled
    }

    pub fn strips_trickle_option(self) -> bool {
        self == TricklePolicy::Disabled
    }
}

/// Data channel construction parameters, handed to the engine as-is.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    pub ordered: Option<bool>,
    pub max_packet_life_time: Option<u16>,
    pub max_retransmits: Option<u16>,
    pub protocol: Option<String>,
    /// Pre-negotiated channel id; both sides create the channel themselves
    pub negotiated: Option<u16>,
}

pub type SdpTransform = Arc<dyn Fn(String) -> String + Send + Sync>;

#[derive(Clone)]
pub struct PeerConfig {
    pub initiator: bool,
    pub trickle: TricklePolicy,
    pub ice_complete_timeout: Duration,
    pub sdp_transform: SdpTransform,
    /// Deliver text messages as text instead of converting them to bytes
    pub object_mode: bool,
    pub channel_name: String,
    pub channel: ChannelConfig,
    pub ice_servers: Vec<ServerConfig>,
    pub ice_restart: bool,
}

impl PeerConfig {
    pub fn initiator() -> Self {
        Self {
            initiator: true,
            ..Self::default()
        }
    }

    pub fn responder() -> Self {
        Self::default()
    }

    pub fn with_trickle(mut self, trickle: TricklePolicy) -> Self {
        self.trickle = trickle;
        self
    }

    pub fn with_ice_complete_timeout(mut self, timeout: Duration) -> Self {
        self.ice_complete_timeout = timeout;
        self
    }

    pub fn with_sdp_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        self.sdp_transform = Arc::new(transform);
        self
    }

    pub fn with_object_mode(mut self, object_mode: bool) -> Self {
        self.object_mode = object_mode;
        self
    }

    pub fn with_channel(mut self, name: impl Into<String>, channel: ChannelConfig) -> Self {
        self.channel_name = name.into();
        self.channel = channel;
        self
    }

    pub fn with_ice_servers(mut self, servers: Vec<ServerConfig>) -> Self {
        self.ice_servers = servers;
        self
    }

    /// Both sides open the data channel when its id was agreed out of band.
    pub fn creates_channel(&self) -> bool {
        self.initiator || self.channel.negotiated.is_some()
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            initiator: false,
            trickle: TricklePolicy::default(),
            ice_complete_timeout: ICE_COMPLETE_TIMEOUT,
            sdp_transform: Arc::new(|sdp| sdp),
            object_mode: false,
            channel_name: random_id(20),
            channel: ChannelConfig::default(),
            ice_servers: default_ice_servers(),
            ice_restart: false,
        }
    }
}

impl fmt::Debug for PeerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConfig")
            .field("initiator", &self.initiator)
            .field("trickle", &self.trickle)
            .field("ice_complete_timeout", &self.ice_complete_timeout)
            .field("object_mode", &self.object_mode)
            .field("channel_name", &self.channel_name)
            .field("channel", &self.channel)
            .field("ice_servers", &self.ice_servers)
            .field("ice_restart", &self.ice_restart)
            .finish_non_exhaustive()
    }
}

/// Public STUN pair used when no servers are configured
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}
