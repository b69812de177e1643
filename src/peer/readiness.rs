//! Connected gate.
//!
//! The link is usable only once the transport is connected *and* the data
//! channel is open, in either order, and a statistics query has located the
//! selected candidate pair (or it is clear none will show up).

use crate::config::MAX_STATS_ATTEMPTS;
use crate::engine::StatsRecord;
use crate::peer::types::{Endpoint, PeerAddress};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsOutcome {
    /// Pair not reported yet; query again after a short delay
    Retry,
    /// Declare the link usable, with the selected pair's addresses if known
    Ready(Option<PeerAddress>),
}

#[derive(Debug, Default)]
pub struct Readiness {
    transport_ready: bool,
    channel_ready: bool,
    confirming: bool,
    connected: bool,
    attempts: u32,
}

impl Readiness {
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_confirming(&self) -> bool {
        self.confirming
    }

    pub fn set_transport_ready(&mut self) {
        self.transport_ready = true;
    }

    pub fn set_channel_ready(&mut self) {
        self.channel_ready = true;
    }

    /// Enters the confirming state when every condition holds. True at most
    /// once per session.
    pub fn begin_confirming(&mut self) -> bool {
        if self.connected || self.confirming || !self.transport_ready || !self.channel_ready {
            return false;
        }
        self.confirming = true;
        true
    }

    pub fn on_stats(&mut self, records: &[StatsRecord]) -> StatsOutcome {
        self.attempts += 1;
        let search = find_selected_pair(records);
        if search.address.is_none() && search.expect_more() {
            if self.attempts < MAX_STATS_ATTEMPTS {
                return StatsOutcome::Retry;
            }
            debug!(attempts = self.attempts, "selected candidate pair never reported");
        }
        StatsOutcome::Ready(search.address)
    }

    /// Leaves confirming and marks the link usable.
    pub fn mark_connected(&mut self) {
        self.confirming = false;
        self.connected = true;
    }

    pub fn reset(&mut self) {
        *self = Readiness::default();
    }
}

struct PairSearch {
    address: Option<PeerAddress>,
    pairs: usize,
    local_candidates: usize,
}

impl PairSearch {
    /// No pair yet, but the report is not one of those that never lists
    /// candidates, so the selection can still appear.
    fn expect_more(&self) -> bool {
        self.pairs == 0 || self.local_candidates > 0
    }
}

fn find_selected_pair(records: &[StatsRecord]) -> PairSearch {
    let mut pairs = HashMap::new();
    let mut locals: CandidateTable = HashMap::new();
    let mut remotes: CandidateTable = HashMap::new();
    for record in records {
        match record {
            StatsRecord::CandidatePair { id, .. } | StatsRecord::LegacyPair { id, .. } => {
                pairs.insert(id.as_str(), record);
            }
            StatsRecord::LocalCandidate { id, address, port } => {
                locals.insert(id.as_str(), (address, port));
            }
            StatsRecord::RemoteCandidate { id, address, port } => {
                remotes.insert(id.as_str(), (address, port));
            }
            StatsRecord::Transport { .. } => {}
        }
    }

    let mut address = None;
    for record in records {
        let selected = match record {
            StatsRecord::Transport {
                selected_candidate_pair_id: Some(pair_id),
                ..
            } => pairs.get(pair_id.as_str()).copied(),
            StatsRecord::CandidatePair { selected: true, .. }
            | StatsRecord::LegacyPair { active: true, .. } => Some(record),
            _ => None,
        };
        match selected {
            Some(StatsRecord::CandidatePair {
                local_candidate_id,
                remote_candidate_id,
                ..
            }) => {
                address = Some(PeerAddress {
                    local: endpoint(&locals, local_candidate_id),
                    remote: endpoint(&remotes, remote_candidate_id),
                });
            }
            Some(StatsRecord::LegacyPair {
                local_address,
                remote_address,
                ..
            }) => {
                address = Some(PeerAddress {
                    local: local_address.as_deref().map(parse_host_port),
                    remote: remote_address.as_deref().map(parse_host_port),
                });
            }
            _ => {}
        }
    }

    PairSearch {
        address,
        pairs: pairs.len(),
        local_candidates: locals.len(),
    }
}

type CandidateTable<'a> = HashMap<&'a str, (&'a Option<String>, &'a Option<u16>)>;

fn endpoint(table: &CandidateTable<'_>, id: &str) -> Option<Endpoint> {
    let (address, port) = table.get(id)?;
    address.as_ref().map(|a| Endpoint::new(a.clone(), **port))
}

/// `ip:port` as found in legacy reports; IPv6 hosts keep their colons.
fn parse_host_port(value: &str) -> Endpoint {
    match value.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => Endpoint::new(host.trim_matches(['[', ']']), Some(port)),
            Err(_) => Endpoint::new(value, None),
        },
        None => Endpoint::new(value, None),
    }
}
