use crate::engine::StatsRecord;
use crate::peer::types::CandidateInit;
use tracing::{debug, trace};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

/// Timestamp layout of every log line
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("rtc_peer=debug")
        } else {
            EnvFilter::new("warn")
        }
    })
}

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
pub fn try_init() -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_owned()))
        .finish()
        .try_init()
}

/// Like [`try_init`], but a subscriber installed earlier is not an error.
pub fn init() {
    let _ = try_init();
}

#[cfg(test)]
pub(crate) fn init_test_logging() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("rtc_peer=trace"))
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_owned()))
        .try_init()
        .ok();
}

/// Trickle candidate as it passes through the session
pub fn dump_candidate(label: &str, cand: &CandidateInit) {
    trace!(
        "trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate,
        cand.sdp_mid,
        cand.sdp_m_line_index,
        cand.username_fragment
    );
}

/// Snapshot of the selected candidate pair in a stats report
pub fn dump_selected_pair(records: &[StatsRecord], moment: &str) {
    for record in records {
        match record {
            StatsRecord::CandidatePair {
                local_candidate_id,
                remote_candidate_id,
                selected: true,
                ..
            } => debug!("stats {moment}: {local_candidate_id}:{remote_candidate_id} selected"),
            StatsRecord::Transport {
                selected_candidate_pair_id: Some(pair),
                ..
            } => debug!("stats {moment}: transport selected pair {pair}"),
            StatsRecord::LegacyPair {
                local_address,
                remote_address,
                active: true,
                ..
            } => debug!("stats {moment}: {local_address:?} <-> {remote_address:?} active"),
            _ => {}
        }
    }
}
