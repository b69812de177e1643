//! Candidate coordinator.
//!
//! Tracks local gathering until the end-of-candidates marker or the
//! completion timeout, and buffers remote candidates until a remote
//! description is accepted. No engine calls happen here.

use crate::config::TricklePolicy;
use crate::peer::types::CandidateInit;
use crate::utils::{candidate_address, candidate_type};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCandidateOutcome {
    /// Forward the candidate to the remote side now
    pub emit: bool,
    /// First candidate: arm the completion timer
    pub start_timer: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateFailure {
    /// Unresolvable or mDNS address; logged and ignored
    Benign,
    Fatal,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateTally {
    pub host: usize,
    pub srflx: usize,
    pub prflx: usize,
    pub relay: usize,
}

pub struct IceCoordinator {
    trickle: TricklePolicy,
    complete: bool,
    timer_started: bool,
    remote_accepted: bool,
    pending: Vec<CandidateInit>,
    tally: CandidateTally,
}

impl IceCoordinator {
    pub fn new(trickle: TricklePolicy) -> Self {
        Self {
            trickle,
            complete: false,
            timer_started: false,
            remote_accepted: false,
            pending: Vec::new(),
            tally: CandidateTally::default(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub(crate) fn tally(&self) -> CandidateTally {
        self.tally
    }

    pub fn on_local_candidate(&mut self, candidate: &CandidateInit) -> LocalCandidateOutcome {
        match candidate_type(&candidate.candidate) {
            Some("host") => self.tally.host += 1,
            Some("srflx") => self.tally.srflx += 1,
            Some("prflx") => self.tally.prflx += 1,
            Some("relay") => self.tally.relay += 1,
            _ => {}
        }
        let start_timer = !self.timer_started;
        self.timer_started = true;
        LocalCandidateOutcome {
            emit: self.trickle.emits_candidates(),
            start_timer,
        }
    }

    /// End-of-candidates marker. True only on the first completion.
    pub fn on_gathering_complete(&mut self) -> bool {
        if self.complete {
            return false;
        }
        self.complete = true;
        self.log_analysis();
        true
    }

    /// Completion timer fired. True when gathering had not completed, in
    /// which case the caller raises the timeout notification.
    pub fn on_timeout(&mut self) -> bool {
        if self.complete {
            return false;
        }
        self.complete = true;
        debug!("ice gathering timed out");
        self.log_analysis();
        true
    }

    /// Returns the candidate when it can be applied now, buffers it otherwise.
    pub fn on_remote_candidate(&mut self, candidate: CandidateInit) -> Option<CandidateInit> {
        if self.remote_accepted {
            Some(candidate)
        } else {
            debug!("remote description not set yet, queuing candidate");
            self.pending.push(candidate);
            None
        }
    }

    /// Drains the buffer, in arrival order, exactly once.
    pub fn on_remote_description_accepted(&mut self) -> Vec<CandidateInit> {
        self.remote_accepted = true;
        std::mem::take(&mut self.pending)
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }

    fn log_analysis(&self) {
        let CandidateTally {
            host,
            srflx,
            prflx,
            relay,
        } = self.tally;
        debug!(
            "candidate analysis: {} host, {} srflx, {} prflx, {} relay",
            host, srflx, prflx, relay
        );
        if host + srflx + prflx + relay > 0 && relay == 0 {
            debug!("no relay candidates gathered; connections through symmetric NAT may fail");
        }
    }
}

/// Failures for candidates without an address or with an mDNS `.local`
/// address are expected from engines that cannot resolve them.
pub fn classify_failure(candidate: &CandidateInit) -> CandidateFailure {
    match candidate_address(&candidate.candidate) {
        None => CandidateFailure::Benign,
        Some(address) if address.ends_with(".local") => CandidateFailure::Benign,
        Some(_) => CandidateFailure::Fatal,
    }
}

pub fn log_ignored_candidate(candidate: &CandidateInit, reason: &str) {
    warn!(candidate = %candidate.candidate, "ignoring unsupported ICE candidate: {}", reason);
}
