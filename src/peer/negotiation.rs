//! Offer/answer coordinator.
//!
//! `idle --request--> negotiating --stable--> idle`; a request arriving while
//! negotiating is queued and replayed once the signaling state is stable
//! again. The session performs the engine calls; this type only decides.

use crate::config::{SdpTransform, TricklePolicy};
use crate::engine::SessionDescription;
use crate::utils::filter_trickle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiateStep {
    /// Initiator: create an offer on the next task
    CreateOffer,
    /// Responder: ask the initiator to renegotiate
    RequestRenegotiation,
    /// A negotiation is in flight; it will be replayed once stable
    Queued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StableOutcome {
    Renegotiate,
    Negotiated,
}

pub struct Negotiator {
    initiator: bool,
    trickle: TricklePolicy,
    transform: SdpTransform,
    batched: bool,
    first_negotiation: bool,
    negotiating: bool,
    queued: bool,
    /// Local description set but held back until gathering completes
    awaiting_ice: Option<SessionDescription>,
}

impl Negotiator {
    pub fn new(initiator: bool, trickle: TricklePolicy, transform: SdpTransform) -> Self {
        Self {
            initiator,
            trickle,
            transform,
            batched: false,
            first_negotiation: true,
            negotiating: false,
            queued: false,
            awaiting_ice: None,
        }
    }

    pub fn is_negotiating(&self) -> bool {
        self.negotiating
    }

    #[cfg(test)]
    pub(crate) fn is_queued(&self) -> bool {
        self.queued
    }

    /// Marks a batch as scheduled. Returns false when one already is, in
    /// which case the request collapses into it.
    pub fn request(&mut self) -> bool {
        if self.batched {
            return false;
        }
        self.batched = true;
        true
    }

    /// Runs the scheduled batch. The responder's very first opportunity is
    /// dropped: the initiator's first offer already carries the baseline.
    pub fn take_batch(&mut self) -> bool {
        self.batched = false;
        let proceed = self.initiator || !self.first_negotiation;
        self.first_negotiation = false;
        proceed
    }

    pub fn negotiate(&mut self) -> NegotiateStep {
        let step = if self.negotiating {
            self.queued = true;
            NegotiateStep::Queued
        } else if self.initiator {
            NegotiateStep::CreateOffer
        } else {
            NegotiateStep::RequestRenegotiation
        };
        self.negotiating = true;
        step
    }

    pub fn on_stable(&mut self) -> StableOutcome {
        self.negotiating = false;
        if self.queued {
            self.queued = false;
            StableOutcome::Renegotiate
        } else {
            StableOutcome::Negotiated
        }
    }

    /// Trickle suppression then the caller's transform
    pub fn prepare_local(&self, mut desc: SessionDescription) -> SessionDescription {
        if self.trickle.strips_trickle_option() {
            desc.sdp = filter_trickle(&desc.sdp);
        }
        desc.sdp = (self.transform)(desc.sdp);
        desc
    }

    /// True when a freshly set description can be signaled right away
    pub fn emits_immediately(&self, ice_complete: bool) -> bool {
        self.trickle.emits_candidates() || ice_complete
    }

    pub fn await_ice(&mut self, desc: SessionDescription) {
        self.awaiting_ice = Some(desc);
    }

    pub fn take_awaiting(&mut self) -> Option<SessionDescription> {
        self.awaiting_ice.take()
    }

    pub fn reset(&mut self) {
        self.batched = false;
        self.negotiating = false;
        self.queued = false;
        self.awaiting_ice = None;
    }
}
