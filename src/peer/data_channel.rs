//! Write gate.
//!
//! Holds at most one write issued before the link is usable and at most one
//! completion withheld by backpressure. Writes that arrive while either slot
//! is occupied wait in a queue and are replayed in order.

use crate::config::MAX_BUFFERED_AMOUNT;
use crate::error::Result;
use crate::peer::types::Payload;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tracing::debug;

/// Completion of one write; dropping it tells the writer the session is gone.
pub type Completion = Option<oneshot::Sender<Result<()>>>;

pub fn complete(done: Completion, result: Result<()>) {
    if let Some(done) = done {
        let _ = done.send(result);
    }
}

/// How a withheld write completion gets released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    /// The channel raises a buffered-amount-low event
    Native,
    /// Buffered amount is polled on an interval
    Poll,
}

pub struct DataGate {
    pending: Option<(Payload, Completion)>,
    backpressure: Completion,
    blocked: bool,
    queued: VecDeque<(Payload, Completion)>,
    release: ReleaseMode,
}

impl DataGate {
    pub fn new() -> Self {
        Self {
            pending: None,
            backpressure: None,
            blocked: false,
            queued: VecDeque::new(),
            release: ReleaseMode::Native,
        }
    }

    pub fn release_mode(&self) -> ReleaseMode {
        self.release
    }

    pub fn set_release_mode(&mut self, release: ReleaseMode) {
        self.release = release;
    }

    #[cfg(test)]
    pub(crate) fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Stores a pre-connect write, or queues it behind the one already held.
    pub fn hold(&mut self, payload: Payload, done: Completion) {
        if self.pending.is_some() {
            debug!("write issued while another awaits the connection, queuing");
            self.queued.push_back((payload, done));
        } else {
            self.pending = Some((payload, done));
        }
    }

    pub fn take_pending(&mut self) -> Option<(Payload, Completion)> {
        self.pending.take()
    }

    /// Queues a write behind a withheld completion.
    pub fn defer(&mut self, payload: Payload, done: Completion) {
        self.queued.push_back((payload, done));
    }

    pub fn pop_queued(&mut self) -> Option<(Payload, Completion)> {
        self.queued.pop_front()
    }

    /// Settles a write the channel accepted. Above the high watermark the
    /// completion is withheld until the buffer drains.
    pub fn after_send(&mut self, buffered: usize, done: Completion) {
        if buffered > MAX_BUFFERED_AMOUNT {
            debug!(buffered, "buffered amount above watermark, withholding completion");
            self.blocked = true;
            self.backpressure = done;
        } else {
            complete(done, Ok(()));
        }
    }

    /// Low-buffer signal. Returns true when a withheld completion was released.
    pub fn release(&mut self) -> bool {
        if !self.blocked {
            return false;
        }
        self.blocked = false;
        complete(self.backpressure.take(), Ok(()));
        true
    }

    /// Drops every outstanding completion without invoking it.
    pub fn clear(&mut self) {
        self.pending = None;
        self.backpressure = None;
        self.blocked = false;
        self.queued.clear();
    }
}

impl Default for DataGate {
    fn default() -> Self {
        Self::new()
    }
}
