//! Session lifecycle and timers.
//!
//! `live -> destroying -> destroyed`, observed by handles without a round trip
//! to the session task. Timers post back into the task's inbox.

use crate::session::Op;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

const LIVE: u8 = 0;
const DESTROYING: u8 = 1;
const DESTROYED: u8 = 2;

/// Destruction state, written by the session task and read by every handle.
#[derive(Clone, Debug, Default)]
pub struct Lifecycle(Arc<AtomicU8>);

impl Lifecycle {
    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::Acquire) == LIVE
    }

    #[cfg(test)]
    pub(crate) fn is_destroying(&self) -> bool {
        self.0.load(Ordering::Acquire) == DESTROYING
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.load(Ordering::Acquire) == DESTROYED
    }

    /// `live -> destroying`; false if teardown already began
    pub(crate) fn begin_destroy(&self) -> bool {
        self.0
            .compare_exchange(LIVE, DESTROYING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn mark_destroyed(&self) {
        self.0.store(DESTROYED, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    IceComplete,
    StatsRetry,
    BufferedPoll,
    ChannelClosingPoll,
    EndGrace,
}

/// Timer tasks owned by one session. Each posts `Op::Timer` back into the
/// session inbox through a weak sender, so a pending timer never keeps a
/// session alive.
#[derive(Default)]
pub(crate) struct Timers {
    handles: HashMap<TimerKind, JoinHandle<()>>,
}

impl Timers {
    pub fn once(&mut self, kind: TimerKind, delay: Duration, ops: WeakUnboundedSender<Op>) {
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            if let Some(tx) = ops.upgrade() {
                let _ = tx.send(Op::Timer(kind));
            }
        });
        if let Some(previous) = self.handles.insert(kind, handle) {
            previous.abort();
        }
    }

    pub fn interval(&mut self, kind: TimerKind, period: Duration, ops: WeakUnboundedSender<Op>) {
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(tx) = ops.upgrade() else { break };
                if tx.send(Op::Timer(kind)).is_err() {
                    break;
                }
            }
        });
        if let Some(previous) = self.handles.insert(kind, handle) {
            previous.abort();
        }
    }

    pub fn is_active(&self, kind: TimerKind) -> bool {
        self.handles
            .get(&kind)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(handle) = self.handles.remove(&kind) {
            handle.abort();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
