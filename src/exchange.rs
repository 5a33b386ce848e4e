/*!
Single-slot, latest-wins handoff between the pattern thread and the
transmit thread.

At most one frame is pending and at most one is in flight. Publishing over an
unclaimed frame drops the older one. Frames are shared immutably, so replacing
the pending frame can never disturb the one being transmitted.
*/

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::encoder::EncodedFrame;
use crate::error::{PipelineError, Result};
use crate::health::Health;

/// What the transmitter does when no new frame arrives in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdlePolicy {
    /// Send the last transmitted frame again
    #[default]
    Retransmit,
    /// Leave the line quiet
    Idle,
}

/// Observable state of the claim slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Pending,
    InFlight,
}

#[derive(Default)]
struct Slot {
    pending: Option<EncodedFrame>,
    in_flight: bool,
    last: Option<EncodedFrame>,
    closed: bool,
}

pub struct FrameExchange {
    slot: Mutex<Slot>,
    ready: Condvar,
    policy: IdlePolicy,
    health: Arc<Health>,
}

/// Result of waiting for a frame
pub enum Claimed<'a> {
    Frame(InFlight<'a>),
    /// Timed out with nothing to send under [`IdlePolicy::Idle`]
    Idle,
    /// Exchange closed for shutdown
    Closed,
}

/// A claimed frame. Dropping it completes the transmission (IN_FLIGHT -> EMPTY).
pub struct InFlight<'a> {
    exchange: &'a FrameExchange,
    frame: EncodedFrame,
    repeat: bool,
}

impl InFlight<'_> {
    pub fn frame(&self) -> &EncodedFrame {
        &self.frame
    }

    /// True when this is the previous frame handed out again
    pub fn is_repeat(&self) -> bool {
        self.repeat
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut slot = self.exchange.lock();
        slot.in_flight = false;
        slot.last = Some(self.frame.clone());
    }
}

impl FrameExchange {
    pub fn new(policy: IdlePolicy, health: Arc<Health>) -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            ready: Condvar::new(),
            policy,
            health,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // A panicking holder cannot leave the slot half-written
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Offer a new frame. Returns true if an unclaimed frame was dropped.
    pub fn publish(&self, frame: EncodedFrame) -> bool {
        let dropped = {
            let mut slot = self.lock();
            slot.pending.replace(frame).is_some()
        };
        if dropped {
            self.health.record_dropped();
        }
        self.ready.notify_one();
        dropped
    }

    /// Wait up to `timeout` for a pending frame and take it (PENDING -> IN_FLIGHT).
    ///
    /// Only one claim may be outstanding; a second one fails with
    /// [`PipelineError::ExchangeBusy`].
    pub fn claim(&self, timeout: Duration) -> Result<Claimed<'_>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();

        if slot.in_flight {
            return Err(PipelineError::ExchangeBusy);
        }

        loop {
            if slot.closed {
                return Ok(Claimed::Closed);
            }
            if let Some(frame) = slot.pending.take() {
                slot.in_flight = true;
                return Ok(Claimed::Frame(InFlight {
                    exchange: self,
                    frame,
                    repeat: false,
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            slot = self
                .ready
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }

        match (self.policy, slot.last.clone()) {
            (IdlePolicy::Retransmit, Some(frame)) => {
                slot.in_flight = true;
                self.health.record_repeated();
                Ok(Claimed::Frame(InFlight {
                    exchange: self,
                    frame,
                    repeat: true,
                }))
            }
            _ => Ok(Claimed::Idle),
        }
    }

    /// Wake the consumer and refuse further claims
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn state(&self) -> SlotState {
        let slot = self.lock();
        if slot.in_flight {
            SlotState::InFlight
        } else if slot.pending.is_some() {
            SlotState::Pending
        } else {
            SlotState::Empty
        }
    }
}
