//! Bounded frame hand-off between capture and processing.
//!
//! `BoundedFrameChannel` is a fixed-capacity FIFO shared by every capture
//! worker (producers) and the single processing worker (consumer).
//!
//! Overload policy is drop-newest: `offer` never blocks and never evicts a
//! frame already in the queue. A producer that finds the channel full drops
//! its own frame and is told so, which keeps the relative order of queued
//! frames intact under sustained overload.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::frame::Frame;

/// Outcome of a non-blocking `offer`.
#[derive(Debug, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    /// Channel was at capacity; the offered frame was discarded.
    Dropped,
    /// Channel has been closed; the offer was a no-op.
    Closed,
}

/// Outcome of a bounded-wait `take`.
#[derive(Debug)]
pub enum Take {
    Frame(Frame),
    TimedOut,
    /// Channel closed and drained; no more frames will ever arrive.
    Closed,
}

struct State {
    queue: VecDeque<Frame>,
    closed: bool,
}

pub struct BoundedFrameChannel {
    state: Mutex<State>,
    available: Condvar,
    capacity: usize,
}

impl BoundedFrameChannel {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "channel capacity must be at least 1");
        Self {
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Offer a frame without blocking.
    ///
    /// Returns `Offer::Dropped` when the channel is at capacity; queued
    /// frames are left untouched.
    pub fn offer(&self, frame: Frame) -> Offer {
        let mut state = self.state.lock().expect("frame channel lock poisoned");
        if state.closed {
            return Offer::Closed;
        }
        if state.queue.len() >= self.capacity {
            return Offer::Dropped;
        }
        state.queue.push_back(frame);
        drop(state);
        self.available.notify_one();
        Offer::Accepted
    }

    /// Wait up to `timeout` for the next frame in global arrival order.
    ///
    /// Frames are returned FIFO across all producers. After `close`, any
    /// frames still queued are drained before `Take::Closed` is reported.
    pub fn take(&self, timeout: Duration) -> Take {
        let mut state = self.state.lock().expect("frame channel lock poisoned");
        loop {
            if let Some(frame) = state.queue.pop_front() {
                return Take::Frame(frame);
            }
            if state.closed {
                return Take::Closed;
            }
            let (next, wait) = self
                .available
                .wait_timeout(state, timeout)
                .expect("frame channel lock poisoned");
            state = next;
            if wait.timed_out() {
                // One more pop attempt before reporting: a producer may have
                // slipped in between the timeout and reacquiring the lock.
                return match state.queue.pop_front() {
                    Some(frame) => Take::Frame(frame),
                    None if state.closed => Take::Closed,
                    None => Take::TimedOut,
                };
            }
        }
    }

    /// Close the channel. Idempotent; wakes all blocked `take` calls.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("frame channel lock poisoned");
        state.closed = true;
        drop(state);
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .expect("frame channel lock poisoned")
            .closed
    }

    /// Current queue length, for the metrics gauge.
    pub fn depth(&self) -> usize {
        self.state
            .lock()
            .expect("frame channel lock poisoned")
            .queue
            .len()
    }
}
