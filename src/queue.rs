//! Bounded work queue between the frame producer and the encoder workers.
//!
//! A slot is taken when a frame is pushed and released only when the worker
//! that popped it calls [`WorkQueue::task_done`] or hands it back with
//! [`WorkQueue::requeue`]. Counting in-flight frames against the capacity
//! lets a failed frame return to the head of the queue without blocking and
//! without the queue ever holding more than `capacity` frames.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::EncodeError;
use crate::frame::FrameUnit;

/// Result of [`WorkQueue::pop`].
#[derive(Debug)]
pub enum Popped {
    Frame(FrameUnit),
    /// Shut down (and empty), or aborted.
    Drained,
    /// The calling worker was asked to retire.
    Retired,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<FrameUnit>,
    in_flight: usize,
    paused: bool,
    closed: bool,
    aborted: bool,
    producer_stalls: u64,
}

impl QueueState {
    fn occupancy(&self) -> usize {
        self.items.len() + self.in_flight
    }
}

#[derive(Debug)]
pub struct WorkQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    /// Workers wait here for frames.
    not_empty: Condvar,
    /// The producer and `wait_idle_timeout` wait here for slots.
    not_full: Condvar,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Two slots per worker keeps every worker fed.
    pub fn for_workers(workers: usize) -> Self {
        Self::new(workers.saturating_mul(2))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks while every slot is taken. Returns `Cancelled`, dropping the
    /// frame, if the queue is shut down or aborted first.
    pub fn push(&self, frame: FrameUnit) -> Result<(), EncodeError> {
        let mut state = self.lock();
        if state.occupancy() >= self.capacity && !state.closed && !state.aborted {
            state.producer_stalls += 1;
            debug!(
                frame = frame.index,
                capacity = self.capacity,
                "Work queue at high watermark; producer waiting"
            );
        }
        while state.occupancy() >= self.capacity && !state.closed && !state.aborted {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.closed || state.aborted {
            return Err(EncodeError::Cancelled);
        }
        state.items.push_back(frame);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks while the queue is empty or paused. Returns the oldest frame
    /// and marks it in flight.
    pub fn pop(&self, retire: &AtomicBool) -> Popped {
        let mut state = self.lock();
        loop {
            if state.aborted {
                return Popped::Drained;
            }
            if retire.load(Ordering::Acquire) {
                return Popped::Retired;
            }
            if !state.paused || state.closed {
                if let Some(frame) = state.items.pop_front() {
                    state.in_flight += 1;
                    if state.items.is_empty() && !state.closed {
                        debug!(in_flight = state.in_flight, "Work queue drained to low watermark");
                    }
                    return Popped::Frame(frame);
                }
                if state.closed {
                    return Popped::Drained;
                }
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Releases the slot of a frame returned by `pop`.
    pub fn task_done(&self) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.not_full.notify_all();
    }

    /// Puts an in-flight frame back at the head of the queue. Never blocks;
    /// the frame keeps the slot it already held.
    pub fn requeue(&self, frame: FrameUnit) -> Result<(), EncodeError> {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.aborted {
            drop(state);
            self.not_full.notify_all();
            return Err(EncodeError::Cancelled);
        }
        state.items.push_front(frame);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    pub fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
        self.not_empty.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Graceful shutdown: queued frames are still handed out, then `pop`
    /// reports `Drained` and `push` reports `Cancelled`.
    pub fn shutdown(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Stops all work. Queued frames are discarded; returns how many.
    pub fn abort(&self) -> usize {
        let mut state = self.lock();
        state.aborted = true;
        let discarded = state.items.len();
        state.items.clear();
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
        discarded
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }

    /// Wakes blocked workers so they can observe a retire flag.
    pub fn wake_workers(&self) {
        let _state = self.lock();
        self.not_empty.notify_all();
    }

    /// Blocks until nothing is queued or in flight, the queue is aborted,
    /// or `timeout` passes. Returns false on timeout.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !state.aborted && state.occupancy() > 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return false;
            }
            state = match self.not_full.wait_timeout(state, left) {
                Ok((state, _)) => state,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// Frames waiting to be popped. Diagnostic only.
    pub fn size(&self) -> usize {
        self.lock().items.len()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn producer_stalls(&self) -> u64 {
        self.lock().producer_stalls
    }
}
