//! FIFO job queue for prefetch work
//!
//! Tracks every frame that is queued or being loaded so the same frame is
//! never queued twice, and lets callers wait until all work has drained.

use annotator_cache::FrameId;
use std::collections::{HashSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<FrameId>,
    /// Queued or running
    in_flight: HashSet<FrameId>,
    running: usize,
    closed: bool,
}

/// Thread-safe job queue shared by the scheduler and its workers
#[derive(Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    work_ready: Condvar,
    idle: Condvar,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a frame. Returns `false` if it is already queued or running,
    /// or the queue is closed.
    pub fn submit(&self, frame_id: FrameId) -> bool {
        let mut state = self.lock();
        if state.closed || !state.in_flight.insert(frame_id) {
            return false;
        }
        state.pending.push_back(frame_id);
        drop(state);
        self.work_ready.notify_one();
        true
    }

    /// Whether a frame is queued or running
    pub fn is_in_flight(&self, frame_id: FrameId) -> bool {
        self.lock().in_flight.contains(&frame_id)
    }

    /// Take the next job, waiting up to `timeout` for one to arrive
    ///
    /// Returns `None` on timeout or once the queue is closed.
    pub fn next_job(&self, timeout: Duration) -> Option<FrameId> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(frame_id) = state.pending.pop_front() {
                state.running += 1;
                return Some(frame_id);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .work_ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Mark a job taken by [`next_job`](Self::next_job) as finished
    pub fn complete(&self, frame_id: FrameId) {
        let mut state = self.lock();
        state.in_flight.remove(&frame_id);
        state.running = state.running.saturating_sub(1);
        if state.running == 0 && state.pending.is_empty() {
            self.idle.notify_all();
        }
    }

    /// Number of jobs queued or running
    pub fn pending(&self) -> usize {
        let state = self.lock();
        state.pending.len() + state.running
    }

    /// Block until no job is queued or running. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while state.running > 0 || !state.pending.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .idle
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Stop accepting work and discard jobs that have not started
    ///
    /// Returns the number of discarded jobs.
    pub fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        let discarded: Vec<FrameId> = state.pending.drain(..).collect();
        for frame_id in &discarded {
            state.in_flight.remove(frame_id);
        }
        drop(state);
        self.work_ready.notify_all();
        self.idle.notify_all();
        discarded.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
