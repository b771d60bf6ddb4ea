//! Debouncing barrier between block ingestion and chain processing.
//!
//! Ingestion calls [`Barrier::raise`] once per stored block. A run is
//! released either when the count since the last run exceeds the clearance
//! level, or when a one-shot deadline armed by the first raise expires.
//! Tripping the clearance clears the deadline, so a pending timer whose
//! burst already ran wakes to nothing and is silently forgotten.
//!
//! `raise` may be called from any thread; the single worker parks in
//! [`Barrier::wait`].

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// What woke the worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BarrierWait {
    /// Run one organize+validate cycle.
    Run,
    /// The barrier is shutting down; exit the worker loop.
    Shutdown,
}

#[derive(Debug)]
struct BarrierState {
    /// Blocks raised since the last released run.
    level: u64,
    /// One-shot deadline armed by the first raise of a burst.
    deadline: Option<Instant>,
    /// Clearance level tripped; run immediately.
    tripped: bool,
    shutdown: bool,
}

/// Debouncing barrier shared between ingestion threads and the worker.
pub struct Barrier {
    state: Mutex<BarrierState>,
    wakeup: Condvar,
    clearance: u64,
    timeout: Duration,
}

impl Barrier {
    pub fn new(clearance: u64, timeout: Duration) -> Self {
        Self {
            state: Mutex::new(BarrierState {
                level: 0,
                deadline: None,
                tripped: false,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
            clearance,
            timeout,
        }
    }

    /// Record one block arrival.
    pub fn raise(&self) {
        let mut state = self.state.lock();
        state.level += 1;
        if state.level > self.clearance {
            state.level = 0;
            state.deadline = None;
            state.tripped = true;
            self.wakeup.notify_one();
        } else if state.deadline.is_none() {
            state.deadline = Some(Instant::now() + self.timeout);
            self.wakeup.notify_one();
        }
    }

    /// Park until a run is released or the barrier shuts down.
    pub fn wait(&self) -> BarrierWait {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return BarrierWait::Shutdown;
            }
            if state.tripped {
                state.tripped = false;
                state.level = 0;
                state.deadline = None;
                return BarrierWait::Run;
            }
            match state.deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        state.level = 0;
                        state.deadline = None;
                        return BarrierWait::Run;
                    }
                    self.wakeup.wait_until(&mut state, deadline);
                }
                None => self.wakeup.wait(&mut state),
            }
        }
    }

    /// Release the worker permanently.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.wakeup.notify_all();
    }

    /// Raises recorded since the last released run.
    pub fn pending(&self) -> u64 {
        self.state.lock().level
    }

    /// Whether a one-shot deadline is currently armed.
    pub fn timer_armed(&self) -> bool {
        self.state.lock().deadline.is_some()
    }
}
