//! Connection-swap gate for one publisher.
//!
//! ```text
//!   Stable ──begin()──► SwapInProgress ──finish()──► CooldownActive
//!     ▲                                                   │
//!     └──────────────── cooldown elapsed ◄────────────────┘
//! ```
//!
//! Publishers call [`SwapGate::wait_ready`] before sending; it blocks on a
//! condition variable while a swap is in progress, up to a timeout.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::sync::lock;

/// Observable state of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    Stable,
    SwapInProgress,
    /// A swap completed; another one is refused until `until`.
    CooldownActive { until: Instant },
}

#[derive(Debug)]
pub struct SwapGate {
    cooldown: Duration,
    state: Mutex<SwapState>,
    ready: Condvar,
}

impl SwapGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            state: Mutex::new(SwapState::Stable),
            ready: Condvar::new(),
        }
    }

    /// Current state; an elapsed cooldown reads as `Stable`.
    pub fn state(&self) -> SwapState {
        let mut state = lock(&self.state);
        settle(&mut state, Instant::now());
        *state
    }

    pub fn cooldown_active(&self) -> bool {
        matches!(self.state(), SwapState::CooldownActive { .. })
    }

    /// Block while a swap is in progress. Returns `false` if `timeout`
    /// elapsed with the swap still running.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let state = lock(&self.state);
        let (state, result) = self
            .ready
            .wait_timeout_while(state, timeout, |s| *s == SwapState::SwapInProgress)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        drop(state);
        !result.timed_out()
    }

    /// Enter `SwapInProgress` if the gate is `Stable`; otherwise return the
    /// state that prevented it.
    pub fn begin(&self) -> Result<(), SwapState> {
        let mut state = lock(&self.state);
        settle(&mut state, Instant::now());
        match *state {
            SwapState::Stable => {
                *state = SwapState::SwapInProgress;
                Ok(())
            }
            other => Err(other),
        }
    }

    /// Leave `SwapInProgress` and start the cooldown; wakes waiting publishers.
    pub fn finish(&self) {
        let mut state = lock(&self.state);
        *state = SwapState::CooldownActive {
            until: Instant::now() + self.cooldown,
        };
        drop(state);
        self.ready.notify_all();
    }
}

fn settle(state: &mut SwapState, now: Instant) {
    if let SwapState::CooldownActive { until } = *state {
        if now >= until {
            *state = SwapState::Stable;
        }
    }
}
