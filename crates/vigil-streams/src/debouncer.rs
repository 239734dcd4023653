//! Trailing-edge debouncing.
//!
//! A [`Debouncer`] coalesces a burst of triggers into one deferred action:
//! every trigger pushes the deadline out to `now + window`, and the action
//! runs once the deadline passes without another trigger. If triggers never
//! stop arriving the action is deferred indefinitely.
//!
//! The debouncer holds no task of its own. The owning loop reads
//! [`Debouncer::deadline`] and waits on it with [`wait_until`] inside its
//! `select!`, so cancelling the loop cancels the pending action too.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
    triggers: u64,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
            triggers: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Schedule the action, resetting any pending deadline.
    pub fn trigger(&mut self) {
        self.deadline = Some(Instant::now() + self.window);
        self.triggers += 1;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drop the pending action. Returns the number of triggers it coalesced.
    pub fn cancel(&mut self) -> u64 {
        self.deadline = None;
        std::mem::take(&mut self.triggers)
    }

    /// Consume the pending action if its deadline has passed. Returns the
    /// number of triggers it coalesced.
    pub fn take_due(&mut self, now: Instant) -> Option<u64> {
        match self.deadline {
            Some(deadline) if deadline <= now => Some(self.cancel()),
            _ => None,
        }
    }
}

/// Sleep until `deadline`, or forever when there is none.
pub async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
