//! Notification gate: at most one successful send per session.
//!
//! A failed attempt leaves the gate open so the next empty-processing-set
//! condition can retry.

use std::future::Future;

#[derive(Debug, PartialEq)]
pub enum GateOutcome<T, E> {
    /// Action ran and succeeded; the gate is now closed.
    Fired(T),
    /// Gate already closed; action not run.
    Skipped,
    /// Action ran and failed; the gate stays open.
    Failed(E),
}

#[derive(Debug, Clone, Default)]
pub struct NotificationGate {
    fired: bool,
    attempts: u32,
}

impl NotificationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Number of times the action has actually been invoked.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub async fn fire_once<F, Fut, T, E>(&mut self, action: F) -> GateOutcome<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.fired {
            return GateOutcome::Skipped;
        }
        self.attempts += 1;
        match action().await {
            Ok(value) => {
                self.fired = true;
                GateOutcome::Fired(value)
            }
            Err(e) => GateOutcome::Failed(e),
        }
    }
}
