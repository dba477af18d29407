//! Idle shutdown timer
//!
//! A single monotonic deadline per controller. When it expires the
//! scheduler posts `ApMessage::IdleTimeout(token)` onto the controller queue;
//! the controller only acts on the token of the currently armed deadline, so
//! a deadline that fired just before being cancelled is ignored.

use crate::controller::ApMessage;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

struct PendingDeadline {
    token: u64,
    deadline: Instant,
    task: JoinHandle<()>,
}

pub struct TimeoutScheduler {
    enabled: bool,
    delay: Duration,
    next_token: u64,
    pending: Option<PendingDeadline>,
    queue: mpsc::UnboundedSender<ApMessage>,
}

impl TimeoutScheduler {
    pub fn new(enabled: bool, delay: Duration, queue: mpsc::UnboundedSender<ApMessage>) -> Self {
        Self {
            enabled,
            delay,
            next_token: 0,
            pending: None,
            queue,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns true if the policy actually changed. Disabling cancels any
    /// outstanding deadline.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        if self.enabled == enabled {
            return false;
        }
        self.enabled = enabled;
        if !enabled {
            self.cancel();
        }
        true
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm a new deadline `delay` from now, replacing any outstanding one.
    /// Does nothing while the policy is disabled.
    pub fn schedule(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        self.cancel();

        self.next_token += 1;
        let token = self.next_token;
        let deadline = Instant::now() + self.delay;
        let queue = self.queue.clone();
        let task = tokio::spawn(async move {
            sleep_until(deadline).await;
            let _ = queue.send(ApMessage::IdleTimeout(token));
        });

        self.pending = Some(PendingDeadline { token, deadline, task });
        debug!("Timeout message scheduled in {:?}", self.delay);
        true
    }

    /// Drop the outstanding deadline, if any
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.task.abort();
            debug!("Timeout message canceled");
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Time left until the outstanding deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.pending
            .as_ref()
            .map(|p| p.deadline.saturating_duration_since(Instant::now()))
    }

    /// Consume a fired deadline. Returns false for stale tokens.
    pub fn take_fired(&mut self, token: u64) -> bool {
        match self.pending {
            Some(ref pending) if pending.token == token => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }
}

impl Drop for TimeoutScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
