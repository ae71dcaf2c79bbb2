//! Debounced scheduling of reconnect attempts
//!
//! A single failure usually surfaces through several callbacks at once
//! (connection state and ICE state both report it). The scheduler collapses
//! them into one delayed retry: while a timer is armed, further scheduling
//! is a no-op.

use crate::controller::ViewerEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One-shot retry timer, at most one armed at a time
///
/// On expiry a [`ViewerEvent::RetryElapsed`] carrying the scheduling
/// attempt's generation is pushed onto the controller queue; a stale event
/// from a superseded attempt is discarded there by generation comparison.
pub struct RetryScheduler {
    delay: Duration,
    armed: bool,
    timer: Option<JoinHandle<()>>,
    events: mpsc::UnboundedSender<ViewerEvent>,
}

impl RetryScheduler {
    /// Create a scheduler firing onto the given event queue
    pub fn new(delay: Duration, events: mpsc::UnboundedSender<ViewerEvent>) -> Self {
        Self {
            delay,
            armed: false,
            timer: None,
            events,
        }
    }

    /// Fixed delay between failure and retry
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether a retry timer is currently armed
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Arm the retry timer, unless one is already pending
    ///
    /// Returns `true` if a timer was armed by this call.
    pub fn schedule(&mut self, generation: u64) -> bool {
        if self.armed {
            debug!(generation, "retry already pending, ignoring");
            return false;
        }

        info!(delay = ?self.delay, generation, "scheduling reconnect");

        let events = self.events.clone();
        let delay = self.delay;
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ViewerEvent::RetryElapsed { generation });
        }));
        self.armed = true;

        true
    }

    /// Clear the armed flag after the timer has fired
    pub fn disarm(&mut self) {
        self.armed = false;
        self.timer = None;
    }

    /// Cancel any pending retry
    ///
    /// Clears the timer and the armed flag together so a stale retry cannot
    /// fire after teardown.
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.armed = false;
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
