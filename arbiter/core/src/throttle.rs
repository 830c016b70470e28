//! Send Throttling
//!
//! Keeps consecutive frames at least `throttle_delay` apart so bursts of
//! requests cannot flood the glasses transport.
//!
//! Adapted from the token-bucket idea, narrowed to a bucket of one: a send is
//! allowed when the window since the previous send has elapsed. A send that
//! arrives too early does not queue; it parks in a single slot, and a newer
//! early send replaces whatever was parked (last write wins).
//!
//! ```text
//!   send ──▶ window open? ──yes──▶ deliver, record_send(now)
//!                │
//!                no
//!                ▼
//!          ThrottleSlot (one entry; replaced by newer sends)
//!                │  ThrottleRelease fires at last_send + delay
//!                ▼
//!          re-validate, then deliver
//! ```

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::display::{ActiveDisplay, DisplayId};
use crate::messages::AppId;
use crate::timers::TimerId;

/// Spacing between throttled sends
#[derive(Debug, Clone)]
pub struct Throttle {
    delay: Duration,
    last_send: Option<Instant>,
}

impl Throttle {
    /// Create a throttle with the given minimum spacing
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_send: None,
        }
    }

    /// Time left before the next send may go out, `None` if it may go now
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let last = self.last_send?;
        let elapsed = now.saturating_duration_since(last);
        (elapsed < self.delay).then(|| self.delay - elapsed)
    }

    /// Record a throttled send at `now`
    pub fn record_send(&mut self, now: Instant) {
        self.last_send = Some(now);
    }

    /// When the most recent throttled send went out
    #[must_use]
    pub fn last_send(&self) -> Option<Instant> {
        self.last_send
    }
}

/// What the deferred slot will send once the window opens
#[derive(Debug, Clone)]
pub enum PendingSend {
    /// Show an accepted display
    Show(ActiveDisplay),
    /// Blank the main view
    Clear,
}

/// The single deferred send
#[derive(Debug, Clone)]
pub struct ThrottleSlot {
    /// Timer that releases this slot
    pub timer: TimerId,
    /// What will be sent
    pub pending: PendingSend,
    /// What was visible when the send was parked
    ///
    /// If something else becomes visible before release, the parked send is
    /// stale and gets dropped.
    pub displaced: Option<DisplayId>,
}

impl ThrottleSlot {
    /// App owning the parked send; `None` for a clear
    #[must_use]
    pub fn owner(&self) -> Option<&AppId> {
        match &self.pending {
            PendingSend::Show(display) => Some(display.owner()),
            PendingSend::Clear => None,
        }
    }
}

/// Counters describing throttle behavior over a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThrottleStats {
    /// Frames delivered to the transport
    pub sent: u64,
    /// Sends parked in the slot
    pub deferred: u64,
    /// Parked sends overwritten by a newer one
    pub replaced: u64,
    /// Parked sends discarded without being delivered
    pub dropped: u64,
}
