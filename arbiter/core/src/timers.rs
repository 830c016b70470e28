//! Timers
//!
//! The engine never sleeps. Whenever it needs something to happen later it
//! returns a [`TimerEffect::Schedule`]; when that time comes the owner feeds a
//! [`TimerFired`] back into the engine. Cancellation is an effect too.
//!
//! Timer callbacks can race with fresh calls, so the engine re-validates every
//! firing against the identity it was scheduled for and treats a mismatch as
//! a silent no-op.
//!
//! [`TimerTable`] is the tokio-backed clock used by the session driver. Tests
//! that want a virtual clock apply the effects themselves.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::display::DisplayId;
use crate::messages::AppId;

/// Identity of one scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerId(u64);

impl TimerId {
    /// Get the raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Hands out timer IDs for one engine
#[derive(Debug, Default)]
pub struct TimerIds {
    next: u64,
}

impl TimerIds {
    /// Allocate the next ID
    pub fn allocate(&mut self) -> TimerId {
        self.next += 1;
        TimerId(self.next)
    }
}

/// What a timer means when it fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timer {
    /// An app's boot grace period is over
    BootComplete {
        /// The app that was booting
        app: AppId,
    },
    /// A timed display reached its expiry
    DisplayExpired {
        /// The display that expired
        display: DisplayId,
    },
    /// A background lock reached its hard lifetime
    LockExpired {
        /// Grant the timer belongs to
        generation: u64,
    },
    /// A background lock holder has been silent too long
    LockInactive {
        /// Grant the timer belongs to
        generation: u64,
    },
    /// The throttle window for the deferred slot elapsed
    ThrottleRelease,
    /// A persistent display is due to be re-sent
    PersistentRefresh {
        /// The display to refresh
        display: DisplayId,
    },
}

/// A timer side effect requested by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEffect {
    /// Fire `timer` at `deadline`
    Schedule {
        /// Timer identity
        id: TimerId,
        /// When to fire
        deadline: Instant,
        /// What it means
        timer: Timer,
    },
    /// Drop a previously scheduled timer
    Cancel {
        /// Timer identity
        id: TimerId,
    },
}

/// A timer that reached its deadline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    /// Timer identity
    pub id: TimerId,
    /// What it means
    pub timer: Timer,
}

/// Tokio-backed clock: one task per scheduled timer
///
/// Each timer task waits for its deadline and then posts a [`TimerFired`] on
/// the channel given at construction. Cancelling aborts the task; a firing
/// that was already posted before the abort is left for the engine to
/// discard as stale.
#[derive(Debug)]
pub struct TimerTable {
    tasks: HashMap<TimerId, AbortHandle>,
    fired_tx: mpsc::UnboundedSender<TimerFired>,
}

impl TimerTable {
    /// Create a table posting firings to `fired_tx`
    #[must_use]
    pub fn new(fired_tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            tasks: HashMap::new(),
            fired_tx,
        }
    }

    /// Apply a batch of effects in order
    pub fn apply(&mut self, effects: Vec<TimerEffect>) {
        for effect in effects {
            match effect {
                TimerEffect::Schedule {
                    id,
                    deadline,
                    timer,
                } => self.schedule(id, deadline, timer),
                TimerEffect::Cancel { id } => self.cancel(id),
            }
        }
    }

    /// Forget a timer whose firing has been received
    pub fn fired(&mut self, id: TimerId) {
        self.tasks.remove(&id);
    }

    /// Number of timers still pending
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Abort every pending timer
    pub fn abort_all(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }

    fn schedule(&mut self, id: TimerId, deadline: Instant, timer: Timer) {
        let tx = self.fired_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            // Receiver gone means the session was torn down
            let _ = tx.send(TimerFired { id, timer });
        });
        if let Some(previous) = self.tasks.insert(id, task.abort_handle()) {
            previous.abort();
        }
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(handle) = self.tasks.remove(&id) {
            handle.abort();
        }
    }
}

impl Drop for TimerTable {
    fn drop(&mut self) {
        self.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timer_ids_are_monotonic() {
        let mut ids = TimerIds::default();
        let a = ids.allocate();
        let b = ids.allocate();
        assert!(b > a);
        assert_eq!(a.to_string(), "timer-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_table_fires_at_deadline() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut table = TimerTable::new(tx);
        let mut ids = TimerIds::default();
        let id = ids.allocate();

        table.apply(vec![TimerEffect::Schedule {
            id,
            deadline: Instant::now() + Duration::from_secs(3),
            timer: Timer::ThrottleRelease,
        }]);
        assert_eq!(table.pending(), 1);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.id, id);
        assert_eq!(fired.timer, Timer::ThrottleRelease);
        table.fired(id);
        assert_eq!(table.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut table = TimerTable::new(tx);
        let mut ids = TimerIds::default();
        let cancelled = ids.allocate();
        let kept = ids.allocate();
        let now = Instant::now();

        table.apply(vec![
            TimerEffect::Schedule {
                id: cancelled,
                deadline: now + Duration::from_secs(1),
                timer: Timer::ThrottleRelease,
            },
            TimerEffect::Schedule {
                id: kept,
                deadline: now + Duration::from_secs(2),
                timer: Timer::ThrottleRelease,
            },
            TimerEffect::Cancel { id: cancelled },
        ]);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.id, kept);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_all_on_drop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut table = TimerTable::new(tx);
            let mut ids = TimerIds::default();
            table.apply(vec![TimerEffect::Schedule {
                id: ids.allocate(),
                deadline: Instant::now() + Duration::from_secs(1),
                timer: Timer::ThrottleRelease,
            }]);
        }
        // Every sender clone is dropped once the aborted task is gone
        assert!(rx.recv().await.is_none());
    }
}
