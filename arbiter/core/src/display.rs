//! Display Records
//!
//! What is on screen, what the core app last asked for, and who holds the
//! background lock. Records are replaced, never mutated in place, so an
//! [`ActiveDisplay`]'s [`DisplayId`] is a stable identity: timers and the
//! throttle slot compare IDs, never content, because two requests can be
//! content-equal and still be logically distinct.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::messages::{AppId, DisplayRequest};

/// Process-unique identity of an [`ActiveDisplay`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DisplayId(u64);

impl DisplayId {
    /// Allocate the next display ID
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "display-{}", self.0)
    }
}

/// A request that was accepted for display
#[derive(Debug, Clone)]
pub struct ActiveDisplay {
    /// Identity used by timers and the throttle slot
    pub id: DisplayId,
    /// The accepted request
    pub request: DisplayRequest,
    /// When the display was accepted
    pub started_at: Instant,
    /// When it stops being eligible; `None` for persistent displays
    pub expires_at: Option<Instant>,
}

impl ActiveDisplay {
    /// Materialize a request accepted at `now`
    #[must_use]
    pub fn new(request: DisplayRequest, now: Instant) -> Self {
        let expires_at = request.duration().map(|d| now + d);
        Self {
            id: DisplayId::next(),
            request,
            started_at: now,
            expires_at,
        }
    }

    /// App that owns this display
    #[must_use]
    pub fn owner(&self) -> &AppId {
        &self.request.requesting_app
    }

    /// Whether the display never expires on its own
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.expires_at.is_none()
    }

    /// Persistent, or not yet past its expiry
    #[must_use]
    pub fn has_remaining_duration(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires| expires > now)
    }
}

/// Liveness of a background lock at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    /// Unexpired and recently active
    Live,
    /// Holder has been silent for the inactivity timeout
    Inactive,
    /// Past its hard lifetime
    Expired,
}

/// Temporary exclusive right of one non-core app to pre-empt the core app
#[derive(Debug, Clone)]
pub struct BackgroundLock {
    /// App holding the lock
    pub owner: AppId,
    /// Distinguishes this grant from earlier grants to the same app
    pub generation: u64,
    /// When the lock was granted
    pub acquired_at: Instant,
    /// Hard end of the lock
    pub expires_at: Instant,
    /// Last accepted request from the holder
    pub last_active: Instant,
    /// The holder's most recent accepted display
    pub display: Option<ActiveDisplay>,
}

impl BackgroundLock {
    /// Grant a fresh lock at `now`
    #[must_use]
    pub fn grant(owner: AppId, generation: u64, now: Instant, lifetime: Duration) -> Self {
        Self {
            owner,
            generation,
            acquired_at: now,
            expires_at: now + lifetime,
            last_active: now,
            display: None,
        }
    }

    /// Record activity from the holder
    pub fn touch(&mut self, now: Instant) {
        self.last_active = self.last_active.max(now);
    }

    /// Liveness at `now`; inactivity is checked before hard expiry
    #[must_use]
    pub fn status(&self, now: Instant, inactive_timeout: Duration) -> LockStatus {
        if now.saturating_duration_since(self.last_active) >= inactive_timeout {
            LockStatus::Inactive
        } else if self.expires_at > now {
            LockStatus::Live
        } else {
            LockStatus::Expired
        }
    }
}

/// Per-session arbitration state
#[derive(Debug, Clone, Default)]
pub struct DisplayState {
    /// What is visible right now; `None` when cleared
    pub current: Option<ActiveDisplay>,
    /// The core app's most recent display
    pub core_app_display: Option<ActiveDisplay>,
    /// The background lock, if any app holds it
    pub background_lock: Option<BackgroundLock>,
}

impl DisplayState {
    /// ID of the visible display
    #[must_use]
    pub fn current_id(&self) -> Option<DisplayId> {
        self.current.as_ref().map(|d| d.id)
    }

    /// Owner of the visible display
    #[must_use]
    pub fn current_owner(&self) -> Option<&AppId> {
        self.current.as_ref().map(ActiveDisplay::owner)
    }

    /// App holding the background lock
    #[must_use]
    pub fn lock_holder(&self) -> Option<&AppId> {
        self.background_lock.as_ref().map(|lock| &lock.owner)
    }

    /// Lock holder, but only while its content is what is actually visible
    #[must_use]
    pub fn visible_lock_holder(&self) -> Option<&AppId> {
        let holder = self.lock_holder()?;
        (self.current_owner() == Some(holder)).then_some(holder)
    }
}

/// Why a display request was turned down by policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// Apps are booting; only the dashboard may draw
    Booting,
    /// Another app holds the background lock
    LockHeld {
        /// Current lock holder
        holder: AppId,
    },
    /// The core app is pre-empted by a visible lock holder
    CoreBlocked {
        /// Current lock holder
        holder: AppId,
    },
    /// The app stopped while its request was waiting in the throttle slot
    AppStopped,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Booting => write!(f, "apps are booting"),
            Self::LockHeld { holder } => write!(f, "background lock held by {holder}"),
            Self::CoreBlocked { holder } => write!(f, "core app blocked by {holder}"),
            Self::AppStopped => write!(f, "app stopped"),
        }
    }
}

/// What happened to a display request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DisplayOutcome {
    /// Sent and now visible
    Shown,
    /// Too soon after the last send; parked in the throttle slot
    Deferred,
    /// Turned down by policy
    Rejected(RejectReason),
    /// The transport refused the frame
    DeliveryFailed,
}

impl DisplayOutcome {
    /// Whether the content went out to the glasses
    #[must_use]
    pub fn is_shown(&self) -> bool {
        matches!(self, Self::Shown)
    }

    /// Whether the content is visible or still queued to become visible
    #[must_use]
    pub fn is_pending_or_shown(&self) -> bool {
        matches!(self, Self::Shown | Self::Deferred)
    }
}

/// One recorded display attempt
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// What was asked for
    pub request: DisplayRequest,
    /// What happened
    pub outcome: DisplayOutcome,
}

/// Bounded per-app record of display attempts, shown or not
#[derive(Debug, Clone)]
pub struct DisplayHistory {
    limit: usize,
    entries: HashMap<AppId, VecDeque<HistoryEntry>>,
}

impl DisplayHistory {
    /// Keep at most `limit` attempts per app (0 disables recording)
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            entries: HashMap::new(),
        }
    }

    /// Record an attempt, evicting the oldest entry past the limit
    pub fn record(&mut self, request: &DisplayRequest, outcome: DisplayOutcome) {
        if self.limit == 0 {
            return;
        }
        let entries = self
            .entries
            .entry(request.requesting_app.clone())
            .or_default();
        if entries.len() == self.limit {
            entries.pop_front();
        }
        entries.push_back(HistoryEntry {
            request: request.clone(),
            outcome,
        });
    }

    /// Attempts recorded for an app, oldest first
    pub fn history(&self, app: &AppId) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.get(app).into_iter().flatten()
    }

    /// Forget an app's attempts
    pub fn clear(&mut self, app: &AppId) {
        self.entries.remove(app);
    }
}
