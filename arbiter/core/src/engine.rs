//! Display Arbitration Engine
//!
//! The per-session state machine deciding what the glasses show.
//!
//! # Design Philosophy
//!
//! Every input goes through one entry point, [`DisplayEngine::on_event`]:
//! app lifecycle calls, display requests, and timer firings alike. The
//! engine never waits. Anything that must happen later comes back out as a
//! [`TimerEffect`] and re-enters as [`EngineEvent::TimerFired`]. Frames go out
//! synchronously through the [`FrameSender`], and state is only committed
//! once a send succeeded.
//!
//! # Priority
//!
//! ```text
//!   1. dashboard app   overlay, bypasses boot, lock and throttle
//!   2. boot screen     while any app is booting
//!   3. lock holder     a non-core app holding a live background lock
//!   4. core app        baseline content
//!   5. nothing         cleared
//! ```
//!
//! # Timers
//!
//! | Timer               | Armed when                      | On firing                          |
//! |---------------------|---------------------------------|------------------------------------|
//! | `BootComplete`      | app starts                      | leave boot set, cascade or redraw  |
//! | `DisplayExpired`    | timed display committed         | cascade                            |
//! | `PersistentRefresh` | persistent display committed    | re-send identical frame, re-arm    |
//! | `LockExpired`       | lock granted                    | release lock, maybe cascade        |
//! | `LockInactive`      | lock granted or holder active   | release lock, maybe cascade        |
//! | `ThrottleRelease`   | send parked in the slot         | re-validate and send               |
//!
//! Each firing is checked against the timer ID and the identity it was
//! armed for. A mismatch means the state moved on and the firing is dropped.

use serde::Serialize;
use tokio::time::Instant;

use crate::boot::{boot_screen, clear_frame, BootingSet};
use crate::config::ArbiterConfig;
use crate::display::{
    ActiveDisplay, BackgroundLock, DisplayHistory, DisplayId, DisplayOutcome, DisplayState,
    HistoryEntry, LockStatus, RejectReason,
};
use crate::messages::{AppId, DisplayRequest, ViewType};
use crate::throttle::{PendingSend, Throttle, ThrottleSlot, ThrottleStats};
use crate::timers::{Timer, TimerEffect, TimerFired, TimerId, TimerIds};
use crate::transport::FrameSender;

// =============================================================================
// Events and Results
// =============================================================================

/// Input to the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// An app began booting
    AppStarted(AppId),
    /// An app stopped
    AppStopped(AppId),
    /// An app asked to show something
    DisplayRequested(DisplayRequest),
    /// A previously scheduled timer reached its deadline
    TimerFired(TimerFired),
}

/// Result of handling one event
#[derive(Debug, Clone, Default)]
pub struct Step {
    /// Outcome of a display request; `None` for other events
    pub outcome: Option<DisplayOutcome>,
    /// Timers to schedule or cancel, in order
    pub effects: Vec<TimerEffect>,
}

impl Step {
    /// Whether a display request was shown right away
    #[must_use]
    pub fn accepted(&self) -> bool {
        self.outcome.as_ref().is_some_and(DisplayOutcome::is_shown)
    }
}

/// Why the next-display cascade ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeReason {
    /// The last booting app finished booting
    BootComplete,
    /// The visible app stopped, or the last booting app did
    AppStopped,
    /// The visible display reached its expiry
    DisplayExpired,
    /// A background lock was released by a timer
    LockReleased,
}

/// Who is on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibleState {
    /// Nothing shown
    Idle,
    /// The boot screen
    Booting,
    /// The core app
    CoreVisible,
    /// A background app
    LockHolderVisible,
    /// Dashboard content on the main view
    DashboardVisible,
}

/// Summary of the parked send
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingSummary {
    /// A display waiting for the throttle window
    Show {
        /// Owner of the parked display
        app: AppId,
    },
    /// A clear waiting for the throttle window
    Clear,
}

/// Serializable view of an engine, for debugging and status endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineSnapshot {
    /// Who is on screen
    pub state: VisibleState,
    /// Owner of the visible display
    pub current_owner: Option<AppId>,
    /// App holding the background lock
    pub lock_holder: Option<AppId>,
    /// Booting apps in start order
    pub booting: Vec<AppId>,
    /// The parked send, if any
    pub pending: Option<PendingSummary>,
    /// Throttle counters
    pub stats: ThrottleStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockRelease {
    Expired,
    Inactive,
}

#[derive(Debug, Default)]
struct LockTimers {
    expiry: Option<TimerId>,
    inactive: Option<TimerId>,
}

// =============================================================================
// Engine
// =============================================================================

/// The per-session arbitration state machine
///
/// Generic over the transport so tests can record frames and the session
/// driver can forward them to a channel.
#[derive(Debug)]
pub struct DisplayEngine<S: FrameSender> {
    config: ArbiterConfig,
    state: DisplayState,
    booting: BootingSet,
    throttle: Throttle,
    slot: Option<ThrottleSlot>,
    stats: ThrottleStats,
    history: DisplayHistory,
    sender: S,
    timer_ids: TimerIds,
    /// Expiry or refresh timer of the visible display
    display_timer: Option<TimerId>,
    lock_timers: LockTimers,
    next_lock_generation: u64,
    effects: Vec<TimerEffect>,
}

impl<S: FrameSender> DisplayEngine<S> {
    /// Create an idle engine
    pub fn new(config: ArbiterConfig, sender: S) -> Self {
        Self {
            throttle: Throttle::new(config.throttle_delay),
            history: DisplayHistory::new(config.history_limit),
            config,
            state: DisplayState::default(),
            booting: BootingSet::new(),
            slot: None,
            stats: ThrottleStats::default(),
            sender,
            timer_ids: TimerIds::default(),
            display_timer: None,
            lock_timers: LockTimers::default(),
            next_lock_generation: 0,
            effects: Vec::new(),
        }
    }

    /// Handle one event at `now`
    pub fn on_event(&mut self, event: EngineEvent, now: Instant) -> Step {
        let outcome = match event {
            EngineEvent::AppStarted(app) => {
                self.app_started(app, now);
                None
            }
            EngineEvent::AppStopped(app) => {
                self.app_stopped(&app, now);
                None
            }
            EngineEvent::DisplayRequested(request) => Some(self.display_requested(request, now)),
            EngineEvent::TimerFired(fired) => {
                self.timer_fired(fired, now);
                None
            }
        };

        Step {
            outcome,
            effects: std::mem::take(&mut self.effects),
        }
    }

    /// An app began booting
    pub fn handle_app_start(&mut self, app: AppId, now: Instant) -> Step {
        self.on_event(EngineEvent::AppStarted(app), now)
    }

    /// An app stopped
    pub fn handle_app_stop(&mut self, app: AppId, now: Instant) -> Step {
        self.on_event(EngineEvent::AppStopped(app), now)
    }

    /// An app asked to show something; [`Step::accepted`] is the yes/no answer
    pub fn handle_display_event(&mut self, request: DisplayRequest, now: Instant) -> Step {
        self.on_event(EngineEvent::DisplayRequested(request), now)
    }

    /// A scheduled timer fired
    pub fn handle_timer(&mut self, fired: TimerFired, now: Instant) -> Step {
        self.on_event(EngineEvent::TimerFired(fired), now)
    }

    /// Cancel every outstanding timer and drop all state
    ///
    /// The engine is idle afterwards. Late firings of the cancelled timers
    /// are ignored.
    pub fn teardown(&mut self) -> Vec<TimerEffect> {
        for timer in self.booting.drain_timers() {
            self.cancel(timer);
        }
        let display_timer = self.display_timer.take();
        self.cancel_opt(display_timer);
        self.release_lock();
        if let Some(slot) = self.slot.take() {
            self.cancel(slot.timer);
        }
        self.state = DisplayState::default();
        tracing::debug!("Display engine torn down");
        std::mem::take(&mut self.effects)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Current arbitration state
    #[must_use]
    pub fn state(&self) -> &DisplayState {
        &self.state
    }

    /// Policy the engine runs with
    #[must_use]
    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    /// Apps currently booting
    #[must_use]
    pub fn booting(&self) -> &BootingSet {
        &self.booting
    }

    /// Throttle counters
    #[must_use]
    pub fn stats(&self) -> ThrottleStats {
        self.stats
    }

    /// Display attempts recorded for an app, oldest first
    pub fn history(&self, app: &AppId) -> impl Iterator<Item = &HistoryEntry> {
        self.history.history(app)
    }

    /// Forget an app's recorded attempts
    pub fn clear_history(&mut self, app: &AppId) {
        self.history.clear(app);
    }

    /// Who is on screen right now
    #[must_use]
    pub fn visible_state(&self) -> VisibleState {
        if !self.booting.is_empty() {
            return VisibleState::Booting;
        }
        match self.state.current.as_ref() {
            None => VisibleState::Idle,
            Some(display) if *display.owner() == self.config.core_app => VisibleState::CoreVisible,
            Some(display) if *display.owner() == self.config.dashboard_app => {
                VisibleState::DashboardVisible
            }
            Some(_) => VisibleState::LockHolderVisible,
        }
    }

    /// Serializable summary of the engine
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.visible_state(),
            current_owner: self.state.current_owner().cloned(),
            lock_holder: self.state.lock_holder().cloned(),
            booting: self.booting.apps().cloned().collect(),
            pending: self.slot.as_ref().map(|slot| match slot.owner() {
                Some(app) => PendingSummary::Show { app: app.clone() },
                None => PendingSummary::Clear,
            }),
            stats: self.stats,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    fn app_started(&mut self, app: AppId, now: Instant) {
        if app == self.config.dashboard_app {
            tracing::debug!(app = %app, "Dashboard started, no boot screen");
            return;
        }

        let timer = self.schedule(
            now + self.config.boot_duration,
            Timer::BootComplete { app: app.clone() },
        );
        if let Some(previous) = self.booting.insert(app.clone(), timer) {
            self.cancel(previous);
        }
        tracing::info!(app = %app, booting = self.booting.len(), "App booting");
        self.show_boot_screen(now);
    }

    fn boot_completed(&mut self, id: TimerId, app: &AppId, now: Instant) {
        if self.booting.timer_for(app) != Some(id) {
            tracing::trace!(timer = %id, app = %app, "Stale boot timer");
            return;
        }
        self.booting.remove(app);
        tracing::info!(app = %app, "Boot complete");

        if self.booting.is_empty() {
            self.show_next(CascadeReason::BootComplete, now);
        } else {
            self.show_boot_screen(now);
        }
    }

    fn app_stopped(&mut self, app: &AppId, now: Instant) {
        tracing::info!(app = %app, "App stopped");
        let mut cascade = false;

        if let Some(timer) = self.booting.remove(app) {
            self.cancel(timer);
            if self.booting.is_empty() {
                cascade = true;
            } else {
                self.show_boot_screen(now);
            }
        }

        if self.slot.as_ref().and_then(ThrottleSlot::owner) == Some(app) {
            if let Some(slot) = self.slot.take() {
                self.cancel(slot.timer);
                self.stats.dropped += 1;
                if let PendingSend::Show(display) = slot.pending {
                    self.history.record(
                        &display.request,
                        DisplayOutcome::Rejected(RejectReason::AppStopped),
                    );
                }
            }
        }

        if self.state.lock_holder() == Some(app) {
            self.release_lock();
            tracing::debug!(holder = %app, "Background lock released on stop");
        }

        if *app == self.config.core_app {
            self.state.core_app_display = None;
        }

        // With the core display gone the cascade falls through to a clear
        // unless a lock holder still has live content.
        if self.state.current_owner() == Some(app) {
            // A failed replacement must not leave the stopped app refreshing
            let display_timer = self.display_timer.take();
            self.cancel_opt(display_timer);
            cascade = true;
        }

        if cascade {
            self.show_next(CascadeReason::AppStopped, now);
        }
    }

    // =========================================================================
    // Display Requests
    // =========================================================================

    fn display_requested(&mut self, request: DisplayRequest, now: Instant) -> DisplayOutcome {
        let app = request.requesting_app.clone();

        if app == self.config.dashboard_app {
            return self.show_overlay(request);
        }

        self.expire_lock_if_stale(now);

        let outcome = if !self.booting.is_empty() {
            DisplayOutcome::Rejected(RejectReason::Booting)
        } else if app == self.config.core_app {
            let display = ActiveDisplay::new(request.clone(), now);
            self.state.core_app_display = Some(display.clone());
            match self.state.visible_lock_holder() {
                Some(holder) => DisplayOutcome::Rejected(RejectReason::CoreBlocked {
                    holder: holder.clone(),
                }),
                None => self.present(PendingSend::Show(display), now),
            }
        } else {
            match self.acquire_lock(&app, now) {
                Err(holder) => DisplayOutcome::Rejected(RejectReason::LockHeld { holder }),
                Ok(()) => {
                    let display = ActiveDisplay::new(request.clone(), now);
                    if let Some(lock) = self.state.background_lock.as_mut() {
                        lock.display = Some(display.clone());
                    }
                    self.present(PendingSend::Show(display), now)
                }
            }
        };

        match &outcome {
            DisplayOutcome::Rejected(reason) => {
                tracing::debug!(app = %app, reason = %reason, "Display request rejected");
            }
            other => tracing::debug!(app = %app, outcome = ?other, "Display request handled"),
        }
        self.history.record(&request, outcome.clone());
        outcome
    }

    /// Dashboard frames go straight out and leave `current` alone
    fn show_overlay(&mut self, request: DisplayRequest) -> DisplayOutcome {
        let outcome = if self.deliver(&request) {
            self.stats.sent += 1;
            DisplayOutcome::Shown
        } else {
            DisplayOutcome::DeliveryFailed
        };
        self.history.record(&request, outcome.clone());
        outcome
    }

    // =========================================================================
    // Background Lock
    // =========================================================================

    /// Grant or refresh the lock for `app`; `Err` carries the other holder
    fn acquire_lock(&mut self, app: &AppId, now: Instant) -> Result<(), AppId> {
        match self.state.lock_holder().cloned() {
            Some(holder) if holder == *app => {
                self.touch_lock(now);
                Ok(())
            }
            Some(holder) => Err(holder),
            None => {
                self.next_lock_generation += 1;
                let generation = self.next_lock_generation;
                let lock = BackgroundLock::grant(app.clone(), generation, now, self.config.lock_timeout);

                self.lock_timers.expiry =
                    Some(self.schedule(lock.expires_at, Timer::LockExpired { generation }));
                self.lock_timers.inactive = Some(self.schedule(
                    now + self.config.lock_inactive_timeout,
                    Timer::LockInactive { generation },
                ));
                self.state.background_lock = Some(lock);

                tracing::debug!(holder = %app, generation, "Background lock granted");
                Ok(())
            }
        }
    }

    /// Record holder activity and push the inactivity deadline out
    fn touch_lock(&mut self, now: Instant) {
        let Some(lock) = self.state.background_lock.as_mut() else {
            return;
        };
        lock.touch(now);
        let generation = lock.generation;
        let deadline = lock.last_active + self.config.lock_inactive_timeout;

        let previous = self.lock_timers.inactive.take();
        self.cancel_opt(previous);
        self.lock_timers.inactive = Some(self.schedule(deadline, Timer::LockInactive { generation }));
    }

    fn release_lock(&mut self) -> Option<BackgroundLock> {
        let lock = self.state.background_lock.take()?;
        let timers = std::mem::take(&mut self.lock_timers);
        self.cancel_opt(timers.expiry);
        self.cancel_opt(timers.inactive);
        Some(lock)
    }

    /// Drop a lock that is expired or inactive at `now`
    fn expire_lock_if_stale(&mut self, now: Instant) {
        let status = match &self.state.background_lock {
            Some(lock) => lock.status(now, self.config.lock_inactive_timeout),
            None => return,
        };
        if status != LockStatus::Live {
            if let Some(lock) = self.release_lock() {
                tracing::debug!(holder = %lock.owner, status = ?status, "Stale background lock released");
            }
        }
    }

    fn lock_timer_fired(&mut self, id: TimerId, generation: u64, kind: LockRelease, now: Instant) {
        let armed = match kind {
            LockRelease::Expired => self.lock_timers.expiry,
            LockRelease::Inactive => self.lock_timers.inactive,
        };
        let Some(lock) = self.state.background_lock.as_ref() else {
            return;
        };
        if armed != Some(id) || lock.generation != generation {
            tracing::trace!(timer = %id, "Stale lock timer");
            return;
        }

        let due = match kind {
            LockRelease::Expired => lock.expires_at <= now,
            LockRelease::Inactive => {
                lock.status(now, self.config.lock_inactive_timeout) == LockStatus::Inactive
            }
        };
        if !due {
            return;
        }

        let Some(former) = self.release_lock() else {
            return;
        };
        tracing::info!(holder = %former.owner, reason = ?kind, "Background lock released");

        // A former holder's timed display runs out on its own
        let cascade = match &self.state.current {
            None => true,
            Some(current) => *current.owner() == former.owner && current.is_persistent(),
        };
        if cascade {
            self.show_next(CascadeReason::LockReleased, now);
        }
    }

    // =========================================================================
    // Showing, Throttling, Committing
    // =========================================================================

    fn show_boot_screen(&mut self, now: Instant) {
        let request = boot_screen(&self.booting, &self.config);
        let display = ActiveDisplay::new(request, now);
        self.present(PendingSend::Show(display), now);
    }

    fn clear_display(&mut self, now: Instant) {
        if self.state.current.is_none() {
            return;
        }
        self.present(PendingSend::Clear, now);
    }

    fn is_exempt(&self, pending: &PendingSend) -> bool {
        !self.booting.is_empty()
            || matches!(pending, PendingSend::Show(display) if display.request.view == ViewType::Dashboard)
    }

    /// Send now, or park in the throttle slot if the window is still closed
    fn present(&mut self, pending: PendingSend, now: Instant) -> DisplayOutcome {
        let exempt = self.is_exempt(&pending);
        if !exempt {
            if let Some(wait) = self.throttle.remaining(now) {
                self.defer(pending, now + wait);
                return DisplayOutcome::Deferred;
            }
        }
        self.commit(pending, exempt, now)
    }

    fn defer(&mut self, pending: PendingSend, deadline: Instant) {
        if let Some(previous) = self.slot.take() {
            self.cancel(previous.timer);
            self.stats.replaced += 1;
        }
        let timer = self.schedule(deadline, Timer::ThrottleRelease);
        self.slot = Some(ThrottleSlot {
            timer,
            pending,
            displaced: self.state.current_id(),
        });
        self.stats.deferred += 1;
        tracing::debug!(timer = %timer, "Send throttled, parked in slot");
    }

    fn throttle_released(&mut self, id: TimerId, now: Instant) {
        if self.slot.as_ref().map(|slot| slot.timer) != Some(id) {
            tracing::trace!(timer = %id, "Stale throttle timer");
            return;
        }
        let Some(slot) = self.slot.take() else {
            return;
        };

        if !self.booting.is_empty() || self.state.current_id() != slot.displaced {
            self.stats.dropped += 1;
            tracing::debug!("Parked send superseded, dropping");
            return;
        }

        match slot.pending {
            PendingSend::Show(parked) => {
                let parked_app = parked.owner().clone();
                if !parked.has_remaining_duration(now) {
                    self.stats.dropped += 1;
                    tracing::debug!(app = %parked_app, "Parked display expired, dropping");
                    return;
                }
                if let Err(reason) = self.revalidate(&parked, now) {
                    self.stats.dropped += 1;
                    tracing::debug!(app = %parked_app, reason = %reason, "Parked display no longer allowed");
                    self.history
                        .record(&parked.request, DisplayOutcome::Rejected(reason));
                    return;
                }
                let request = parked.request.clone();
                let outcome = self.present(PendingSend::Show(parked), now);
                if !outcome.is_shown() {
                    tracing::debug!(app = %parked_app, outcome = ?outcome, "Parked display not delivered");
                    self.history.record(&request, outcome);
                }
            }
            PendingSend::Clear => self.clear_display(now),
        }
    }

    /// Run a parked display back through arbitration
    fn revalidate(&mut self, display: &ActiveDisplay, now: Instant) -> Result<(), RejectReason> {
        let app = display.owner().clone();
        self.expire_lock_if_stale(now);

        if app == self.config.core_app {
            return match self.state.visible_lock_holder() {
                Some(holder) => Err(RejectReason::CoreBlocked {
                    holder: holder.clone(),
                }),
                None => Ok(()),
            };
        }
        if app == self.config.dashboard_app {
            return Ok(());
        }

        self.acquire_lock(&app, now)
            .map_err(|holder| RejectReason::LockHeld { holder })?;
        if let Some(lock) = self.state.background_lock.as_mut() {
            lock.display = Some(display.clone());
        }
        Ok(())
    }

    fn commit(&mut self, pending: PendingSend, exempt: bool, now: Instant) -> DisplayOutcome {
        let request = match &pending {
            PendingSend::Show(display) => display.request.clone(),
            PendingSend::Clear => clear_frame(&self.config.dashboard_app),
        };
        if !self.deliver(&request) {
            return DisplayOutcome::DeliveryFailed;
        }

        self.stats.sent += 1;
        if !exempt {
            self.throttle.record_send(now);
            // Something newer just went out
            if let Some(slot) = self.slot.take() {
                self.cancel(slot.timer);
                self.stats.dropped += 1;
            }
        }

        let display_timer = self.display_timer.take();
        self.cancel_opt(display_timer);

        match pending {
            PendingSend::Show(display) => {
                self.display_timer = Some(self.arm_display_timer(&display, now));
                let owner = display.owner().clone();
                self.state.current = Some(display);

                if owner == self.config.core_app {
                    if let Some(lock) = self.release_lock() {
                        tracing::debug!(holder = %lock.owner, "Core app took the display, lock released");
                    }
                }
                tracing::debug!(app = %owner, "Display committed");
            }
            PendingSend::Clear => {
                self.state.current = None;
                tracing::debug!("Display cleared");
            }
        }
        DisplayOutcome::Shown
    }

    fn arm_display_timer(&mut self, display: &ActiveDisplay, now: Instant) -> TimerId {
        match display.expires_at {
            Some(deadline) => self.schedule(deadline, Timer::DisplayExpired { display: display.id }),
            None => self.schedule(
                now + self.config.refresh_interval(),
                Timer::PersistentRefresh { display: display.id },
            ),
        }
    }

    fn deliver(&mut self, request: &DisplayRequest) -> bool {
        let frame = match request.to_frame() {
            Ok(frame) => frame,
            Err(error) => {
                tracing::warn!(app = %request.requesting_app, error = %error, "Failed to encode frame");
                return false;
            }
        };
        match self.sender.send(&frame) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(app = %request.requesting_app, error = %error, "Frame delivery failed");
                false
            }
        }
    }

    // =========================================================================
    // Cascade and Display Timers
    // =========================================================================

    /// Pick the next content after something went away
    ///
    /// Boot screen, then the live lock holder's last display, then the core
    /// display, then nothing.
    fn show_next(&mut self, reason: CascadeReason, now: Instant) {
        tracing::debug!(reason = ?reason, "Choosing next display");

        if !self.booting.is_empty() {
            self.show_boot_screen(now);
            return;
        }

        self.expire_lock_if_stale(now);

        let lock_display = self
            .state
            .background_lock
            .as_ref()
            .and_then(|lock| lock.display.clone())
            .filter(|display| display.has_remaining_duration(now));
        if let Some(display) = lock_display {
            if self.try_show(display, now) {
                return;
            }
        }

        let core_display = self
            .state
            .core_app_display
            .clone()
            .filter(|display| display.has_remaining_duration(now));
        if let Some(display) = core_display {
            if self.try_show(display, now) {
                return;
            }
        }

        self.clear_display(now);
    }

    fn try_show(&mut self, display: ActiveDisplay, now: Instant) -> bool {
        if self.state.current_id() == Some(display.id) {
            return true;
        }
        self.present(PendingSend::Show(display), now)
            .is_pending_or_shown()
    }

    fn display_expired(&mut self, id: TimerId, display_id: DisplayId, now: Instant) {
        if self.display_timer != Some(id) || self.state.current_id() != Some(display_id) {
            tracing::trace!(timer = %id, "Stale expiry timer");
            return;
        }
        self.display_timer = None;
        tracing::debug!(display_id = %display_id, "Display expired");
        self.show_next(CascadeReason::DisplayExpired, now);
    }

    fn refresh(&mut self, id: TimerId, display: DisplayId, now: Instant) {
        if self.display_timer != Some(id) || self.state.current_id() != Some(display) {
            tracing::trace!(timer = %id, "Stale refresh timer");
            return;
        }
        let Some(current) = self.state.current.clone() else {
            return;
        };

        if self.deliver(&current.request) {
            self.stats.sent += 1;
            if current.request.view != ViewType::Dashboard {
                self.throttle.record_send(now);
            }
            tracing::debug!(app = %current.owner(), "Persistent display refreshed");
        }
        self.display_timer = Some(self.schedule(
            now + self.config.refresh_interval(),
            Timer::PersistentRefresh { display },
        ));
    }

    // =========================================================================
    // Timer Bookkeeping
    // =========================================================================

    fn timer_fired(&mut self, fired: TimerFired, now: Instant) {
        let TimerFired { id, timer } = fired;
        match timer {
            Timer::BootComplete { app } => self.boot_completed(id, &app, now),
            Timer::DisplayExpired { display } => self.display_expired(id, display, now),
            Timer::PersistentRefresh { display } => self.refresh(id, display, now),
            Timer::LockExpired { generation } => {
                self.lock_timer_fired(id, generation, LockRelease::Expired, now);
            }
            Timer::LockInactive { generation } => {
                self.lock_timer_fired(id, generation, LockRelease::Inactive, now);
            }
            Timer::ThrottleRelease => self.throttle_released(id, now),
        }
    }

    fn schedule(&mut self, deadline: Instant, timer: Timer) -> TimerId {
        let id = self.timer_ids.allocate();
        self.effects.push(TimerEffect::Schedule {
            id,
            deadline,
            timer,
        });
        id
    }

    fn cancel(&mut self, id: TimerId) {
        self.effects.push(TimerEffect::Cancel { id });
    }

    fn cancel_opt(&mut self, id: Option<TimerId>) {
        if let Some(id) = id {
            self.cancel(id);
        }
    }
}
