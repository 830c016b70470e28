//! Session Driver
//!
//! One tokio task per connected user owns that user's [`DisplayEngine`] and
//! its [`TimerTable`]. Everything reaching the engine, whether a command
//! from the handle or a timer firing, is processed one at a time inside
//! that task, so the engine never sees concurrent calls.
//!
//! ```text
//!   SessionHandle ──Command──▶ ┌──────────────── session task ───────────────┐
//!                              │  select! { command, timer fired }           │
//!   TimerTable ──TimerFired──▶ │     │                                        │
//!        ▲                     │     ▼                                        │
//!        └──── effects ─────── │  DisplayEngine::on_event(event, now)         │
//!                              └──────────────────────────────────────────────┘
//! ```
//!
//! Dropping every handle, or calling [`SessionHandle::shutdown`], tears the
//! session down: the engine cancels its timers and the table aborts them.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::ArbiterConfig;
use crate::display::{DisplayOutcome, HistoryEntry};
use crate::engine::{DisplayEngine, EngineEvent, EngineSnapshot};
use crate::messages::{AppId, DisplayRequest, SessionId};
use crate::timers::{TimerFired, TimerTable};
use crate::transport::FrameSender;

/// Commands buffered per session before callers wait
const COMMAND_BUFFER: usize = 64;

/// Errors talking to a session
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session task has ended
    #[error("session closed")]
    Closed,
}

enum Command {
    AppStarted(AppId),
    AppStopped(AppId),
    Display {
        request: DisplayRequest,
        reply: oneshot::Sender<DisplayOutcome>,
    },
    Snapshot {
        reply: oneshot::Sender<EngineSnapshot>,
    },
    History {
        app: AppId,
        reply: oneshot::Sender<Vec<HistoryEntry>>,
    },
    Shutdown,
}

/// A running arbitration session
pub struct Session<S: FrameSender> {
    engine: DisplayEngine<S>,
    timers: TimerTable,
    commands: mpsc::Receiver<Command>,
    fired: mpsc::UnboundedReceiver<TimerFired>,
}

impl<S: FrameSender + 'static> Session<S> {
    /// Start a session task and return its handle
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        id: SessionId,
        user_id: impl Into<String>,
        config: ArbiterConfig,
        sender: S,
    ) -> SessionHandle {
        let user_id: Arc<str> = Arc::from(user_id.into());
        let (tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (fired_tx, fired) = mpsc::unbounded_channel();

        let session = Self {
            engine: DisplayEngine::new(config, sender),
            timers: TimerTable::new(fired_tx),
            commands,
            fired,
        };

        let span = tracing::info_span!("session", session = %id, user = %user_id);
        tokio::spawn(session.run().instrument(span));

        SessionHandle { id, user_id, tx }
    }

    async fn run(mut self) {
        tracing::info!("Session started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                Some(fired) = self.fired.recv() => {
                    self.timers.fired(fired.id);
                    self.dispatch(EngineEvent::TimerFired(fired));
                }
            }
        }

        let effects = self.engine.teardown();
        self.timers.apply(effects);
        self.timers.abort_all();
        tracing::info!("Session ended");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::AppStarted(app) => {
                self.dispatch(EngineEvent::AppStarted(app));
            }
            Command::AppStopped(app) => {
                self.dispatch(EngineEvent::AppStopped(app));
            }
            Command::Display { request, reply } => {
                let outcome = self
                    .dispatch(EngineEvent::DisplayRequested(request))
                    .unwrap_or(DisplayOutcome::DeliveryFailed);
                // Caller may have stopped waiting
                let _ = reply.send(outcome);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.engine.snapshot());
            }
            Command::History { app, reply } => {
                let _ = reply.send(self.engine.history(&app).cloned().collect());
            }
            Command::Shutdown => {}
        }
    }

    fn dispatch(&mut self, event: EngineEvent) -> Option<DisplayOutcome> {
        let step = self.engine.on_event(event, Instant::now());
        self.timers.apply(step.effects);
        step.outcome
    }
}

/// Cheap, cloneable handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    user_id: Arc<str>,
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Session identifier
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// User the session belongs to
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Whether the session task has ended
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Report that an app began booting
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Closed` if the session has ended.
    pub async fn app_started(&self, app: AppId) -> Result<(), SessionError> {
        self.send(Command::AppStarted(app)).await
    }

    /// Report that an app stopped
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Closed` if the session has ended.
    pub async fn app_stopped(&self, app: AppId) -> Result<(), SessionError> {
        self.send(Command::AppStopped(app)).await
    }

    /// Ask to show something; `true` only if it was shown right away
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Closed` if the session has ended.
    pub async fn display(&self, request: DisplayRequest) -> Result<bool, SessionError> {
        Ok(self.display_outcome(request).await?.is_shown())
    }

    /// Ask to show something and get the detailed outcome
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Closed` if the session has ended.
    pub async fn display_outcome(
        &self,
        request: DisplayRequest,
    ) -> Result<DisplayOutcome, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Display { request, reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Current engine state
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Closed` if the session has ended.
    pub async fn snapshot(&self) -> Result<EngineSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Display attempts recorded for an app
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Closed` if the session has ended.
    pub async fn history(&self, app: AppId) -> Result<Vec<HistoryEntry>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::History { app, reply }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Tear the session down and wait for the task to finish
    ///
    /// Shutting down an already closed session is a no-op.
    pub async fn shutdown(&self) {
        if self.tx.send(Command::Shutdown).await.is_ok() {
            self.tx.closed().await;
        }
    }

    async fn send(&self, command: Command) -> Result<(), SessionError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
