//! Arbiter Core - Display Arbitration for Shared Smart-Glasses Output
//!
//! Many independent apps run at the same time for one user, but the glasses
//! have a single one-card display. This crate decides, for every display
//! request, app start, app stop and timer expiry, which app is entitled to
//! that display, for how long, and when to fall back to the core app or to
//! nothing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │        App lifecycle source        │   Request sources (apps)   │
//! └──────────────────┬─────────────────┴──────────────┬─────────────┘
//!                    │  app_started / app_stopped      │ display
//!                    ▼                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Session (one tokio task per user)              │
//! │  ┌───────────────────────────────┐   ┌────────────────────────┐ │
//! │  │        DisplayEngine          │──▶│  TimerTable (clock)    │ │
//! │  │  boot · lock · core · throttle│◀──│  TimerFired events     │ │
//! │  └──────────────┬────────────────┘   └────────────────────────┘ │
//! └─────────────────┼───────────────────────────────────────────────┘
//!                   │ FrameSender::send(frame)
//!                   ▼
//!             glasses transport
//! ```
//!
//! The engine itself is synchronous and never waits. Every delay is returned
//! as a [`TimerEffect`]; the session driver turns those into tokio timers and
//! feeds their expiry back through the same entry point as external calls.
//!
//! # Key Types
//!
//! - [`DisplayEngine`]: the per-session arbitration state machine
//! - [`DisplayRequest`]: what an app asks to show
//! - [`ArbiterConfig`]: policy knobs (lock, throttle, boot, refresh timing)
//! - [`SessionHandle`]: async handle to a running session
//! - [`SessionRegistry`]: all live sessions keyed by [`SessionId`]
//!
//! # Quick Start
//!
//! ```ignore
//! use arbiter_core::{ArbiterConfig, ChannelSender, DisplayRequest, SessionRegistry};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = SessionRegistry::new(ArbiterConfig::default());
//!     let (tx, mut frames) = mpsc::channel(64);
//!     let session = registry.create("user-1", ChannelSender::new(tx));
//!
//!     session.app_started("com.example.weather".into()).await.unwrap();
//!     let shown = session
//!         .display(DisplayRequest::text_wall("com.example.weather", "Sunny"))
//!         .await
//!         .unwrap();
//!
//!     while let Some(frame) = frames.recv().await {
//!         // forward frame to the glasses
//!     }
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`messages`]: wire shapes (requests, layouts, daemon protocol)
//! - [`config`]: policy knobs, TOML/env loading
//! - [`display`]: active displays, the background lock, history
//! - [`boot`]: booting set and boot screen rendering
//! - [`throttle`]: send spacing and the single deferred slot
//! - [`timers`]: timer effects and the tokio timer facility
//! - [`transport`]: the frame sender seam
//! - [`engine`]: the arbitration state machine
//! - [`session`]: per-user driver task
//! - [`registry`]: session registry

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod boot;
pub mod config;
pub mod display;
pub mod engine;
pub mod messages;
pub mod registry;
pub mod session;
pub mod throttle;
pub mod timers;
pub mod transport;

// Re-exports for convenience
pub use boot::BootingSet;
pub use config::{
    default_config_path, load_config, load_config_from_path, ArbiterConfig, ArbiterToml,
    ConfigError, ConfigOverrides, ConfigSource,
};
pub use display::{
    ActiveDisplay, BackgroundLock, DisplayHistory, DisplayId, DisplayOutcome, DisplayState,
    HistoryEntry, LockStatus, RejectReason,
};
pub use engine::{
    CascadeReason, DisplayEngine, EngineEvent, EngineSnapshot, PendingSummary, Step, VisibleState,
};
pub use messages::{
    AppId, ClientMessage, DisplayRequest, Layout, ServerMessage, SessionId, ViewType,
    PERSISTENT_DURATION_MS,
};
pub use registry::SessionRegistry;
pub use session::{Session, SessionError, SessionHandle};
pub use throttle::{PendingSend, Throttle, ThrottleSlot, ThrottleStats};
pub use timers::{Timer, TimerEffect, TimerFired, TimerId, TimerIds, TimerTable};
pub use transport::{ChannelSender, FrameSender, RecordingSender, SendError};
