//! Frame Transport Seam
//!
//! The engine hands serialized frames to a [`FrameSender`] and treats any
//! error as "not delivered": state is only committed after a successful send.
//!
//! - [`ChannelSender`]: forwards frames into a bounded tokio channel; the
//!   daemon drains it into the client socket
//! - [`RecordingSender`]: keeps every frame in memory, for tests and tooling

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

/// Why a frame could not be delivered
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The other end is gone
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport cannot accept more frames right now
    #[error("transport backpressure")]
    Backpressure,

    /// Any other transport failure
    #[error("transport error: {0}")]
    Transport(String),
}

/// Delivers serialized frames to the glasses
///
/// Implementations must not block; the engine calls this from inside its
/// event handling.
pub trait FrameSender: Send {
    /// Send one frame
    ///
    /// # Errors
    ///
    /// Returns a [`SendError`] if the frame was not accepted.
    fn send(&mut self, frame: &str) -> Result<(), SendError>;
}

/// Sender backed by a bounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<String>,
}

impl ChannelSender {
    /// Wrap the sending half of a channel
    #[must_use]
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }
}

impl FrameSender for ChannelSender {
    fn send(&mut self, frame: &str) -> Result<(), SendError> {
        self.tx.try_send(frame.to_string()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => SendError::ConnectionClosed,
        })
    }
}

/// Sender that records frames in memory
///
/// Clones share the same buffer, so a test can keep one handle while the
/// engine owns another. Closing it makes every later send fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingSender {
    frames: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl RecordingSender {
    /// Create an open, empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every frame delivered so far
    #[must_use]
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    /// Delivered frames parsed as JSON
    ///
    /// Frames that are not valid JSON are skipped.
    #[must_use]
    pub fn json_frames(&self) -> Vec<serde_json::Value> {
        self.frames
            .lock()
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }

    /// Number of frames delivered so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    /// Whether nothing has been delivered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    /// Forget recorded frames
    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    /// Open or close the simulated connection
    pub fn set_open(&self, open: bool) {
        self.closed.store(!open, Ordering::SeqCst);
    }
}

impl FrameSender for RecordingSender {
    fn send(&mut self, frame: &str) -> Result<(), SendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SendError::ConnectionClosed);
        }
        self.frames.lock().push(frame.to_string());
        Ok(())
    }
}
