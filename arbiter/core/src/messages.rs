//! Wire Messages
//!
//! Shapes exchanged between apps, the arbiter, and the glasses. Field names
//! follow the camelCase JSON the apps already speak (`packageName`,
//! `durationMs`, `layoutType`, ...).
//!
//! # Design Philosophy
//!
//! Layouts are opaque to arbitration. The engine only ever looks at who asked
//! (`packageName`), which view they target, and how long the content should
//! stay. It builds exactly two layouts itself: the boot screen and the empty
//! clear frame.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::display::DisplayOutcome;

/// Duration sentinel meaning "stay until superseded"
pub const PERSISTENT_DURATION_MS: i64 = -1;

/// Identifier of an app (its package name)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(pub String);

impl AppId {
    /// Create an app ID from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AppId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AppId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Unique session identifier (one per connected user)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new unique session ID
    pub fn new() -> Self {
        Self(format!("session_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which region of the glasses a request targets
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ViewType {
    /// The main one-card display
    #[default]
    Main,
    /// The dashboard overlay
    Dashboard,
    /// Any other view name, passed through untouched
    Other(String),
}

impl From<String> for ViewType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "main" => Self::Main,
            "dashboard" => Self::Dashboard,
            _ => Self::Other(value),
        }
    }
}

impl From<ViewType> for String {
    fn from(value: ViewType) -> Self {
        match value {
            ViewType::Main => "main".to_string(),
            ViewType::Dashboard => "dashboard".to_string(),
            ViewType::Other(name) => name,
        }
    }
}

/// Card layouts the glasses know how to render
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layoutType", rename_all = "snake_case")]
pub enum Layout {
    /// A single block of text
    TextWall {
        /// Text content
        text: String,
    },
    /// Two stacked blocks of text
    #[serde(rename_all = "camelCase")]
    DoubleTextWall {
        /// Upper block
        top_text: String,
        /// Lower block
        bottom_text: String,
    },
    /// A titled card
    ReferenceCard {
        /// Card title
        title: String,
        /// Card body
        text: String,
    },
    /// Left/right split used by the dashboard
    #[serde(rename_all = "camelCase")]
    DashboardCard {
        /// Left column
        left_text: String,
        /// Right column
        right_text: String,
    },
    /// Raw bitmap payload
    BitmapView {
        /// Encoded bitmap data
        data: String,
    },
}

/// A request from an app to show something
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayRequest {
    /// App asking for the display
    #[serde(rename = "packageName", alias = "requestingApp")]
    pub requesting_app: AppId,
    /// Target view
    #[serde(default)]
    pub view: ViewType,
    /// Opaque content
    pub layout: Layout,
    /// Requested duration; absent or `-1` means persistent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// When the app issued the request
    #[serde(rename = "timestamp", alias = "issuedAt", default = "Utc::now")]
    pub issued_at: DateTime<Utc>,
}

impl DisplayRequest {
    /// Create a persistent request on the given view
    pub fn new(app: impl Into<AppId>, view: ViewType, layout: Layout) -> Self {
        Self {
            requesting_app: app.into(),
            view,
            layout,
            duration_ms: None,
            issued_at: Utc::now(),
        }
    }

    /// Text wall on the main view
    pub fn text_wall(app: impl Into<AppId>, text: impl Into<String>) -> Self {
        Self::new(app, ViewType::Main, Layout::TextWall { text: text.into() })
    }

    /// Reference card on the main view
    pub fn reference_card(
        app: impl Into<AppId>,
        title: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            app,
            ViewType::Main,
            Layout::ReferenceCard {
                title: title.into(),
                text: text.into(),
            },
        )
    }

    /// Set the requested duration in milliseconds
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: i64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Set the target view
    #[must_use]
    pub fn with_view(mut self, view: ViewType) -> Self {
        self.view = view;
        self
    }

    /// Whether the request stays until superseded
    ///
    /// Absent durations, the `-1` sentinel, and any other non-positive value
    /// all count as persistent.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.duration().is_none()
    }

    /// Requested duration, `None` when persistent
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        match self.duration_ms {
            Some(ms) if ms > 0 => Some(Duration::from_millis(ms.unsigned_abs())),
            _ => None,
        }
    }

    /// Serialize as the `display_event` frame sent to the glasses
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Frame<'a> {
            #[serde(rename = "type")]
            kind: &'static str,
            #[serde(flatten)]
            request: &'a DisplayRequest,
        }

        serde_json::to_string(&Frame {
            kind: DISPLAY_EVENT,
            request: self,
        })
    }
}

const DISPLAY_EVENT: &str = "display_event";

/// Messages a client connection sends to the daemon
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Identify the user owning this connection
    #[serde(rename_all = "camelCase")]
    Hello {
        /// User identifier
        user_id: String,
    },
    /// An app began booting
    #[serde(rename_all = "camelCase")]
    AppStart {
        /// App that started
        package_name: AppId,
    },
    /// An app stopped
    #[serde(rename_all = "camelCase")]
    AppStop {
        /// App that stopped
        package_name: AppId,
    },
    /// An app wants to show something
    DisplayEvent(DisplayRequest),
    /// Client is going away
    Disconnect,
}

/// Messages the daemon writes back to a client connection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A frame for the glasses
    DisplayEvent(DisplayRequest),
    /// Result of a `display_event` the client sent
    #[serde(rename_all = "camelCase")]
    DisplayResult {
        /// App the result belongs to
        package_name: AppId,
        /// Whether the content was shown
        accepted: bool,
        /// Detailed outcome
        outcome: DisplayOutcome,
    },
    /// The client sent something the daemon could not handle
    Error {
        /// Human-readable description
        message: String,
    },
}
