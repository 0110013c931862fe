//! Common types and utilities for clipdeck.
//!
//! This crate defines the shared geometry, the load-state snapshot and the
//! host-bridge protocol used between the playback daemon (`clipdeckd`), the
//! embedding host that owns the real media elements, and the control client
//! (`clipctl`).
//!
//! # Host-bridge protocol
//!
//! Communication happens over a Unix domain socket using newline-delimited
//! JSON. The host sends [`Command`] variants describing what happened on its
//! side (layout changes, media events, registrations) and receives
//! [`Response`] variants. Decisions the daemon takes are returned as
//! [`HostAction`]s the host must execute on its elements.
//!
//! # Examples
//!
//! ```no_run
//! use common::{Command, Rect};
//!
//! // Tell the daemon a card video was mounted in the middle of the screen
//! let cmd = Command::Mount {
//!     id: "clip-42".to_string(),
//!     rect: Rect::new(300.0, 500.0),
//!     native_hls: false,
//! };
//!
//! let json = serde_json::to_string(&cmd).unwrap();
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types shared between host, client and daemon.
///
/// All errors are serializable for transmission over IPC.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClipdeckError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<std::io::Error> for ClipdeckError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ClipdeckError {
    fn from(e: serde_json::Error) -> Self {
        Self::Ipc(e.to_string())
    }
}

/// Viewport-relative bounding rectangle of an element, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub bottom: f64,
    #[serde(default)]
    pub left: f64,
    #[serde(default)]
    pub right: f64,
}

impl Rect {
    /// Vertical-only rectangle, convenient for feed layouts where only the
    /// vertical axis matters.
    pub fn new(top: f64, bottom: f64) -> Self {
        Self {
            top,
            bottom,
            left: 0.0,
            right: 0.0,
        }
    }

    pub fn with_horizontal(mut self, left: f64, right: f64) -> Self {
        self.left = left;
        self.right = right;
        self
    }

    pub fn height(&self) -> f64 {
        (self.bottom - self.top).max(0.0)
    }

    pub fn width(&self) -> f64 {
        (self.right - self.left).max(0.0)
    }

    pub fn center_y(&self) -> f64 {
        (self.top + self.bottom) / 2.0
    }
}

/// Size of the visible viewport.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Layout snapshot of a single mounted element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementLayout {
    pub id: String,
    pub rect: Rect,
    #[serde(default = "default_connected")]
    pub connected: bool,
}

fn default_connected() -> bool {
    true
}

/// `preload` hint for a media element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preload {
    None,
    Metadata,
    #[default]
    Auto,
}

impl Preload {
    /// Parse a preload hint (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(Self::None),
            "metadata" => Some(Self::Metadata),
            "auto" | "" => Some(Self::Auto),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Metadata => "metadata",
            Self::Auto => "auto",
        }
    }
}

/// Observable state of one element's attempt to play one source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadState {
    pub src: String,
    pub is_loading: bool,
    pub error: Option<String>,
    pub error_details: String,
    pub is_blob_url: bool,
    pub play_attempted: bool,
    pub loaded_data_fired: bool,
}

/// Category of an adaptive-streaming client error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorKind {
    Network,
    Media,
    Other,
}

/// Specific failure reported by an adaptive-streaming client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorDetail {
    ManifestLoadError,
    ManifestLoadTimeout,
    ManifestParsingError,
    FragLoadError,
    FragLoadTimeout,
    BufferStalledError,
    BufferAppendError,
    FragParsingError,
    Other,
}

impl StreamErrorDetail {
    /// Errors raised while fetching a manifest or fragment
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            Self::ManifestLoadError
                | Self::ManifestLoadTimeout
                | Self::FragLoadError
                | Self::FragLoadTimeout
        )
    }

    pub fn is_fragment_load(&self) -> bool {
        matches!(self, Self::FragLoadError | Self::FragLoadTimeout)
    }
}

/// Error payload emitted by an adaptive-streaming client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamErrorInfo {
    pub fatal: bool,
    pub kind: StreamErrorKind,
    pub detail: StreamErrorDetail,
    /// Internal retries the client still has for this request, if known
    #[serde(default)]
    pub retries_remaining: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Signals emitted by an adaptive-streaming client bound to an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamSignal {
    MediaAttached,
    /// Enough media is buffered again after a stall
    BufferRecovered,
    Error(StreamErrorInfo),
}

/// Commands sent from the host (or the control client) to the daemon.
///
/// Element-side facts (layout, media events) are mirrored into the daemon by
/// these commands; the daemon answers with the [`HostAction`]s they caused.
///
/// # Examples
///
/// ```
/// use common::Command;
///
/// // A card asked to autoplay once it is under the reading line
/// let cmd = Command::Register {
///     id: "clip-7".to_string(),
///     prefers_to_play: true,
/// };
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// A video element was mounted by the host.
    Mount {
        id: String,
        rect: Rect,
        /// Whether the element can play HLS manifests natively
        #[serde(default)]
        native_hls: bool,
    },
    /// A video element was removed by the host; tears down everything bound to it.
    Unmount { id: String },
    /// Full layout snapshot, e.g. after the initial render.
    Layout {
        viewport: Viewport,
        elements: Vec<ElementLayout>,
    },
    /// Scroll event with updated element rectangles.
    Scroll { elements: Vec<ElementLayout> },
    /// Resize event with the new viewport and element rectangles.
    Resize {
        viewport: Viewport,
        elements: Vec<ElementLayout>,
    },
    /// Play/pause state changed outside the daemon (e.g. playback ended).
    PlaybackState { id: String, paused: bool },
    /// A play request issued by the daemon was rejected by the platform.
    PlayRejected { id: String, reason: String },

    /// Put a mounted element under scheduler control.
    Register { id: String, prefers_to_play: bool },
    /// Remove an element from scheduler control.
    Unregister { id: String },
    /// Update the caller's wish for an element to play.
    UpdatePreference { id: String, prefers_to_play: bool },

    /// Start loading a source on a mounted element. Repeating the current
    /// source keeps the existing session.
    Load {
        id: String,
        src: Option<String>,
        #[serde(default)]
        poster: Option<String>,
        /// Play as soon as data is available (non-scheduled elements)
        #[serde(default)]
        autoplay: bool,
    },
    /// The element fired its "data loaded" event for `src`.
    ///
    /// `src` is the source the daemon assigned; for elements driven by a
    /// streaming client it is the manifest URL.
    MediaLoaded { id: String, src: String },
    /// The element fired an error event for `src` (same convention as
    /// `MediaLoaded`).
    MediaError {
        id: String,
        src: String,
        code: Option<u16>,
        #[serde(default)]
        message: Option<String>,
    },
    /// Caller-initiated retry of the current source.
    Retry { id: String },
    /// Signal from the adaptive-streaming client bound to an element.
    StreamSignal { id: String, signal: StreamSignal },

    /// Start reporting viewport intersection changes for an element.
    Observe {
        id: String,
        #[serde(default)]
        threshold: Option<f64>,
        #[serde(default)]
        root_margin: Option<f64>,
    },
    /// Stop reporting intersection changes for an element.
    Unobserve { id: String },

    /// Query daemon status
    Query,
    /// List mounted videos
    ListVideos,
    /// Turn this connection into a stream of pushed actions
    Subscribe,
    /// Ping the daemon
    Ping,
    /// Kill the daemon
    Kill,
}

/// Actions the host must execute on its elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostAction {
    Play { id: String },
    Pause { id: String },
    SetSource { id: String, src: String },
    RemoveSource { id: String },
    SetPreload { id: String, preload: Preload },
    SetPoster { id: String, poster: String },
    Load { id: String },
    StreamAttach { id: String },
    StreamLoadSource { id: String, url: String },
    StreamRecoverMedia { id: String },
    StreamDestroy { id: String },
    LoadStateChanged { id: String, state: LoadState },
    VisibilityChanged { id: String, visible: bool },
}

impl HostAction {
    /// Id of the element this action targets
    pub fn id(&self) -> &str {
        match self {
            Self::Play { id }
            | Self::Pause { id }
            | Self::SetSource { id, .. }
            | Self::RemoveSource { id }
            | Self::SetPreload { id, .. }
            | Self::SetPoster { id, .. }
            | Self::Load { id }
            | Self::StreamAttach { id }
            | Self::StreamLoadSource { id, .. }
            | Self::StreamRecoverMedia { id }
            | Self::StreamDestroy { id }
            | Self::LoadStateChanged { id, .. }
            | Self::VisibilityChanged { id, .. } => id,
        }
    }
}

/// Response from daemon to host/client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Pong,
    Error(ClipdeckError),
    Status(DaemonStatus),
    Videos(Vec<VideoStatus>),
    Actions(Vec<HostAction>),
}

/// Daemon status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub active_video: Option<String>,
    pub mounted: usize,
    pub registered: usize,
    pub loading: usize,
    pub errored: usize,
}

/// Per-video status line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoStatus {
    pub id: String,
    pub registered: bool,
    pub prefers_to_play: bool,
    pub paused: bool,
    pub active: bool,
    pub load: Option<LoadState>,
}

/// Path of the daemon's Unix socket
pub fn get_socket_path() -> std::path::PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .unwrap_or_else(|_| format!("/run/user/{}", unsafe { libc::getuid() }));

    std::path::PathBuf::from(runtime_dir).join("clipdeck.sock")
}
