//! Media element abstraction shared by the scheduler, the loader and the
//! streaming adapter.
//!
//! Implementations are cheap handles: cloning one yields another reference to
//! the same underlying element. Nothing in the playback core creates or
//! destroys elements; it only drives the ones it was handed.

use common::{Preload, Rect};
use thiserror::Error;

/// Why a play request did not go through.
///
/// Play requests are best-effort. These errors are logged and never surfaced
/// to the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlayError {
    #[error("playback not allowed: {0}")]
    NotAllowed(String),

    #[error("element is detached from the document")]
    Detached,

    #[error("play request aborted: {0}")]
    Aborted(String),
}

impl PlayError {
    /// Map a rejection reported by a host (a DOMException name) to a variant
    pub fn from_host_reason(reason: &str) -> Self {
        if reason.starts_with("NotAllowed") {
            Self::NotAllowed(reason.to_string())
        } else {
            Self::Aborted(reason.to_string())
        }
    }
}

/// A platform media element (a `<video>` or equivalent).
pub trait MediaElement {
    /// Whether the element is still attached to the document
    fn is_connected(&self) -> bool;

    /// Current viewport-relative bounding rectangle
    fn bounding_rect(&self) -> Rect;

    fn is_paused(&self) -> bool;

    /// Request playback. Rejections are expected under autoplay policies.
    fn play(&mut self) -> Result<(), PlayError>;

    fn pause(&mut self);

    /// Source currently assigned to the element, if any
    fn current_src(&self) -> Option<String>;

    fn set_src(&mut self, src: &str);

    /// Detach the current source so the element releases its decoder
    fn remove_src(&mut self);

    fn set_preload(&mut self, preload: Preload);

    fn set_poster(&mut self, poster: &str);

    /// Restart the element's resource selection for the assigned source
    fn load(&mut self);

    /// Whether the element can play HLS manifests without a software client
    fn supports_native_hls(&self) -> bool;
}
