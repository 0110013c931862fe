//! Per-element load state machine.
//!
//! A [`VideoLoader`] owns the relationship between one media element and one
//! source across the mount, source-change and unmount timeline. Platform
//! events are fed in explicitly; events carrying a source other than the
//! current one are stale and ignored.
//!
//! ```text
//! Idle -> Loading -> Ready
//!            |   \-> Errored
//!            ^---- retry
//! ```

use common::{LoadState, Preload};

use crate::element::MediaElement;
use crate::source::{
    self, BLOB_PREVIEW_MESSAGE, INVALID_SOURCE_MESSAGE, MISSING_SOURCE_MESSAGE, MediaErrorInfo,
    SourceClassifier,
};

/// Callbacks implemented by the component hosting the element.
///
/// Implementations must not panic; failures inside them are their own to log.
pub trait LoadListener {
    fn on_error(&mut self, message: &str);
    fn on_loaded_data(&mut self, src: &str);
}

/// Coarse phase derived from the load flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Idle,
    Loading,
    Ready,
    Errored,
}

/// Loader options fixed for the lifetime of a controller
#[derive(Debug, Clone, Copy, Default)]
pub struct LoaderOptions {
    pub preload: Preload,
    /// Request playback once data has loaded (desktop-style autoplay)
    pub autoplay: bool,
}

/// How the current source reaches the element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRoute {
    /// No source is assigned
    None,
    /// Assigned directly to the element
    Native,
    /// Deferred to the software streaming adapter
    Streaming,
}

pub struct VideoLoader<E, L, C> {
    element: E,
    listener: L,
    classifier: C,
    options: LoaderOptions,
    poster: Option<String>,
    state: LoadState,
    /// Source the attached listeners belong to; `None` until the first mount
    previous_src: Option<String>,
    listening: bool,
    route: SourceRoute,
}

impl<E, L, C> VideoLoader<E, L, C>
where
    E: MediaElement,
    L: LoadListener,
    C: SourceClassifier,
{
    pub fn new(element: E, listener: L, classifier: C, options: LoaderOptions) -> Self {
        Self {
            element,
            listener,
            classifier,
            options,
            poster: None,
            state: LoadState::default(),
            previous_src: None,
            listening: false,
            route: SourceRoute::None,
        }
    }

    /// Observe the caller's current source.
    ///
    /// Re-observing an unchanged source keeps the session as is. Any other
    /// value starts a fresh session. Returns whether a new session started.
    pub fn set_source(&mut self, src: Option<&str>, poster: Option<&str>) -> bool {
        if self.is_current_source(src) {
            log::trace!("Source unchanged, keeping load session: {}", self.state.src);
            return false;
        }

        let src = src.map(str::trim).unwrap_or_default();
        self.poster = poster.filter(|p| !p.is_empty()).map(str::to_string);
        self.begin(src.to_string(), false);
        true
    }

    /// Whether `src` is what the live session was started for
    pub fn is_current_source(&self, src: Option<&str>) -> bool {
        let src = src.map(str::trim).unwrap_or_default();
        self.listening && self.previous_src.as_deref() == Some(src)
    }

    pub fn set_autoplay(&mut self, autoplay: bool) {
        self.options.autoplay = autoplay;
    }

    /// Restart the current source from scratch.
    ///
    /// Indistinguishable from a fresh mount with the same source.
    pub fn retry(&mut self) {
        let src = self.state.src.clone();
        log::info!("Retrying video load: {}", src);
        self.begin(src, true);
    }

    fn begin(&mut self, src: String, force_reassign: bool) {
        self.reset(src.clone());
        self.previous_src = Some(src.clone());
        self.listening = true;

        if src.is_empty() {
            self.route = SourceRoute::None;
            self.fail(MISSING_SOURCE_MESSAGE.to_string(), String::new());
            return;
        }

        if !self.state.is_blob_url && !self.classifier.is_valid_video_url(&src) {
            let format = self.classifier.format_label(&src);
            self.route = SourceRoute::None;
            self.fail(
                INVALID_SOURCE_MESSAGE.to_string(),
                format!("format={} src={}", format, src),
            );
            return;
        }

        self.element.set_preload(self.options.preload);
        if let Some(ref poster) = self.poster {
            self.element.set_poster(poster);
        }

        if self.classifier.is_manifest(&src) && !self.element.supports_native_hls() {
            // The streaming adapter owns source assignment for this element
            self.route = SourceRoute::Streaming;
            log::debug!("Deferring manifest to streaming adapter: {}", src);
            return;
        }

        self.route = SourceRoute::Native;
        if force_reassign && self.element.current_src().as_deref() == Some(src.as_str()) {
            // Same string again would be a no-op for the platform
            self.element.remove_src();
        }
        self.element.set_src(&src);
        self.element.load();
        log::debug!("Loading video: {}", src);
    }

    fn reset(&mut self, src: String) {
        self.state = LoadState {
            is_blob_url: source::is_blob_url(&src),
            src,
            is_loading: true,
            error: None,
            error_details: String::new(),
            play_attempted: false,
            loaded_data_fired: false,
        };
    }

    /// Platform "data loaded" event for `src`
    pub fn on_loaded_data(&mut self, src: &str) -> bool {
        if !self.is_current(src) {
            return false;
        }
        self.mark_ready();
        true
    }

    /// Platform error event for `src`
    pub fn on_media_error(&mut self, src: &str, error: &MediaErrorInfo) -> bool {
        if !self.is_current(src) {
            return false;
        }

        if self.state.is_blob_url {
            let details = format!(
                "Temporary reference could not be resolved; it was likely created in another \
                 browsing context (code={})",
                error
                    .code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none".to_string())
            );
            self.fail(BLOB_PREVIEW_MESSAGE.to_string(), details);
        } else {
            let format = self.classifier.format_label(src);
            let (message, details) = source::classify_media_error(src, format, error);
            self.fail(message, details);
        }
        true
    }

    /// The current source produced playable data through another route
    /// (streaming client or direct-file fallback).
    pub fn mark_ready(&mut self) {
        self.state.error = None;
        self.state.error_details.clear();
        self.state.is_loading = false;
        self.state.loaded_data_fired = true;
        let src = self.state.src.clone();
        self.listener.on_loaded_data(&src);
        log::debug!("Video data loaded: {}", src);

        if self.options.autoplay && !self.state.play_attempted {
            self.state.play_attempted = true;
            if let Err(e) = self.element.play() {
                log::warn!("Autoplay request for {} failed: {}", src, e);
            }
        }
    }

    /// Transient loading state (e.g. a mid-stream buffer stall)
    pub fn set_buffering(&mut self) {
        if self.state.error.is_none() {
            self.state.is_loading = true;
        }
    }

    /// Leave the transient loading state once playback resumes
    pub fn end_buffering(&mut self) {
        if self.state.error.is_none() && self.state.loaded_data_fired {
            self.state.is_loading = false;
        }
    }

    /// Platform error for a direct file that replaced the current source
    pub fn on_fallback_error(&mut self, src: &str, error: &MediaErrorInfo) {
        if !self.listening {
            log::trace!("Ignoring media event after teardown: {}", src);
            return;
        }
        let format = self.classifier.format_label(src);
        let (message, details) = source::classify_media_error(src, format, error);
        self.fail(message, details);
    }

    /// Surface a failure for the current source
    pub fn report_failure(&mut self, message: String, details: String) {
        self.fail(message, details);
    }

    fn fail(&mut self, message: String, details: String) {
        log::error!("Video error for '{}': {} [{}]", self.state.src, message, details);
        self.state.error = Some(message.clone());
        self.state.error_details = details;
        self.state.is_loading = false;
        self.listener.on_error(&message);
    }

    fn is_current(&self, src: &str) -> bool {
        if !self.listening {
            log::trace!("Ignoring media event after teardown: {}", src);
            return false;
        }
        if self.previous_src.as_deref() != Some(src) {
            log::trace!(
                "Ignoring stale media event for '{}' (current '{}')",
                src,
                self.state.src
            );
            return false;
        }
        true
    }

    /// Detach from the element; later events are ignored
    pub fn teardown(&mut self) {
        self.listening = false;
        log::debug!("Loader torn down for: {}", self.state.src);
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn route(&self) -> SourceRoute {
        self.route
    }

    pub fn src(&self) -> &str {
        &self.state.src
    }

    pub fn phase(&self) -> LoadPhase {
        if !self.listening {
            LoadPhase::Idle
        } else if self.state.error.is_some() {
            LoadPhase::Errored
        } else if self.state.is_loading {
            LoadPhase::Loading
        } else if self.state.loaded_data_fired {
            LoadPhase::Ready
        } else {
            LoadPhase::Idle
        }
    }
}
