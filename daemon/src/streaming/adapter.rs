use common::{StreamErrorInfo, StreamErrorKind, StreamSignal};

use super::fallback::FallbackPlanner;
use crate::element::MediaElement;
use crate::source::SourceClassifier;

/// Software adaptive-streaming client bound to one element.
pub trait StreamingClient {
    /// Bind the client to its media element
    fn attach_media(&mut self);

    /// Start fetching the manifest at `url`
    fn load_source(&mut self, url: &str);

    /// Built-in recovery after a fatal media error
    fn recover_media_error(&mut self);

    /// Release the client and its decoder
    fn destroy(&mut self);
}

/// Lazily constructs clients.
pub trait StreamingClientFactory {
    type Client: StreamingClient;

    fn create(&mut self) -> Self::Client;
}

/// What a streaming signal means for the load state.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    /// Nothing for the caller to see
    Absorbed,
    /// Transient stall; show a loading state
    Buffering,
    /// Playback resumed after a stall
    Resumed,
    /// Built-in media recovery was requested
    Recovering,
    /// Playback moved to a direct-file alternative
    FallbackStarted { url: String },
    /// Unrecoverable; surface to the caller
    Fatal { message: String, details: String },
}

#[derive(Debug, Clone)]
struct FallbackProgress {
    candidates: Vec<String>,
    index: usize,
    original_message: String,
    original_details: String,
}

impl FallbackProgress {
    fn current(&self) -> Option<&str> {
        self.candidates.get(self.index).map(String::as_str)
    }
}

pub struct StreamingAdapter<E, F: StreamingClientFactory> {
    element: E,
    factory: F,
    planner: FallbackPlanner,
    enable_fallback: bool,
    client: Option<F::Client>,
    src: Option<String>,
    /// One-shot latch; never re-armed for the lifetime of the adapter
    has_fallback_applied: bool,
    media_recovery_attempted: bool,
    fallback: Option<FallbackProgress>,
    /// Direct file that replaced the manifest after loading successfully
    active_fallback: Option<String>,
}

impl<E, F> StreamingAdapter<E, F>
where
    E: MediaElement,
    F: StreamingClientFactory,
{
    pub fn new(element: E, factory: F, planner: FallbackPlanner, enable_fallback: bool) -> Self {
        Self {
            element,
            factory,
            planner,
            enable_fallback,
            client: None,
            src: None,
            has_fallback_applied: false,
            media_recovery_attempted: false,
            fallback: None,
            active_fallback: None,
        }
    }

    /// Bring the adapter in line with the element's source.
    ///
    /// Any existing client is destroyed first. A client is created only for
    /// manifests the element cannot play natively. Returns whether a software
    /// client is now attached.
    pub fn sync_source<C: SourceClassifier>(&mut self, src: Option<&str>, classifier: &C) -> bool {
        self.teardown();
        self.media_recovery_attempted = false;

        let Some(src) = src.filter(|s| classifier.is_manifest(s)) else {
            return false;
        };

        if self.element.supports_native_hls() {
            log::debug!("Native manifest playback available for {}", src);
            return false;
        }

        // Clear any native source so two pipelines never compete for the element
        if self.element.current_src().is_some() {
            self.element.remove_src();
        }

        let mut client = self.factory.create();
        client.attach_media();
        self.client = Some(client);
        self.src = Some(src.to_string());
        log::info!("Attached streaming client for {}", src);
        true
    }

    /// Feed a signal from the attached client
    pub fn handle_signal(&mut self, signal: StreamSignal) -> StreamOutcome {
        match signal {
            StreamSignal::MediaAttached => {
                if let (Some(client), Some(src)) = (self.client.as_mut(), self.src.as_deref()) {
                    log::debug!("Media attached, loading manifest {}", src);
                    client.load_source(src);
                }
                StreamOutcome::Absorbed
            }
            StreamSignal::BufferRecovered => {
                if self.client.is_none() {
                    return StreamOutcome::Absorbed;
                }
                log::debug!("Buffer refilled, playback resumed");
                StreamOutcome::Resumed
            }
            StreamSignal::Error(info) => self.handle_error(info),
        }
    }

    fn handle_error(&mut self, info: StreamErrorInfo) -> StreamOutcome {
        if self.client.is_none() {
            log::trace!("Ignoring streaming error without a live client: {:?}", info);
            return StreamOutcome::Absorbed;
        }

        if !info.fatal {
            if info.detail.is_fragment_load() && info.retries_remaining != Some(0) {
                log::debug!("Fragment load hiccup, client will retry: {:?}", info.detail);
                return StreamOutcome::Absorbed;
            }
            if info.detail == common::StreamErrorDetail::BufferStalledError {
                log::debug!("Buffer stalled, reporting transient loading state");
                return StreamOutcome::Buffering;
            }
            log::debug!("Non-fatal streaming error absorbed: {:?}", info.detail);
            return StreamOutcome::Absorbed;
        }

        let (message, details) = classify_stream_error(&info, self.src.as_deref());

        if info.detail.is_load_failure() && self.enable_fallback && !self.has_fallback_applied {
            let candidates = self
                .src
                .as_deref()
                .map(|src| self.planner.candidates(src))
                .unwrap_or_default();
            if !candidates.is_empty() {
                self.has_fallback_applied = true;
                self.teardown();
                self.fallback = Some(FallbackProgress {
                    candidates,
                    index: 0,
                    original_message: message,
                    original_details: details,
                });
                return self.play_current_candidate();
            }
        }

        if info.kind == StreamErrorKind::Media && !self.media_recovery_attempted {
            self.media_recovery_attempted = true;
            if let Some(client) = self.client.as_mut() {
                log::info!("Fatal media error, attempting built-in recovery");
                client.recover_media_error();
                return StreamOutcome::Recovering;
            }
        }

        self.teardown();
        StreamOutcome::Fatal { message, details }
    }

    fn play_current_candidate(&mut self) -> StreamOutcome {
        let Some(progress) = self.fallback.as_ref() else {
            return StreamOutcome::Absorbed;
        };

        match progress.current() {
            Some(url) => {
                let url = url.to_string();
                log::info!(
                    "Falling back to direct file {} ({}/{})",
                    url,
                    progress.index + 1,
                    progress.candidates.len()
                );
                self.element.set_src(&url);
                self.element.load();
                StreamOutcome::FallbackStarted { url }
            }
            None => {
                log::warn!("All fallback sources failed");
                let outcome = StreamOutcome::Fatal {
                    message: progress.original_message.clone(),
                    details: progress.original_details.clone(),
                };
                self.fallback = None;
                outcome
            }
        }
    }

    /// Element error while a fallback candidate is playing.
    ///
    /// Returns `None` when `src` is not the current candidate.
    pub fn fallback_error(&mut self, src: &str) -> Option<StreamOutcome> {
        let progress = self.fallback.as_mut()?;
        if progress.current() != Some(src) {
            return None;
        }
        log::warn!("Fallback source failed: {}", src);
        progress.index += 1;
        Some(self.play_current_candidate())
    }

    /// Element loaded data for a fallback candidate
    pub fn fallback_loaded(&mut self, src: &str) -> bool {
        let Some(progress) = self.fallback.as_ref() else {
            return false;
        };
        if progress.current() != Some(src) {
            return false;
        }
        log::info!("Fallback source is playing: {}", src);
        self.fallback = None;
        self.active_fallback = Some(src.to_string());
        true
    }

    /// Whether `src` is a fallback file that already replaced the manifest
    pub fn is_active_fallback(&self, src: &str) -> bool {
        self.active_fallback.as_deref() == Some(src)
    }

    /// Destroy the client, if any. Must precede every new attachment.
    pub fn teardown(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.destroy();
            log::debug!("Destroyed streaming client");
        }
        self.src = None;
        self.fallback = None;
        self.active_fallback = None;
    }

    #[cfg(test)]
    pub fn is_attached(&self) -> bool {
        self.client.is_some()
    }

    #[cfg(test)]
    pub fn has_fallback_applied(&self) -> bool {
        self.has_fallback_applied
    }

    #[cfg(test)]
    pub fn current_fallback(&self) -> Option<&str> {
        self.fallback.as_ref().and_then(FallbackProgress::current)
    }
}

/// Message and details for a streaming failure
fn classify_stream_error(info: &StreamErrorInfo, src: Option<&str>) -> (String, String) {
    let message = match info.kind {
        StreamErrorKind::Network => "The video stream could not be loaded",
        StreamErrorKind::Media => "The video stream could not be decoded",
        StreamErrorKind::Other => "The video stream failed",
    };
    let details = format!(
        "kind={:?} detail={:?} fatal={} src={} message={}",
        info.kind,
        info.detail,
        info.fatal,
        src.unwrap_or("none"),
        info.message.as_deref().unwrap_or("none")
    );
    (message.to_string(), details)
}
