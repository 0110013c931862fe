//! Bridge between the playback core and an external host.
//!
//! The host (a webview shell, a test harness) owns the real media elements.
//! It mirrors their layout and events into the daemon as [`Command`]s; the
//! daemon runs the scheduler, loaders and streaming adapters against
//! [`RemoteElement`] handles and hands back the resulting [`HostAction`]s.

use common::{
    ClipdeckError, Command, DaemonStatus, ElementLayout, HostAction, Preload, Rect, Viewport,
    VideoStatus,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::config::Config;
use crate::element::{MediaElement, PlayError};
use crate::loader::{LoadListener, LoaderOptions, SourceRoute, VideoLoader};
use crate::require_mounted;
use crate::scheduler::{PlaybackCoordinator, SchedulerSettings};
use crate::source::{DefaultClassifier, MediaErrorInfo};
use crate::streaming::{
    FallbackPlanner, FallbackRule, StreamOutcome, StreamingAdapter, StreamingClient,
    StreamingClientFactory,
};
use crate::visibility::{IntersectionOptions, VisibilityObserver};

/// Queue of actions waiting to be delivered to the host
#[derive(Debug, Clone, Default)]
pub struct Outbox(Arc<Mutex<Vec<HostAction>>>);

impl Outbox {
    fn lock(&self) -> MutexGuard<'_, Vec<HostAction>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, action: HostAction) {
        self.lock().push(action);
    }

    pub fn drain(&self) -> Vec<HostAction> {
        std::mem::take(&mut *self.lock())
    }
}

/// Last known state of a host element
#[derive(Debug, Default)]
struct ElementMirror {
    rect: Rect,
    connected: bool,
    paused: bool,
    src: Option<String>,
    native_hls: bool,
}

/// Handle to an element living in the host
#[derive(Debug, Clone)]
pub struct RemoteElement {
    id: String,
    mirror: Arc<Mutex<ElementMirror>>,
    outbox: Outbox,
}

impl RemoteElement {
    fn new(id: &str, rect: Rect, native_hls: bool, outbox: Outbox) -> Self {
        Self {
            id: id.to_string(),
            mirror: Arc::new(Mutex::new(ElementMirror {
                rect,
                connected: true,
                paused: true,
                src: None,
                native_hls,
            })),
            outbox,
        }
    }

    fn mirror(&self) -> MutexGuard<'_, ElementMirror> {
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_layout(&self, rect: Rect, connected: bool) {
        let mut mirror = self.mirror();
        mirror.rect = rect;
        mirror.connected = connected;
    }

    fn remount(&self, rect: Rect, native_hls: bool) {
        let mut mirror = self.mirror();
        mirror.rect = rect;
        mirror.native_hls = native_hls;
        mirror.connected = true;
    }

    fn set_paused_state(&self, paused: bool) {
        self.mirror().paused = paused;
    }

    fn detach(&self) {
        self.mirror().connected = false;
    }
}

impl MediaElement for RemoteElement {
    fn is_connected(&self) -> bool {
        self.mirror().connected
    }

    fn bounding_rect(&self) -> Rect {
        self.mirror().rect
    }

    fn is_paused(&self) -> bool {
        self.mirror().paused
    }

    fn play(&mut self) -> Result<(), PlayError> {
        {
            let mut mirror = self.mirror();
            if !mirror.connected {
                return Err(PlayError::Detached);
            }
            mirror.paused = false;
        }
        self.outbox.push(HostAction::Play {
            id: self.id.clone(),
        });
        Ok(())
    }

    fn pause(&mut self) {
        self.mirror().paused = true;
        self.outbox.push(HostAction::Pause {
            id: self.id.clone(),
        });
    }

    fn current_src(&self) -> Option<String> {
        self.mirror().src.clone()
    }

    fn set_src(&mut self, src: &str) {
        self.mirror().src = Some(src.to_string());
        self.outbox.push(HostAction::SetSource {
            id: self.id.clone(),
            src: src.to_string(),
        });
    }

    fn remove_src(&mut self) {
        self.mirror().src = None;
        self.outbox.push(HostAction::RemoveSource {
            id: self.id.clone(),
        });
    }

    fn set_preload(&mut self, preload: Preload) {
        self.outbox.push(HostAction::SetPreload {
            id: self.id.clone(),
            preload,
        });
    }

    fn set_poster(&mut self, poster: &str) {
        self.outbox.push(HostAction::SetPoster {
            id: self.id.clone(),
            poster: poster.to_string(),
        });
    }

    fn load(&mut self) {
        self.outbox.push(HostAction::Load {
            id: self.id.clone(),
        });
    }

    fn supports_native_hls(&self) -> bool {
        self.mirror().native_hls
    }
}

/// Load callbacks for host elements; the host learns about state changes
/// through `LoadStateChanged` actions.
pub struct HostListener {
    id: String,
}

impl LoadListener for HostListener {
    fn on_error(&mut self, message: &str) {
        log::warn!("Video {} failed to load: {}", self.id, message);
    }

    fn on_loaded_data(&mut self, src: &str) {
        log::debug!("Video {} has data for {}", self.id, src);
    }
}

/// Streaming client running inside the host, driven through actions
pub struct HostStreamingClient {
    id: String,
    outbox: Outbox,
}

impl StreamingClient for HostStreamingClient {
    fn attach_media(&mut self) {
        self.outbox.push(HostAction::StreamAttach {
            id: self.id.clone(),
        });
    }

    fn load_source(&mut self, url: &str) {
        self.outbox.push(HostAction::StreamLoadSource {
            id: self.id.clone(),
            url: url.to_string(),
        });
    }

    fn recover_media_error(&mut self) {
        self.outbox.push(HostAction::StreamRecoverMedia {
            id: self.id.clone(),
        });
    }

    fn destroy(&mut self) {
        self.outbox.push(HostAction::StreamDestroy {
            id: self.id.clone(),
        });
    }
}

pub struct HostStreamingFactory {
    id: String,
    outbox: Outbox,
}

impl StreamingClientFactory for HostStreamingFactory {
    type Client = HostStreamingClient;

    fn create(&mut self) -> HostStreamingClient {
        HostStreamingClient {
            id: self.id.clone(),
            outbox: self.outbox.clone(),
        }
    }
}

/// Everything the bridge needs from the configuration
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub scheduler: SchedulerSettings,
    pub preload: Preload,
    pub enable_fallback: bool,
    pub fallback_rules: Vec<FallbackRule>,
    pub visibility: IntersectionOptions,
}

impl BridgeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scheduler: config.scheduler.to_settings(),
            preload: config.loader.preload(),
            enable_fallback: config.streaming.enable_fallback,
            fallback_rules: config.streaming.rules(),
            visibility: config.visibility.to_options(),
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Per-video controllers
struct VideoSlot {
    loader: VideoLoader<RemoteElement, HostListener, DefaultClassifier>,
    stream: StreamingAdapter<RemoteElement, HostStreamingFactory>,
}

impl VideoSlot {
    fn new(id: &str, element: RemoteElement, settings: &BridgeSettings, outbox: Outbox) -> Self {
        let loader = VideoLoader::new(
            element.clone(),
            HostListener { id: id.to_string() },
            DefaultClassifier,
            LoaderOptions {
                preload: settings.preload,
                autoplay: false,
            },
        );
        let stream = StreamingAdapter::new(
            element,
            HostStreamingFactory {
                id: id.to_string(),
                outbox,
            },
            FallbackPlanner::new(settings.fallback_rules.clone()),
            settings.enable_fallback,
        );
        Self { loader, stream }
    }

    fn apply(&mut self, outcome: StreamOutcome) {
        match outcome {
            StreamOutcome::Absorbed | StreamOutcome::Recovering => {}
            StreamOutcome::Buffering => self.loader.set_buffering(),
            StreamOutcome::Resumed => self.loader.end_buffering(),
            StreamOutcome::FallbackStarted { url } => {
                log::debug!("Loader for {} now waits on {}", self.loader.src(), url);
                self.loader.set_buffering();
            }
            StreamOutcome::Fatal { message, details } => {
                self.loader.report_failure(message, details);
            }
        }
    }

    /// Restart the streaming client when the loader routed the source to it
    fn sync_stream(&mut self, classifier: &DefaultClassifier) {
        if self.loader.route() == SourceRoute::Streaming {
            self.stream.sync_source(Some(self.loader.src()), classifier);
        }
    }
}

pub type BridgeResult = Result<Vec<HostAction>, ClipdeckError>;

/// Owns the playback core for one host session
pub struct HostBridge {
    settings: BridgeSettings,
    outbox: Outbox,
    viewport: Viewport,
    classifier: DefaultClassifier,
    elements: BTreeMap<String, RemoteElement>,
    coordinator: PlaybackCoordinator<RemoteElement>,
    videos: BTreeMap<String, VideoSlot>,
    observers: BTreeMap<String, VisibilityObserver>,
}

impl HostBridge {
    pub fn new(settings: BridgeSettings) -> Self {
        let viewport = Viewport::default();
        Self {
            coordinator: PlaybackCoordinator::new(settings.scheduler, viewport),
            settings,
            outbox: Outbox::default(),
            viewport,
            classifier: DefaultClassifier,
            elements: BTreeMap::new(),
            videos: BTreeMap::new(),
            observers: BTreeMap::new(),
        }
    }

    /// Apply one element-side command and return the actions it caused
    pub fn handle(&mut self, command: Command) -> BridgeResult {
        match command {
            Command::Mount {
                id,
                rect,
                native_hls,
            } => self.mount(&id, rect, native_hls),
            Command::Unmount { id } => self.unmount(&id),
            Command::Layout { viewport, elements } | Command::Resize { viewport, elements } => {
                self.apply_layout(&elements);
                self.viewport = viewport;
                self.coordinator.on_resize(viewport);
                self.refresh_visibility();
            }
            Command::Scroll { elements } => {
                self.apply_layout(&elements);
                self.coordinator.on_scroll();
                self.refresh_visibility();
            }
            Command::PlaybackState { id, paused } => {
                let element = require_mounted!(self.elements, &id);
                element.set_paused_state(paused);
            }
            Command::PlayRejected { id, reason } => {
                let element = require_mounted!(self.elements, &id);
                element.set_paused_state(true);
                self.coordinator
                    .play_rejected(&id, &PlayError::from_host_reason(&reason));
            }
            Command::Register {
                id,
                prefers_to_play,
            } => {
                let element = require_mounted!(self.elements, &id);
                self.coordinator
                    .register_mobile_video(&id, element, prefers_to_play);
            }
            Command::Unregister { id } => self.coordinator.unregister_mobile_video(&id),
            Command::UpdatePreference {
                id,
                prefers_to_play,
            } => self
                .coordinator
                .update_video_preference(&id, prefers_to_play),
            Command::Load {
                id,
                src,
                poster,
                autoplay,
            } => self.load(&id, src.as_deref(), poster.as_deref(), autoplay)?,
            Command::MediaLoaded { id, src } => self.with_video(&id, |slot, _| {
                if slot.stream.fallback_loaded(&src) || slot.stream.is_active_fallback(&src) {
                    slot.loader.mark_ready();
                } else {
                    slot.loader.on_loaded_data(&src);
                }
            })?,
            Command::MediaError {
                id,
                src,
                code,
                message,
            } => self.with_video(&id, |slot, _| {
                let error = MediaErrorInfo { code, message };
                if let Some(outcome) = slot.stream.fallback_error(&src) {
                    slot.apply(outcome);
                } else if slot.stream.is_active_fallback(&src) {
                    slot.loader.on_fallback_error(&src, &error);
                } else {
                    slot.loader.on_media_error(&src, &error);
                }
            })?,
            Command::Retry { id } => self.with_video(&id, |slot, classifier| {
                slot.stream.teardown();
                slot.loader.retry();
                slot.sync_stream(classifier);
            })?,
            Command::StreamSignal { id, signal } => self.with_video(&id, |slot, _| {
                let outcome = slot.stream.handle_signal(signal);
                slot.apply(outcome);
            })?,
            Command::Observe {
                id,
                threshold,
                root_margin,
            } => {
                if !self.elements.contains_key(&id) {
                    return Err(not_mounted(&id));
                }
                let defaults = self.settings.visibility;
                let mut observer = VisibilityObserver::new(IntersectionOptions {
                    threshold: threshold.unwrap_or(defaults.threshold),
                    root_margin: root_margin.unwrap_or(defaults.root_margin),
                });
                observer.observe(&id);
                self.observers.insert(id, observer);
                self.refresh_visibility();
            }
            Command::Unobserve { id } => {
                if let Some(mut observer) = self.observers.remove(&id) {
                    observer.unobserve();
                }
            }
            Command::Query
            | Command::ListVideos
            | Command::Subscribe
            | Command::Ping
            | Command::Kill => {
                return Err(ClipdeckError::InvalidInput(
                    "Not an element command".to_string(),
                ));
            }
        }

        Ok(self.outbox.drain())
    }

    fn mount(&mut self, id: &str, rect: Rect, native_hls: bool) {
        match self.elements.get(id) {
            Some(element) => {
                log::debug!("Video {} mounted again, refreshing mirror", id);
                element.remount(rect, native_hls);
            }
            None => {
                log::debug!("Video {} mounted", id);
                let element = RemoteElement::new(id, rect, native_hls, self.outbox.clone());
                self.elements.insert(id.to_string(), element);
            }
        }
    }

    fn unmount(&mut self, id: &str) {
        if self.coordinator.registration(id).is_some() {
            self.coordinator.unregister_mobile_video(id);
        }
        if let Some(mut slot) = self.videos.remove(id) {
            slot.stream.teardown();
            slot.loader.teardown();
        }
        self.observers.remove(id);
        if let Some(element) = self.elements.remove(id) {
            element.detach();
            log::debug!("Video {} unmounted", id);
        }
    }

    fn load(
        &mut self,
        id: &str,
        src: Option<&str>,
        poster: Option<&str>,
        autoplay: bool,
    ) -> Result<(), ClipdeckError> {
        let element = require_mounted!(self.elements, id);
        if !self.videos.contains_key(id) {
            let slot = VideoSlot::new(id, element, &self.settings, self.outbox.clone());
            self.videos.insert(id.to_string(), slot);
        }

        self.with_video(id, |slot, classifier| {
            slot.loader.set_autoplay(autoplay);
            if slot.loader.is_current_source(src) {
                return;
            }
            // The old client must be gone before anything new touches the element
            slot.stream.teardown();
            slot.loader.set_source(src, poster);
            slot.sync_stream(classifier);
        })
    }

    /// Run `f` against a video's controllers and report load-state changes
    fn with_video<F>(&mut self, id: &str, f: F) -> Result<(), ClipdeckError>
    where
        F: FnOnce(&mut VideoSlot, &DefaultClassifier),
    {
        let classifier = self.classifier;
        let slot = self.videos.get_mut(id).ok_or_else(|| not_mounted(id))?;
        let before = slot.loader.state().clone();

        f(slot, &classifier);

        if slot.loader.state() != &before {
            log::debug!("Video {} load phase: {:?}", id, slot.loader.phase());
            self.outbox.push(HostAction::LoadStateChanged {
                id: id.to_string(),
                state: slot.loader.state().clone(),
            });
        }
        Ok(())
    }

    fn apply_layout(&mut self, layouts: &[ElementLayout]) {
        for layout in layouts {
            match self.elements.get(&layout.id) {
                Some(element) => element.apply_layout(layout.rect, layout.connected),
                None => log::trace!("Layout for unknown video {}", layout.id),
            }
        }
    }

    fn refresh_visibility(&mut self) {
        for (id, observer) in self.observers.iter_mut() {
            let Some(element) = self.elements.get(id) else {
                continue;
            };
            if let Some(visible) = observer.update(&element.bounding_rect(), &self.viewport) {
                self.outbox.push(HostAction::VisibilityChanged {
                    id: id.clone(),
                    visible,
                });
            }
        }
    }

    /// Run a deferred scheduling pass if due
    pub fn poll(&mut self, now: Instant) -> Vec<HostAction> {
        self.coordinator.poll(now);
        self.outbox.drain()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.coordinator.next_deadline()
    }

    pub fn active_video(&self) -> Option<&str> {
        self.coordinator.active_video()
    }

    pub fn status(&self, uptime_secs: u64) -> DaemonStatus {
        let loads = self.videos.values().map(|slot| slot.loader.state());
        let (loading, errored) = loads.fold((0, 0), |(loading, errored), state| {
            (
                loading + usize::from(state.is_loading),
                errored + usize::from(state.error.is_some()),
            )
        });

        DaemonStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs,
            active_video: self.active_video().map(str::to_string),
            mounted: self.elements.len(),
            registered: self.coordinator.registered_count(),
            loading,
            errored,
        }
    }

    pub fn videos(&self) -> Vec<VideoStatus> {
        self.elements
            .iter()
            .map(|(id, element)| {
                let registration = self.coordinator.registration(id);
                VideoStatus {
                    id: id.clone(),
                    registered: registration.is_some(),
                    prefers_to_play: registration.is_some_and(|r| r.prefers_to_play),
                    paused: element.is_paused(),
                    active: self.active_video() == Some(id.as_str()),
                    load: self.videos.get(id).map(|slot| slot.loader.state().clone()),
                }
            })
            .collect()
    }
}

fn not_mounted(id: &str) -> ClipdeckError {
    ClipdeckError::NotFound(format!("No mounted video with id '{}'", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{LoadState, StreamErrorDetail, StreamErrorInfo, StreamErrorKind, StreamSignal};
    use std::time::Duration;

    fn bridge() -> HostBridge {
        let mut settings = BridgeSettings::default();
        settings.scheduler.throttle = Duration::ZERO;
        let mut bridge = HostBridge::new(settings);
        bridge
            .handle(Command::Layout {
                viewport: Viewport::new(400.0, 1000.0),
                elements: Vec::new(),
            })
            .unwrap();
        bridge
    }

    fn mount(bridge: &mut HostBridge, id: &str, top: f64, bottom: f64) {
        bridge
            .handle(Command::Mount {
                id: id.to_string(),
                rect: Rect::new(top, bottom),
                native_hls: false,
            })
            .unwrap();
    }

    fn load(bridge: &mut HostBridge, id: &str, src: &str) -> Vec<HostAction> {
        bridge
            .handle(Command::Load {
                id: id.to_string(),
                src: Some(src.to_string()),
                poster: None,
                autoplay: false,
            })
            .unwrap()
    }

    fn last_load_state(actions: &[HostAction]) -> Option<LoadState> {
        actions.iter().rev().find_map(|action| match action {
            HostAction::LoadStateChanged { state, .. } => Some(state.clone()),
            _ => None,
        })
    }

    fn play_ids(actions: &[HostAction]) -> Vec<&str> {
        actions
            .iter()
            .filter(|a| matches!(a, HostAction::Play { .. }))
            .map(HostAction::id)
            .collect()
    }

    #[test]
    fn test_feed_plays_straddling_video() {
        let mut bridge = bridge();
        mount(&mut bridge, "below", 700.0, 900.0);
        mount(&mut bridge, "straddling", 450.0, 650.0);
        mount(&mut bridge, "above", 50.0, 250.0);

        let mut plays = Vec::new();
        for id in ["below", "straddling", "above"] {
            let actions = bridge
                .handle(Command::Register {
                    id: id.to_string(),
                    prefers_to_play: true,
                })
                .unwrap();
            plays.extend(play_ids(&actions).into_iter().map(str::to_string));
        }

        assert_eq!(plays, vec!["straddling".to_string()]);
        assert_eq!(bridge.active_video(), Some("straddling"));

        let videos = bridge.videos();
        let playing: Vec<&str> = videos
            .iter()
            .filter(|v| !v.paused)
            .map(|v| v.id.as_str())
            .collect();
        assert_eq!(playing, vec!["straddling"]);
    }

    #[test]
    fn test_scroll_pauses_before_playing() {
        let mut bridge = bridge();
        mount(&mut bridge, "a", 400.0, 600.0);
        mount(&mut bridge, "b", 800.0, 1000.0);
        for id in ["a", "b"] {
            bridge
                .handle(Command::Register {
                    id: id.to_string(),
                    prefers_to_play: true,
                })
                .unwrap();
        }

        let actions = bridge
            .handle(Command::Scroll {
                elements: vec![
                    ElementLayout {
                        id: "a".to_string(),
                        rect: Rect::new(0.0, 200.0),
                        connected: true,
                    },
                    ElementLayout {
                        id: "b".to_string(),
                        rect: Rect::new(400.0, 600.0),
                        connected: true,
                    },
                ],
            })
            .unwrap();

        assert_eq!(
            actions,
            vec![
                HostAction::Pause {
                    id: "a".to_string()
                },
                HostAction::Play {
                    id: "b".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_play_rejection_marks_paused() {
        let mut bridge = bridge();
        mount(&mut bridge, "a", 400.0, 600.0);
        bridge
            .handle(Command::Register {
                id: "a".to_string(),
                prefers_to_play: true,
            })
            .unwrap();

        bridge
            .handle(Command::PlayRejected {
                id: "a".to_string(),
                reason: "NotAllowedError".to_string(),
            })
            .unwrap();
        assert!(bridge.videos()[0].paused);

        // Next pass tries again
        let actions = bridge.handle(Command::Scroll { elements: Vec::new() }).unwrap();
        assert_eq!(play_ids(&actions), vec!["a"]);
    }

    #[test]
    fn test_unknown_video_is_not_found() {
        let mut bridge = bridge();
        let result = bridge.handle(Command::Register {
            id: "ghost".to_string(),
            prefers_to_play: true,
        });
        assert!(matches!(result, Err(ClipdeckError::NotFound(_))));

        let result = bridge.handle(Command::Retry {
            id: "ghost".to_string(),
        });
        assert!(matches!(result, Err(ClipdeckError::NotFound(_))));

        // Preference updates for unknown ids are silently ignored
        assert!(
            bridge
                .handle(Command::UpdatePreference {
                    id: "ghost".to_string(),
                    prefers_to_play: false,
                })
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_load_emits_element_actions() {
        let mut bridge = bridge();
        mount(&mut bridge, "a", 0.0, 100.0);
        let actions = load(&mut bridge, "a", "https://cdn.example.com/a.mp4");

        assert_eq!(
            &actions[..3],
            &[
                HostAction::SetPreload {
                    id: "a".to_string(),
                    preload: Preload::Auto
                },
                HostAction::SetSource {
                    id: "a".to_string(),
                    src: "https://cdn.example.com/a.mp4".to_string()
                },
                HostAction::Load {
                    id: "a".to_string()
                },
            ]
        );
        let state = last_load_state(&actions).unwrap();
        assert!(state.is_loading);

        // Same source again is a no-op
        assert!(load(&mut bridge, "a", "https://cdn.example.com/a.mp4").is_empty());

        let actions = bridge
            .handle(Command::MediaLoaded {
                id: "a".to_string(),
                src: "https://cdn.example.com/a.mp4".to_string(),
            })
            .unwrap();
        let state = last_load_state(&actions).unwrap();
        assert!(state.loaded_data_fired);
        assert!(!state.is_loading);
    }

    #[test]
    fn test_blob_preview_error() {
        let mut bridge = bridge();
        mount(&mut bridge, "a", 0.0, 100.0);
        load(&mut bridge, "a", "blob:abc");

        let actions = bridge
            .handle(Command::MediaError {
                id: "a".to_string(),
                src: "blob:abc".to_string(),
                code: Some(4),
                message: None,
            })
            .unwrap();
        let state = last_load_state(&actions).unwrap();
        assert_eq!(
            state.error.as_deref(),
            Some("The temporary preview cannot be played")
        );
        assert!(state.is_blob_url);
        assert_eq!(bridge.status(0).errored, 1);
    }

    #[test]
    fn test_empty_source_never_loads() {
        let mut bridge = bridge();
        mount(&mut bridge, "a", 0.0, 100.0);
        let actions = load(&mut bridge, "a", "");

        assert!(!actions.iter().any(|a| matches!(a, HostAction::Load { .. })));
        let state = last_load_state(&actions).unwrap();
        assert_eq!(state.error.as_deref(), Some("No video source provided"));
        assert!(!state.is_loading);
    }

    #[test]
    fn test_stale_error_is_ignored() {
        let mut bridge = bridge();
        mount(&mut bridge, "a", 0.0, 100.0);
        load(&mut bridge, "a", "https://cdn.example.com/a.mp4");
        load(&mut bridge, "a", "https://cdn.example.com/b.mp4");

        let actions = bridge
            .handle(Command::MediaError {
                id: "a".to_string(),
                src: "https://cdn.example.com/a.mp4".to_string(),
                code: Some(2),
                message: None,
            })
            .unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn test_retry_reassigns_source() {
        let mut bridge = bridge();
        mount(&mut bridge, "a", 0.0, 100.0);
        load(&mut bridge, "a", "https://cdn.example.com/a.mp4");
        bridge
            .handle(Command::MediaError {
                id: "a".to_string(),
                src: "https://cdn.example.com/a.mp4".to_string(),
                code: Some(2),
                message: None,
            })
            .unwrap();

        let actions = bridge
            .handle(Command::Retry {
                id: "a".to_string(),
            })
            .unwrap();
        assert!(actions.contains(&HostAction::RemoveSource {
            id: "a".to_string()
        }));
        assert!(actions.contains(&HostAction::Load {
            id: "a".to_string()
        }));
        let state = last_load_state(&actions).unwrap();
        assert!(state.error.is_none());
        assert!(state.is_loading);
    }

    #[test]
    fn test_streaming_fallback_flow() {
        let mut bridge = bridge();
        mount(&mut bridge, "a", 0.0, 100.0);
        let manifest = "https://videodelivery.net/abc/manifest/video.m3u8";
        let fallback = "https://videodelivery.net/abc/downloads/default.mp4";

        let actions = load(&mut bridge, "a", manifest);
        assert!(actions.contains(&HostAction::StreamAttach {
            id: "a".to_string()
        }));
        assert!(!actions.iter().any(|a| matches!(a, HostAction::SetSource { .. })));

        let actions = bridge
            .handle(Command::StreamSignal {
                id: "a".to_string(),
                signal: StreamSignal::MediaAttached,
            })
            .unwrap();
        assert_eq!(
            actions,
            vec![HostAction::StreamLoadSource {
                id: "a".to_string(),
                url: manifest.to_string()
            }]
        );

        let actions = bridge
            .handle(Command::StreamSignal {
                id: "a".to_string(),
                signal: StreamSignal::Error(StreamErrorInfo {
                    fatal: true,
                    kind: StreamErrorKind::Network,
                    detail: StreamErrorDetail::ManifestLoadError,
                    retries_remaining: None,
                    message: Some("404".to_string()),
                }),
            })
            .unwrap();
        assert_eq!(
            &actions[..3],
            &[
                HostAction::StreamDestroy {
                    id: "a".to_string()
                },
                HostAction::SetSource {
                    id: "a".to_string(),
                    src: fallback.to_string()
                },
                HostAction::Load {
                    id: "a".to_string()
                },
            ]
        );

        let actions = bridge
            .handle(Command::MediaLoaded {
                id: "a".to_string(),
                src: fallback.to_string(),
            })
            .unwrap();
        let state = last_load_state(&actions).unwrap();
        assert!(state.loaded_data_fired);
        assert!(state.error.is_none());
        assert_eq!(state.src, manifest);
    }

    fn stream_error(
        bridge: &mut HostBridge,
        fatal: bool,
        kind: StreamErrorKind,
        detail: StreamErrorDetail,
    ) -> Vec<HostAction> {
        bridge
            .handle(Command::StreamSignal {
                id: "a".to_string(),
                signal: StreamSignal::Error(StreamErrorInfo {
                    fatal,
                    kind,
                    detail,
                    retries_remaining: None,
                    message: None,
                }),
            })
            .unwrap()
    }

    #[test]
    fn test_error_on_playing_fallback_is_reported() {
        let mut bridge = bridge();
        mount(&mut bridge, "a", 0.0, 100.0);
        let manifest = "https://videodelivery.net/abc/manifest/video.m3u8";
        let fallback = "https://videodelivery.net/abc/downloads/default.mp4";
        load(&mut bridge, "a", manifest);
        stream_error(
            &mut bridge,
            true,
            StreamErrorKind::Network,
            StreamErrorDetail::ManifestLoadError,
        );
        bridge
            .handle(Command::MediaLoaded {
                id: "a".to_string(),
                src: fallback.to_string(),
            })
            .unwrap();
        assert_eq!(bridge.status(0).errored, 0);

        // The connection drops while the direct file is playing
        let actions = bridge
            .handle(Command::MediaError {
                id: "a".to_string(),
                src: fallback.to_string(),
                code: Some(2),
                message: None,
            })
            .unwrap();
        let state = last_load_state(&actions).unwrap();
        assert_eq!(
            state.error.as_deref(),
            Some("A network error interrupted the video download")
        );
        assert_eq!(state.src, manifest);
        assert!(!state.is_loading);
        assert_eq!(bridge.status(0).errored, 1);
    }

    #[test]
    fn test_stream_stall_then_recovery() {
        let mut bridge = bridge();
        mount(&mut bridge, "a", 0.0, 100.0);
        let manifest = "https://cdn.example.com/s/index.m3u8";
        load(&mut bridge, "a", manifest);
        bridge
            .handle(Command::StreamSignal {
                id: "a".to_string(),
                signal: StreamSignal::MediaAttached,
            })
            .unwrap();
        bridge
            .handle(Command::MediaLoaded {
                id: "a".to_string(),
                src: manifest.to_string(),
            })
            .unwrap();
        assert_eq!(bridge.status(0).loading, 0);

        let actions = stream_error(
            &mut bridge,
            false,
            StreamErrorKind::Media,
            StreamErrorDetail::BufferStalledError,
        );
        assert!(last_load_state(&actions).unwrap().is_loading);
        assert_eq!(bridge.status(0).loading, 1);

        let actions = bridge
            .handle(Command::StreamSignal {
                id: "a".to_string(),
                signal: StreamSignal::BufferRecovered,
            })
            .unwrap();
        let state = last_load_state(&actions).unwrap();
        assert!(!state.is_loading);
        assert!(state.loaded_data_fired);
        assert!(state.error.is_none());
        assert!(!actions.iter().any(|a| matches!(a, HostAction::Play { .. })));
        assert_eq!(bridge.status(0).loading, 0);
    }

    #[test]
    fn test_unmount_tears_everything_down() {
        let mut bridge = bridge();
        mount(&mut bridge, "a", 400.0, 600.0);
        load(&mut bridge, "a", "https://cdn.example.com/s/index.m3u8");
        bridge
            .handle(Command::Register {
                id: "a".to_string(),
                prefers_to_play: true,
            })
            .unwrap();

        let actions = bridge
            .handle(Command::Unmount {
                id: "a".to_string(),
            })
            .unwrap();
        assert!(actions.contains(&HostAction::Pause {
            id: "a".to_string()
        }));
        assert!(actions.contains(&HostAction::StreamDestroy {
            id: "a".to_string()
        }));
        assert_eq!(bridge.active_video(), None);
        assert!(bridge.videos().is_empty());
        assert_eq!(bridge.status(0).mounted, 0);
    }

    #[test]
    fn test_visibility_changes_are_reported() {
        let mut bridge = bridge();
        mount(&mut bridge, "a", 1200.0, 1400.0);
        let actions = bridge
            .handle(Command::Observe {
                id: "a".to_string(),
                threshold: None,
                root_margin: Some(100.0),
            })
            .unwrap();
        assert!(actions.is_empty());

        let scroll = |top: f64| Command::Scroll {
            elements: vec![ElementLayout {
                id: "a".to_string(),
                rect: Rect::new(top, top + 200.0),
                connected: true,
            }],
        };

        let actions = bridge.handle(scroll(1050.0)).unwrap();
        assert_eq!(
            actions,
            vec![HostAction::VisibilityChanged {
                id: "a".to_string(),
                visible: true
            }]
        );
        assert!(bridge.handle(scroll(900.0)).unwrap().is_empty());

        bridge
            .handle(Command::Unobserve {
                id: "a".to_string(),
            })
            .unwrap();
        assert!(bridge.handle(scroll(3000.0)).unwrap().is_empty());
    }

    #[test]
    fn test_deferred_pass_is_polled() {
        let mut bridge = HostBridge::new(BridgeSettings::default());
        bridge
            .handle(Command::Layout {
                viewport: Viewport::new(400.0, 1000.0),
                elements: Vec::new(),
            })
            .unwrap();
        mount(&mut bridge, "a", 400.0, 600.0);

        // The layout pass just ran, so this registration is deferred
        let actions = bridge
            .handle(Command::Register {
                id: "a".to_string(),
                prefers_to_play: true,
            })
            .unwrap();
        assert!(actions.is_empty());

        let deadline = bridge.next_deadline().unwrap();
        let actions = bridge.poll(deadline);
        assert_eq!(
            actions,
            vec![HostAction::Play {
                id: "a".to_string()
            }]
        );
        assert!(bridge.next_deadline().is_none());
    }

    #[test]
    fn test_status_counts() {
        let mut bridge = bridge();
        mount(&mut bridge, "a", 400.0, 600.0);
        mount(&mut bridge, "b", 0.0, 100.0);
        load(&mut bridge, "a", "https://cdn.example.com/a.mp4");
        bridge
            .handle(Command::Register {
                id: "a".to_string(),
                prefers_to_play: true,
            })
            .unwrap();

        let status = bridge.status(42);
        assert_eq!(status.uptime_secs, 42);
        assert_eq!(status.mounted, 2);
        assert_eq!(status.registered, 1);
        assert_eq!(status.loading, 1);
        assert_eq!(status.errored, 0);
        assert_eq!(status.active_video.as_deref(), Some("a"));
    }
}
