//! Single-active-video scheduler for feeds of auto-playing videos.
//!
//! Mobile browsers allow only a handful of concurrent decode sessions. The
//! coordinator tracks every registered element and, on scroll, resize and
//! registration changes, picks the one element that best covers a band in the
//! middle of the viewport. Every other element is paused before the winner
//! is asked to play.

use common::{Rect, Viewport};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::element::{MediaElement, PlayError};
use crate::throttle::Throttle;

/// Tunables for the scheduler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerSettings {
    /// Top of the target band as a fraction of viewport height
    pub band_start: f64,
    /// Bottom of the target band as a fraction of viewport height
    pub band_end: f64,
    /// Minimum spacing between two scheduling passes
    pub throttle: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            band_start: 0.4,
            band_end: 0.6,
            throttle: Duration::from_millis(200),
        }
    }
}

/// One element under scheduler control
#[derive(Debug, Clone)]
pub struct VideoRegistration<E> {
    pub element: E,
    pub prefers_to_play: bool,
}

/// Vertical band, in viewport pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetBand {
    pub top: f64,
    pub bottom: f64,
}

impl TargetBand {
    pub fn for_viewport(height: f64, settings: &SchedulerSettings) -> Self {
        Self {
            top: settings.band_start * height,
            bottom: settings.band_end * height,
        }
    }

    pub fn center(&self) -> f64 {
        (self.top + self.bottom) / 2.0
    }

    /// Linear pixel overlap between `rect` and the band
    pub fn overlap(&self, rect: &Rect) -> f64 {
        (rect.bottom.min(self.bottom) - rect.top.max(self.top)).max(0.0)
    }
}

/// Scoring of one candidate during a pass
#[derive(Debug, Clone, Copy)]
struct Candidate<'a> {
    id: &'a str,
    overlap: f64,
    distance: f64,
}

impl Candidate<'_> {
    /// Greater overlap wins; equal overlap goes to the closer center.
    /// Full ties keep the earlier candidate, i.e. the lowest id.
    fn beats(&self, other: &Candidate<'_>) -> bool {
        self.overlap > other.overlap
            || (self.overlap == other.overlap && self.distance < other.distance)
    }
}

/// Pick the registration that should play for the given layout
pub fn select_best<'a, E: MediaElement>(
    registrations: impl IntoIterator<Item = (&'a String, &'a VideoRegistration<E>)>,
    viewport_height: f64,
    band: &TargetBand,
) -> Option<&'a str>
where
    E: 'a,
{
    let mut best: Option<Candidate<'a>> = None;

    for (id, registration) in registrations {
        let element = &registration.element;
        if !element.is_connected() {
            continue;
        }

        let rect = element.bounding_rect();
        if rect.bottom <= 0.0 || rect.top >= viewport_height {
            continue;
        }

        let overlap = band.overlap(&rect);
        if overlap <= 0.0 {
            continue;
        }

        let candidate = Candidate {
            id: id.as_str(),
            overlap,
            distance: (rect.center_y() - band.center()).abs(),
        };

        if best.as_ref().is_none_or(|current| candidate.beats(current)) {
            best = Some(candidate);
        }
    }

    best.map(|c| c.id)
}

/// Process-wide coordinator owned by the application shell
pub struct PlaybackCoordinator<E> {
    registrations: BTreeMap<String, VideoRegistration<E>>,
    active_video: Option<String>,
    viewport: Viewport,
    settings: SchedulerSettings,
    throttle: Throttle<()>,
    passes: u64,
}

impl<E: MediaElement> PlaybackCoordinator<E> {
    pub fn new(settings: SchedulerSettings, viewport: Viewport) -> Self {
        log::info!(
            "Playback scheduler ready (band {:.0}%-{:.0}%, throttle {}ms)",
            settings.band_start * 100.0,
            settings.band_end * 100.0,
            settings.throttle.as_millis()
        );

        Self {
            registrations: BTreeMap::new(),
            active_video: None,
            viewport,
            settings,
            throttle: Throttle::new(settings.throttle),
            passes: 0,
        }
    }

    /// Add or overwrite a registration
    pub fn register_mobile_video(&mut self, video_id: &str, element: E, prefers_to_play: bool) {
        log::debug!(
            "Registering video {} (prefers to play: {})",
            video_id,
            prefers_to_play
        );
        self.registrations.insert(
            video_id.to_string(),
            VideoRegistration {
                element,
                prefers_to_play,
            },
        );
        self.request_pass(Instant::now());
    }

    /// Remove a registration, pausing its element first
    pub fn unregister_mobile_video(&mut self, video_id: &str) {
        if let Some(mut registration) = self.registrations.remove(video_id) {
            if !registration.element.is_paused() {
                registration.element.pause();
            }
            log::debug!("Unregistered video {}", video_id);
        }

        if self.active_video.as_deref() == Some(video_id) {
            self.active_video = None;
        }
        self.request_pass(Instant::now());
    }

    /// Update the stored preference; unknown ids are ignored
    pub fn update_video_preference(&mut self, video_id: &str, prefers_to_play: bool) {
        let Some(registration) = self.registrations.get_mut(video_id) else {
            log::trace!("Preference update for unknown video {}", video_id);
            return;
        };
        registration.prefers_to_play = prefers_to_play;
        self.request_pass(Instant::now());
    }

    pub fn on_scroll(&mut self) {
        self.request_pass(Instant::now());
    }

    pub fn on_resize(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        self.request_pass(Instant::now());
    }

    /// A play request issued by a pass was rejected after the fact
    pub fn play_rejected(&self, video_id: &str, error: &PlayError) {
        log::warn!("Play request for {} rejected: {}", video_id, error);
    }

    /// Run a throttled pass, deferring it to the trailing edge if needed
    pub fn request_pass(&mut self, now: Instant) {
        if self.throttle.call(now, ()).is_some() {
            self.schedule();
        }
    }

    /// When a deferred pass becomes due
    pub fn next_deadline(&self) -> Option<Instant> {
        self.throttle.deadline()
    }

    /// Run the deferred pass if it is due; returns whether a pass ran
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.throttle.poll(now).is_some() {
            self.schedule();
            return true;
        }
        false
    }

    /// Run one scheduling pass immediately and return the active video
    pub fn schedule(&mut self) -> Option<&str> {
        self.passes += 1;
        log::trace!("Scheduling pass #{}", self.passes);
        let band = TargetBand::for_viewport(self.viewport.height, &self.settings);
        let selected = select_best(&self.registrations, self.viewport.height, &band)
            .map(str::to_string);

        // Pause everyone else before anything is allowed to play
        for (id, registration) in self.registrations.iter_mut() {
            if selected.as_deref() != Some(id.as_str()) && !registration.element.is_paused() {
                log::debug!("Pausing video {}", id);
                registration.element.pause();
            }
        }

        let previous = self.active_video.take();
        if let Some(previous) = previous.as_deref()
            && selected.as_deref() != Some(previous)
            && let Some(registration) = self.registrations.get_mut(previous)
            && !registration.element.is_paused()
        {
            registration.element.pause();
        }

        if previous != selected {
            log::debug!("Active video: {:?} -> {:?}", previous, selected);
        }
        self.active_video = selected;

        if let Some(id) = self.active_video.as_deref()
            && let Some(registration) = self.registrations.get_mut(id)
            && registration.prefers_to_play
            && registration.element.is_paused()
        {
            match registration.element.play() {
                Ok(()) => log::debug!("Playing video {}", id),
                Err(e) => log::warn!("Play request for {} failed: {}", id, e),
            }
        }

        self.active_video.as_deref()
    }

    pub fn active_video(&self) -> Option<&str> {
        self.active_video.as_deref()
    }

    pub fn registration(&self, video_id: &str) -> Option<&VideoRegistration<E>> {
        self.registrations.get(video_id)
    }

    pub fn registered_count(&self) -> usize {
        self.registrations.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Number of passes run so far
    #[cfg(test)]
    pub fn passes(&self) -> u64 {
        self.passes
    }
}
