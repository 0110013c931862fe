use common::{Rect, Viewport};

/// Intersection configuration for a [`VisibilityObserver`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntersectionOptions {
    /// Fraction of the element that must be inside the root (0 = any pixel)
    pub threshold: f64,
    /// Pixels added around the viewport on every side (negative shrinks it)
    pub root_margin: f64,
}

impl Default for IntersectionOptions {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            root_margin: 0.0,
        }
    }
}

/// Tracks whether one element intersects the viewport.
///
/// Used by hosts to trigger lazy loading; independent of the playback
/// scheduler's own geometry.
#[derive(Debug, Clone)]
pub struct VisibilityObserver {
    options: IntersectionOptions,
    target: Option<String>,
    is_intersecting: bool,
}

impl VisibilityObserver {
    pub fn new(options: IntersectionOptions) -> Self {
        Self {
            options,
            target: None,
            is_intersecting: false,
        }
    }

    /// Start observing `target`. Switching targets resets the state.
    pub fn observe(&mut self, target: &str) {
        if self.target.as_deref() == Some(target) {
            return;
        }
        if let Some(previous) = self.target.replace(target.to_string()) {
            log::debug!("Visibility observer moved from {} to {}", previous, target);
        }
        self.is_intersecting = false;
    }

    pub fn unobserve(&mut self) {
        self.target = None;
        self.is_intersecting = false;
    }

    #[cfg(test)]
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    #[cfg(test)]
    pub fn is_intersecting(&self) -> bool {
        self.is_intersecting
    }

    /// Feed the target's latest rectangle. Returns the new state when it
    /// crossed the threshold.
    pub fn update(&mut self, rect: &Rect, viewport: &Viewport) -> Option<bool> {
        self.target.as_ref()?;

        let ratio = intersection_ratio(rect, viewport, self.options.root_margin);
        let intersecting = if self.options.threshold <= 0.0 {
            ratio > 0.0
        } else {
            ratio >= self.options.threshold
        };

        if intersecting == self.is_intersecting {
            return None;
        }
        self.is_intersecting = intersecting;
        Some(intersecting)
    }
}

/// Visible fraction of `rect` within the viewport grown by `margin`.
///
/// Rectangles without horizontal extent (or a viewport without width) are
/// measured on the vertical axis only.
pub fn intersection_ratio(rect: &Rect, viewport: &Viewport, margin: f64) -> f64 {
    let vertical = axis_ratio(rect.top, rect.bottom, -margin, viewport.height + margin);
    if rect.width() <= 0.0 || viewport.width <= 0.0 {
        return vertical;
    }
    let horizontal = axis_ratio(rect.left, rect.right, -margin, viewport.width + margin);
    vertical * horizontal
}

fn axis_ratio(start: f64, end: f64, root_start: f64, root_end: f64) -> f64 {
    let length = end - start;
    if length <= 0.0 {
        // Zero-size elements count as visible when they sit inside the root
        return if start >= root_start && start <= root_end { 1.0 } else { 0.0 };
    }
    let visible = (end.min(root_end) - start.max(root_start)).max(0.0);
    visible / length
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport() -> Viewport {
        Viewport::new(400.0, 800.0)
    }

    #[test]
    fn test_ratio_vertical_only() {
        let vp = viewport();
        assert_eq!(intersection_ratio(&Rect::new(0.0, 100.0), &vp, 0.0), 1.0);
        assert_eq!(intersection_ratio(&Rect::new(750.0, 850.0), &vp, 0.0), 0.5);
        assert_eq!(intersection_ratio(&Rect::new(900.0, 1000.0), &vp, 0.0), 0.0);
        // Margin pulls the element in early
        assert_eq!(intersection_ratio(&Rect::new(900.0, 1000.0), &vp, 200.0), 1.0);
    }

    #[test]
    fn test_ratio_two_axes() {
        let vp = viewport();
        let rect = Rect::new(700.0, 900.0).with_horizontal(300.0, 500.0);
        assert_eq!(intersection_ratio(&rect, &vp, 0.0), 0.25);
    }

    #[test]
    fn test_reports_crossings_only() {
        let mut observer = VisibilityObserver::new(IntersectionOptions::default());
        let vp = viewport();

        // Nothing observed yet
        assert_eq!(observer.update(&Rect::new(0.0, 100.0), &vp), None);

        observer.observe("clip");
        assert_eq!(observer.update(&Rect::new(900.0, 1000.0), &vp), None);
        assert_eq!(observer.update(&Rect::new(700.0, 900.0), &vp), Some(true));
        assert_eq!(observer.update(&Rect::new(600.0, 800.0), &vp), None);
        assert_eq!(observer.update(&Rect::new(-300.0, -100.0), &vp), Some(false));
        assert!(!observer.is_intersecting());
    }

    #[test]
    fn test_threshold() {
        let mut observer = VisibilityObserver::new(IntersectionOptions {
            threshold: 0.5,
            root_margin: 0.0,
        });
        observer.observe("clip");
        let vp = viewport();

        assert_eq!(observer.update(&Rect::new(760.0, 860.0), &vp), None);
        assert_eq!(observer.update(&Rect::new(750.0, 850.0), &vp), Some(true));
    }

    #[test]
    fn test_changing_target_resets() {
        let mut observer = VisibilityObserver::new(IntersectionOptions::default());
        let vp = viewport();
        observer.observe("a");
        assert_eq!(observer.update(&Rect::new(0.0, 100.0), &vp), Some(true));

        observer.observe("b");
        assert!(!observer.is_intersecting());
        assert_eq!(observer.target(), Some("b"));
        assert_eq!(observer.update(&Rect::new(0.0, 100.0), &vp), Some(true));

        observer.unobserve();
        assert_eq!(observer.update(&Rect::new(0.0, 100.0), &vp), None);
    }
}
