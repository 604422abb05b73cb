use foundation::{Time, ViewportBounds};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    pub debounce_ms: f64,
    /// World pixels the viewport must move before another pass.
    pub move_threshold: f64,
    pub zoom_threshold: f64,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100.0,
            move_threshold: 50.0,
            zoom_threshold: 0.1,
        }
    }
}

/// Debounces preload passes beyond the visible rectangle.
///
/// Every viewport change re-arms the timer; the pass fires once the viewport
/// has been still for `debounce_ms` and only if it moved far enough since the
/// previous pass. Polled from the owner's tick.
#[derive(Debug, Clone)]
pub struct PreloadGate {
    config: PreloadConfig,
    pending: Option<(ViewportBounds, Time)>,
    last_pass: Option<ViewportBounds>,
}

impl PreloadGate {
    pub fn new(config: PreloadConfig) -> Self {
        Self {
            config,
            pending: None,
            last_pass: None,
        }
    }

    pub fn arm(&mut self, bounds: ViewportBounds, now: Time) {
        self.pending = Some((bounds, now));
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    pub fn poll(&mut self, now: Time) -> Option<ViewportBounds> {
        let (bounds, armed_at) = self.pending?;
        if now.millis_since(armed_at) < self.config.debounce_ms {
            return None;
        }
        self.pending = None;

        if let Some(last) = self.last_pass
            && !self.moved_enough(&last, &bounds)
        {
            return None;
        }
        self.last_pass = Some(bounds);
        Some(bounds)
    }

    pub fn reset(&mut self) {
        self.pending = None;
        self.last_pass = None;
    }

    fn moved_enough(&self, last: &ViewportBounds, next: &ViewportBounds) -> bool {
        (next.min_x - last.min_x).abs() > self.config.move_threshold
            || (next.min_y - last.min_y).abs() > self.config.move_threshold
            || (next.zoom - last.zoom).abs() > self.config.zoom_threshold
    }
}

impl Default for PreloadGate {
    fn default() -> Self {
        Self::new(PreloadConfig::default())
    }
}
