use std::collections::VecDeque;

use foundation::time::Time;
use serde::Serialize;

/// Diagnostics exposed to overlay UI.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PerformanceCounters {
    pub fps: f64,
    /// Wall time between the two most recent compositions.
    pub frame_time_ms: f64,
    pub chunks_loaded: usize,
    pub chunks_visible: usize,
    pub loads_in_flight: usize,
    /// Bytes held by cached chunk bitmaps.
    pub memory_bytes: usize,
    pub frames_rendered: u64,
    pub dropped_frames: u64,
    /// Exponential moving average of composition cost.
    pub average_render_ms: f64,
}

/// Rolling one-second frame counter.
#[derive(Debug, Clone, Default)]
pub struct FpsMeter {
    stamps: VecDeque<Time>,
    last_frame_ms: f64,
}

impl FpsMeter {
    const WINDOW_MS: f64 = 1000.0;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, now: Time) {
        if let Some(prev) = self.stamps.back() {
            self.last_frame_ms = now.millis_since(*prev);
        }
        self.stamps.push_back(now);
        while let Some(front) = self.stamps.front() {
            if now.millis_since(*front) > Self::WINDOW_MS {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Frames recorded within the last second before `now`.
    pub fn fps(&self, now: Time) -> f64 {
        self.stamps
            .iter()
            .filter(|t| now.millis_since(**t) <= Self::WINDOW_MS)
            .count() as f64
    }

    pub fn last_frame_ms(&self) -> f64 {
        self.last_frame_ms
    }
}

#[cfg(test)]
mod tests {
    use super::FpsMeter;
    use foundation::time::Time;

    #[test]
    fn counts_frames_in_window() {
        let mut m = FpsMeter::new();
        for i in 0..60 {
            m.record(Time::from_millis(i as f64 * 16.0));
        }
        let now = Time::from_millis(59.0 * 16.0);
        assert_eq!(m.fps(now), 60.0);
        assert!((m.last_frame_ms() - 16.0).abs() < 1e-9);
        assert_eq!(m.fps(Time::from_millis(5000.0)), 0.0);
    }
}
