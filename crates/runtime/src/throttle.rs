use foundation::time::Time;

/// Minimum-interval gate for compositions.
///
/// `ready` answers "may a new composition start now"; `mark` records that one
/// did. Requests that arrive while the gate is closed are expected to wait in
/// the caller's queue, where newer requests replace older ones.
#[derive(Debug, Clone)]
pub struct RenderThrottle {
    min_interval_ms: f64,
    last_render: Option<Time>,
}

impl RenderThrottle {
    /// 60 Hz pacing.
    pub const DISPLAY_INTERVAL_MS: f64 = 1000.0 / 60.0;

    pub fn new(min_interval_ms: f64) -> Self {
        Self {
            min_interval_ms: min_interval_ms.max(0.0),
            last_render: None,
        }
    }

    pub fn ready(&self, now: Time) -> bool {
        match self.last_render {
            None => true,
            Some(last) => now.millis_since(last) >= self.min_interval_ms,
        }
    }

    /// Milliseconds until `ready` turns true (0 if it already is).
    pub fn wait_ms(&self, now: Time) -> f64 {
        match self.last_render {
            None => 0.0,
            Some(last) => (self.min_interval_ms - now.millis_since(last)).max(0.0),
        }
    }

    pub fn mark(&mut self, now: Time) {
        self.last_render = Some(now);
    }

    pub fn reset(&mut self) {
        self.last_render = None;
    }
}

impl Default for RenderThrottle {
    fn default() -> Self {
        Self::new(Self::DISPLAY_INTERVAL_MS)
    }
}
