use foundation::time::Time;

/// One pass of the owner's tick loop.
///
/// Unlike a fixed-step simulation frame, ticks here follow the display, so the
/// timestamp is supplied by the caller rather than derived from the index.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Frame {
    /// 0-based tick index.
    pub index: u64,
    pub time: Time,
    /// Milliseconds since the previous tick (0 for the first one).
    pub dt_ms: f64,
}

impl Frame {
    pub fn first(time: Time) -> Self {
        Self {
            index: 0,
            time,
            dt_ms: 0.0,
        }
    }

    pub fn next(self, time: Time) -> Self {
        Self {
            index: self.index + 1,
            time,
            dt_ms: time.millis_since(self.time),
        }
    }
}
