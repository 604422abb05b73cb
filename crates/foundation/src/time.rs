use serde::{Deserialize, Serialize};

/// Monotonic timestamp in seconds.
///
/// Callers supply `Time` explicitly (from `Instant` in the app, from literals in
/// tests) so caching and pacing decisions stay reproducible.
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Time(pub f64); // seconds

impl Time {
    pub const ZERO: Time = Time(0.0);

    pub fn from_millis(ms: f64) -> Self {
        Time(ms / 1000.0)
    }

    pub fn as_millis(self) -> f64 {
        self.0 * 1000.0
    }

    /// Milliseconds elapsed since `earlier`, saturating at zero.
    pub fn millis_since(self, earlier: Time) -> f64 {
        ((self.0 - earlier.0) * 1000.0).max(0.0)
    }

    pub fn after_millis(self, ms: f64) -> Self {
        Time(self.0 + ms / 1000.0)
    }
}
