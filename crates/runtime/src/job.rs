/// A periodic duty driven by the owner's tick, replacing ad hoc timers.
///
/// Jobs are identified by a static name and fire at most once per tick even
/// if several intervals elapsed since the last one.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: &'static str,
    pub interval_ms: f64,
}

impl Job {
    pub fn every(id: &'static str, interval_ms: f64) -> Self {
        Self { id, interval_ms }
    }
}
