/// Per-pass allowance of abstract work units.
///
/// The loader hands one out per pump with `units = free load slots`, and every
/// started load consumes its cost, so concurrency never exceeds the configured
/// limit no matter how many chunks are queued.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameBudget {
    remaining_units: u32,
}

impl FrameBudget {
    pub fn new(units: u32) -> Self {
        Self {
            remaining_units: units,
        }
    }

    /// Budget for `limit` slots of which `in_use` are already taken.
    pub fn slots(limit: usize, in_use: usize) -> Self {
        let free = limit.saturating_sub(in_use);
        Self::new(u32::try_from(free).unwrap_or(u32::MAX))
    }

    /// Returns `true` and deducts `units` only if enough remain.
    pub fn try_consume(&mut self, units: u32) -> bool {
        if self.remaining_units < units {
            return false;
        }
        self.remaining_units -= units;
        true
    }
}
