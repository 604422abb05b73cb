use foundation::time::Time;

use crate::job::Job;

#[derive(Debug, Clone)]
struct Slot {
    order: u64,
    job: Job,
    next_due: Time,
}

/// Periodic job table polled once per tick.
///
/// A job first comes due one interval after it is registered, then one
/// interval after each poll that fired it. Due jobs are reported in
/// `(id, insertion_order)` order.
#[derive(Debug, Default)]
pub struct Scheduler {
    next_order: u64,
    slots: Vec<Slot>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `job`; its first run is due one interval after `now`.
    pub fn add_job(&mut self, job: Job, now: Time) {
        let order = self.next_order;
        self.next_order = self.next_order.wrapping_add(1);
        let next_due = now.after_millis(job.interval_ms);
        self.slots.push(Slot {
            order,
            job,
            next_due,
        });
        self.slots
            .sort_by(|a, b| a.job.id.cmp(b.job.id).then_with(|| a.order.cmp(&b.order)));
    }

    /// Returns the ids of every job due at `now` and re-arms them.
    pub fn poll(&mut self, now: Time) -> Vec<&'static str> {
        let mut due = Vec::new();
        for slot in &mut self.slots {
            if now >= slot.next_due {
                due.push(slot.job.id);
                slot.next_due = now.after_millis(slot.job.interval_ms);
            }
        }
        due
    }
}
