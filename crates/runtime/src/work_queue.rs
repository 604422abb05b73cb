/// Priority queue for load scheduling.
///
/// - Total ordering on `(priority, id)`: smaller priority values pop first and
///   equal priorities pop in insertion order.
/// - Entries can be cancelled or re-ranked in place by `WorkId`; neither
///   perturbs the relative order of the remaining entries.
/// - Optional backpressure via a maximum pending length.
/// - Pops are gated by a `FrameBudget`, one unit per entry.
///
/// Vec-backed: the queue never holds more than a few hundred chunk requests.

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkId(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WorkQueueFull {
    pub max_len: usize,
}

impl std::fmt::Display for WorkQueueFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "work queue full (max {})", self.max_len)
    }
}

impl std::error::Error for WorkQueueFull {}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    // Field order gives the derived ordering: priority, then id.
    priority: i32,
    id: WorkId,
}

#[derive(Debug)]
struct Item<T> {
    key: Key,
    payload: T,
}

#[derive(Debug)]
pub struct WorkQueue<T> {
    next_id: u64,
    items: Vec<Item<T>>,
    max_len: Option<usize>,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            items: Vec::new(),
            max_len: None,
        }
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len: Some(max_len),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn push(&mut self, priority: i32, payload: T) -> WorkId {
        let id = WorkId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.items.push(Item {
            key: Key { priority, id },
            payload,
        });
        id
    }

    pub fn try_push(&mut self, priority: i32, payload: T) -> Result<WorkId, WorkQueueFull> {
        if let Some(max_len) = self.max_len
            && self.len() >= max_len
        {
            return Err(WorkQueueFull { max_len });
        }
        Ok(self.push(priority, payload))
    }

    /// Removes the entry and hands its payload back.
    pub fn cancel(&mut self, id: WorkId) -> Option<T> {
        let idx = self.items.iter().position(|i| i.key.id == id)?;
        Some(self.items.swap_remove(idx).payload)
    }

    /// Changes the priority of a queued entry. Returns `false` if it is gone.
    pub fn reprioritize(&mut self, id: WorkId, priority: i32) -> bool {
        match self.items.iter_mut().find(|i| i.key.id == id) {
            Some(item) => {
                item.key.priority = priority;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) -> Vec<T> {
        self.items.drain(..).map(|i| i.payload).collect()
    }

    fn best_index(&self) -> Option<usize> {
        self.items
            .iter()
            .enumerate()
            .min_by_key(|(_, item)| item.key)
            .map(|(idx, _)| idx)
    }

    /// Pops the next (lowest priority value, then oldest) entry if `budget`
    /// still has a unit for it.
    pub fn pop_next_with_budget(
        &mut self,
        budget: &mut crate::budget::FrameBudget,
    ) -> Option<(WorkId, i32, T)> {
        let idx = self.best_index()?;
        if !budget.try_consume(1) {
            return None;
        }
        let item = self.items.swap_remove(idx);
        Some((item.key.id, item.key.priority, item.payload))
    }
}
