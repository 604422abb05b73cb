use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use runtime::{FrameBudget, Metrics, WorkId, WorkQueue};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::chunk::{Bitmap, Chunk, ChunkKey};
use crate::request::{ChunkRequest, LoadTicket};
use crate::source::{ChunkSource, LoadError};
use crate::store::{ChunkStore, LoadOutcome};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub max_concurrent: usize,
    /// Keys taken from one ranked list per `schedule` call.
    pub max_batch: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 6,
            max_batch: 20,
        }
    }
}

/// Result of one load task, delivered over the completion channel.
#[derive(Debug)]
pub struct LoadCompletion {
    pub ticket: LoadTicket,
    pub result: Result<Bitmap, LoadError>,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct DrainSummary {
    pub installed: usize,
    pub fallback: usize,
    pub discarded: usize,
}

impl DrainSummary {
    pub fn total(&self) -> usize {
        self.installed + self.fallback + self.discarded
    }

    fn add(&mut self, outcome: LoadOutcome) {
        match outcome {
            LoadOutcome::Installed => self.installed += 1,
            LoadOutcome::Fallback => self.fallback += 1,
            LoadOutcome::Discarded => self.discarded += 1,
        }
    }
}

#[derive(Debug)]
struct InFlight {
    ticket: LoadTicket,
    abort: AbortHandle,
}

/// Fills store misses with tokio tasks, most important first.
///
/// The loader never touches the store from a task: results come back over an
/// mpsc channel and are applied by `drain` in the owner's context.
pub struct PriorityLoader {
    config: LoaderConfig,
    source: Arc<dyn ChunkSource>,
    runtime: Handle,
    queue: WorkQueue<ChunkKey>,
    queued: BTreeMap<ChunkKey, WorkId>,
    in_flight: BTreeMap<ChunkKey, InFlight>,
    tx: mpsc::UnboundedSender<LoadCompletion>,
    rx: mpsc::UnboundedReceiver<LoadCompletion>,
    metrics: Metrics,
}

impl std::fmt::Debug for PriorityLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityLoader")
            .field("config", &self.config)
            .field("queued", &self.queued.len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

// WorkQueue pops the smallest value first; loader priorities are higher-first.
fn queue_rank(priority: f64) -> i32 {
    -((priority * 100.0).round() as i32)
}

impl PriorityLoader {
    pub fn new(source: Arc<dyn ChunkSource>, config: LoaderConfig, runtime: Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            queue: WorkQueue::with_max_len(config.max_batch),
            config,
            source,
            runtime,
            queued: BTreeMap::new(),
            in_flight: BTreeMap::new(),
            tx,
            rx,
            metrics: Metrics::new(),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_loading(&self, key: ChunkKey) -> bool {
        self.in_flight.contains_key(&key)
    }

    pub fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.in_flight.is_empty()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Re-ranks the pending queue from `ranked` (highest priority first).
    ///
    /// Takes the first `max_batch` chunks that still need a load. Queued
    /// entries missing from that batch are dropped; in-flight loads are left
    /// alone. Returns how many keys were newly queued.
    pub fn schedule(&mut self, store: &ChunkStore, ranked: &[ChunkRequest]) -> usize {
        let batch: Vec<ChunkRequest> = ranked
            .iter()
            .filter(|r| !self.in_flight.contains_key(&r.key))
            .filter(|r| store.peek(r.key).is_some_and(Chunk::needs_load))
            .take(self.config.max_batch)
            .copied()
            .collect();

        let keep: BTreeSet<ChunkKey> = batch.iter().map(|r| r.key).collect();
        let superseded: Vec<ChunkKey> = self
            .queued
            .keys()
            .filter(|k| !keep.contains(k))
            .copied()
            .collect();
        for key in superseded {
            if let Some(id) = self.queued.remove(&key) {
                self.queue.cancel(id);
            }
        }

        let mut added = 0;
        for req in batch {
            let rank = queue_rank(req.priority);
            if let Some(&id) = self.queued.get(&req.key) {
                self.queue.reprioritize(id, rank);
                continue;
            }
            match self.queue.try_push(rank, req.key) {
                Ok(id) => {
                    self.queued.insert(req.key, id);
                    added += 1;
                }
                Err(full) => {
                    debug!(error = %full, chunk = %req.key, "load queue full");
                    break;
                }
            }
        }

        self.metrics.inc_counter("loader.scheduled", added as u64);
        self.metrics.set_gauge("loader.queued", self.queued.len() as i64);
        added
    }

    /// Starts queued loads while fewer than `max_concurrent` are in flight.
    pub fn pump(&mut self, store: &mut ChunkStore) -> usize {
        let chunk_size = store.config().chunk_size;
        let mut budget = FrameBudget::slots(self.config.max_concurrent, self.in_flight.len());
        let mut started = 0;

        while let Some((_, _, key)) = self.queue.pop_next_with_budget(&mut budget) {
            self.queued.remove(&key);
            let ticket = match store.begin_load(key) {
                Ok(ticket) => ticket,
                Err(err) => {
                    debug!(error = %err, "skipping queued chunk");
                    continue;
                }
            };
            self.spawn_load(ticket, chunk_size);
            started += 1;
        }

        self.metrics.inc_counter("loader.started", started as u64);
        self.metrics
            .set_gauge("loader.in_flight", self.in_flight.len() as i64);
        started
    }

    fn spawn_load(&mut self, ticket: LoadTicket, chunk_size: u32) {
        let fetch = self.source.fetch(ticket.key, chunk_size);
        let tx = self.tx.clone();
        let task = self.runtime.spawn(async move {
            let result = fetch.await;
            // Closed only when the loader itself is gone.
            let _ = tx.send(LoadCompletion { ticket, result });
        });
        debug!(chunk = %ticket.key, generation = ticket.generation, "load started");
        self.in_flight.insert(
            ticket.key,
            InFlight {
                ticket,
                abort: task.abort_handle(),
            },
        );
    }

    /// Applies every completion that has already arrived. Never waits.
    pub fn drain(&mut self, store: &mut ChunkStore) -> DrainSummary {
        let mut summary = DrainSummary::default();
        while let Ok(done) = self.rx.try_recv() {
            self.apply(store, done, &mut summary);
        }
        summary
    }

    /// Waits until every in-flight load has reported back.
    pub async fn settle(&mut self, store: &mut ChunkStore) -> DrainSummary {
        let mut summary = self.drain(store);
        while !self.in_flight.is_empty() {
            let Some(done) = self.rx.recv().await else {
                break;
            };
            self.apply(store, done, &mut summary);
        }
        summary
    }

    /// Pumps and settles until the queue is empty.
    pub async fn run_until_idle(&mut self, store: &mut ChunkStore) -> DrainSummary {
        let mut summary = DrainSummary::default();
        loop {
            self.pump(store);
            if self.in_flight.is_empty() {
                return summary;
            }
            let step = self.settle(store).await;
            summary.installed += step.installed;
            summary.fallback += step.fallback;
            summary.discarded += step.discarded;
        }
    }

    fn apply(&mut self, store: &mut ChunkStore, done: LoadCompletion, summary: &mut DrainSummary) {
        if self
            .in_flight
            .get(&done.ticket.key)
            .is_some_and(|f| f.ticket == done.ticket)
        {
            self.in_flight.remove(&done.ticket.key);
        }
        let outcome = store.complete_load(done.ticket, done.result);
        match outcome {
            LoadOutcome::Installed => self.metrics.inc("loader.installed"),
            LoadOutcome::Fallback => self.metrics.inc("loader.failed"),
            LoadOutcome::Discarded => self.metrics.inc("loader.discarded"),
        }
        summary.add(outcome);
    }

    /// Aborts every in-flight task and forgets all queued work.
    pub fn shutdown(&mut self, store: &mut ChunkStore) -> usize {
        let aborted = self.abort_all();
        while self.rx.try_recv().is_ok() {}
        let reset = store.cancel_loading();
        self.metrics.inc_counter("loader.aborted", aborted as u64);
        info!(aborted, reset, "loader shut down");
        aborted
    }

    fn abort_all(&mut self) -> usize {
        let in_flight = std::mem::take(&mut self.in_flight);
        for flight in in_flight.values() {
            flight.abort.abort();
        }
        self.queue.clear();
        self.queued.clear();
        in_flight.len()
    }
}

impl Drop for PriorityLoader {
    fn drop(&mut self) {
        self.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{LoaderConfig, PriorityLoader};
    use crate::chunk::ChunkKey;
    use crate::residency::ChunkState;
    use crate::source::ProceduralSource;
    use crate::store::{ChunkStore, StoreConfig};
    use foundation::{Rgba, Time, Viewport};
    use tokio::runtime::Handle;

    fn store() -> ChunkStore {
        ChunkStore::new(StoreConfig {
            chunk_size: 8,
            map_width: 512.0,
            map_height: 512.0,
            ..StoreConfig::default()
        })
    }

    fn loader(src: &Arc<ProceduralSource>, config: LoaderConfig) -> PriorityLoader {
        PriorityLoader::new(src.clone(), config, Handle::current())
    }

    #[tokio::test]
    async fn caps_concurrency_and_loads_nearest_first() {
        let src = Arc::new(ProceduralSource::new(1));
        let mut store = store();
        let mut loader = loader(
            &src,
            LoaderConfig {
                max_concurrent: 2,
                ..LoaderConfig::default()
            },
        );

        let bounds = Viewport::new(100.0, 100.0, 1.0, 32.0, 32.0).bounds();
        let ranked = store.required_chunks(&bounds, Time::ZERO);
        assert_eq!(loader.schedule(&store, &ranked), 20);
        assert_eq!(loader.pump(&mut store), 2);
        assert_eq!(loader.in_flight_count(), 2);
        assert!(loader.is_loading(ranked[0].key));
        assert!(loader.is_loading(ranked[1].key));

        let summary = loader.settle(&mut store).await;
        assert_eq!(summary.installed, 2);
        assert_eq!(store.state(ranked[0].key), Some(ChunkState::Resident));
        assert_eq!(loader.in_flight_count(), 0);
        assert_eq!(loader.metrics().counter("loader.installed"), 2);
    }

    #[tokio::test]
    async fn rescheduling_never_duplicates_loads() {
        let src = Arc::new(ProceduralSource::new(2));
        let mut store = store();
        let mut loader = loader(&src, LoaderConfig::default());

        let bounds = Viewport::new(0.0, 0.0, 1.0, 16.0, 16.0).bounds();
        let ranked = store.required_chunks(&bounds, Time::ZERO);
        // 25 chunks: 20 queued, 6 of those started.
        assert_eq!(loader.schedule(&store, &ranked), 20);
        assert_eq!(loader.pump(&mut store), 6);
        // The 14 still queued are re-ranked; only the 5 left over are new.
        assert_eq!(loader.schedule(&store, &ranked), 5);
        assert_eq!(loader.schedule(&store, &ranked), 0);
        assert_eq!(loader.queued_count(), 19);

        loader.run_until_idle(&mut store).await;
        for req in &ranked {
            assert!(src.fetch_count(req.key) <= 1, "{} fetched twice", req.key);
        }
    }

    #[tokio::test]
    async fn queued_entries_outside_the_new_batch_are_dropped() {
        let src = Arc::new(ProceduralSource::new(3));
        let mut store = store();
        let mut loader = loader(
            &src,
            LoaderConfig {
                max_concurrent: 1,
                max_batch: 4,
            },
        );

        let a = store.required_chunks(
            &Viewport::new(0.0, 0.0, 1.0, 8.0, 8.0).bounds(),
            Time::ZERO,
        );
        loader.schedule(&store, &a);
        assert_eq!(loader.queued_count(), 4);

        let b = store.required_chunks(
            &Viewport::new(400.0, 400.0, 1.0, 8.0, 8.0).bounds(),
            Time::ZERO,
        );
        loader.schedule(&store, &b);
        assert_eq!(loader.queued_count(), 4);
        loader.pump(&mut store);
        let started: Vec<ChunkKey> = b
            .iter()
            .map(|r| r.key)
            .filter(|k| loader.is_loading(*k))
            .collect();
        assert_eq!(started, vec![b[0].key]);
        loader.settle(&mut store).await;
    }

    #[tokio::test]
    async fn failed_load_installs_fallback() {
        let src = Arc::new(ProceduralSource::new(4));
        let mut store = store();
        let mut loader = loader(&src, LoaderConfig::default());
        let bounds = Viewport::new(0.0, 0.0, 1.0, 8.0, 8.0).bounds();
        let ranked = store.required_chunks(&bounds, Time::ZERO);
        let key = ChunkKey::new(0, 0, 2);
        src.fail_chunk(key);

        loader.schedule(&store, &ranked);
        let summary = loader.run_until_idle(&mut store).await;
        assert_eq!(summary.fallback, 1);
        let chunk = store.peek(key).unwrap();
        assert_eq!(chunk.state, ChunkState::Fallback);
        assert_eq!(chunk.bitmap.as_ref().unwrap().pixel(4, 4), Some(Rgba::FALLBACK));

        // No automatic retry.
        loader.schedule(&store, &ranked);
        loader.run_until_idle(&mut store).await;
        assert_eq!(src.fetch_count(key), 1);
    }

    #[tokio::test]
    async fn invalidated_in_flight_load_is_refetched_once() {
        let src = Arc::new(ProceduralSource::new(5));
        let mut store = store();
        let mut loader = loader(&src, LoaderConfig::default());
        let bounds = Viewport::new(0.0, 0.0, 1.0, 8.0, 8.0).bounds();
        let key = ChunkKey::new(0, 0, 2);

        let ranked = store.required_chunks(&bounds, Time::ZERO);
        loader.schedule(&store, &ranked);
        loader.pump(&mut store);
        assert!(loader.is_loading(key));

        store.invalidate_chunk(0, 0, None);
        let summary = loader.settle(&mut store).await;
        assert_eq!(summary.discarded, 1);
        assert_eq!(store.state(key), Some(ChunkState::Empty));

        let ranked = store.required_chunks(&bounds, Time(1.0));
        loader.schedule(&store, &ranked);
        loader.run_until_idle(&mut store).await;
        assert_eq!(src.fetch_count(key), 2);
        assert_eq!(store.state(key), Some(ChunkState::Resident));
    }

    #[tokio::test]
    async fn shutdown_aborts_in_flight_tasks() {
        let src = Arc::new(ProceduralSource::new(6).with_latency(Duration::from_secs(30)));
        let mut store = store();
        let mut loader = loader(&src, LoaderConfig::default());
        let bounds = Viewport::new(0.0, 0.0, 1.0, 32.0, 32.0).bounds();
        let ranked = store.required_chunks(&bounds, Time::ZERO);
        loader.schedule(&store, &ranked);
        let started = loader.pump(&mut store);
        assert_eq!(started, 6);
        assert_eq!(store.loading_count(), 6);

        assert_eq!(loader.shutdown(&mut store), 6);
        assert!(loader.is_idle());
        assert_eq!(store.loading_count(), 0);
        assert_eq!(loader.drain(&mut store).total(), 0);
    }
}
