use std::time::Instant;

use foundation::{Rect, Rgba, Time, ViewportBounds};
use runtime::{Metrics, RenderThrottle};
use serde::{Deserialize, Serialize};
use streaming::{ChunkKey, ChunkStore};
use tracing::{debug, warn};

use crate::commands::{Overlay, collect, execute};
use crate::raster::{ComposeError, Raster};
use crate::surface::Surface;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TaskId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    pub throttle_ms: f64,
    pub min_buffer: u32,
    pub max_buffer: u32,
    /// Ceiling for front plus back buffer bytes.
    pub memory_limit_bytes: usize,
    /// Queued tasks closer than this (world px on both axes) are replaced.
    pub similar_offset: f64,
    pub similar_zoom: f64,
    pub grid_min_zoom: f64,
    pub chunk_borders: bool,
    pub background: Rgba,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            throttle_ms: RenderThrottle::DISPLAY_INTERVAL_MS,
            min_buffer: 100,
            max_buffer: 2048,
            memory_limit_bytes: 64 * 1024 * 1024,
            similar_offset: 10.0,
            similar_zoom: 0.1,
            grid_min_zoom: 4.0,
            chunk_borders: false,
            background: Rgba::BACKGROUND,
        }
    }
}

impl ComposerConfig {
    fn overlay(&self) -> Overlay {
        Overlay {
            background: self.background,
            grid_min_zoom: self.grid_min_zoom,
            chunk_borders: self.chunk_borders,
            ..Overlay::default()
        }
    }

    fn clamp_dim(&self, v: f64) -> Option<u32> {
        if !v.is_finite() || v <= 0.0 {
            return None;
        }
        Some((v.floor() as u32).clamp(self.min_buffer, self.max_buffer))
    }
}

/// One scheduled composition: a viewport snapshot plus the chunks to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTask {
    pub id: TaskId,
    pub bounds: ViewportBounds,
    pub chunks: Vec<ChunkKey>,
    pub timestamp: Time,
    pub priority: f64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize)]
pub enum ComposerState {
    #[default]
    Idle,
    Rendering,
}

#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize)]
pub struct RenderStats {
    pub frames_rendered: u64,
    pub dropped_frames: u64,
    /// Exponential moving average, weight 0.1 on the newest frame.
    pub average_render_ms: f64,
    pub last_render_ms: f64,
}

impl RenderStats {
    fn record(&mut self, ms: f64) {
        self.frames_rendered += 1;
        self.last_render_ms = ms;
        self.average_render_ms = self.average_render_ms * 0.9 + ms * 0.1;
    }
}

fn is_similar(a: &ViewportBounds, b: &ViewportBounds, offset: f64, zoom: f64) -> bool {
    (a.min_x - b.min_x).abs() < offset
        && (a.min_y - b.min_y).abs() < offset
        && (a.zoom - b.zoom).abs() < zoom
}

/// Double-buffered compositor.
///
/// Tasks are queued by the owner and dispatched from `poll` at most once per
/// throttle interval. The back buffer is drawn and then swapped with the
/// front buffer; readers only ever see the front buffer.
#[derive(Debug)]
pub struct FrameComposer {
    config: ComposerConfig,
    state: ComposerState,
    front: Raster,
    back: Raster,
    front_bounds: Option<ViewportBounds>,
    queue: Vec<RenderTask>,
    next_task: u64,
    throttle: RenderThrottle,
    stats: RenderStats,
    metrics: Metrics,
}

impl FrameComposer {
    pub fn new(config: ComposerConfig, width: f64, height: f64) -> Result<Self, ComposeError> {
        let w = config.clamp_dim(width).unwrap_or(config.min_buffer);
        let h = config.clamp_dim(height).unwrap_or(config.min_buffer);
        let (front, back) = Self::allocate(&config, w, h)?;
        Ok(Self {
            throttle: RenderThrottle::new(config.throttle_ms),
            config,
            state: ComposerState::Idle,
            front,
            back,
            front_bounds: None,
            queue: Vec::new(),
            next_task: 1,
            stats: RenderStats::default(),
            metrics: Metrics::new(),
        })
    }

    fn allocate(config: &ComposerConfig, w: u32, h: u32) -> Result<(Raster, Raster), ComposeError> {
        let bytes = (w as usize) * (h as usize) * 4 * 2;
        if bytes > config.memory_limit_bytes {
            return Err(ComposeError::Allocation {
                width: w,
                height: h,
            });
        }
        let mut front = Raster::new(w, h)?;
        let mut back = Raster::new(w, h)?;
        front.clear(config.background);
        back.clear(config.background);
        Ok((front, back))
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    pub fn state(&self) -> ComposerState {
        self.state
    }

    pub fn size(&self) -> (u32, u32) {
        (self.front.width(), self.front.height())
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queued(&self) -> &[RenderTask] {
        &self.queue
    }

    /// Last completed frame.
    pub fn front(&self) -> &Raster {
        &self.front
    }

    /// Viewport the front buffer was composed for.
    pub fn front_bounds(&self) -> Option<ViewportBounds> {
        self.front_bounds
    }

    pub fn set_chunk_borders(&mut self, on: bool) {
        self.config.chunk_borders = on;
    }

    /// Queues a composition of `chunks` for `bounds`.
    ///
    /// Replaces queued tasks for a similar viewport. The pending list stays
    /// sorted by priority (`zoom * 10`), newest first among equals; `poll`
    /// still dispatches by recency.
    pub fn queue_render(
        &mut self,
        bounds: ViewportBounds,
        chunks: Vec<ChunkKey>,
        now: Time,
    ) -> TaskId {
        let id = TaskId(self.next_task);
        self.next_task += 1;

        let (offset, zoom) = (self.config.similar_offset, self.config.similar_zoom);
        let before = self.queue.len();
        self.queue
            .retain(|t| !is_similar(&t.bounds, &bounds, offset, zoom));
        let replaced = before - self.queue.len();
        if replaced > 0 {
            self.metrics.inc_counter("compose.replaced", replaced as u64);
        }

        self.queue.push(RenderTask {
            id,
            bounds,
            chunks,
            timestamp: now,
            priority: bounds.zoom * 10.0,
        });
        self.queue.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then_with(|| b.timestamp.0.total_cmp(&a.timestamp.0))
                .then_with(|| b.id.cmp(&a.id))
        });
        id
    }

    /// Milliseconds until `poll` may dispatch again.
    pub fn wait_ms(&self, now: Time) -> f64 {
        self.throttle.wait_ms(now)
    }

    /// Dispatches the most recent queued task if the throttle allows.
    ///
    /// Recency is `(timestamp, id)`; ids grow with every `queue_render`, so
    /// they order requests that share a timestamp. Every other queued task is
    /// older and superseded, so bursts inside one throttle window collapse
    /// into a single frame of the latest viewport.
    pub fn poll(&mut self, now: Time, store: &ChunkStore) -> Option<TaskId> {
        if self.queue.is_empty() || !self.throttle.ready(now) {
            return None;
        }
        let newest = self
            .queue
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.timestamp
                    .0
                    .total_cmp(&b.timestamp.0)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|(idx, _)| idx)?;
        let task = self.queue.remove(newest);
        let superseded = self.queue.len();
        self.queue.clear();
        if superseded > 0 {
            debug!(superseded, "render tasks collapsed");
        }

        self.state = ComposerState::Rendering;
        let started = Instant::now();
        let frame = collect(
            store,
            &task.bounds,
            &task.chunks,
            &self.config.overlay(),
            self.size(),
        );
        execute(&frame, store, &mut self.back);
        std::mem::swap(&mut self.front, &mut self.back);
        self.front_bounds = Some(task.bounds);
        self.state = ComposerState::Idle;

        let ms = started.elapsed().as_secs_f64() * 1000.0;
        self.stats.record(ms);
        self.throttle.mark(now);
        self.metrics.inc("compose.frames");
        self.metrics
            .record_histogram("compose.render_us", (ms * 1000.0) as i64);
        self.metrics
            .set_gauge("compose.blits", frame.blit_count() as i64);
        Some(task.id)
    }

    /// Copies the front buffer onto `surface`, scaled to fill it.
    pub fn present(&self, surface: &mut dyn Surface) {
        let (w, h) = surface.size();
        if w == 0 || h == 0 {
            return;
        }
        surface.clear(self.config.background);
        surface.blit(
            self.front.view(),
            Rect::from_origin_size(0.0, 0.0, w as f64, h as f64),
        );
    }

    /// Reallocates both buffers for a new output size.
    ///
    /// Returns `Ok(false)` when nothing changed: same clamped size, or a
    /// non-finite or non-positive request. A real resize drops queued tasks.
    /// On allocation failure the current buffers are kept and the frame is
    /// counted as dropped.
    pub fn resize(&mut self, width: f64, height: f64) -> Result<bool, ComposeError> {
        let (Some(w), Some(h)) = (self.config.clamp_dim(width), self.config.clamp_dim(height))
        else {
            debug!(width, height, "ignoring invalid resize");
            return Ok(false);
        };
        if (w, h) == self.size() {
            return Ok(false);
        }
        match Self::allocate(&self.config, w, h) {
            Ok((front, back)) => {
                self.front = front;
                self.back = back;
                self.front_bounds = None;
                self.queue.clear();
                self.throttle.reset();
                Ok(true)
            }
            Err(err) => {
                warn!(error = %err, "frame buffer resize failed; frame dropped");
                self.stats.dropped_frames += 1;
                self.metrics.inc("compose.dropped");
                Err(err)
            }
        }
    }

    /// Drops queued work and forgets which viewport the front buffer shows.
    pub fn cleanup(&mut self) {
        self.queue.clear();
        self.front_bounds = None;
        self.state = ComposerState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::{ComposerConfig, ComposerState, FrameComposer};
    use crate::raster::{ComposeError, Raster};
    use crate::surface::Surface;
    use foundation::{Rgba, Time, Viewport, ViewportBounds};
    use streaming::{Bitmap, ChunkKey, ChunkStore, LoadError, StoreConfig};

    const RED: Rgba = Rgba::opaque(200, 10, 10);

    fn bounds(x: f64, y: f64, zoom: f64) -> ViewportBounds {
        Viewport::new(x, y, zoom, 200.0, 150.0).bounds()
    }

    fn loaded_store() -> (ChunkStore, Vec<ChunkKey>) {
        let mut store = ChunkStore::new(StoreConfig {
            chunk_size: 64,
            map_width: 1024.0,
            map_height: 1024.0,
            ..StoreConfig::default()
        });
        let reqs = store.required_chunks(&bounds(0.0, 0.0, 1.0), Time::ZERO);
        for req in &reqs {
            let ticket = store.begin_load(req.key).unwrap();
            store.complete_load(ticket, Ok(Bitmap::uniform(64, RED)));
        }
        let visible = store.visible_keys(&bounds(0.0, 0.0, 1.0));
        (store, visible)
    }

    fn composer() -> FrameComposer {
        FrameComposer::new(ComposerConfig::default(), 200.0, 150.0).unwrap()
    }

    #[test]
    fn similar_viewports_replace_each_other() {
        let mut c = composer();
        c.queue_render(bounds(0.0, 0.0, 1.0), vec![], Time::ZERO);
        let second = c.queue_render(bounds(5.0, 5.0, 1.05), vec![], Time(0.001));
        assert_eq!(c.queue_len(), 1);
        assert_eq!(c.queued()[0].id, second);

        c.queue_render(bounds(500.0, 0.0, 1.0), vec![], Time(0.002));
        assert_eq!(c.queue_len(), 2);
    }

    #[test]
    fn queue_is_sorted_by_zoom_then_recency() {
        let mut c = composer();
        let low = c.queue_render(bounds(0.0, 0.0, 1.0), vec![], Time::ZERO);
        let high = c.queue_render(bounds(300.0, 0.0, 2.0), vec![], Time(0.001));
        let newer_low = c.queue_render(bounds(600.0, 0.0, 1.0), vec![], Time(0.002));
        let order: Vec<_> = c.queued().iter().map(|t| t.id).collect();
        assert_eq!(order, vec![high, newer_low, low]);
    }

    #[test]
    fn poll_composes_and_swaps() {
        let (store, visible) = loaded_store();
        let mut c = composer();
        let visible_len = visible.len();
        let id = c.queue_render(bounds(0.0, 0.0, 1.0), visible, Time::ZERO);

        assert_eq!(c.poll(Time::ZERO, &store), Some(id));
        assert_eq!(c.state(), ComposerState::Idle);
        assert_eq!(c.front().pixel(10, 10), Some(RED));
        assert_eq!(c.front_bounds(), Some(bounds(0.0, 0.0, 1.0)));
        assert_eq!(c.stats().frames_rendered, 1);
        assert_eq!(c.metrics().histogram("compose.render_us").map(|h| h.count), Some(1));
        assert_eq!(c.metrics().gauge("compose.blits"), Some(visible_len as i64));
        assert!(c.poll(Time(1.0), &store).is_none());
    }

    #[test]
    fn requests_inside_throttle_window_collapse() {
        let (store, visible) = loaded_store();
        let mut c = composer();
        c.queue_render(bounds(0.0, 0.0, 1.0), visible.clone(), Time::ZERO);
        c.poll(Time::ZERO, &store);

        c.queue_render(bounds(100.0, 0.0, 1.0), visible.clone(), Time::from_millis(2.0));
        let latest = c.queue_render(bounds(300.0, 40.0, 1.0), visible, Time::from_millis(8.0));
        assert!(c.poll(Time::from_millis(10.0), &store).is_none());

        assert_eq!(c.poll(Time::from_millis(20.0), &store), Some(latest));
        assert_eq!(c.queue_len(), 0);
        assert_eq!(c.stats().frames_rendered, 2);
        assert_eq!(c.front_bounds(), Some(bounds(300.0, 40.0, 1.0)));
    }

    #[test]
    fn zoom_out_inside_throttle_window_draws_latest() {
        let (store, visible) = loaded_store();
        let mut c = composer();
        c.queue_render(bounds(0.0, 0.0, 2.0), visible.clone(), Time::ZERO);
        c.poll(Time::ZERO, &store);

        c.queue_render(bounds(0.0, 0.0, 1.4), visible.clone(), Time::from_millis(3.0));
        let latest = c.queue_render(bounds(0.0, 0.0, 0.98), visible, Time::from_millis(6.0));
        // Higher zoom sorts first but is older.
        assert_eq!(c.queued()[0].bounds.zoom, 1.4);

        assert_eq!(c.poll(Time::from_millis(20.0), &store), Some(latest));
        assert_eq!(c.queue_len(), 0);
        assert_eq!(c.front_bounds(), Some(bounds(0.0, 0.0, 0.98)));
        assert!(c.poll(Time::from_millis(40.0), &store).is_none());
        assert_eq!(c.stats().frames_rendered, 2);
    }

    #[test]
    fn same_timestamp_requests_resolve_by_id() {
        let (store, visible) = loaded_store();
        let mut c = composer();
        c.queue_render(bounds(0.0, 0.0, 3.0), visible.clone(), Time::ZERO);
        let latest = c.queue_render(bounds(400.0, 0.0, 1.0), visible, Time::ZERO);
        assert_eq!(c.poll(Time::ZERO, &store), Some(latest));
        assert_eq!(c.queue_len(), 0);
    }

    #[test]
    fn unloaded_chunks_show_background() {
        let store = ChunkStore::new(StoreConfig::default());
        let mut c = composer();
        c.queue_render(bounds(0.0, 0.0, 1.0), vec![ChunkKey::new(0, 0, 2)], Time::ZERO);
        c.poll(Time::ZERO, &store);
        assert_eq!(c.front().pixel(0, 0), Some(Rgba::BACKGROUND));
    }

    #[test]
    fn failed_chunk_renders_fallback_gray() {
        let mut store = ChunkStore::new(StoreConfig::default());
        let b = bounds(0.0, 0.0, 1.0);
        store.required_chunks(&b, Time::ZERO);
        let key = ChunkKey::new(0, 0, 2);
        let ticket = store.begin_load(key).unwrap();
        store.complete_load(ticket, Err(LoadError::Failed("offline".into())));

        let mut c = composer();
        c.queue_render(b, store.visible_keys(&b), Time::ZERO);
        c.poll(Time::ZERO, &store);
        assert_eq!(c.front().pixel(50, 50), Some(Rgba::FALLBACK));
    }

    #[test]
    fn resize_clamps_and_clears_queue() {
        let mut c = composer();
        assert_eq!(c.resize(200.0, 150.0), Ok(false));
        assert_eq!(c.resize(f64::NAN, 10.0), Ok(false));
        assert_eq!(c.resize(0.0, 300.0), Ok(false));

        c.queue_render(bounds(0.0, 0.0, 1.0), vec![], Time::ZERO);
        assert_eq!(c.resize(50.0, 5000.0), Ok(true));
        assert_eq!(c.size(), (100, 2048));
        assert_eq!(c.queue_len(), 0);
    }

    #[test]
    fn allocation_failure_keeps_buffers_and_counts_drop() {
        let mut c = FrameComposer::new(
            ComposerConfig {
                memory_limit_bytes: 400 * 400 * 8,
                ..ComposerConfig::default()
            },
            200.0,
            150.0,
        )
        .unwrap();
        let err = c.resize(1000.0, 1000.0).unwrap_err();
        assert_eq!(
            err,
            ComposeError::Allocation {
                width: 1000,
                height: 1000
            }
        );
        assert_eq!(c.size(), (200, 150));
        assert_eq!(c.stats().dropped_frames, 1);
    }

    #[test]
    fn present_scales_front_to_surface() {
        let (store, visible) = loaded_store();
        let mut c = composer();
        c.queue_render(bounds(0.0, 0.0, 1.0), visible, Time::ZERO);
        c.poll(Time::ZERO, &store);

        let mut target = Raster::new(400, 300).unwrap();
        c.present(&mut target);
        assert_eq!(target.size(), (400, 300));
        assert_eq!(target.pixel(399, 299), Some(RED));
    }
}
