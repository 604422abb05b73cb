use std::sync::Arc;

use compose::{ComposeError, FrameComposer, Raster, Surface};
use foundation::{Camera, Rgba, Time, Vec2, Viewport, ViewportBounds, ViewportError, ViewportPatch};
use runtime::{FpsMeter, Frame, Job, Metrics, PerformanceCounters, Scheduler};
use serde::Serialize;
use streaming::{
    ChunkKey, ChunkRequest, ChunkSource, ChunkStore, DrainSummary, NATIVE_LOD, PreloadGate,
    PriorityLoader, chunk_world_size, lod_for_zoom,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::CanvasConfig;
use crate::events::{PixelEvent, PixelWrite};

const SWEEP_JOB: &str = "chunk-sweep";

/// What one `tick` did.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub frame: u64,
    pub loads_applied: usize,
    pub loads_started: usize,
    pub evicted: usize,
    pub preloaded: bool,
    pub composed: bool,
}

/// Pixel canvas client core.
///
/// Owns the camera, chunk store, loader, composer and pacing state. Every
/// method runs in the owner's context and returns without waiting; chunk
/// loads finish on tokio tasks and are folded in by `tick`.
pub struct CanvasMap {
    config: CanvasConfig,
    camera: Camera,
    store: ChunkStore,
    loader: PriorityLoader,
    composer: FrameComposer,
    preload: PreloadGate,
    scheduler: Scheduler,
    fps: FpsMeter,
    metrics: Metrics,
    required: Vec<ChunkRequest>,
    visible: Vec<ChunkKey>,
    outbox: Option<mpsc::UnboundedSender<PixelWrite>>,
    frame: Option<Frame>,
    now: Time,
    shut_down: bool,
}

impl std::fmt::Debug for CanvasMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanvasMap")
            .field("viewport", &self.camera.viewport())
            .field("chunks", &self.store.len())
            .field("loader", &self.loader)
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

impl CanvasMap {
    pub fn new(
        config: CanvasConfig,
        source: Arc<dyn ChunkSource>,
        runtime: Handle,
        now: Time,
    ) -> Result<Self, ComposeError> {
        let camera = Camera::new(config.limits, config.initial_viewport);
        let viewport = camera.viewport();
        let composer =
            FrameComposer::new(config.composer.clone(), viewport.width, viewport.height)?;
        let mut scheduler = Scheduler::new();
        scheduler.add_job(Job::every(SWEEP_JOB, config.sweep_interval_ms), now);

        let mut map = Self {
            camera,
            store: ChunkStore::new(config.store.clone()),
            loader: PriorityLoader::new(source, config.loader.clone(), runtime),
            composer,
            preload: PreloadGate::new(config.preload.clone()),
            scheduler,
            fps: FpsMeter::new(),
            metrics: Metrics::new(),
            required: Vec::new(),
            visible: Vec::new(),
            outbox: None,
            frame: None,
            now,
            shut_down: false,
            config,
        };
        map.viewport_changed();
        Ok(map)
    }

    /// Forwards every successful `place_pixel` to `outbox`.
    pub fn with_outbox(mut self, outbox: mpsc::UnboundedSender<PixelWrite>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    pub fn config(&self) -> &CanvasConfig {
        &self.config
    }

    pub fn viewport(&self) -> Viewport {
        self.camera.viewport()
    }

    pub fn bounds(&self) -> ViewportBounds {
        self.camera.bounds()
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn loader(&self) -> &PriorityLoader {
        &self.loader
    }

    pub fn composer(&self) -> &FrameComposer {
        &self.composer
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Chunks intersecting the current viewport.
    pub fn visible_chunks(&self) -> &[ChunkKey] {
        &self.visible
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn set_viewport(&mut self, patch: ViewportPatch) -> Result<bool, ViewportError> {
        let changed = self.camera.set_viewport(patch)?;
        self.after_gesture(changed);
        Ok(changed)
    }

    /// Drag by a screen-space delta.
    pub fn pan(&mut self, dx: f64, dy: f64) -> Result<bool, ViewportError> {
        let changed = self.camera.pan(Vec2::new(dx, dy))?;
        self.after_gesture(changed);
        Ok(changed)
    }

    pub fn wheel(&mut self, delta_y: f64, sx: f64, sy: f64) -> Result<bool, ViewportError> {
        let changed = self.camera.wheel(delta_y, Vec2::new(sx, sy))?;
        self.after_gesture(changed);
        Ok(changed)
    }

    pub fn pinch(
        &mut self,
        prev_distance: f64,
        distance: f64,
        sx: f64,
        sy: f64,
    ) -> Result<bool, ViewportError> {
        let changed = self
            .camera
            .pinch(prev_distance, distance, Vec2::new(sx, sy))?;
        self.after_gesture(changed);
        Ok(changed)
    }

    pub fn double_click(&mut self, sx: f64, sy: f64) -> Result<bool, ViewportError> {
        let changed = self.camera.double_click(Vec2::new(sx, sy))?;
        self.after_gesture(changed);
        Ok(changed)
    }

    /// World pixel under a screen point, if it lies on the map.
    pub fn click(&self, sx: f64, sy: f64) -> Option<(i64, i64)> {
        self.camera.click(Vec2::new(sx, sy))
    }

    /// Resizes the screen. Buffer allocation failures are logged and counted
    /// by the composer; the viewport still changes.
    pub fn resize(&mut self, width: f64, height: f64) -> Result<bool, ViewportError> {
        let changed = self.camera.set_viewport(ViewportPatch::size(width, height))?;
        if changed {
            let _ = self.composer.resize(width, height);
        }
        self.after_gesture(changed);
        Ok(changed)
    }

    pub fn set_chunk_borders(&mut self, on: bool) {
        self.composer.set_chunk_borders(on);
        self.request_render();
    }

    fn after_gesture(&mut self, changed: bool) {
        if changed {
            self.viewport_changed();
        }
    }

    fn viewport_changed(&mut self) {
        if self.shut_down {
            return;
        }
        self.refresh_required();
        self.preload.arm(self.camera.bounds(), self.now);
        self.request_render();
    }

    fn refresh_required(&mut self) {
        let bounds = self.camera.bounds();
        self.required = self.store.required_chunks(&bounds, self.now);
        self.visible = self.store.visible_keys(&bounds);
        self.loader.schedule(&self.store, &self.required);
    }

    // Tasks carry the last tick time; between ticks the composer's task ids
    // order gestures, so the last request queued is the one drawn.
    fn request_render(&mut self) {
        if self.shut_down {
            return;
        }
        self.composer
            .queue_render(self.camera.bounds(), self.visible.clone(), self.now);
    }

    fn render_if_visible(&mut self, x: i64, y: i64) {
        let pixel = Vec2::new(x as f64 + 0.5, y as f64 + 0.5);
        if self.camera.bounds().rect().contains(pixel) {
            self.request_render();
        }
    }

    /// Optimistic local write.
    ///
    /// Updates every cached bitmap covering the pixel and forwards the write
    /// to the outbox. `None` for pixels off the map.
    pub fn place_pixel(&mut self, x: i64, y: i64, color: Rgba) -> Option<PixelWrite> {
        if self.shut_down || !self.on_map(x, y) {
            return None;
        }
        self.store.update_pixel(x, y, color);
        self.metrics.inc("canvas.pixels_placed");
        self.render_if_visible(x, y);

        let write = PixelWrite { x, y, color };
        if let Some(tx) = &self.outbox
            && tx.send(write).is_err()
        {
            debug!("pixel outbox closed; dropping forwarder");
            self.outbox = None;
        }
        Some(write)
    }

    /// `place_pixel` with a `#rrggbb[aa]` color. Malformed colors are ignored.
    pub fn place_pixel_hex(&mut self, x: i64, y: i64, hex: &str) -> Option<PixelWrite> {
        match Rgba::from_hex(hex) {
            Ok(color) => self.place_pixel(x, y, color),
            Err(err) => {
                debug!(error = %err, hex, "ignoring pixel with bad color");
                None
            }
        }
    }

    fn on_map(&self, x: i64, y: i64) -> bool {
        let limits = self.camera.limits();
        x >= 0 && y >= 0 && (x as f64) < limits.map_width && (y as f64) < limits.map_height
    }

    /// Applies an authoritative update. Returns the number of chunks touched.
    pub fn apply_remote(&mut self, event: PixelEvent) -> usize {
        if self.shut_down {
            return 0;
        }
        self.metrics.inc("canvas.remote_events");
        match event {
            PixelEvent::Pixel { x, y, color } => {
                let n = self.store.update_pixel(x, y, color);
                self.render_if_visible(x, y);
                n
            }
            PixelEvent::TileStale { chunk_x, chunk_y } => {
                let side = chunk_world_size(self.config.store.chunk_size, NATIVE_LOD) as i64;
                let n = self
                    .store
                    .invalidate_region(chunk_x * side, chunk_y * side, side, side);
                self.refresh_required();
                self.request_render();
                n
            }
        }
    }

    /// Drops the chunk(s) covering world pixel `(x, y)` and queues reloads.
    pub fn invalidate(&mut self, x: i64, y: i64, lod: Option<u8>) -> usize {
        if self.shut_down {
            return 0;
        }
        let n = self.store.invalidate_chunk(x, y, lod);
        if n > 0 {
            self.refresh_required();
            self.request_render();
        }
        n
    }

    /// One pass of the client loop. Never waits.
    ///
    /// Folds in finished loads, runs the periodic sweep and the preload gate,
    /// starts queued loads and dispatches a composition if one is due.
    pub fn tick(&mut self, now: Time) -> TickReport {
        if self.shut_down {
            return TickReport::default();
        }
        self.now = now;
        let frame = match self.frame {
            Some(prev) => prev.next(now),
            None => Frame::first(now),
        };
        self.frame = Some(frame);
        let mut report = TickReport {
            frame: frame.index,
            ..TickReport::default()
        };

        let drained = self.loader.drain(&mut self.store);
        report.loads_applied = drained.installed + drained.fallback;
        if report.loads_applied > 0 {
            self.request_render();
        }

        for job in self.scheduler.poll(now) {
            if job == SWEEP_JOB {
                report.evicted += self.sweep(now);
            }
        }

        if let Some(bounds) = self.preload.poll(now) {
            let ring = self.store.world_size(lod_for_zoom(bounds.zoom))
                * self.config.store.preload_distance as f64;
            self.required = self.store.required_chunks(&bounds.expanded(ring), now);
            report.preloaded = true;
            debug!(chunks = self.required.len(), "preload pass");
        }

        self.loader.schedule(&self.store, &self.required);
        report.loads_started = self.loader.pump(&mut self.store);

        if self.composer.poll(now, &self.store).is_some() {
            self.fps.record(now);
            report.composed = true;
        }
        report
    }

    fn sweep(&mut self, now: Time) -> usize {
        // Re-touch what is on screen so a still viewport keeps its chunks.
        let bounds = self.camera.bounds();
        self.required = self.store.required_chunks(&bounds, now);
        let mut evicted = self.store.sweep(now).len();
        if self.store.len() > self.config.store.cache_limit {
            // Fast panning keeps everything fresh; cap the cache anyway.
            evicted += self.store.sweep_forced(now).len();
        }
        if evicted > 0 {
            self.metrics.inc_counter("canvas.evicted", evicted as u64);
            info!(evicted, cached = self.store.len(), "evicted chunks");
        }
        evicted
    }

    /// Waits for in-flight loads, then keeps loading until every chunk the
    /// current viewport needs has a bitmap.
    pub async fn load_all(&mut self) -> DrainSummary {
        let mut total = DrainSummary::default();
        loop {
            self.loader.schedule(&self.store, &self.required);
            let step = self.loader.run_until_idle(&mut self.store).await;
            total.installed += step.installed;
            total.fallback += step.fallback;
            total.discarded += step.discarded;
            if step.total() == 0 && self.loader.is_idle() {
                break;
            }
        }
        if total.total() > 0 {
            self.request_render();
        }
        total
    }

    pub fn performance(&self) -> PerformanceCounters {
        let stats = self.composer.stats();
        PerformanceCounters {
            fps: self.fps.fps(self.now),
            frame_time_ms: self.fps.last_frame_ms(),
            chunks_loaded: self.store.loaded_count(),
            chunks_visible: self.visible.len(),
            loads_in_flight: self.loader.in_flight_count(),
            memory_bytes: self.store.memory_bytes(),
            frames_rendered: stats.frames_rendered,
            dropped_frames: stats.dropped_frames,
            average_render_ms: stats.average_render_ms,
        }
    }

    /// Last completed frame.
    pub fn front_frame(&self) -> &Raster {
        self.composer.front()
    }

    pub fn present(&self, surface: &mut dyn Surface) {
        self.composer.present(surface);
    }

    /// Aborts in-flight loads and drops all queued work. Idempotent.
    pub fn shutdown(&mut self) -> usize {
        if self.shut_down {
            return 0;
        }
        let aborted = self.loader.shutdown(&mut self.store);
        self.composer.cleanup();
        self.preload.reset();
        self.required.clear();
        self.outbox = None;
        self.shut_down = true;
        info!(aborted, cached = self.store.len(), "canvas shut down");
        aborted
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::CanvasMap;
    use crate::config::CanvasConfig;
    use crate::events::{PixelEvent, PixelWrite};
    use foundation::{Rgba, Time, Viewport, ViewportPatch};
    use streaming::{ChunkState, ProceduralSource};
    use tokio::runtime::Handle;
    use tokio::sync::mpsc;

    fn small_config() -> CanvasConfig {
        let mut config = CanvasConfig::default();
        config.limits.map_width = 1024.0;
        config.limits.map_height = 1024.0;
        config.limits.min_zoom = 0.25;
        config.store.chunk_size = 32;
        config.store.map_width = 1024.0;
        config.store.map_height = 1024.0;
        config.initial_viewport = Viewport::new(0.0, 0.0, 1.0, 120.0, 100.0);
        config
    }

    fn map(src: &Arc<ProceduralSource>) -> CanvasMap {
        CanvasMap::new(small_config(), src.clone(), Handle::current(), Time::ZERO).unwrap()
    }

    #[tokio::test]
    async fn construction_schedules_visible_chunks() {
        let src = Arc::new(ProceduralSource::new(1));
        let map = map(&src);
        // 120×100 at zoom 1 with 32px chunks: 4×4 visible.
        assert_eq!(map.visible_chunks().len(), 16);
        assert_eq!(map.loader().queued_count(), 20);
        assert_eq!(map.composer().queue_len(), 1);
    }

    #[tokio::test]
    async fn tick_loads_then_composes() {
        let src = Arc::new(ProceduralSource::new(2));
        let mut map = map(&src);

        let first = map.tick(Time::ZERO);
        assert_eq!(first.loads_started, 6);
        assert!(first.composed);

        map.load_all().await;
        let report = map.tick(Time(1.0));
        assert!(report.composed);
        assert_eq!(map.performance().chunks_visible, 16);
        let key = map.visible_chunks()[0];
        assert_eq!(map.store().state(key), Some(ChunkState::Resident));
        assert_ne!(map.front_frame().pixel(5, 5), Some(Rgba::BACKGROUND));
    }

    #[tokio::test]
    async fn place_pixel_shows_up_and_is_forwarded() {
        let src = Arc::new(ProceduralSource::new(3));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut map = map(&src).with_outbox(tx);
        map.load_all().await;

        let pink = Rgba::opaque(255, 0, 200);
        let write = map.place_pixel(10, 12, pink).unwrap();
        assert_eq!(rx.try_recv().unwrap(), PixelWrite { x: 10, y: 12, color: pink });
        assert_eq!(write.color, pink);
        assert!(map.place_pixel(-1, 0, pink).is_none());
        assert!(map.place_pixel_hex(1, 1, "#nothex").is_none());

        map.tick(Time(1.0));
        assert_eq!(map.front_frame().pixel(10, 12), Some(pink));
        assert_eq!(map.metrics().counter("canvas.pixels_placed"), 1);
    }

    #[tokio::test]
    async fn remote_events_update_and_invalidate() {
        let src = Arc::new(ProceduralSource::new(4));
        let mut map = map(&src);
        map.load_all().await;

        let n = map.apply_remote(PixelEvent::Pixel {
            x: 40,
            y: 40,
            color: Rgba::opaque(0, 0, 0),
        });
        assert_eq!(n, 1);

        let before = src.fetch_count(streaming::ChunkKey::new(1, 1, 2));
        map.apply_remote(PixelEvent::TileStale {
            chunk_x: 0,
            chunk_y: 0,
        });
        map.load_all().await;
        // Native chunk (0,0) spans 32 world px at this chunk size.
        assert_eq!(src.fetch_count(streaming::ChunkKey::new(0, 0, 2)), 2);
        assert_eq!(src.fetch_count(streaming::ChunkKey::new(1, 1, 2)), before);
    }

    #[tokio::test]
    async fn invalid_viewport_is_rejected_and_kept() {
        let src = Arc::new(ProceduralSource::new(5));
        let mut map = map(&src);
        let before = map.viewport();
        assert!(map.set_viewport(ViewportPatch::zoom(f64::NAN)).is_err());
        assert_eq!(map.viewport(), before);
        // Dragging left moves the camera right.
        assert!(map.pan(-50.0, 0.0).unwrap());
        assert_eq!(map.viewport().x, 50.0);
        map.pan(1000.0, 0.0).unwrap();
        assert_eq!(map.viewport().x, 0.0);
    }

    #[tokio::test]
    async fn zoom_out_between_ticks_draws_latest_viewport() {
        let src = Arc::new(ProceduralSource::new(7));
        let mut config = small_config();
        config.initial_viewport = Viewport::new(0.0, 0.0, 2.0, 120.0, 100.0);
        let mut map = CanvasMap::new(config, src.clone(), Handle::current(), Time::ZERO).unwrap();
        assert!(map.tick(Time::ZERO).composed);

        map.wheel(300.0, 60.0, 50.0).unwrap();
        map.wheel(300.0, 60.0, 50.0).unwrap();
        assert!(map.tick(Time(0.02)).composed);

        assert_eq!(map.composer().front_bounds(), Some(map.bounds()));
        assert_eq!(map.composer().queue_len(), 0);
        assert_eq!(map.composer().stats().frames_rendered, 2);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_stops_work() {
        let src = Arc::new(ProceduralSource::new(6));
        let mut map = map(&src);
        map.tick(Time::ZERO);
        assert_eq!(map.shutdown(), 6);
        assert_eq!(map.shutdown(), 0);
        assert!(map.is_shut_down());
        assert_eq!(map.tick(Time(1.0)), super::TickReport::default());
        assert!(map.place_pixel(1, 1, Rgba::FALLBACK).is_none());
        assert_eq!(map.store().loading_count(), 0);
    }
}
