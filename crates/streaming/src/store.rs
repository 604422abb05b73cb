use std::collections::BTreeMap;

use foundation::{Rgba, Time, Vec2, ViewportBounds};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chunk::{Bitmap, CHUNK_SIZE, Chunk, ChunkKey};
use crate::lod::{ChunkRange, LOD_COUNT, chunk_world_size, grid_dims, lod_for_zoom};
use crate::request::{ChunkRequest, LoadTicket};
use crate::residency::ChunkState;
use crate::source::LoadError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub chunk_size: u32,
    pub cache_limit: usize,
    /// Extra ring of chunks requested around the visible rectangle.
    pub preload_distance: i64,
    pub stale_after_ms: f64,
    /// Extra entries removed per sweep beyond the overflow.
    pub sweep_slack: usize,
    pub map_width: f64,
    pub map_height: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            cache_limit: 200,
            preload_distance: 2,
            stale_after_ms: 60_000.0,
            sweep_slack: 10,
            map_width: 16384.0,
            map_height: 16384.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    UnknownChunk(ChunkKey),
    NotLoadable { key: ChunkKey, state: ChunkState },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::UnknownChunk(key) => write!(f, "unknown chunk {key}"),
            StoreError::NotLoadable { key, state } => {
                write!(f, "chunk {key} cannot start a load from {state:?}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// What `complete_load` did with a result.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Installed,
    Fallback,
    /// Chunk was invalidated, evicted or reloaded since the ticket was issued.
    Discarded,
}

/// Owned cache of chunk bitmaps keyed by `(x, y, lod)`.
///
/// Notes on determinism:
/// - Entries live in a `BTreeMap` so traversal order is stable.
/// - Eviction walks oldest `last_accessed` first, ties broken by key.
/// - Load generations come from one store-wide counter, so a result can never
///   match a chunk that was removed and recreated after its load started.
#[derive(Debug)]
pub struct ChunkStore {
    config: StoreConfig,
    chunks: BTreeMap<ChunkKey, Chunk>,
    next_generation: u64,
}

impl ChunkStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            chunks: BTreeMap::new(),
            next_generation: 1,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn world_size(&self, lod: u8) -> f64 {
        chunk_world_size(self.config.chunk_size, lod)
    }

    /// World-space rectangle covered by `key`.
    pub fn chunk_rect(&self, key: ChunkKey) -> foundation::Rect {
        let ws = self.world_size(key.lod);
        foundation::Rect::from_origin_size(key.x as f64 * ws, key.y as f64 * ws, ws, ws)
    }

    fn grid_range(&self, bounds: &ViewportBounds, lod: u8, padding: i64) -> Option<ChunkRange> {
        let ws = self.world_size(lod);
        if !(ws.is_finite() && ws > 0.0) {
            return None;
        }
        let (cols, rows) = grid_dims(
            self.config.map_width,
            self.config.map_height,
            self.config.chunk_size,
            lod,
        );
        ChunkRange::covering(bounds.rect(), ws, padding).clip(cols, rows)
    }

    /// Keys intersecting `bounds` at its LOD, without padding or side effects.
    pub fn visible_keys(&self, bounds: &ViewportBounds) -> Vec<ChunkKey> {
        if !bounds.is_finite() {
            return Vec::new();
        }
        let lod = lod_for_zoom(bounds.zoom);
        let Some(range) = self.grid_range(bounds, lod, 0) else {
            return Vec::new();
        };
        let mut keys = Vec::with_capacity(range.len());
        for y in range.min_y..=range.max_y {
            for x in range.min_x..=range.max_x {
                keys.push(ChunkKey::new(x, y, lod));
            }
        }
        keys
    }

    /// Chunks needed to draw `bounds` plus the preload ring, highest priority
    /// first.
    ///
    /// Missing chunks get an Empty placeholder. Every returned chunk is
    /// touched and re-ranked by distance from the viewport centre.
    pub fn required_chunks(&mut self, bounds: &ViewportBounds, now: Time) -> Vec<ChunkRequest> {
        if !bounds.is_finite() {
            return Vec::new();
        }
        let lod = lod_for_zoom(bounds.zoom);
        let Some(range) = self.grid_range(bounds, lod, self.config.preload_distance) else {
            return Vec::new();
        };

        let center = bounds.center();
        let ws = self.world_size(lod);
        let mut out = Vec::with_capacity(range.len());
        for y in range.min_y..=range.max_y {
            for x in range.min_x..=range.max_x {
                let key = ChunkKey::new(x, y, lod);
                let chunk_center = Vec2::new((x as f64 + 0.5) * ws, (y as f64 + 0.5) * ws);
                let priority = (100.0 - chunk_center.distance(center) / 100.0).max(1.0);

                let chunk = self
                    .chunks
                    .entry(key)
                    .or_insert_with(|| Chunk::placeholder(key, now));
                chunk.last_accessed = now;
                chunk.priority = priority;
                out.push(ChunkRequest { key, priority });
            }
        }

        out.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then_with(|| a.key.cmp(&b.key))
        });
        out
    }

    /// Moves an Empty chunk to Loading under a fresh generation.
    pub fn begin_load(&mut self, key: ChunkKey) -> Result<LoadTicket, StoreError> {
        let chunk = self
            .chunks
            .get_mut(&key)
            .ok_or(StoreError::UnknownChunk(key))?;
        if chunk.state != ChunkState::Empty {
            return Err(StoreError::NotLoadable {
                key,
                state: chunk.state,
            });
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        chunk.state = ChunkState::Loading;
        chunk.generation = generation;
        Ok(LoadTicket { key, generation })
    }

    /// Applies a finished load.
    ///
    /// Results for a superseded generation are dropped; if the chunk is still
    /// marked Loading it returns to Empty so the next pass reloads it.
    /// Failures install the uniform fallback bitmap.
    pub fn complete_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<Bitmap, LoadError>,
    ) -> LoadOutcome {
        let size = self.config.chunk_size;
        let Some(chunk) = self.chunks.get_mut(&ticket.key) else {
            debug!(chunk = %ticket.key, "load finished for evicted chunk");
            return LoadOutcome::Discarded;
        };
        if chunk.generation != ticket.generation {
            if chunk.state == ChunkState::Loading {
                chunk.state = ChunkState::Empty;
            }
            debug!(
                chunk = %ticket.key,
                generation = ticket.generation,
                current = chunk.generation,
                "discarding superseded load"
            );
            return LoadOutcome::Discarded;
        }

        let result = result.and_then(|bmp| {
            if bmp.size() == size {
                Ok(bmp)
            } else {
                Err(LoadError::Failed(format!(
                    "bitmap is {}px, expected {size}px",
                    bmp.size()
                )))
            }
        });

        match result {
            Ok(bmp) => {
                chunk.bitmap = Some(bmp);
                chunk.state = ChunkState::Resident;
                LoadOutcome::Installed
            }
            Err(err) => {
                warn!(chunk = %ticket.key, error = %err, "chunk load failed; using fallback");
                chunk.bitmap = Some(Bitmap::fallback(size));
                chunk.state = ChunkState::Fallback;
                LoadOutcome::Fallback
            }
        }
    }

    /// Returns every Loading chunk to Empty. Used at teardown after the loader
    /// aborted its tasks.
    pub fn cancel_loading(&mut self) -> usize {
        let mut n = 0;
        for chunk in self.chunks.values_mut() {
            if chunk.state == ChunkState::Loading {
                chunk.state = ChunkState::Empty;
                chunk.generation = 0;
                n += 1;
            }
        }
        n
    }

    /// Periodic eviction honouring the staleness threshold.
    pub fn sweep(&mut self, now: Time) -> Vec<ChunkKey> {
        self.sweep_with(now, true)
    }

    /// Eviction that ignores staleness but still never drops loading chunks.
    pub fn sweep_forced(&mut self, now: Time) -> Vec<ChunkKey> {
        self.sweep_with(now, false)
    }

    fn sweep_with(&mut self, now: Time, respect_staleness: bool) -> Vec<ChunkKey> {
        let limit = self.config.cache_limit;
        if self.chunks.len() <= limit {
            return Vec::new();
        }
        let candidates = (self.chunks.len() - limit + self.config.sweep_slack).min(self.chunks.len());

        let mut by_age: Vec<(Time, ChunkKey)> = self
            .chunks
            .values()
            .map(|c| (c.last_accessed, c.key))
            .collect();
        by_age.sort_by(|(ta, ka), (tb, kb)| ta.0.total_cmp(&tb.0).then_with(|| ka.cmp(kb)));

        let stale_after = self.config.stale_after_ms;
        let mut evicted = Vec::new();
        for (last_accessed, key) in by_age.into_iter().take(candidates) {
            let Some(chunk) = self.chunks.get(&key) else {
                continue;
            };
            if chunk.is_loading() {
                continue;
            }
            if respect_staleness && now.millis_since(last_accessed) <= stale_after {
                continue;
            }
            self.chunks.remove(&key);
            evicted.push(key);
        }

        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), remaining = self.chunks.len(), "chunk sweep");
        }
        evicted
    }

    fn in_map(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as f64) < self.config.map_width && (y as f64) < self.config.map_height
    }

    fn key_at(&self, x: i64, y: i64, lod: u8) -> ChunkKey {
        let ws = self.world_size(lod);
        ChunkKey::new(
            (x as f64 / ws).floor() as i64,
            (y as f64 / ws).floor() as i64,
            lod,
        )
    }

    /// Drops the chunk(s) covering world pixel `(x, y)`: one LOD, or all of
    /// them when `lod` is `None`. Returns how many chunks were affected.
    pub fn invalidate_chunk(&mut self, x: i64, y: i64, lod: Option<u8>) -> usize {
        if !self.in_map(x, y) {
            return 0;
        }
        let keys: Vec<ChunkKey> = match lod {
            Some(lod) if lod < LOD_COUNT => vec![self.key_at(x, y, lod)],
            Some(_) => Vec::new(),
            None => (0..LOD_COUNT).map(|lod| self.key_at(x, y, lod)).collect(),
        };
        keys.into_iter().filter(|k| self.invalidate_key(*k)).count()
    }

    /// Invalidates every chunk, at every LOD, touched by the world rectangle.
    pub fn invalidate_region(&mut self, x: i64, y: i64, width: i64, height: i64) -> usize {
        if width <= 0 || height <= 0 {
            return 0;
        }
        let x0 = x.max(0);
        let y0 = y.max(0);
        let x1 = (x + width - 1).min(self.config.map_width as i64 - 1);
        let y1 = (y + height - 1).min(self.config.map_height as i64 - 1);
        if x0 > x1 || y0 > y1 {
            return 0;
        }

        let mut n = 0;
        for lod in 0..LOD_COUNT {
            let a = self.key_at(x0, y0, lod);
            let b = self.key_at(x1, y1, lod);
            for cy in a.y..=b.y {
                for cx in a.x..=b.x {
                    if self.invalidate_key(ChunkKey::new(cx, cy, lod)) {
                        n += 1;
                    }
                }
            }
        }
        n
    }

    fn invalidate_key(&mut self, key: ChunkKey) -> bool {
        let Some(chunk) = self.chunks.get_mut(&key) else {
            return false;
        };
        if chunk.is_loading() {
            // The in-flight result predates the invalidation; retire it.
            chunk.generation = self.next_generation;
            self.next_generation += 1;
        } else {
            self.chunks.remove(&key);
        }
        true
    }

    /// Writes `color` into every cached bitmap covering world pixel `(x, y)`.
    ///
    /// Returns the number of bitmaps written. Out-of-map writes are ignored.
    pub fn update_pixel(&mut self, x: i64, y: i64, color: Rgba) -> usize {
        if !self.in_map(x, y) {
            return 0;
        }
        let size = self.config.chunk_size;
        let mut written = 0;
        for lod in 0..LOD_COUNT {
            let ws = self.world_size(lod);
            let key = self.key_at(x, y, lod);
            let Some(bmp) = self.chunks.get_mut(&key).and_then(|c| c.bitmap.as_mut()) else {
                continue;
            };
            let scale = size as f64 / ws;
            let bx = ((x as f64 - key.x as f64 * ws) * scale).floor() as u32;
            let by = ((y as f64 - key.y as f64 * ws) * scale).floor() as u32;
            // Above the native LOD one world pixel spans a block of bitmap pixels.
            let side = (scale.floor() as u32).max(1);
            bmp.fill_block(bx, by, side, color);
            written += 1;
        }
        written
    }

    /// Looks up a chunk and marks it as used.
    pub fn get(&mut self, key: ChunkKey, now: Time) -> Option<&Chunk> {
        let chunk = self.chunks.get_mut(&key)?;
        chunk.last_accessed = now;
        Some(chunk)
    }

    pub fn peek(&self, key: ChunkKey) -> Option<&Chunk> {
        self.chunks.get(&key)
    }

    pub fn state(&self, key: ChunkKey) -> Option<ChunkState> {
        self.chunks.get(&key).map(|c| c.state)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn loading_count(&self) -> usize {
        self.chunks.values().filter(|c| c.is_loading()).count()
    }

    /// Chunks holding a drawable bitmap (resident or fallback).
    pub fn loaded_count(&self) -> usize {
        self.chunks.values().filter(|c| c.state.has_bitmap()).count()
    }

    pub fn memory_bytes(&self) -> usize {
        self.chunks
            .values()
            .filter_map(|c| c.bitmap.as_ref())
            .map(Bitmap::byte_len)
            .sum()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }
}
