//! Zoom → level-of-detail buckets and the chunk grid at each level.

use foundation::Rect;

pub const LOD_COUNT: u8 = 5;

/// LOD at which one bitmap pixel covers exactly one world pixel.
pub const NATIVE_LOD: u8 = 2;

pub fn lod_for_zoom(zoom: f64) -> u8 {
    if zoom >= 4.0 {
        4
    } else if zoom >= 2.0 {
        3
    } else if zoom >= 1.0 {
        2
    } else if zoom >= 0.5 {
        1
    } else {
        0
    }
}

/// World-pixel side length covered by one chunk at `lod`.
pub fn chunk_world_size(chunk_size: u32, lod: u8) -> f64 {
    chunk_size as f64 * 2f64.powi(NATIVE_LOD as i32 - lod as i32)
}

/// Inclusive range of chunk coordinates.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChunkRange {
    pub min_x: i64,
    pub min_y: i64,
    pub max_x: i64,
    pub max_y: i64,
}

impl ChunkRange {
    /// Chunks overlapping `rect`, grown by `padding` chunks on every side.
    pub fn covering(rect: Rect, world_size: f64, padding: i64) -> Self {
        Self {
            min_x: (rect.min.x / world_size).floor() as i64 - padding,
            min_y: (rect.min.y / world_size).floor() as i64 - padding,
            max_x: (rect.max.x / world_size).floor() as i64 + padding,
            max_y: (rect.max.y / world_size).floor() as i64 + padding,
        }
    }

    /// Clips to the `[0, cols) × [0, rows)` grid. `None` when nothing remains.
    pub fn clip(self, cols: i64, rows: i64) -> Option<Self> {
        let clipped = Self {
            min_x: self.min_x.max(0),
            min_y: self.min_y.max(0),
            max_x: self.max_x.min(cols - 1),
            max_y: self.max_y.min(rows - 1),
        };
        (clipped.min_x <= clipped.max_x && clipped.min_y <= clipped.max_y).then_some(clipped)
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }

    /// Number of chunks in the range, saturating at `usize::MAX`.
    pub fn len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let cols = self.max_x.abs_diff(self.min_x).saturating_add(1);
        let rows = self.max_y.abs_diff(self.min_y).saturating_add(1);
        usize::try_from(cols.saturating_mul(rows)).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.max_x < self.min_x || self.max_y < self.min_y
    }
}

/// Number of chunk columns and rows needed to cover the map at `lod`.
pub fn grid_dims(map_width: f64, map_height: f64, chunk_size: u32, lod: u8) -> (i64, i64) {
    let ws = chunk_world_size(chunk_size, lod);
    (
        (map_width / ws).ceil() as i64,
        (map_height / ws).ceil() as i64,
    )
}
