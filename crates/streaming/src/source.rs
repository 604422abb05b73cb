use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use foundation::Rgba;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use crate::chunk::{Bitmap, ChunkKey};
use crate::lod::chunk_world_size;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    Aborted,
    Failed(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Aborted => write!(f, "load aborted"),
            LoadError::Failed(reason) => write!(f, "load failed: {reason}"),
        }
    }
}

impl std::error::Error for LoadError {}

/// Where chunk bitmaps come from.
///
/// The returned future must be `'static` so the loader can run it on its own
/// task; dropping it cancels the fetch.
pub trait ChunkSource: Send + Sync {
    fn fetch(&self, key: ChunkKey, chunk_size: u32) -> BoxFuture<'static, Result<Bitmap, LoadError>>;
}

/// Deterministic value-noise terrain.
///
/// Same seed and key always produce the same bitmap. Latency and per-chunk
/// failures can be injected for demos and tests.
#[derive(Debug)]
pub struct ProceduralSource {
    seed: u64,
    latency: Duration,
    failing: Mutex<BTreeSet<ChunkKey>>,
    fetches: Mutex<BTreeMap<ChunkKey, usize>>,
}

impl ProceduralSource {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            latency: Duration::ZERO,
            failing: Mutex::new(BTreeSet::new()),
            fetches: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every later fetch of `key` fails.
    pub fn fail_chunk(&self, key: ChunkKey) {
        self.failing.lock().insert(key);
    }

    pub fn heal_chunk(&self, key: ChunkKey) {
        self.failing.lock().remove(&key);
    }

    /// How many times `key` has been requested.
    pub fn fetch_count(&self, key: ChunkKey) -> usize {
        self.fetches.lock().get(&key).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().values().sum()
    }

    /// Renders the bitmap for `key` synchronously.
    pub fn render(&self, key: ChunkKey, chunk_size: u32) -> Bitmap {
        render_terrain(self.seed, key, chunk_size)
    }
}

impl ChunkSource for ProceduralSource {
    fn fetch(&self, key: ChunkKey, chunk_size: u32) -> BoxFuture<'static, Result<Bitmap, LoadError>> {
        *self.fetches.lock().entry(key).or_insert(0) += 1;
        let fails = self.failing.lock().contains(&key);
        let latency = self.latency;
        let seed = self.seed;

        async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if fails {
                return Err(LoadError::Failed(format!("chunk {key} unavailable")));
            }
            Ok(render_terrain(seed, key, chunk_size))
        }
        .boxed()
    }
}

fn render_terrain(seed: u64, key: ChunkKey, chunk_size: u32) -> Bitmap {
    let world_size = chunk_world_size(chunk_size, key.lod);
    let step = world_size / chunk_size as f64;
    let origin_x = key.x as f64 * world_size;
    let origin_y = key.y as f64 * world_size;

    let mut bmp = Bitmap::uniform(chunk_size, Rgba::TRANSPARENT);
    for by in 0..chunk_size {
        for bx in 0..chunk_size {
            // Sample the world pixel under the bitmap pixel centre.
            let wx = (origin_x + (bx as f64 + 0.5) * step).floor();
            let wy = (origin_y + (by as f64 + 0.5) * step).floor();
            bmp.set_pixel(bx, by, terrain_color(seed, wx, wy));
        }
    }
    bmp
}

fn terrain_color(seed: u64, wx: f64, wy: f64) -> Rgba {
    let h = fbm(seed, wx, wy);
    let detail = hash01(seed ^ 0x9e37, wx as i64, wy as i64);
    let shade = |c: u8| (c as f64 * (0.92 + detail * 0.16)).clamp(0.0, 255.0) as u8;

    let (r, g, b) = if h < 0.40 {
        (20, 48, 96)
    } else if h < 0.45 {
        (194, 178, 128)
    } else if h < 0.65 {
        (64, 124, 52)
    } else if h < 0.80 {
        (112, 100, 72)
    } else {
        (232, 232, 236)
    };
    Rgba::opaque(shade(r), shade(g), shade(b))
}

fn fbm(seed: u64, x: f64, y: f64) -> f64 {
    let mut total = 0.0;
    let mut amplitude = 0.5;
    let mut period = 1024.0;
    let mut norm = 0.0;
    for octave in 0..4u64 {
        total += value_noise(seed.wrapping_add(octave), x / period, y / period) * amplitude;
        norm += amplitude;
        amplitude *= 0.5;
        period /= 2.0;
    }
    total / norm
}

fn value_noise(seed: u64, x: f64, y: f64) -> f64 {
    let x0 = x.floor();
    let y0 = y.floor();
    let tx = smooth(x - x0);
    let ty = smooth(y - y0);
    let (ix, iy) = (x0 as i64, y0 as i64);

    let a = hash01(seed, ix, iy);
    let b = hash01(seed, ix + 1, iy);
    let c = hash01(seed, ix, iy + 1);
    let d = hash01(seed, ix + 1, iy + 1);

    let top = a + (b - a) * tx;
    let bottom = c + (d - c) * tx;
    top + (bottom - top) * ty
}

fn smooth(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}

// splitmix64 over the packed lattice coordinate.
fn hash01(seed: u64, x: i64, y: i64) -> f64 {
    let mut z = seed
        .wrapping_add((x as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15))
        .wrapping_add((y as u64).wrapping_mul(0xc2b2_ae3d_27d4_eb4f));
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^= z >> 31;
    (z >> 11) as f64 / (1u64 << 53) as f64
}
