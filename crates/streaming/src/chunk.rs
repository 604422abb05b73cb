use foundation::{ImageView, Rgba};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::residency::ChunkState;
use foundation::Time;

/// Side length of every chunk bitmap, in bitmap pixels.
pub const CHUNK_SIZE: u32 = 256;

/// Chunk grid coordinate at one level of detail.
///
/// Field order gives the derived ordering (`x`, then `y`, then `lod`), which
/// keeps store traversal deterministic.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ChunkKey {
    pub x: i64,
    pub y: i64,
    pub lod: u8,
}

impl ChunkKey {
    pub const fn new(x: i64, y: i64, lod: u8) -> Self {
        Self { x, y, lod }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.x, self.y, self.lod)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BitmapError {
    BadLength { expected: usize, got: usize },
}

impl fmt::Display for BitmapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BitmapError::BadLength { expected, got } => {
                write!(f, "bitmap has {got} bytes, expected {expected}")
            }
        }
    }
}

impl std::error::Error for BitmapError {}

/// Square RGBA8 pixel buffer, row-major.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    size: u32,
    data: Vec<u8>,
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("size", &self.size)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Bitmap {
    pub fn uniform(size: u32, color: Rgba) -> Self {
        let pixels = (size as usize) * (size as usize);
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&color.to_bytes());
        }
        Self { size, data }
    }

    /// Uniform `#404040ff` bitmap installed when a load fails.
    pub fn fallback(size: u32) -> Self {
        Self::uniform(size, Rgba::FALLBACK)
    }

    pub fn from_rgba(size: u32, data: Vec<u8>) -> Result<Self, BitmapError> {
        let expected = (size as usize) * (size as usize) * 4;
        if data.len() != expected {
            return Err(BitmapError::BadLength {
                expected,
                got: data.len(),
            });
        }
        Ok(Self { size, data })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            width: self.size,
            height: self.size,
            data: &self.data,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        self.view().pixel(x, y)
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: Rgba) -> bool {
        if x >= self.size || y >= self.size {
            return false;
        }
        let i = ((y as usize) * (self.size as usize) + (x as usize)) * 4;
        self.data[i..i + 4].copy_from_slice(&color.to_bytes());
        true
    }

    /// Fills the `side × side` block whose top-left corner is `(x, y)`,
    /// clipped to the bitmap.
    pub fn fill_block(&mut self, x: u32, y: u32, side: u32, color: Rgba) {
        let x_end = x.saturating_add(side).min(self.size);
        let y_end = y.saturating_add(side).min(self.size);
        for py in y..y_end {
            for px in x..x_end {
                self.set_pixel(px, py, color);
            }
        }
    }
}

/// One cache entry.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub key: ChunkKey,
    pub bitmap: Option<Bitmap>,
    pub state: ChunkState,
    pub last_accessed: Time,
    pub priority: f64,
    /// Generation of the most recent load started for this chunk.
    pub generation: u64,
}

impl Chunk {
    pub fn placeholder(key: ChunkKey, now: Time) -> Self {
        Self {
            key,
            bitmap: None,
            state: ChunkState::Empty,
            last_accessed: now,
            priority: 0.0,
            generation: 0,
        }
    }

    pub fn needs_load(&self) -> bool {
        self.state == ChunkState::Empty
    }

    pub fn is_loading(&self) -> bool {
        self.state == ChunkState::Loading
    }
}
