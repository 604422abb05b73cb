use serde::Serialize;

/// Lifecycle of a chunk's bitmap.
///
/// Empty → Loading → Resident | Fallback. Invalidation returns a chunk to
/// Empty (or removes it); a failed load lands in Fallback and is only retried
/// once the chunk is invalidated or evicted and referenced again.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize)]
pub enum ChunkState {
    #[default]
    Empty,
    Loading,
    Resident,
    Fallback,
}

impl ChunkState {
    /// Whether a bitmap is available to draw.
    pub fn has_bitmap(self) -> bool {
        matches!(self, ChunkState::Resident | ChunkState::Fallback)
    }
}
