use crate::chunk::ChunkKey;

/// Identifies one started load: the chunk plus the generation it was issued
/// under. A completion is only applied if its generation still matches the
/// chunk's.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoadTicket {
    pub key: ChunkKey,
    pub generation: u64,
}

/// Chunk plus its load priority, higher first.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ChunkRequest {
    pub key: ChunkKey,
    pub priority: f64,
}
