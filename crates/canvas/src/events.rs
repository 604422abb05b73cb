use foundation::Rgba;
use serde::{Deserialize, Serialize};

/// Authoritative update from the live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PixelEvent {
    #[serde(rename = "pixel_update")]
    Pixel {
        x: i64,
        y: i64,
        #[serde(with = "hex_color")]
        color: Rgba,
    },
    /// A whole native-resolution chunk changed server side.
    #[serde(rename = "tile_update")]
    TileStale { chunk_x: i64, chunk_y: i64 },
}

/// Optimistic local write handed to the networking layer.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelWrite {
    pub x: i64,
    pub y: i64,
    #[serde(with = "hex_color")]
    pub color: Rgba,
}

mod hex_color {
    use foundation::Rgba;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(color: &Rgba, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&color.to_hex())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Rgba, D::Error> {
        let text = String::deserialize(d)?;
        Rgba::from_hex(&text).map_err(serde::de::Error::custom)
    }
}
