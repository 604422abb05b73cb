use serde::{Deserialize, Serialize};

/// 8-bit RGBA color, stored in the same byte order as chunk bitmaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    /// Canvas background behind unloaded chunks.
    pub const BACKGROUND: Rgba = Rgba::opaque(0x0a, 0x0e, 0x27);
    /// Uniform fill for chunks whose load failed.
    pub const FALLBACK: Rgba = Rgba::opaque(64, 64, 64);
    pub const TRANSPARENT: Rgba = Rgba::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }

    pub fn to_bytes(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn from_bytes(b: [u8; 4]) -> Self {
        Self::new(b[0], b[1], b[2], b[3])
    }

    /// Parses `#rrggbb`, `rrggbb`, `#rrggbbaa` or `rrggbbaa`.
    pub fn from_hex(s: &str) -> Result<Self, ColorError> {
        let hex = s.strip_prefix('#').unwrap_or(s);
        if hex.len() != 6 && hex.len() != 8 {
            return Err(ColorError::BadLength(hex.len()));
        }
        if !hex.is_ascii() {
            return Err(ColorError::BadDigit);
        }
        let byte = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ColorError::BadDigit)
        };
        let a = if hex.len() == 8 { byte(6)? } else { 255 };
        Ok(Self::new(byte(0)?, byte(2)?, byte(4)?, a))
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
    }

    /// Source-over blend of `self` onto `dst`; the result stays opaque if `dst` was.
    pub fn blend_over(self, dst: Rgba) -> Rgba {
        let alpha = self.a as u32;
        let inv = 255 - alpha;
        let mix = |s: u8, d: u8| ((s as u32 * alpha + d as u32 * inv + 127) / 255) as u8;
        Rgba::new(mix(self.r, dst.r), mix(self.g, dst.g), mix(self.b, dst.b), dst.a)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorError {
    BadLength(usize),
    BadDigit,
}

impl std::fmt::Display for ColorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColorError::BadLength(len) => {
                write!(f, "hex color must have 6 or 8 digits, got {len}")
            }
            ColorError::BadDigit => write!(f, "hex color contains a non-hex digit"),
        }
    }
}

impl std::error::Error for ColorError {}

impl std::str::FromStr for Rgba {
    type Err = ColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rgba::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::{ColorError, Rgba};

    #[test]
    fn parses_hex_with_and_without_hash() {
        assert_eq!(Rgba::from_hex("#ff0000"), Ok(Rgba::opaque(255, 0, 0)));
        assert_eq!(Rgba::from_hex("00ff0080"), Ok(Rgba::new(0, 255, 0, 128)));
        assert_eq!(Rgba::from_hex("#0A0E27"), Ok(Rgba::BACKGROUND));
    }

    #[test]
    fn rejects_malformed_hex() {
        assert_eq!(Rgba::from_hex("#fff"), Err(ColorError::BadLength(3)));
        assert_eq!(Rgba::from_hex("#gg0000"), Err(ColorError::BadDigit));
        assert_eq!(Rgba::from_hex("#ф0000"), Err(ColorError::BadDigit));
    }

    #[test]
    fn blend_keeps_destination_alpha() {
        let grid = Rgba::new(255, 255, 255, 25);
        let out = grid.blend_over(Rgba::opaque(0, 0, 0));
        assert_eq!(out.a, 255);
        assert_eq!(out.r, 25);
        assert_eq!(Rgba::new(9, 9, 9, 0).blend_over(Rgba::FALLBACK), Rgba::FALLBACK);
    }
}
