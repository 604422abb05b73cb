use std::io::{self, Write};

use compose::{ComposeError, Raster, Surface};
use foundation::{ImageView, Rect, Rgba};

/// Off-screen display target backed by a `Raster`.
#[derive(Debug, Clone)]
pub struct MemorySurface {
    raster: Raster,
    presents: u64,
}

impl MemorySurface {
    pub fn new(width: u32, height: u32) -> Result<Self, ComposeError> {
        Ok(Self {
            raster: Raster::new(width, height)?,
            presents: 0,
        })
    }

    /// Frames presented so far; every present starts with one `clear`.
    pub fn presents(&self) -> u64 {
        self.presents
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        self.raster.pixel(x, y)
    }

    pub fn raster(&self) -> &Raster {
        &self.raster
    }

    /// Binary PPM (P6); alpha is dropped.
    pub fn write_ppm(&self, mut out: impl Write) -> io::Result<()> {
        write!(out, "P6\n{} {}\n255\n", self.raster.width(), self.raster.height())?;
        for px in self.raster.as_bytes().chunks_exact(4) {
            out.write_all(&px[..3])?;
        }
        out.flush()
    }
}

impl Surface for MemorySurface {
    fn size(&self) -> (u32, u32) {
        self.raster.size()
    }

    fn clear(&mut self, color: Rgba) {
        self.presents += 1;
        self.raster.clear(color);
    }

    fn blit(&mut self, image: ImageView<'_>, dst: Rect) {
        self.raster.blit(image, dst);
    }
}

#[cfg(test)]
mod tests {
    use super::MemorySurface;
    use compose::Surface;
    use foundation::Rgba;

    #[test]
    fn ppm_header_and_payload() {
        let mut s = MemorySurface::new(2, 1).unwrap();
        s.clear(Rgba::opaque(1, 2, 3));
        let mut buf = Vec::new();
        s.write_ppm(&mut buf).unwrap();
        assert_eq!(&buf[..11], b"P6\n2 1\n255\n");
        assert_eq!(&buf[11..], &[1, 2, 3, 1, 2, 3]);
        assert_eq!(s.presents(), 1);
    }
}
