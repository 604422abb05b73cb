use foundation::{ImageView, Rect, Rgba};

use crate::surface::Surface;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposeError {
    Allocation { width: u32, height: u32 },
}

impl std::fmt::Display for ComposeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComposeError::Allocation { width, height } => {
                write!(f, "cannot allocate {width}x{height} frame buffer")
            }
        }
    }
}

impl std::error::Error for ComposeError {}

/// Row-major RGBA8 frame buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl std::fmt::Debug for Raster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Raster")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl Raster {
    pub fn new(width: u32, height: u32) -> Result<Self, ComposeError> {
        let err = ComposeError::Allocation { width, height };
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| err.clone())?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| err)?;
        data.resize(len, 0);
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }

    fn index(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some(((y as usize) * (self.width as usize) + (x as usize)) * 4)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        self.view().pixel(x, y)
    }

    pub fn set_pixel(&mut self, x: i64, y: i64, color: Rgba) {
        if let Some(i) = self.index(x, y) {
            self.data[i..i + 4].copy_from_slice(&color.to_bytes());
        }
    }

    /// Alpha-blends `color` over the pixel; destination alpha is kept.
    pub fn blend_pixel(&mut self, x: i64, y: i64, color: Rgba) {
        if let Some(i) = self.index(x, y) {
            let dst = Rgba::new(
                self.data[i],
                self.data[i + 1],
                self.data[i + 2],
                self.data[i + 3],
            );
            self.data[i..i + 4].copy_from_slice(&color.blend_over(dst).to_bytes());
        }
    }

    pub fn blend_hline(&mut self, y: i64, color: Rgba) {
        for x in 0..self.width as i64 {
            self.blend_pixel(x, y, color);
        }
    }

    pub fn blend_vline(&mut self, x: i64, color: Rgba) {
        for y in 0..self.height as i64 {
            self.blend_pixel(x, y, color);
        }
    }

    /// One-pixel outline of `[x, x + w) × [y, y + h)`, clipped.
    pub fn stroke_rect(&mut self, x: i64, y: i64, w: i64, h: i64, color: Rgba) {
        if w <= 0 || h <= 0 {
            return;
        }
        for i in 0..w {
            self.blend_pixel(x + i, y, color);
            if h > 1 {
                self.blend_pixel(x + i, y + h - 1, color);
            }
        }
        for i in 1..h - 1 {
            self.blend_pixel(x, y + i, color);
            if w > 1 {
                self.blend_pixel(x + w - 1, y + i, color);
            }
        }
    }
}

impl Surface for Raster {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn clear(&mut self, color: Rgba) {
        let px = color.to_bytes();
        for chunk in self.data.chunks_exact_mut(4) {
            chunk.copy_from_slice(&px);
        }
    }

    fn blit(&mut self, image: ImageView<'_>, dst: Rect) {
        let (dw, dh) = (dst.width(), dst.height());
        if image.width == 0 || image.height == 0 || dw <= 0.0 || dh <= 0.0 {
            return;
        }
        let y0 = dst.min.y.floor().max(0.0) as i64;
        let y1 = dst.max.y.ceil().min(self.height as f64) as i64;
        let x0 = dst.min.x.floor().max(0.0) as i64;
        let x1 = dst.max.x.ceil().min(self.width as f64) as i64;
        let iw = image.width as usize;

        for py in y0..y1 {
            let cy = py as f64 + 0.5;
            if cy < dst.min.y || cy >= dst.max.y {
                continue;
            }
            let sy = (((cy - dst.min.y) / dh * image.height as f64) as u32).min(image.height - 1);
            for px in x0..x1 {
                let cx = px as f64 + 0.5;
                if cx < dst.min.x || cx >= dst.max.x {
                    continue;
                }
                let sx = (((cx - dst.min.x) / dw * image.width as f64) as u32).min(image.width - 1);
                let src = ((sy as usize) * iw + sx as usize) * 4;
                let out = ((py as usize) * (self.width as usize) + px as usize) * 4;
                self.data[out..out + 4].copy_from_slice(&image.data[src..src + 4]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ComposeError, Raster};
    use crate::surface::Surface;
    use foundation::{ImageView, Rect, Rgba};

    fn checker() -> Vec<u8> {
        // 2×2: red, green / blue, white.
        vec![
            255, 0, 0, 255, 0, 255, 0, 255, //
            0, 0, 255, 255, 255, 255, 255, 255,
        ]
    }

    #[test]
    fn nearest_neighbour_upscale() {
        let data = checker();
        let img = ImageView::new(2, 2, &data).unwrap();
        let mut r = Raster::new(4, 4).unwrap();
        r.blit(img, Rect::from_origin_size(0.0, 0.0, 4.0, 4.0));
        assert_eq!(r.pixel(1, 1), Some(Rgba::opaque(255, 0, 0)));
        assert_eq!(r.pixel(2, 1), Some(Rgba::opaque(0, 255, 0)));
        assert_eq!(r.pixel(1, 2), Some(Rgba::opaque(0, 0, 255)));
        assert_eq!(r.pixel(3, 3), Some(Rgba::opaque(255, 255, 255)));
    }

    #[test]
    fn blit_clips_to_buffer() {
        let data = checker();
        let img = ImageView::new(2, 2, &data).unwrap();
        let mut r = Raster::new(3, 3).unwrap();
        r.clear(Rgba::BACKGROUND);
        r.blit(img, Rect::from_origin_size(-2.0, -2.0, 4.0, 4.0));
        // Only the white quadrant lands on screen.
        assert_eq!(r.pixel(0, 0), Some(Rgba::opaque(255, 255, 255)));
        assert_eq!(r.pixel(1, 1), Some(Rgba::opaque(255, 255, 255)));
        assert_eq!(r.pixel(2, 2), Some(Rgba::BACKGROUND));
    }

    #[test]
    fn stroke_rect_outlines() {
        let mut r = Raster::new(5, 5).unwrap();
        r.clear(Rgba::opaque(0, 0, 0));
        r.stroke_rect(1, 1, 3, 3, Rgba::opaque(255, 255, 255));
        assert_eq!(r.pixel(1, 1), Some(Rgba::opaque(255, 255, 255)));
        assert_eq!(r.pixel(3, 2), Some(Rgba::opaque(255, 255, 255)));
        assert_eq!(r.pixel(2, 2), Some(Rgba::opaque(0, 0, 0)));
    }

    #[test]
    fn absurd_size_is_an_allocation_error() {
        assert_eq!(
            Raster::new(u32::MAX, u32::MAX).unwrap_err(),
            ComposeError::Allocation {
                width: u32::MAX,
                height: u32::MAX
            }
        );
    }
}
