use foundation::{ImageView, Rect, Rgba};

/// Something a finished frame can be drawn onto.
pub trait Surface {
    /// Width and height in pixels.
    fn size(&self) -> (u32, u32);

    fn clear(&mut self, color: Rgba);

    /// Nearest-neighbour copy of `image` into the screen rectangle `dst`.
    ///
    /// `dst` may be fractional and may extend past the surface; a destination
    /// pixel is written when its centre falls inside `dst`.
    fn blit(&mut self, image: ImageView<'_>, dst: Rect);
}
