use foundation::{Rect, Rgba, ViewportBounds};
use streaming::{ChunkKey, ChunkStore};

use crate::raster::Raster;
use crate::surface::Surface;

/// Overlay options applied on top of the chunk layer.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Overlay {
    pub background: Rgba,
    /// Pixel grid drawn when zoom is strictly greater than this.
    pub grid_min_zoom: f64,
    pub grid_color: Rgba,
    pub chunk_borders: bool,
    pub border_color: Rgba,
}

impl Default for Overlay {
    fn default() -> Self {
        Self {
            background: Rgba::BACKGROUND,
            grid_min_zoom: 4.0,
            grid_color: Rgba::new(255, 255, 255, 25),
            chunk_borders: false,
            border_color: Rgba::new(255, 255, 255, 50),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum RenderCommand {
    Fill(Rgba),
    /// Draw the cached bitmap for `key` into the screen rectangle `dst`.
    Blit { key: ChunkKey, dst: Rect },
    GridLineX { x: i64, color: Rgba },
    GridLineY { y: i64, color: Rgba },
    Border { dst: Rect, color: Rgba },
}

#[derive(Debug, Default)]
pub struct RenderFrame {
    pub commands: Vec<RenderCommand>,
}

impl RenderFrame {
    pub fn blit_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, RenderCommand::Blit { .. }))
            .count()
    }
}

fn screen_rect(store: &ChunkStore, key: ChunkKey, bounds: &ViewportBounds) -> Rect {
    let world = store.chunk_rect(key);
    let z = bounds.zoom;
    Rect::from_origin_size(
        (world.min.x - bounds.min_x) * z,
        (world.min.y - bounds.min_y) * z,
        world.width() * z,
        world.height() * z,
    )
}

/// Builds the draw list for one frame.
///
/// Chunks without a bitmap are skipped so the background shows through;
/// chunks entirely outside `bounds` are culled.
pub fn collect(
    store: &ChunkStore,
    bounds: &ViewportBounds,
    chunks: &[ChunkKey],
    overlay: &Overlay,
    size: (u32, u32),
) -> RenderFrame {
    let mut frame = RenderFrame::default();
    frame.commands.push(RenderCommand::Fill(overlay.background));

    let view = bounds.rect();
    let mut drawn = Vec::new();
    for &key in chunks {
        if !store.chunk_rect(key).intersects(&view) {
            continue;
        }
        if store.peek(key).is_some_and(|c| c.bitmap.is_some()) {
            let dst = screen_rect(store, key, bounds);
            frame.commands.push(RenderCommand::Blit { key, dst });
            drawn.push(dst);
        }
    }

    if bounds.zoom > overlay.grid_min_zoom {
        let (w, h) = (size.0 as i64, size.1 as i64);
        for wx in bounds.min_x.floor() as i64..=bounds.max_x.floor() as i64 {
            let x = ((wx as f64 - bounds.min_x) * bounds.zoom).floor() as i64;
            if (0..w).contains(&x) {
                frame.commands.push(RenderCommand::GridLineX {
                    x,
                    color: overlay.grid_color,
                });
            }
        }
        for wy in bounds.min_y.floor() as i64..=bounds.max_y.floor() as i64 {
            let y = ((wy as f64 - bounds.min_y) * bounds.zoom).floor() as i64;
            if (0..h).contains(&y) {
                frame.commands.push(RenderCommand::GridLineY {
                    y,
                    color: overlay.grid_color,
                });
            }
        }
    }

    if overlay.chunk_borders {
        for dst in drawn {
            frame.commands.push(RenderCommand::Border {
                dst,
                color: overlay.border_color,
            });
        }
    }
    frame
}

/// Plays `frame` into `target`. Bitmaps are read from `store` at this point,
/// so pixel writes made after `collect` still show up.
pub fn execute(frame: &RenderFrame, store: &ChunkStore, target: &mut Raster) {
    for cmd in &frame.commands {
        match *cmd {
            RenderCommand::Fill(color) => target.clear(color),
            RenderCommand::Blit { key, dst } => {
                if let Some(bmp) = store.peek(key).and_then(|c| c.bitmap.as_ref()) {
                    target.blit(bmp.view(), dst);
                }
            }
            RenderCommand::GridLineX { x, color } => target.blend_vline(x, color),
            RenderCommand::GridLineY { y, color } => target.blend_hline(y, color),
            RenderCommand::Border { dst, color } => target.stroke_rect(
                dst.min.x.floor() as i64,
                dst.min.y.floor() as i64,
                dst.width().ceil() as i64,
                dst.height().ceil() as i64,
                color,
            ),
        }
    }
}
