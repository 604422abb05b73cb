//! Camera state for a flat pixel map and the screen <-> world transform.
//!
//! World space is measured in canvas pixels with the origin at the top-left
//! corner of the map. Screen space is measured in surface pixels with the
//! origin at the top-left of the drawable. `zoom` is screen pixels per world
//! pixel.

use serde::{Deserialize, Serialize};

use crate::bounds::Rect;
use crate::math::Vec2;

/// Static limits the camera is clamped against.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportLimits {
    pub map_width: f64,
    pub map_height: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
    /// Zoom change per unit of wheel delta.
    pub zoom_sensitivity: f64,
}

impl Default for ViewportLimits {
    fn default() -> Self {
        Self {
            map_width: 16384.0,
            map_height: 16384.0,
            min_zoom: 0.125,
            max_zoom: 16.0,
            zoom_sensitivity: 0.001,
        }
    }
}

impl ViewportLimits {
    pub fn map_rect(&self) -> Rect {
        Rect::from_origin_size(0.0, 0.0, self.map_width, self.map_height)
    }

    /// Smallest zoom at which a `width x height` screen still fits inside the map.
    fn zoom_floor(&self, width: f64, height: f64) -> f64 {
        let fit = (width / self.map_width).max(height / self.map_height);
        self.min_zoom.max(fit).min(self.max_zoom)
    }
}

/// Camera state: world-space top-left anchor, scale factor, screen size.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 8192.0,
            y: 8192.0,
            zoom: 1.0,
            width: 800.0,
            height: 600.0,
        }
    }
}

impl Viewport {
    pub fn new(x: f64, y: f64, zoom: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            zoom,
            width,
            height,
        }
    }

    pub fn screen_to_world(&self, screen: Vec2) -> Vec2 {
        Vec2::new(self.x + screen.x / self.zoom, self.y + screen.y / self.zoom)
    }

    pub fn world_to_screen(&self, world: Vec2) -> Vec2 {
        Vec2::new(
            (world.x - self.x) * self.zoom,
            (world.y - self.y) * self.zoom,
        )
    }

    /// Visible world rectangle.
    pub fn visible_rect(&self) -> Rect {
        Rect::from_origin_size(
            self.x,
            self.y,
            self.width / self.zoom,
            self.height / self.zoom,
        )
    }

    pub fn bounds(&self) -> ViewportBounds {
        ViewportBounds {
            min_x: self.x,
            min_y: self.y,
            max_x: self.x + self.width / self.zoom,
            max_y: self.y + self.height / self.zoom,
            zoom: self.zoom,
        }
    }
}

/// World-space rectangle plus the raw zoom it was derived from.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewportBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub zoom: f64,
}

impl ViewportBounds {
    pub fn rect(&self) -> Rect {
        Rect::new(
            Vec2::new(self.min_x, self.min_y),
            Vec2::new(self.max_x, self.max_y),
        )
    }

    pub fn center(&self) -> Vec2 {
        self.rect().center()
    }

    pub fn is_finite(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y, self.zoom]
            .iter()
            .all(|v| v.is_finite())
    }

    /// Same region grown by `margin` world pixels on every side.
    pub fn expanded(&self, margin: f64) -> Self {
        Self {
            min_x: self.min_x - margin,
            min_y: self.min_y - margin,
            max_x: self.max_x + margin,
            max_y: self.max_y + margin,
            zoom: self.zoom,
        }
    }
}

/// Partial viewport update; `None` fields keep their current value.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewportPatch {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub zoom: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

impl ViewportPatch {
    pub fn position(x: f64, y: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Self::default()
        }
    }

    pub fn size(width: f64, height: f64) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Self::default()
        }
    }

    pub fn zoom(zoom: f64) -> Self {
        Self {
            zoom: Some(zoom),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewportError {
    NonFinite { field: &'static str, value: f64 },
    NonPositiveSize { width: f64, height: f64 },
}

impl std::fmt::Display for ViewportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewportError::NonFinite { field, value } => {
                write!(f, "viewport field `{field}` is not finite: {value}")
            }
            ViewportError::NonPositiveSize { width, height } => {
                write!(f, "viewport size must be positive: {width}x{height}")
            }
        }
    }
}

impl std::error::Error for ViewportError {}

/// Clamped camera. Every mutation leaves `zoom` inside the limits and the
/// visible rectangle inside the map.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    viewport: Viewport,
    limits: ViewportLimits,
}

impl Camera {
    pub fn new(limits: ViewportLimits, initial: Viewport) -> Self {
        let mut camera = Self {
            viewport: Viewport::new(0.0, 0.0, limits.min_zoom, 1.0, 1.0),
            limits,
        };
        if camera.set_viewport(patch_from(initial)).is_err() {
            let fallback = Viewport::default();
            let _ = camera.set_viewport(patch_from(fallback));
        }
        camera
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn limits(&self) -> ViewportLimits {
        self.limits
    }

    pub fn bounds(&self) -> ViewportBounds {
        self.viewport.bounds()
    }

    /// Merges `patch`, clamps zoom and then position.
    ///
    /// Non-finite input leaves the camera untouched. Returns whether the
    /// clamped viewport differs from the previous one.
    pub fn set_viewport(&mut self, patch: ViewportPatch) -> Result<bool, ViewportError> {
        let fields = [
            ("x", patch.x),
            ("y", patch.y),
            ("zoom", patch.zoom),
            ("width", patch.width),
            ("height", patch.height),
        ];
        for (field, value) in fields {
            if let Some(value) = value
                && !value.is_finite()
            {
                return Err(ViewportError::NonFinite { field, value });
            }
        }

        let mut next = self.viewport;
        next.x = patch.x.unwrap_or(next.x);
        next.y = patch.y.unwrap_or(next.y);
        next.zoom = patch.zoom.unwrap_or(next.zoom);
        next.width = patch.width.unwrap_or(next.width);
        next.height = patch.height.unwrap_or(next.height);

        if next.width <= 0.0 || next.height <= 0.0 {
            return Err(ViewportError::NonPositiveSize {
                width: next.width,
                height: next.height,
            });
        }

        let floor = self.limits.zoom_floor(next.width, next.height);
        next.zoom = next.zoom.clamp(floor, self.limits.max_zoom);

        let max_x = (self.limits.map_width - next.width / next.zoom).max(0.0);
        let max_y = (self.limits.map_height - next.height / next.zoom).max(0.0);
        next.x = next.x.clamp(0.0, max_x);
        next.y = next.y.clamp(0.0, max_y);

        let changed = next != self.viewport;
        self.viewport = next;
        Ok(changed)
    }

    pub fn screen_to_world(&self, screen: Vec2) -> Vec2 {
        self.viewport.screen_to_world(screen)
    }

    pub fn world_to_screen(&self, world: Vec2) -> Vec2 {
        self.viewport.world_to_screen(world)
    }

    /// Sets a new zoom while keeping the world point under `anchor` fixed on screen.
    pub fn zoom_about(&mut self, zoom: f64, anchor: Vec2) -> Result<bool, ViewportError> {
        if !zoom.is_finite() {
            return Err(ViewportError::NonFinite {
                field: "zoom",
                value: zoom,
            });
        }
        if !anchor.is_finite() {
            return Err(ViewportError::NonFinite {
                field: "anchor",
                value: if anchor.x.is_finite() { anchor.y } else { anchor.x },
            });
        }

        let floor = self
            .limits
            .zoom_floor(self.viewport.width, self.viewport.height);
        let zoom = zoom.clamp(floor, self.limits.max_zoom);
        let world = self.screen_to_world(anchor);
        self.set_viewport(ViewportPatch {
            x: Some(world.x - anchor.x / zoom),
            y: Some(world.y - anchor.y / zoom),
            zoom: Some(zoom),
            ..ViewportPatch::default()
        })
    }

    /// Drags the map by a pointer movement of `delta` screen pixels; content follows the pointer.
    pub fn pan(&mut self, delta: Vec2) -> Result<bool, ViewportError> {
        if !delta.is_finite() {
            return Err(ViewportError::NonFinite {
                field: "pan",
                value: if delta.x.is_finite() { delta.y } else { delta.x },
            });
        }
        let zoom = self.viewport.zoom;
        self.set_viewport(ViewportPatch::position(
            self.viewport.x - delta.x / zoom,
            self.viewport.y - delta.y / zoom,
        ))
    }

    /// Mouse wheel: negative `delta_y` (scroll up) zooms in about `anchor`.
    pub fn wheel(&mut self, delta_y: f64, anchor: Vec2) -> Result<bool, ViewportError> {
        if !delta_y.is_finite() {
            return Err(ViewportError::NonFinite {
                field: "wheel",
                value: delta_y,
            });
        }
        let factor = (1.0 - delta_y * self.limits.zoom_sensitivity).max(0.01);
        self.zoom_about(self.viewport.zoom * factor, anchor)
    }

    /// Two-finger pinch: zoom scales with the ratio of finger distances.
    pub fn pinch(
        &mut self,
        previous_distance: f64,
        distance: f64,
        anchor: Vec2,
    ) -> Result<bool, ViewportError> {
        if !(previous_distance > 0.0 && distance > 0.0) {
            return Ok(false);
        }
        let scale = distance / previous_distance;
        self.zoom_about(self.viewport.zoom * scale, anchor)
    }

    /// Double-click: doubles zoom and centers the clicked world point.
    pub fn double_click(&mut self, anchor: Vec2) -> Result<bool, ViewportError> {
        let world = self.screen_to_world(anchor);
        if !world.is_finite() {
            return Err(ViewportError::NonFinite {
                field: "anchor",
                value: f64::NAN,
            });
        }
        let zoom = (self.viewport.zoom * 2.0).min(self.limits.max_zoom);
        self.set_viewport(ViewportPatch {
            x: Some(world.x - self.viewport.width / (2.0 * zoom)),
            y: Some(world.y - self.viewport.height / (2.0 * zoom)),
            zoom: Some(zoom),
            ..ViewportPatch::default()
        })
    }

    pub fn contains_world(&self, world: Vec2) -> bool {
        self.limits.map_rect().contains(world)
    }

    /// World pixel under a click, or `None` outside the map.
    pub fn click(&self, screen: Vec2) -> Option<(i64, i64)> {
        let world = self.screen_to_world(screen);
        if !world.is_finite() || !self.contains_world(world) {
            return None;
        }
        Some((world.x.floor() as i64, world.y.floor() as i64))
    }
}

fn patch_from(v: Viewport) -> ViewportPatch {
    ViewportPatch {
        x: Some(v.x),
        y: Some(v.y),
        zoom: Some(v.zoom),
        width: Some(v.width),
        height: Some(v.height),
    }
}
