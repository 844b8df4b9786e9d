//! The drawing surface the render adapter paints onto.
//!
//! Mirrors the subset of a 2D canvas context the adapter needs. Geometry is
//! in canvas pixels; every primitive composites through a [`Paint`].

use paintnook_core::{Bounds, Color};

use crate::buffer::PixelBuffer;
use crate::composite::CompositeOp;

/// Color, global alpha and composite operation for one draw call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Paint {
    pub color: Color,
    /// Global alpha, multiplied with the color's own alpha.
    pub alpha: f32,
    pub op: CompositeOp,
}

impl Paint {
    pub fn solid(color: Color) -> Self {
        Self {
            color,
            alpha: 1.0,
            op: CompositeOp::SourceOver,
        }
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_op(mut self, op: CompositeOp) -> Self {
        self.op = op;
        self
    }

    /// Paint that removes destination alpha.
    pub fn eraser() -> Self {
        Self::solid(Color::BLACK).with_op(CompositeOp::DestinationOut)
    }

    /// Source alpha for a pixel with the given geometric coverage.
    pub fn effective_alpha(&self, coverage: f32) -> f32 {
        self.color.a * self.alpha * coverage
    }

    pub fn rgb(&self) -> [f32; 3] {
        [
            self.color.r as f32 / 255.0,
            self.color.g as f32 / 255.0,
            self.color.b as f32 / 255.0,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineCap {
    #[default]
    Butt,
    Round,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeStyle {
    pub width: f64,
    pub cap: LineCap,
}

impl StrokeStyle {
    pub fn new(width: f64, cap: LineCap) -> Self {
        Self { width, cap }
    }

    pub fn round(width: f64) -> Self {
        Self::new(width, LineCap::Round)
    }

    pub fn butt(width: f64) -> Self {
        Self::new(width, LineCap::Butt)
    }
}

/// Pixel surface consumed by [`RenderAdapter`](crate::RenderAdapter).
///
/// Each call is one composite pass: overlapping geometry inside a single
/// call is painted once, separate calls accumulate.
pub trait Surface {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn fill_rect(&mut self, rect: Bounds, paint: &Paint);

    /// Remove everything under `rect`.
    fn clear_rect(&mut self, rect: Bounds) {
        self.fill_rect(rect, &Paint::eraser());
    }

    fn fill_circle(&mut self, cx: f64, cy: f64, radius: f64, paint: &Paint);

    /// Stroke the open path through `points`. Joins are round when the cap
    /// is round.
    fn stroke_polyline(&mut self, points: &[(f64, f64)], style: StrokeStyle, paint: &Paint);

    /// Stroke a rectangle outline centred on its edges (mitred corners).
    fn stroke_rect(&mut self, rect: Bounds, width: f64, paint: &Paint);

    fn fill_ellipse(&mut self, cx: f64, cy: f64, rx: f64, ry: f64, paint: &Paint);

    fn stroke_ellipse(&mut self, cx: f64, cy: f64, rx: f64, ry: f64, width: f64, paint: &Paint);

    /// Raw image data, for algorithms that work per pixel (flood fill).
    fn pixels(&self) -> &PixelBuffer;

    fn pixels_mut(&mut self) -> &mut PixelBuffer;
}
