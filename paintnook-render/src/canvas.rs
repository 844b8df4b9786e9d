//! Software [`Surface`] over a [`PixelBuffer`].
//!
//! Every primitive is rasterized into a coverage mask first (analytic area
//! for rectangles, distance-based for round geometry), then composited in a
//! single pass so overlapping parts of one call are not double-blended.

use paintnook_core::Bounds;

use crate::buffer::{PixelBuffer, Rgba8};
use crate::surface::{LineCap, Paint, StrokeStyle, Surface};

/// RGBA8 canvas with coverage-based anti-aliasing.
#[derive(Clone, Debug, PartialEq)]
pub struct Canvas {
    buffer: PixelBuffer,
}

impl Canvas {
    /// Transparent canvas.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buffer: PixelBuffer::new(width, height),
        }
    }

    pub fn from_buffer(buffer: PixelBuffer) -> Self {
        Self { buffer }
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    pub fn into_buffer(self) -> PixelBuffer {
        self.buffer
    }

    pub fn pixel(&self, x: i64, y: i64) -> Option<Rgba8> {
        self.buffer.get(x, y)
    }

    pub fn clear(&mut self) {
        self.buffer.fill(Rgba8::TRANSPARENT);
    }

    fn mask(&self, x0: f64, y0: f64, x1: f64, y1: f64) -> Option<CoverageMask> {
        CoverageMask::new(self.buffer.width(), self.buffer.height(), x0, y0, x1, y1)
    }

    fn composite(&mut self, mask: CoverageMask, paint: &Paint) {
        let rgb = paint.rgb();
        for row in 0..mask.h {
            for col in 0..mask.w {
                let cov = mask.data[row * mask.w + col];
                if cov <= 0.0 {
                    continue;
                }
                let x = (mask.x0 + col) as i64;
                let y = (mask.y0 + row) as i64;
                if let Some(px) = self.buffer.get_mut(x, y) {
                    paint.op.apply(px, rgb, paint.effective_alpha(cov));
                }
            }
        }
    }
}

impl Surface for Canvas {
    fn width(&self) -> u32 {
        self.buffer.width()
    }

    fn height(&self) -> u32 {
        self.buffer.height()
    }

    fn fill_rect(&mut self, rect: Bounds, paint: &Paint) {
        let r = Rect::from(rect);
        let Some(mut mask) = self.mask(r.x0, r.y0, r.x1, r.y1) else {
            return;
        };
        mask.accumulate(r.x0, r.y0, r.x1, r.y1, |px, py| r.overlap(px, py));
        self.composite(mask, paint);
    }

    fn fill_circle(&mut self, cx: f64, cy: f64, radius: f64, paint: &Paint) {
        if !(radius > 0.0) {
            return;
        }
        let pad = radius + 1.0;
        let Some(mut mask) = self.mask(cx - pad, cy - pad, cx + pad, cy + pad) else {
            return;
        };
        mask.accumulate(cx - pad, cy - pad, cx + pad, cy + pad, |px, py| {
            let d = ((px + 0.5 - cx).powi(2) + (py + 0.5 - cy).powi(2)).sqrt();
            edge(radius - d)
        });
        self.composite(mask, paint);
    }

    fn stroke_polyline(&mut self, points: &[(f64, f64)], style: StrokeStyle, paint: &Paint) {
        if points.is_empty() || !(style.width > 0.0) {
            return;
        }
        let hw = style.width / 2.0;
        let pad = hw + 1.0;
        let (mut x0, mut y0, mut x1, mut y1) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for &(x, y) in points {
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x);
            y1 = y1.max(y);
        }
        let Some(mut mask) = self.mask(x0 - pad, y0 - pad, x1 + pad, y1 + pad) else {
            return;
        };

        if points.len() == 1 {
            if style.cap == LineCap::Round {
                let (cx, cy) = points[0];
                mask.accumulate(cx - pad, cy - pad, cx + pad, cy + pad, |px, py| {
                    let d = ((px + 0.5 - cx).powi(2) + (py + 0.5 - cy).powi(2)).sqrt();
                    edge(hw - d)
                });
            }
        } else {
            for seg in points.windows(2) {
                let (a, b) = (seg[0], seg[1]);
                mask.accumulate(
                    a.0.min(b.0) - pad,
                    a.1.min(b.1) - pad,
                    a.0.max(b.0) + pad,
                    a.1.max(b.1) + pad,
                    |px, py| segment_coverage(px + 0.5, py + 0.5, a, b, hw, style.cap),
                );
            }
        }
        self.composite(mask, paint);
    }

    fn stroke_rect(&mut self, rect: Bounds, width: f64, paint: &Paint) {
        if !(width > 0.0) {
            return;
        }
        let hw = width / 2.0;
        let r = Rect::from(rect);
        let outer = r.inflate(hw);
        let inner = r.inflate(-hw);
        let Some(mut mask) = self.mask(outer.x0, outer.y0, outer.x1, outer.y1) else {
            return;
        };
        mask.accumulate(outer.x0, outer.y0, outer.x1, outer.y1, |px, py| {
            outer.overlap(px, py) - inner.overlap(px, py)
        });
        self.composite(mask, paint);
    }

    fn fill_ellipse(&mut self, cx: f64, cy: f64, rx: f64, ry: f64, paint: &Paint) {
        if !(rx > 0.0 && ry > 0.0) {
            return;
        }
        let (x0, y0, x1, y1) = (cx - rx - 1.0, cy - ry - 1.0, cx + rx + 1.0, cy + ry + 1.0);
        let Some(mut mask) = self.mask(x0, y0, x1, y1) else {
            return;
        };
        mask.accumulate(x0, y0, x1, y1, |px, py| {
            edge(-ellipse_distance(px + 0.5, py + 0.5, cx, cy, rx, ry))
        });
        self.composite(mask, paint);
    }

    fn stroke_ellipse(&mut self, cx: f64, cy: f64, rx: f64, ry: f64, width: f64, paint: &Paint) {
        if !(rx > 0.0 && ry > 0.0 && width > 0.0) {
            return;
        }
        let hw = width / 2.0;
        let pad = hw + 1.0;
        let (x0, y0, x1, y1) = (cx - rx - pad, cy - ry - pad, cx + rx + pad, cy + ry + pad);
        let Some(mut mask) = self.mask(x0, y0, x1, y1) else {
            return;
        };
        mask.accumulate(x0, y0, x1, y1, |px, py| {
            edge(hw - ellipse_distance(px + 0.5, py + 0.5, cx, cy, rx, ry).abs())
        });
        self.composite(mask, paint);
    }

    fn pixels(&self) -> &PixelBuffer {
        &self.buffer
    }

    fn pixels_mut(&mut self) -> &mut PixelBuffer {
        &mut self.buffer
    }
}

// ---------------------------------------------------------------------------
// Coverage helpers
// ---------------------------------------------------------------------------

/// Per-pixel coverage over a clipped region of the canvas.
struct CoverageMask {
    x0: usize,
    y0: usize,
    w: usize,
    h: usize,
    data: Vec<f32>,
}

impl CoverageMask {
    fn new(width: u32, height: u32, x0: f64, y0: f64, x1: f64, y1: f64) -> Option<Self> {
        let (cx0, cy0, cx1, cy1) = clip(width, height, x0, y0, x1, y1)?;
        let (w, h) = (cx1 - cx0, cy1 - cy0);
        Some(Self {
            x0: cx0,
            y0: cy0,
            w,
            h,
            data: vec![0.0; w * h],
        })
    }

    /// Union `coverage(px, py)` (pixel's top-left corner) into the mask
    /// over the given region.
    fn accumulate(&mut self, x0: f64, y0: f64, x1: f64, y1: f64, coverage: impl Fn(f64, f64) -> f64) {
        let Some((cx0, cy0, cx1, cy1)) = clip(u32::MAX, u32::MAX, x0, y0, x1, y1) else {
            return;
        };
        let cx0 = cx0.max(self.x0);
        let cy0 = cy0.max(self.y0);
        let cx1 = cx1.min(self.x0 + self.w);
        let cy1 = cy1.min(self.y0 + self.h);
        for y in cy0..cy1 {
            for x in cx0..cx1 {
                let cov = coverage(x as f64, y as f64).clamp(0.0, 1.0) as f32;
                let slot = &mut self.data[(y - self.y0) * self.w + (x - self.x0)];
                if cov > *slot {
                    *slot = cov;
                }
            }
        }
    }
}

/// Pixel range `[x0, x1) × [y0, y1)` touched by a float region, clipped to
/// the canvas. `None` when empty.
fn clip(width: u32, height: u32, x0: f64, y0: f64, x1: f64, y1: f64) -> Option<(usize, usize, usize, usize)> {
    if !(x0.is_finite() && y0.is_finite() && x1.is_finite() && y1.is_finite()) {
        return None;
    }
    let cx0 = x0.floor().max(0.0) as usize;
    let cy0 = y0.floor().max(0.0) as usize;
    let cx1 = (x1.ceil().max(0.0) as usize).min(width as usize);
    let cy1 = (y1.ceil().max(0.0) as usize).min(height as usize);
    (cx0 < cx1 && cy0 < cy1).then_some((cx0, cy0, cx1, cy1))
}

/// Coverage of a pixel whose centre lies `signed` pixels inside an edge.
fn edge(signed: f64) -> f64 {
    (signed + 0.5).clamp(0.0, 1.0)
}

#[derive(Clone, Copy)]
struct Rect {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

impl From<Bounds> for Rect {
    fn from(b: Bounds) -> Self {
        Rect {
            x0: b.x.min(b.x + b.width),
            y0: b.y.min(b.y + b.height),
            x1: b.x.max(b.x + b.width),
            y1: b.y.max(b.y + b.height),
        }
    }
}

impl Rect {
    fn inflate(&self, d: f64) -> Rect {
        Rect {
            x0: self.x0 - d,
            y0: self.y0 - d,
            x1: self.x1 + d,
            y1: self.y1 + d,
        }
    }

    /// Area of the unit pixel at `(px, py)` inside this rect.
    fn overlap(&self, px: f64, py: f64) -> f64 {
        if self.x1 <= self.x0 || self.y1 <= self.y0 {
            return 0.0;
        }
        let w = (self.x1.min(px + 1.0) - self.x0.max(px)).max(0.0);
        let h = (self.y1.min(py + 1.0) - self.y0.max(py)).max(0.0);
        w * h
    }
}

fn segment_coverage(px: f64, py: f64, a: (f64, f64), b: (f64, f64), hw: f64, cap: LineCap) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len2 = dx * dx + dy * dy;
    let (ax, ay) = (px - a.0, py - a.1);
    if len2 == 0.0 {
        return match cap {
            LineCap::Round => edge(hw - (ax * ax + ay * ay).sqrt()),
            LineCap::Butt => 0.0,
        };
    }
    let t = (ax * dx + ay * dy) / len2;
    match cap {
        LineCap::Round => {
            let t = t.clamp(0.0, 1.0);
            let (qx, qy) = (ax - t * dx, ay - t * dy);
            edge(hw - (qx * qx + qy * qy).sqrt())
        }
        LineCap::Butt => {
            let len = len2.sqrt();
            let along = t * len;
            let perp = (ax * dy - ay * dx).abs() / len;
            edge(hw - perp) * edge(along).min(edge(len - along))
        }
    }
}

/// Approximate signed distance from `(px, py)` to the ellipse outline,
/// negative inside.
fn ellipse_distance(px: f64, py: f64, cx: f64, cy: f64, rx: f64, ry: f64) -> f64 {
    let (dx, dy) = (px - cx, py - cy);
    let f = (dx / rx).powi(2) + (dy / ry).powi(2) - 1.0;
    let gx = 2.0 * dx / (rx * rx);
    let gy = 2.0 * dy / (ry * ry);
    let g = (gx * gx + gy * gy).sqrt();
    if g < 1e-12 {
        return -rx.min(ry);
    }
    f / g
}
