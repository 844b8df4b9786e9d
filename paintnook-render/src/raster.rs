//! Integer raster algorithms shared by the pixel-art renderer and fills.
//!
//! - Lines (Bresenham, both endpoints, 8-connected)
//! - Ellipses (midpoint, two regions, outline or scan-filled)
//! - Flood fill (4-connected, stack-based, per-channel tolerance)
//! - Nearest palette color (linear scan, Euclidean RGB)
//!
//! Outputs are deterministic: the same inputs visit the same cells in the
//! same order on every participant.

use paintnook_core::Color;

use crate::buffer::{PixelBuffer, Rgba8};

// ═══════════════════════════════════════════════════════════════════════════
// Bresenham Line Algorithm
// ═══════════════════════════════════════════════════════════════════════════

/// Cells on the line from `(x0, y0)` to `(x1, y1)`, endpoints included.
///
/// Consecutive cells are 8-neighbours, so a stamped brush leaves no gaps.
#[derive(Debug, Clone)]
pub struct BresenhamLine {
    x: i64,
    y: i64,
    x1: i64,
    y1: i64,
    dx: i64,
    dy: i64,
    sx: i64,
    sy: i64,
    err: i64,
    done: bool,
}

impl BresenhamLine {
    pub fn new(x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
        let dx = (x1 - x0).abs();
        let dy = (y1 - y0).abs();
        Self {
            x: x0,
            y: y0,
            x1,
            y1,
            dx,
            dy,
            sx: if x0 < x1 { 1 } else { -1 },
            sy: if y0 < y1 { 1 } else { -1 },
            err: dx - dy,
            done: false,
        }
    }
}

impl Iterator for BresenhamLine {
    type Item = (i64, i64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let current = (self.x, self.y);
        if self.x == self.x1 && self.y == self.y1 {
            self.done = true;
            return Some(current);
        }
        let e2 = 2 * self.err;
        if e2 > -self.dy {
            self.err -= self.dy;
            self.x += self.sx;
        }
        if e2 < self.dx {
            self.err += self.dx;
            self.y += self.sy;
        }
        Some(current)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Midpoint Ellipse Algorithm
// ═══════════════════════════════════════════════════════════════════════════

/// Plot an axis-aligned ellipse centred at `(cx, cy)`.
///
/// Outline mode emits the four symmetric cells per step. Filled mode emits
/// the horizontal span `cx - x ..= cx + x` on rows `cy + y` and `cy - y`
/// (once when `y == 0`). Radii `<= 0` plot nothing. Cells may repeat.
pub fn midpoint_ellipse(cx: i64, cy: i64, rx: i64, ry: i64, filled: bool, mut plot: impl FnMut(i64, i64)) {
    if rx <= 0 || ry <= 0 {
        return;
    }

    let rx2 = rx * rx;
    let ry2 = ry * ry;
    let mut x: i64 = 0;
    let mut y: i64 = ry;
    let mut px: i64 = 0;
    let mut py: i64 = 2 * rx2 * y;

    let mut emit = |x: i64, y: i64| {
        if filled {
            for i in cx - x..=cx + x {
                plot(i, cy + y);
                if y != 0 {
                    plot(i, cy - y);
                }
            }
        } else {
            plot(cx + x, cy + y);
            plot(cx - x, cy + y);
            plot(cx + x, cy - y);
            plot(cx - x, cy - y);
        }
    };

    // Region 1: slope > -1
    let (rx2f, ry2f) = (rx2 as f64, ry2 as f64);
    let mut p = ry2f - rx2f * ry as f64 + 0.25 * rx2f;
    while px < py {
        emit(x, y);
        x += 1;
        px += 2 * ry2;
        if p < 0.0 {
            p += (ry2 + px) as f64;
        } else {
            y -= 1;
            py -= 2 * rx2;
            p += (ry2 + px - py) as f64;
        }
    }

    // Region 2
    let xf = x as f64 + 0.5;
    let yf = (y - 1) as f64;
    p = ry2f * xf * xf + rx2f * yf * yf - rx2f * ry2f;
    while y >= 0 {
        emit(x, y);
        y -= 1;
        py -= 2 * rx2;
        if p > 0.0 {
            p += (rx2 - py) as f64;
        } else {
            x += 1;
            px += 2 * ry2;
            p += (rx2 - py + px) as f64;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Flood Fill
// ═══════════════════════════════════════════════════════════════════════════

/// 4-connected flood fill from `(x, y)` with `fill`.
///
/// A pixel joins the region when every RGBA channel is within `tolerance`
/// of the start pixel. Pixels are overwritten, not blended. Returns the
/// number of pixels written; 0 when the start is outside the buffer or
/// already equals `fill`.
pub fn flood_fill(buffer: &mut PixelBuffer, x: i64, y: i64, fill: Rgba8, tolerance: u8) -> usize {
    let Some(start) = buffer.get(x, y) else {
        return 0;
    };
    if start == fill {
        return 0;
    }

    let width = buffer.width() as i64;
    let height = buffer.height() as i64;
    let pixels = buffer.pixels_mut();
    let mut visited = vec![false; pixels.len()];
    let mut stack = vec![(x, y)];
    let mut filled = 0;

    while let Some((x, y)) = stack.pop() {
        if x < 0 || x >= width || y < 0 || y >= height {
            continue;
        }
        let idx = (y * width + x) as usize;
        if visited[idx] || !pixels[idx].within(&start, tolerance) {
            continue;
        }
        visited[idx] = true;
        pixels[idx] = fill;
        filled += 1;
        stack.extend([(x + 1, y), (x - 1, y), (x, y + 1), (x, y - 1)]);
    }
    filled
}

/// Global (non-contiguous) fill: every pixel matching the start pixel within
/// `tolerance` is replaced, connected or not.
pub fn replace_matching(buffer: &mut PixelBuffer, x: i64, y: i64, fill: Rgba8, tolerance: u8) -> usize {
    let Some(start) = buffer.get(x, y) else {
        return 0;
    };
    if start == fill {
        return 0;
    }
    let mut replaced = 0;
    for px in buffer.pixels_mut() {
        if px.within(&start, tolerance) {
            *px = fill;
            replaced += 1;
        }
    }
    replaced
}

// ═══════════════════════════════════════════════════════════════════════════
// Palette
// ═══════════════════════════════════════════════════════════════════════════

/// Closest palette entry by Euclidean RGB distance; the first of equally
/// close entries wins. An empty palette returns `color` unchanged.
pub fn nearest_palette_color(color: Color, palette: &[Color]) -> Color {
    let mut best: Option<(u32, Color)> = None;
    for entry in palette {
        let d = color.distance_sq(entry);
        match best {
            Some((min, _)) if d >= min => {}
            _ => best = Some((d, *entry)),
        }
    }
    best.map_or(color, |(_, c)| c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn line(x0: i64, y0: i64, x1: i64, y1: i64) -> Vec<(i64, i64)> {
        BresenhamLine::new(x0, y0, x1, y1).collect()
    }

    #[test]
    fn test_bresenham_horizontal() {
        assert_eq!(line(0, 0, 3, 0), vec![(0, 0), (1, 0), (2, 0), (3, 0)]);
    }

    #[test]
    fn test_bresenham_single_point() {
        assert_eq!(line(5, 5, 5, 5), vec![(5, 5)]);
    }

    #[test]
    fn test_bresenham_diagonal_reverse() {
        assert_eq!(line(3, 3, 0, 0), vec![(3, 3), (2, 2), (1, 1), (0, 0)]);
    }

    #[test]
    fn test_bresenham_endpoints_and_connectivity() {
        for &(x0, y0, x1, y1) in &[(0, 0, 7, 3), (-4, 9, 6, -2), (2, 0, 3, 11), (10, 10, -10, 3)] {
            let pts = line(x0, y0, x1, y1);
            assert_eq!(pts.first(), Some(&(x0, y0)));
            assert_eq!(pts.last(), Some(&(x1, y1)));
            for w in pts.windows(2) {
                let (a, b) = (w[0], w[1]);
                assert!((a.0 - b.0).abs() <= 1 && (a.1 - b.1).abs() <= 1, "gap between {a:?} and {b:?}");
                assert_ne!(a, b);
            }
            let expected = (x1 - x0).abs().max((y1 - y0).abs()) + 1;
            assert_eq!(pts.len() as i64, expected);
        }
    }

    #[test]
    fn test_ellipse_outline_symmetric() {
        let mut cells = HashSet::new();
        midpoint_ellipse(10, 10, 6, 3, false, |x, y| {
            cells.insert((x, y));
        });
        assert!(cells.contains(&(16, 10)));
        assert!(cells.contains(&(4, 10)));
        assert!(cells.contains(&(10, 13)));
        assert!(cells.contains(&(10, 7)));
        for &(x, y) in &cells {
            assert!(cells.contains(&(20 - x, y)));
            assert!(cells.contains(&(x, 20 - y)));
        }
        assert!(!cells.contains(&(10, 10)));
    }

    #[test]
    fn test_ellipse_filled_covers_centre_rows() {
        let mut cells = HashSet::new();
        midpoint_ellipse(5, 5, 4, 2, true, |x, y| {
            cells.insert((x, y));
        });
        for x in 1..=9 {
            assert!(cells.contains(&(x, 5)), "missing ({x}, 5)");
        }
        assert!(cells.contains(&(5, 3)));
        assert!(cells.contains(&(5, 7)));
        assert!(!cells.contains(&(0, 5)));
    }

    #[test]
    fn test_ellipse_zero_radius() {
        let mut n = 0;
        midpoint_ellipse(0, 0, 0, 5, true, |_, _| n += 1);
        midpoint_ellipse(0, 0, 5, 0, false, |_, _| n += 1);
        assert_eq!(n, 0);
    }

    fn bordered() -> PixelBuffer {
        // 10x10 white with a black vertical wall at x = 5.
        let mut buf = PixelBuffer::new(10, 10);
        buf.fill(Rgba8::new(255, 255, 255, 255));
        for y in 0..10 {
            buf.set(5, y, Rgba8::new(0, 0, 0, 255));
        }
        buf
    }

    #[test]
    fn test_flood_fill_respects_boundary() {
        let mut buf = bordered();
        let red = Rgba8::new(255, 0, 0, 255);
        let n = flood_fill(&mut buf, 2, 2, red, 0);
        assert_eq!(n, 50);
        assert_eq!(buf.count(red), 50);
        assert_eq!(buf.get(5, 3), Some(Rgba8::new(0, 0, 0, 255)));
        assert_eq!(buf.get(7, 3), Some(Rgba8::new(255, 255, 255, 255)));
    }

    #[test]
    fn test_flood_fill_same_color_noop() {
        let mut buf = bordered();
        let before = buf.clone();
        assert_eq!(flood_fill(&mut buf, 2, 2, Rgba8::new(255, 255, 255, 255), 0), 0);
        assert_eq!(buf, before);
    }

    #[test]
    fn test_flood_fill_out_of_bounds() {
        let mut buf = bordered();
        assert_eq!(flood_fill(&mut buf, -1, 0, Rgba8::TRANSPARENT, 0), 0);
        assert_eq!(flood_fill(&mut buf, 10, 0, Rgba8::TRANSPARENT, 0), 0);
    }

    #[test]
    fn test_flood_fill_tolerance() {
        let mut buf = PixelBuffer::new(3, 1);
        buf.set(0, 0, Rgba8::new(100, 100, 100, 255));
        buf.set(1, 0, Rgba8::new(105, 100, 100, 255));
        buf.set(2, 0, Rgba8::new(120, 100, 100, 255));
        let fill = Rgba8::new(0, 0, 255, 255);
        assert_eq!(flood_fill(&mut buf, 0, 0, fill, 5), 2);
        assert_eq!(buf.get(2, 0), Some(Rgba8::new(120, 100, 100, 255)));
    }

    #[test]
    fn test_replace_matching_crosses_walls() {
        let mut buf = bordered();
        let red = Rgba8::new(255, 0, 0, 255);
        assert_eq!(replace_matching(&mut buf, 2, 2, red, 0), 90);
        assert_eq!(buf.get(7, 3), Some(red));
        assert_eq!(buf.get(5, 3), Some(Rgba8::new(0, 0, 0, 255)));
    }

    #[test]
    fn test_nearest_palette_color() {
        let palette = [Color::rgb(0, 0, 0), Color::rgb(255, 0, 0), Color::rgb(255, 255, 255)];
        assert_eq!(nearest_palette_color(Color::rgb(200, 30, 20), &palette), Color::rgb(255, 0, 0));
        assert_eq!(nearest_palette_color(Color::rgb(40, 40, 40), &palette), Color::BLACK);
        assert_eq!(nearest_palette_color(Color::rgb(1, 2, 3), &[]), Color::rgb(1, 2, 3));
    }

    #[test]
    fn test_nearest_palette_first_minimum_wins() {
        let palette = [Color::rgb(0, 0, 10), Color::rgb(0, 0, 30)];
        assert_eq!(nearest_palette_color(Color::rgb(0, 0, 20), &palette), Color::rgb(0, 0, 10));
    }
}
