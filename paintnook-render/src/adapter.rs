//! View-mode aware rendering of UAF actions.
//!
//! The same normalized action paints differently per local view mode while
//! staying semantically equivalent:
//!
//! ```text
//!                  ┌──────────── digital ───── AA segments, pressure width
//!  Action ──denorm─┼──────────── pixel_art ─── grid snap, Bresenham, stamps
//!  (0..1 space)    └──────────── vector ────── quadratic Béziers
//! ```
//!
//! Coordinates are denormalized against the adapter's canvas size at call
//! time, never against the author's.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use paintnook_core::{
    Action, ActionPayload, Bounds, CanvasSize, Color, EraseData, FillData, Point, ShapeData,
    ShapeKind, StrokeData,
};
use serde::{Deserialize, Serialize};

use crate::buffer::{RenderError, Rgba8};
use crate::composite::CompositeOp;
use crate::raster::{self, BresenhamLine};
use crate::surface::{Paint, StrokeStyle, Surface};

/// Segments per quadratic curve when flattening vector strokes.
const CURVE_STEPS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    #[default]
    Digital,
    PixelArt,
    Vector,
}

impl ViewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::Digital => "digital",
            ViewMode::PixelArt => "pixel_art",
            ViewMode::Vector => "vector",
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewMode {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "digital" => Ok(ViewMode::Digital),
            "pixel_art" => Ok(ViewMode::PixelArt),
            "vector" => Ok(ViewMode::Vector),
            other => Err(RenderError::InvalidOption(format!("unknown view mode '{other}'"))),
        }
    }
}

/// Adapter options. Missing JSON fields take the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RenderOptions {
    /// Canvas pixels per art pixel.
    pub pixel_size: f64,
    /// Snap granularity in art pixels.
    pub grid_size: u32,
    pub snap_to_grid: bool,
    /// Pixel-art palette; entries are hex strings or `{r, g, b, a}`.
    pub palette: Option<Vec<Color>>,
    pub pressure_sensitivity: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            pixel_size: 1.0,
            grid_size: 1,
            snap_to_grid: true,
            palette: None,
            pressure_sensitivity: true,
        }
    }
}

impl RenderOptions {
    pub fn validate(&self) -> Result<(), RenderError> {
        if !(self.pixel_size.is_finite() && self.pixel_size > 0.0) {
            return Err(RenderError::InvalidOption(format!(
                "pixelSize must be positive, got {}",
                self.pixel_size
            )));
        }
        if self.grid_size == 0 {
            return Err(RenderError::InvalidOption("gridSize must be at least 1".into()));
        }
        Ok(())
    }
}

/// Partial option update for [`RenderAdapter::set_view_mode`].
///
/// `palette: Some(vec![])` removes the palette.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OptionsUpdate {
    pub pixel_size: Option<f64>,
    pub grid_size: Option<u32>,
    pub snap_to_grid: Option<bool>,
    pub palette: Option<Vec<Color>>,
    pub pressure_sensitivity: Option<bool>,
}

/// Whether a render call touched the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Painted,
    Skipped,
}

/// Renders actions for one participant's view.
#[derive(Debug, Clone)]
pub struct RenderAdapter {
    mode: ViewMode,
    size: CanvasSize,
    options: RenderOptions,
    /// Square brush footprints keyed by width in cells.
    stamp_cache: HashMap<u32, Arc<[(i64, i64)]>>,
}

impl RenderAdapter {
    pub fn new(mode: ViewMode, size: CanvasSize, options: RenderOptions) -> Result<Self, RenderError> {
        options.validate()?;
        Ok(Self {
            mode,
            size,
            options,
            stamp_cache: HashMap::new(),
        })
    }

    /// Adapter with default options.
    pub fn with_mode(mode: ViewMode, size: CanvasSize) -> Self {
        Self {
            mode,
            size,
            options: RenderOptions::default(),
            stamp_cache: HashMap::new(),
        }
    }

    pub fn view_mode(&self) -> ViewMode {
        self.mode
    }

    pub fn canvas_size(&self) -> CanvasSize {
        self.size
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Zero dimensions are coerced to 1.
    pub fn set_canvas_size(&mut self, width: u32, height: u32) {
        self.size = CanvasSize::new(width, height);
    }

    /// Switch mode and apply any provided option overrides.
    pub fn set_view_mode(&mut self, mode: ViewMode, update: OptionsUpdate) -> Result<(), RenderError> {
        let mut next = self.options.clone();
        if let Some(v) = update.pixel_size {
            next.pixel_size = v;
        }
        if let Some(v) = update.grid_size {
            next.grid_size = v;
        }
        if let Some(v) = update.snap_to_grid {
            next.snap_to_grid = v;
        }
        if let Some(v) = update.palette {
            next.palette = (!v.is_empty()).then_some(v);
        }
        if let Some(v) = update.pressure_sensitivity {
            next.pressure_sensitivity = v;
        }
        next.validate()?;
        self.mode = mode;
        self.options = next;
        Ok(())
    }

    pub fn clear_stamp_cache(&mut self) {
        self.stamp_cache.clear();
    }

    pub fn stamp_cache_len(&self) -> usize {
        self.stamp_cache.len()
    }

    /// Paint `action` onto `surface`.
    pub fn render(&mut self, surface: &mut dyn Surface, action: &Action) -> RenderOutcome {
        match action.payload.denormalized(self.size) {
            ActionPayload::Stroke(data) => self.render_stroke(surface, &data),
            ActionPayload::Shape(data) => self.render_shape(surface, &data),
            ActionPayload::Fill(data) => self.render_fill(surface, &data),
            ActionPayload::Erase(data) => self.render_erase(surface, &data),
            ActionPayload::Opaque { kind, .. } => {
                log::debug!("Not rendering {} action {}", kind, action.id);
                RenderOutcome::Skipped
            }
        }
    }

    // -----------------------------------------------------------------------
    // Strokes
    // -----------------------------------------------------------------------

    fn render_stroke(&mut self, surface: &mut dyn Surface, data: &StrokeData) -> RenderOutcome {
        if data.points.is_empty() {
            return RenderOutcome::Skipped;
        }
        match self.mode {
            ViewMode::Digital => self.render_digital_stroke(surface, data),
            ViewMode::PixelArt => self.render_pixel_stroke(surface, data),
            ViewMode::Vector => self.render_vector_stroke(surface, data),
        }
    }

    fn stroke_paint(&self, color: Color, data: &StrokeData) -> Paint {
        Paint::solid(color)
            .with_alpha(data.opacity as f32)
            .with_op(CompositeOp::from_name_lossy(&data.blend_mode))
    }

    fn render_digital_stroke(&self, surface: &mut dyn Surface, data: &StrokeData) -> RenderOutcome {
        let paint = self.stroke_paint(data.color, data);
        let brush = data.brush_size;

        if let [p] = data.points.as_slice() {
            let size = if self.options.pressure_sensitivity {
                brush * p.pressure
            } else {
                brush
            };
            surface.fill_circle(p.x, p.y, size / 2.0, &paint);
            return RenderOutcome::Painted;
        }

        for seg in data.points.windows(2) {
            let (prev, curr) = (&seg[0], &seg[1]);
            let pressure = if self.options.pressure_sensitivity {
                (prev.pressure + curr.pressure) / 2.0
            } else {
                1.0
            };
            surface.stroke_polyline(
                &[(prev.x, prev.y), (curr.x, curr.y)],
                StrokeStyle::round(brush * pressure),
                &paint,
            );
        }
        RenderOutcome::Painted
    }

    fn render_pixel_stroke(&mut self, surface: &mut dyn Surface, data: &StrokeData) -> RenderOutcome {
        let ps = self.options.pixel_size;
        let cells = js_round(data.brush_size / ps).max(1) as u32;
        let paint = self.stroke_paint(self.palette_color(data.color), data);
        let stamp = self.stamp(cells);
        let mut drawn = HashSet::new();

        for (cx, cy) in self.path_cells(&data.points) {
            for &(ox, oy) in stamp.iter() {
                let cell = (cx + ox, cy + oy);
                if drawn.insert(cell) {
                    surface.fill_rect(self.cell_rect(cell.0, cell.1, 1), &paint);
                }
            }
        }
        RenderOutcome::Painted
    }

    fn render_vector_stroke(&self, surface: &mut dyn Surface, data: &StrokeData) -> RenderOutcome {
        if data.points.len() < 2 {
            return self.render_digital_stroke(surface, data);
        }
        let paint = self.stroke_paint(data.color, data);
        let path = smooth_path(&data.points);
        surface.stroke_polyline(&path, StrokeStyle::round(data.brush_size), &paint);
        RenderOutcome::Painted
    }

    // -----------------------------------------------------------------------
    // Shapes
    // -----------------------------------------------------------------------

    fn render_shape(&self, surface: &mut dyn Surface, data: &ShapeData) -> RenderOutcome {
        let Some(kind) = data.kind() else {
            log::debug!("Skipping unsupported shape type '{}'", data.shape_type);
            return RenderOutcome::Skipped;
        };
        match self.mode {
            ViewMode::PixelArt => self.render_pixel_shape(surface, kind, data),
            ViewMode::Digital | ViewMode::Vector => self.render_digital_shape(surface, kind, data),
        }
    }

    fn render_digital_shape(&self, surface: &mut dyn Surface, kind: ShapeKind, data: &ShapeData) -> RenderOutcome {
        let b = data.bounds;
        let (cx, cy) = b.center();
        let (rx, ry) = (b.width.abs() / 2.0, b.height.abs() / 2.0);

        if let Some(fill) = data.fill {
            let paint = Paint::solid(fill);
            match kind {
                ShapeKind::Rectangle => surface.fill_rect(b, &paint),
                ShapeKind::Ellipse => surface.fill_ellipse(cx, cy, rx, ry, &paint),
                ShapeKind::Line | ShapeKind::Polygon => {}
            }
        }
        if let Some(stroke) = data.stroke {
            let paint = Paint::solid(stroke);
            match kind {
                ShapeKind::Line => surface.stroke_polyline(
                    &[(b.x, b.y), (b.x + b.width, b.y + b.height)],
                    StrokeStyle::butt(data.stroke_width),
                    &paint,
                ),
                ShapeKind::Rectangle => surface.stroke_rect(b, data.stroke_width, &paint),
                ShapeKind::Ellipse => surface.stroke_ellipse(cx, cy, rx, ry, data.stroke_width, &paint),
                ShapeKind::Polygon => {}
            }
        }
        if kind == ShapeKind::Polygon {
            log::debug!("Polygon shapes have no outline geometry; skipped");
            return RenderOutcome::Skipped;
        }
        RenderOutcome::Painted
    }

    fn render_pixel_shape(&self, surface: &mut dyn Surface, kind: ShapeKind, data: &ShapeData) -> RenderOutcome {
        let ps = self.options.pixel_size;
        let b = data.bounds;
        let ax = (b.x / ps).floor() as i64;
        let ay = (b.y / ps).floor() as i64;
        let bx = ((b.x + b.width) / ps).floor() as i64;
        let by = ((b.y + b.height) / ps).floor() as i64;
        let (x1, x2) = (ax.min(bx), ax.max(bx));
        let (y1, y2) = (ay.min(by), ay.max(by));

        let ecx = js_round((x1 + x2) as f64 / 2.0);
        let ecy = js_round((y1 + y2) as f64 / 2.0);
        let erx = js_round((x2 - x1) as f64 / 2.0);
        let ery = js_round((y2 - y1) as f64 / 2.0);

        let mut painted = false;

        if let Some(stroke) = data.stroke {
            let paint = Paint::solid(self.palette_color(stroke));
            let mut pass = CellPass::new(self, surface, &paint);
            match kind {
                ShapeKind::Line => {
                    for (x, y) in BresenhamLine::new(ax, ay, bx, by) {
                        pass.plot(
                            self.snap_to_pixel_grid(x as f64 * ps),
                            self.snap_to_pixel_grid(y as f64 * ps),
                        );
                    }
                }
                ShapeKind::Rectangle => {
                    for x in x1..=x2 {
                        pass.plot(x, y1);
                        pass.plot(x, y2);
                    }
                    for y in y1..=y2 {
                        pass.plot(x1, y);
                        pass.plot(x2, y);
                    }
                }
                ShapeKind::Ellipse => raster::midpoint_ellipse(ecx, ecy, erx, ery, false, |x, y| pass.plot(x, y)),
                ShapeKind::Polygon => {}
            }
            painted |= pass.count > 0;
        }

        // Fill after the outline; a filled ellipse covers its outline cells.
        if let (Some(fill), true) = (data.fill, data.filled) {
            let paint = Paint::solid(self.palette_color(fill));
            let mut pass = CellPass::new(self, surface, &paint);
            match kind {
                ShapeKind::Rectangle => {
                    for x in x1 + 1..x2 {
                        for y in y1 + 1..y2 {
                            pass.plot(x, y);
                        }
                    }
                }
                ShapeKind::Ellipse => raster::midpoint_ellipse(ecx, ecy, erx, ery, true, |x, y| pass.plot(x, y)),
                ShapeKind::Line | ShapeKind::Polygon => {}
            }
            painted |= pass.count > 0;
        }

        if painted {
            RenderOutcome::Painted
        } else {
            RenderOutcome::Skipped
        }
    }

    // -----------------------------------------------------------------------
    // Fill / erase
    // -----------------------------------------------------------------------

    fn render_fill(&self, surface: &mut dyn Surface, data: &FillData) -> RenderOutcome {
        let x = data.point.x.floor() as i64;
        let y = data.point.y.floor() as i64;
        let color = match self.mode {
            ViewMode::PixelArt => self.palette_color(data.color),
            _ => data.color,
        };
        let fill = Rgba8::from(color);
        let buffer = surface.pixels_mut();
        let changed = if data.contiguous {
            raster::flood_fill(buffer, x, y, fill, data.tolerance)
        } else {
            raster::replace_matching(buffer, x, y, fill, data.tolerance)
        };
        if changed > 0 {
            RenderOutcome::Painted
        } else {
            RenderOutcome::Skipped
        }
    }

    fn render_erase(&self, surface: &mut dyn Surface, data: &EraseData) -> RenderOutcome {
        if data.points.is_empty() {
            return RenderOutcome::Skipped;
        }
        let eraser = Paint::eraser();

        if self.mode == ViewMode::PixelArt {
            let n = js_round(data.size / self.options.pixel_size).max(1);
            let half = n.div_euclid(2);
            let mut cleared = HashSet::new();
            for (cx, cy) in self.path_cells(&data.points) {
                if cleared.insert((cx, cy)) {
                    surface.clear_rect(self.cell_rect(cx - half, cy - half, n));
                }
            }
            return RenderOutcome::Painted;
        }

        if let [p] = data.points.as_slice() {
            surface.fill_circle(p.x, p.y, data.size / 2.0, &eraser);
        } else {
            let path: Vec<(f64, f64)> = data.points.iter().map(|p| (p.x, p.y)).collect();
            surface.stroke_polyline(&path, StrokeStyle::round(data.size), &eraser);
        }
        RenderOutcome::Painted
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Canvas coordinate → grid cell.
    pub fn snap_to_pixel_grid(&self, value: f64) -> i64 {
        let ps = self.options.pixel_size;
        if !self.options.snap_to_grid {
            return js_round(value / ps);
        }
        let grid = self.options.grid_size as i64;
        js_round(value / ps / grid as f64) * grid
    }

    /// Nearest palette entry, or `color` when no palette is set.
    pub fn palette_color(&self, color: Color) -> Color {
        match &self.options.palette {
            Some(palette) if !palette.is_empty() => raster::nearest_palette_color(color, palette),
            _ => color,
        }
    }

    /// Snapped cells along the path; a lone point yields its own cell.
    fn path_cells(&self, points: &[Point]) -> Vec<(i64, i64)> {
        let snap = |p: &Point| (self.snap_to_pixel_grid(p.x), self.snap_to_pixel_grid(p.y));
        if let [p] = points {
            return vec![snap(p)];
        }
        points
            .windows(2)
            .flat_map(|seg| {
                let (a, b) = (snap(&seg[0]), snap(&seg[1]));
                BresenhamLine::new(a.0, a.1, b.0, b.1)
            })
            .collect()
    }

    fn stamp(&mut self, cells: u32) -> Arc<[(i64, i64)]> {
        self.stamp_cache
            .entry(cells)
            .or_insert_with(|| {
                let n = cells as i64;
                let half = n / 2;
                (0..n)
                    .flat_map(|bx| (0..n).map(move |by| (bx - half, by - half)))
                    .collect()
            })
            .clone()
    }

    fn cell_rect(&self, x: i64, y: i64, cells: i64) -> Bounds {
        let ps = self.options.pixel_size;
        Bounds::new(x as f64 * ps, y as f64 * ps, cells as f64 * ps, cells as f64 * ps)
    }
}

/// One deduplicated pass of single-cell fills.
struct CellPass<'a> {
    adapter: &'a RenderAdapter,
    surface: &'a mut dyn Surface,
    paint: &'a Paint,
    drawn: HashSet<(i64, i64)>,
    count: usize,
}

impl<'a> CellPass<'a> {
    fn new(adapter: &'a RenderAdapter, surface: &'a mut dyn Surface, paint: &'a Paint) -> Self {
        Self {
            adapter,
            surface,
            paint,
            drawn: HashSet::new(),
            count: 0,
        }
    }

    fn plot(&mut self, x: i64, y: i64) {
        if self.drawn.insert((x, y)) {
            self.surface.fill_rect(self.adapter.cell_rect(x, y, 1), self.paint);
            self.count += 1;
        }
    }
}

/// `Math.round` semantics: halves round towards +∞.
fn js_round(v: f64) -> i64 {
    (v + 0.5).floor() as i64
}

/// Quadratic curves through consecutive midpoints, closed with a straight
/// segment to the last point, flattened to a polyline.
fn smooth_path(points: &[Point]) -> Vec<(f64, f64)> {
    let mut path = vec![(points[0].x, points[0].y)];
    let mut current = path[0];
    for i in 1..points.len() - 1 {
        let ctrl = (points[i].x, points[i].y);
        let end = (
            (points[i].x + points[i + 1].x) / 2.0,
            (points[i].y + points[i + 1].y) / 2.0,
        );
        for step in 1..=CURVE_STEPS {
            let t = step as f64 / CURVE_STEPS as f64;
            let mt = 1.0 - t;
            path.push((
                mt * mt * current.0 + 2.0 * mt * t * ctrl.0 + t * t * end.0,
                mt * mt * current.1 + 2.0 * mt * t * ctrl.1 + t * t * end.1,
            ));
        }
        current = end;
    }
    if let Some(last) = points.last() {
        path.push((last.x, last.y));
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Canvas;
    use paintnook_core::{normalize_action, ActionType, LocalAction};
    use serde_json::json;

    const RED: Rgba8 = Rgba8::new(255, 0, 0, 255);

    fn size() -> CanvasSize {
        CanvasSize::new(100, 100)
    }

    fn stroke(points: &[(f64, f64)], brush: f64) -> Action {
        let pts = points.iter().map(|&(x, y)| Point::new(x, y)).collect();
        normalize_action(
            &LocalAction::stroke("l", StrokeData::new(pts, Color::rgb(255, 0, 0)).with_brush_size(brush)),
            size(),
        )
    }

    fn painted_cells(canvas: &Canvas) -> HashSet<(i64, i64)> {
        let mut cells = HashSet::new();
        for y in 0..canvas.height() as i64 {
            for x in 0..canvas.width() as i64 {
                if canvas.pixel(x, y).is_some_and(|p| p.a > 0) {
                    cells.insert((x, y));
                }
            }
        }
        cells
    }

    #[test]
    fn test_pixel_stroke_single_point_stamp() {
        let mut adapter = RenderAdapter::with_mode(ViewMode::PixelArt, size());
        let mut canvas = Canvas::new(100, 100);
        adapter.render(&mut canvas, &stroke(&[(10.0, 10.0)], 3.0));
        let cells = painted_cells(&canvas);
        assert_eq!(cells.len(), 9);
        for x in 9..=11 {
            for y in 9..=11 {
                assert!(cells.contains(&(x, y)));
            }
        }
        assert_eq!(adapter.stamp_cache_len(), 1);
    }

    #[test]
    fn test_pixel_stroke_is_deterministic() {
        let action = stroke(&[(3.2, 4.7), (40.4, 22.1), (61.0, 80.9)], 2.0);
        let mut a = Canvas::new(100, 100);
        let mut b = Canvas::new(100, 100);
        RenderAdapter::with_mode(ViewMode::PixelArt, size()).render(&mut a, &action);
        RenderAdapter::with_mode(ViewMode::PixelArt, size()).render(&mut b, &action);
        assert_eq!(a, b);
        assert!(a.buffer().pixels().iter().all(|p| *p == RED || *p == Rgba8::TRANSPARENT));
    }

    #[test]
    fn test_pixel_stroke_gapless_line() {
        let mut adapter = RenderAdapter::with_mode(ViewMode::PixelArt, size());
        let mut canvas = Canvas::new(100, 100);
        adapter.render(&mut canvas, &stroke(&[(0.0, 0.0), (20.0, 7.0)], 1.0));
        let cells = painted_cells(&canvas);
        assert_eq!(cells.len(), 21);
        assert!(cells.contains(&(0, 0)));
        assert!(cells.contains(&(20, 7)));
    }

    #[test]
    fn test_pixel_size_scales_cells() {
        let opts = RenderOptions { pixel_size: 4.0, ..Default::default() };
        let mut adapter = RenderAdapter::new(ViewMode::PixelArt, size(), opts).unwrap();
        let mut canvas = Canvas::new(100, 100);
        adapter.render(&mut canvas, &stroke(&[(41.0, 41.0)], 4.0));
        // One 4x4 block at cell (10, 10).
        let cells = painted_cells(&canvas);
        assert_eq!(cells.len(), 16);
        assert!(cells.contains(&(40, 40)));
        assert!(cells.contains(&(43, 43)));
    }

    #[test]
    fn test_snap_to_grid() {
        let opts = RenderOptions { grid_size: 4, ..Default::default() };
        let adapter = RenderAdapter::new(ViewMode::PixelArt, size(), opts).unwrap();
        assert_eq!(adapter.snap_to_pixel_grid(5.0), 4);
        assert_eq!(adapter.snap_to_pixel_grid(6.0), 8);
        let mut free = adapter.clone();
        free.set_view_mode(ViewMode::PixelArt, OptionsUpdate { snap_to_grid: Some(false), ..Default::default() })
            .unwrap();
        assert_eq!(free.snap_to_pixel_grid(5.0), 5);
        assert_eq!(free.snap_to_pixel_grid(2.5), 3);
    }

    #[test]
    fn test_palette_snapping() {
        let opts: RenderOptions = serde_json::from_value(json!({
            "palette": ["#000000", {"r": 0, "g": 0, "b": 255}]
        }))
        .unwrap();
        let mut adapter = RenderAdapter::new(ViewMode::PixelArt, size(), opts).unwrap();
        let mut canvas = Canvas::new(100, 100);
        let pts = vec![Point::new(5.0, 5.0)];
        let action = normalize_action(
            &LocalAction::stroke("l", StrokeData::new(pts, Color::rgb(20, 30, 200)).with_brush_size(1.0)),
            size(),
        );
        adapter.render(&mut canvas, &action);
        assert_eq!(canvas.pixel(5, 5), Some(Rgba8::new(0, 0, 255, 255)));
    }

    #[test]
    fn test_palette_snaps_near_black_to_black() {
        let opts = RenderOptions {
            palette: Some(vec!["#000000".parse().unwrap(), "#ffffff".parse().unwrap()]),
            ..Default::default()
        };
        let mut adapter = RenderAdapter::new(ViewMode::PixelArt, size(), opts).unwrap();
        let mut canvas = Canvas::new(100, 100);
        let pts = vec![Point::new(5.0, 5.0)];
        let action = normalize_action(
            &LocalAction::stroke("l", StrokeData::new(pts, Color::rgb(10, 10, 10)).with_brush_size(1.0)),
            size(),
        );
        adapter.render(&mut canvas, &action);
        assert_eq!(canvas.pixel(5, 5), Some(Rgba8::new(0, 0, 0, 255)));
    }

    #[test]
    fn test_pixel_stroke_stamps_diagonal_footprint() {
        // (0.1, 0.1) -> (0.2, 0.2) with brush 0.05 on a 100x100 canvas.
        let action = stroke(&[(10.0, 10.0), (20.0, 20.0)], 5.0);
        if let ActionPayload::Stroke(data) = &action.payload {
            assert_eq!(data.brush_size, 0.05);
            assert_eq!((data.points[0].x, data.points[1].y), (0.1, 0.2));
        }
        let mut adapter = RenderAdapter::with_mode(ViewMode::PixelArt, size());
        let mut canvas = Canvas::new(100, 100);
        adapter.render(&mut canvas, &action);

        // 11 diagonal steps of a 5x5 square: 25 + 10 * 9 cells.
        let cells = painted_cells(&canvas);
        assert_eq!(cells.len(), 115);
        assert!(cells.contains(&(8, 8)));
        assert!(cells.contains(&(22, 22)));
        assert!(!cells.contains(&(22, 8)));
        assert!(cells.iter().all(|&(x, y)| canvas.pixel(x, y) == Some(RED)));
    }

    #[test]
    fn test_digital_stroke_honors_opacity() {
        let mut adapter = RenderAdapter::with_mode(ViewMode::Digital, size());
        let mut canvas = Canvas::new(100, 100);
        let pts = vec![Point::new(10.0, 50.0), Point::new(90.0, 50.0)];
        let action = normalize_action(
            &LocalAction::stroke(
                "l",
                StrokeData::new(pts, Color::rgb(255, 0, 0)).with_brush_size(8.0).with_opacity(0.5),
            ),
            size(),
        );
        assert_eq!(adapter.render(&mut canvas, &action), RenderOutcome::Painted);
        assert_eq!(canvas.pixel(50, 50).map(|p| p.a), Some(128));
        assert_eq!(canvas.pixel(50, 40).map(|p| p.a), Some(0));
    }

    #[test]
    fn test_digital_single_point_uses_pressure() {
        let mut adapter = RenderAdapter::with_mode(ViewMode::Digital, size());
        let mut canvas = Canvas::new(100, 100);
        let pts = vec![Point::new(50.0, 50.0).with_pressure(0.5)];
        let action = normalize_action(
            &LocalAction::stroke("l", StrokeData::new(pts, Color::rgb(255, 0, 0)).with_brush_size(20.0)),
            size(),
        );
        adapter.render(&mut canvas, &action);
        assert_eq!(canvas.pixel(50, 50), Some(RED));
        // Radius 5 at half pressure, not 10.
        assert_eq!(canvas.pixel(50, 57).map(|p| p.a), Some(0));
    }

    #[test]
    fn test_vector_stroke_paints_path() {
        let mut adapter = RenderAdapter::with_mode(ViewMode::Vector, size());
        let mut canvas = Canvas::new(100, 100);
        adapter.render(&mut canvas, &stroke(&[(10.0, 10.0), (50.0, 50.0), (90.0, 10.0)], 4.0));
        assert_eq!(canvas.pixel(10, 10), Some(RED));
        assert_eq!(canvas.pixel(89, 10).map(|p| p.a > 0), Some(true));
        assert_eq!(canvas.pixel(50, 90).map(|p| p.a), Some(0));
    }

    #[test]
    fn test_pixel_rectangle_outline_and_fill() {
        let mut adapter = RenderAdapter::with_mode(ViewMode::PixelArt, size());
        let mut canvas = Canvas::new(100, 100);
        let shape = ShapeData::new(ShapeKind::Rectangle, Bounds::new(10.0, 10.0, 10.0, 5.0))
            .with_stroke(Color::rgb(255, 0, 0), 1.0)
            .with_fill(Color::rgb(0, 0, 255));
        let action = normalize_action(&LocalAction::shape("l", shape), size());
        adapter.render(&mut canvas, &action);
        assert_eq!(canvas.pixel(10, 10), Some(RED));
        assert_eq!(canvas.pixel(20, 15), Some(RED));
        assert_eq!(canvas.pixel(15, 12), Some(Rgba8::new(0, 0, 255, 255)));
        assert_eq!(painted_cells(&canvas).len(), 11 * 6);
    }

    #[test]
    fn test_pixel_ellipse_fill_covers_outline() {
        let blue = Rgba8::new(0, 0, 255, 255);
        let shape = ShapeData::new(ShapeKind::Ellipse, Bounds::new(20.0, 20.0, 20.0, 10.0))
            .with_stroke(Color::rgb(255, 0, 0), 1.0)
            .with_fill(Color::rgb(0, 0, 255));
        let action = normalize_action(&LocalAction::shape("l", shape.clone()), size());

        let mut adapter = RenderAdapter::with_mode(ViewMode::PixelArt, size());
        let mut canvas = Canvas::new(100, 100);
        adapter.render(&mut canvas, &action);
        assert_eq!(canvas.pixel(40, 25), Some(blue));
        assert_eq!(canvas.pixel(20, 25), Some(blue));
        assert_eq!(canvas.pixel(30, 20), Some(blue));
        assert_eq!(canvas.pixel(30, 25), Some(blue));
        assert_eq!(canvas.buffer().count(RED), 0);

        // Unfilled, the outline keeps the stroke color.
        let mut outline = shape;
        outline.filled = false;
        let mut canvas = Canvas::new(100, 100);
        adapter.render(&mut canvas, &normalize_action(&LocalAction::shape("l", outline), size()));
        assert_eq!(canvas.pixel(40, 25), Some(RED));
        assert_eq!(canvas.pixel(30, 25).map(|p| p.a), Some(0));
    }

    #[test]
    fn test_pixel_line_shape_snaps_to_grid() {
        let opts = RenderOptions { grid_size: 4, ..Default::default() };
        let mut adapter = RenderAdapter::new(ViewMode::PixelArt, size(), opts).unwrap();
        let mut canvas = Canvas::new(100, 100);
        let line = ShapeData::new(ShapeKind::Line, Bounds::new(0.0, 0.0, 10.0, 0.0))
            .with_stroke(Color::rgb(255, 0, 0), 1.0);
        adapter.render(&mut canvas, &normalize_action(&LocalAction::shape("l", line), size()));
        let expected: HashSet<(i64, i64)> = [(0, 0), (4, 0), (8, 0), (12, 0)].into_iter().collect();
        assert_eq!(painted_cells(&canvas), expected);
    }

    #[test]
    fn test_digital_shapes() {
        let mut adapter = RenderAdapter::with_mode(ViewMode::Digital, size());
        let mut canvas = Canvas::new(100, 100);
        let rect = ShapeData::new(ShapeKind::Rectangle, Bounds::new(10.0, 10.0, 30.0, 30.0))
            .with_fill(Color::rgb(0, 255, 0));
        adapter.render(&mut canvas, &normalize_action(&LocalAction::shape("l", rect), size()));
        assert_eq!(canvas.pixel(25, 25), Some(Rgba8::new(0, 255, 0, 255)));

        let line = ShapeData::new(ShapeKind::Line, Bounds::new(50.0, 80.0, 40.0, 0.0))
            .with_stroke(Color::rgb(255, 0, 0), 2.0);
        adapter.render(&mut canvas, &normalize_action(&LocalAction::shape("l", line), size()));
        assert_eq!(canvas.pixel(70, 80), Some(RED));
        assert_eq!(canvas.pixel(70, 84).map(|p| p.a), Some(0));
    }

    #[test]
    fn test_unknown_shape_skipped() {
        let mut adapter = RenderAdapter::with_mode(ViewMode::Digital, size());
        let mut canvas = Canvas::new(100, 100);
        let mut shape = ShapeData::new(ShapeKind::Rectangle, Bounds::new(0.0, 0.0, 10.0, 10.0));
        shape.shape_type = "star".into();
        let action = normalize_action(&LocalAction::shape("l", shape), size());
        assert_eq!(adapter.render(&mut canvas, &action), RenderOutcome::Skipped);
    }

    #[test]
    fn test_fill_and_non_contiguous_fill() {
        let mut adapter = RenderAdapter::with_mode(ViewMode::Digital, CanvasSize::new(10, 10));
        let mut canvas = Canvas::new(10, 10);
        canvas.fill_rect(Bounds::new(5.0, 0.0, 1.0, 10.0), &Paint::solid(Color::BLACK));

        let fill = LocalAction::fill("l", FillData::new(Point::new(1.0, 1.0), Color::rgb(255, 0, 0)));
        let action = normalize_action(&fill, CanvasSize::new(10, 10));
        assert_eq!(adapter.render(&mut canvas, &action), RenderOutcome::Painted);
        assert_eq!(canvas.buffer().count(RED), 50);

        let mut canvas2 = Canvas::new(10, 10);
        canvas2.fill_rect(Bounds::new(5.0, 0.0, 1.0, 10.0), &Paint::solid(Color::BLACK));
        let global = LocalAction::fill(
            "l",
            FillData::new(Point::new(1.0, 1.0), Color::rgb(255, 0, 0)).with_contiguous(false),
        );
        adapter.render(&mut canvas2, &normalize_action(&global, CanvasSize::new(10, 10)));
        assert_eq!(canvas2.buffer().count(RED), 90);
    }

    #[test]
    fn test_fill_same_color_skipped() {
        let mut adapter = RenderAdapter::with_mode(ViewMode::Digital, CanvasSize::new(4, 4));
        let mut canvas = Canvas::new(4, 4);
        let fill = LocalAction::fill("l", FillData::new(Point::new(0.0, 0.0), Color::TRANSPARENT));
        let action = normalize_action(&fill, CanvasSize::new(4, 4));
        assert_eq!(adapter.render(&mut canvas, &action), RenderOutcome::Skipped);
    }

    #[test]
    fn test_erase_both_modes() {
        for mode in [ViewMode::Digital, ViewMode::PixelArt] {
            let mut adapter = RenderAdapter::with_mode(mode, size());
            let mut canvas = Canvas::new(100, 100);
            canvas.fill_rect(Bounds::new(0.0, 0.0, 100.0, 100.0), &Paint::solid(Color::rgb(255, 0, 0)));

            let single = LocalAction::erase("l", EraseData::new(vec![Point::new(50.0, 50.0)]).with_size(4.0));
            adapter.render(&mut canvas, &normalize_action(&single, size()));
            assert_eq!(canvas.pixel(50, 50).map(|p| p.a), Some(0), "{mode}");

            let path = LocalAction::erase(
                "l",
                EraseData::new(vec![Point::new(10.0, 20.0), Point::new(30.0, 20.0)]).with_size(2.0),
            );
            adapter.render(&mut canvas, &normalize_action(&path, size()));
            assert_eq!(canvas.pixel(20, 20).map(|p| p.a), Some(0), "{mode}");
            assert_eq!(canvas.pixel(20, 40), Some(RED), "{mode}");
        }
    }

    #[test]
    fn test_opaque_kind_skipped() {
        let mut adapter = RenderAdapter::with_mode(ViewMode::Digital, size());
        let mut canvas = Canvas::new(10, 10);
        let action = Action::new("l", ActionPayload::opaque(ActionType::LayerAdd, json!({"name": "x"})));
        assert_eq!(adapter.render(&mut canvas, &action), RenderOutcome::Skipped);
    }

    #[test]
    fn test_canvas_size_used_at_render_time() {
        let action = stroke(&[(50.0, 50.0)], 1.0);
        let mut adapter = RenderAdapter::with_mode(ViewMode::PixelArt, size());
        adapter.set_canvas_size(200, 200);
        let mut canvas = Canvas::new(200, 200);
        adapter.render(&mut canvas, &action);
        let cells = painted_cells(&canvas);
        assert!(cells.contains(&(100, 100)));
        assert_eq!(cells.len(), 4);
    }

    #[test]
    fn test_set_view_mode_validates() {
        let mut adapter = RenderAdapter::with_mode(ViewMode::Digital, size());
        let bad = OptionsUpdate { pixel_size: Some(0.0), ..Default::default() };
        assert!(adapter.set_view_mode(ViewMode::PixelArt, bad).is_err());
        assert_eq!(adapter.view_mode(), ViewMode::Digital);

        let palette = OptionsUpdate { palette: Some(vec![Color::BLACK]), ..Default::default() };
        adapter.set_view_mode(ViewMode::PixelArt, palette).unwrap();
        assert_eq!(adapter.view_mode(), ViewMode::PixelArt);
        assert_eq!(adapter.palette_color(Color::WHITE), Color::BLACK);

        let clear = OptionsUpdate { palette: Some(vec![]), ..Default::default() };
        adapter.set_view_mode(ViewMode::PixelArt, clear).unwrap();
        assert_eq!(adapter.options().palette, None);
    }

    #[test]
    fn test_view_mode_names() {
        assert_eq!("pixel_art".parse::<ViewMode>().unwrap(), ViewMode::PixelArt);
        assert!("watercolor".parse::<ViewMode>().is_err());
        assert_eq!(serde_json::to_value(ViewMode::Vector).unwrap(), json!("vector"));
    }
}
