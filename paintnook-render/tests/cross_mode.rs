//! Integration tests: the same wire action rendered by participants in
//! different view modes and canvas sizes.

use paintnook_core::{
    normalize_action, Action, Bounds, CanvasSize, Color, LocalAction, Point, ShapeData, ShapeKind,
    StrokeData,
};
use paintnook_render::{Canvas, RenderAdapter, RenderOptions, RenderOutcome, Rgba8, Surface, ViewMode};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn coverage(canvas: &Canvas) -> Vec<(i64, i64)> {
    let mut out = Vec::new();
    for y in 0..canvas.height() as i64 {
        for x in 0..canvas.width() as i64 {
            if canvas.pixel(x, y).is_some_and(|p| p.a > 127) {
                out.push((x, y));
            }
        }
    }
    out
}

/// Authored on a 200x100 canvas, sent as JSON.
fn wire_stroke() -> Action {
    let author = CanvasSize::new(200, 100);
    let points = vec![Point::new(20.0, 20.0), Point::new(100.0, 50.0), Point::new(180.0, 80.0)];
    let local = LocalAction::stroke("layer-1", StrokeData::new(points, Color::rgb(239, 68, 68)).with_brush_size(6.0));
    let encoded = normalize_action(&local, author).encode().unwrap();
    Action::decode(&encoded).unwrap()
}

#[test]
fn test_digital_and_pixel_art_cover_same_path() {
    init_logger();
    let action = wire_stroke();
    let size = CanvasSize::new(200, 100);

    let mut digital = Canvas::new(200, 100);
    let mut pixel = Canvas::new(200, 100);
    RenderAdapter::with_mode(ViewMode::Digital, size).render(&mut digital, &action);
    RenderAdapter::with_mode(ViewMode::PixelArt, size).render(&mut pixel, &action);

    let d = coverage(&digital);
    let p = coverage(&pixel);
    assert!(!d.is_empty() && !p.is_empty());

    // Every pixel-art cell lies within a few pixels of the digital stroke.
    for &(x, y) in &p {
        let near = d.iter().any(|&(dx, dy)| (dx - x).abs() <= 3 && (dy - y).abs() <= 3);
        assert!(near, "pixel-art cell ({x}, {y}) far from digital stroke");
    }
    // Endpoints are painted in both modes.
    for canvas in [&digital, &pixel] {
        assert!(canvas.pixel(20, 20).is_some_and(|px| px.a > 0));
        assert!(canvas.pixel(180, 80).is_some_and(|px| px.a > 0));
    }
}

#[test]
fn test_receiver_canvas_size_scales_geometry() {
    init_logger();
    let action = wire_stroke();

    let mut small = Canvas::new(200, 100);
    let mut large = Canvas::new(400, 200);
    RenderAdapter::with_mode(ViewMode::PixelArt, CanvasSize::new(200, 100)).render(&mut small, &action);
    RenderAdapter::with_mode(ViewMode::PixelArt, CanvasSize::new(400, 200)).render(&mut large, &action);

    assert!(small.pixel(20, 20).is_some_and(|p| p.a > 0));
    assert!(large.pixel(40, 40).is_some_and(|p| p.a > 0));
    assert!(large.pixel(360, 160).is_some_and(|p| p.a > 0));
    // Brush width is relative to canvas width, so the big canvas paints
    // roughly four times as many pixels.
    let ratio = coverage(&large).len() as f64 / coverage(&small).len() as f64;
    assert!((3.0..5.0).contains(&ratio), "ratio {ratio}");
}

#[test]
fn test_pixel_art_identical_across_participants() {
    init_logger();
    let opts = RenderOptions {
        pixel_size: 2.0,
        grid_size: 2,
        palette: Some(vec![Color::BLACK, Color::rgb(239, 68, 68), Color::WHITE]),
        ..Default::default()
    };
    let size = CanvasSize::new(200, 100);
    let action = wire_stroke();

    let mut a = Canvas::new(200, 100);
    let mut b = Canvas::new(200, 100);
    RenderAdapter::new(ViewMode::PixelArt, size, opts.clone()).unwrap().render(&mut a, &action);
    RenderAdapter::new(ViewMode::PixelArt, size, opts).unwrap().render(&mut b, &action);
    assert_eq!(a.buffer().as_bytes(), b.buffer().as_bytes());
    assert!(a
        .buffer()
        .pixels()
        .iter()
        .all(|p| *p == Rgba8::TRANSPARENT || *p == Rgba8::new(239, 68, 68, 255)));
}

#[test]
fn test_shape_in_all_modes() {
    init_logger();
    let size = CanvasSize::new(100, 100);
    let shape = ShapeData::new(ShapeKind::Ellipse, Bounds::new(20.0, 20.0, 60.0, 40.0))
        .with_stroke(Color::BLACK, 2.0)
        .with_fill(Color::rgb(6, 182, 212));
    let action = normalize_action(&LocalAction::shape("layer-1", shape), size);

    for mode in [ViewMode::Digital, ViewMode::PixelArt, ViewMode::Vector] {
        let mut canvas = Canvas::new(100, 100);
        let outcome = RenderAdapter::with_mode(mode, size).render(&mut canvas, &action);
        assert_eq!(outcome, RenderOutcome::Painted, "{mode}");
        assert_eq!(canvas.pixel(50, 40), Some(Rgba8::new(6, 182, 212, 255)), "{mode}");
        assert!(canvas.pixel(5, 5).is_some_and(|p| p.a == 0), "{mode}");
    }
}
