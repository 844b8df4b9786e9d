//! Pixel ↔ normalized coordinate conversion.
//!
//! x is divided by canvas width, y by canvas height, and every size field
//! (`brushSize`, `strokeWidth`, eraser `size`) by canvas width. Opaque
//! payloads are left alone.

use crate::action::{Action, ActionPayload};
use crate::geometry::{Bounds, CanvasSize};
use crate::local::LocalAction;

impl ActionPayload {
    /// Pixel payload → normalized `[0, 1]` payload.
    pub fn normalized(&self, size: CanvasSize) -> ActionPayload {
        let (w, h) = (size.w(), size.h());
        self.scaled(|x| x / w, |y| y / h, |s| s / w)
    }

    /// Normalized payload → pixel payload for `size`.
    pub fn denormalized(&self, size: CanvasSize) -> ActionPayload {
        let (w, h) = (size.w(), size.h());
        self.scaled(|x| x * w, |y| y * h, |s| s * w)
    }

    fn scaled(
        &self,
        fx: impl Fn(f64) -> f64 + Copy,
        fy: impl Fn(f64) -> f64 + Copy,
        fs: impl Fn(f64) -> f64,
    ) -> ActionPayload {
        match self {
            ActionPayload::Stroke(d) => {
                let mut d = d.clone();
                d.points = d.points.iter().map(|p| p.map(fx, fy)).collect();
                d.brush_size = fs(d.brush_size);
                ActionPayload::Stroke(d)
            }
            ActionPayload::Shape(d) => {
                let mut d = d.clone();
                d.bounds = Bounds {
                    x: fx(d.bounds.x),
                    y: fy(d.bounds.y),
                    width: fx(d.bounds.width),
                    height: fy(d.bounds.height),
                };
                d.stroke_width = fs(d.stroke_width);
                ActionPayload::Shape(d)
            }
            ActionPayload::Fill(d) => {
                let mut d = d.clone();
                d.point = d.point.map(fx, fy);
                ActionPayload::Fill(d)
            }
            ActionPayload::Erase(d) => {
                let mut d = d.clone();
                d.points = d.points.iter().map(|p| p.map(fx, fy)).collect();
                d.size = fs(d.size);
                ActionPayload::Erase(d)
            }
            ActionPayload::Opaque { .. } => self.clone(),
        }
    }
}

/// Normalize a local pixel-space edit into a fresh UAF action (new id,
/// current timestamp). Envelope fields owned by the engine are left at
/// their defaults.
pub fn normalize_action(local: &LocalAction, size: CanvasSize) -> Action {
    Action::new(local.layer_id.clone(), local.payload.normalized(size))
}

/// Copy of `action` with its payload in pixels for `size`.
pub fn denormalize_action(action: &Action, size: CanvasSize) -> Action {
    let mut out = action.clone();
    out.payload = action.payload.denormalized(size);
    out
}
