//! Pixel-space actions built by local tools before normalization.

use serde_json::Value;

use crate::action::{ActionPayload, ActionType, EraseData, FillData, ShapeData, ShapeKind, StrokeData};
use crate::color::{Color, ColorParseError};
use crate::geometry::{Bounds, Point};

/// A drawing edit described in absolute canvas pixels.
///
/// The sync engine turns this into a normalized [`Action`](crate::Action)
/// at send time, against whatever canvas size is current then.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalAction {
    pub layer_id: String,
    pub payload: ActionPayload,
}

impl LocalAction {
    pub fn new(layer_id: impl Into<String>, payload: ActionPayload) -> Self {
        Self {
            layer_id: layer_id.into(),
            payload,
        }
    }

    pub fn stroke(layer_id: impl Into<String>, data: StrokeData) -> Self {
        Self::new(layer_id, ActionPayload::Stroke(data))
    }

    pub fn shape(layer_id: impl Into<String>, data: ShapeData) -> Self {
        Self::new(layer_id, ActionPayload::Shape(data))
    }

    pub fn fill(layer_id: impl Into<String>, data: FillData) -> Self {
        Self::new(layer_id, ActionPayload::Fill(data))
    }

    pub fn erase(layer_id: impl Into<String>, data: EraseData) -> Self {
        Self::new(layer_id, ActionPayload::Erase(data))
    }

    /// Non-drawing kind with its data relayed as-is.
    pub fn opaque(layer_id: impl Into<String>, kind: ActionType, data: Value) -> Self {
        Self::new(layer_id, ActionPayload::opaque(kind, data))
    }

    /// Round-brush stroke through `(x, y)` pixel samples, color given as CSS.
    pub fn brush(
        layer_id: impl Into<String>,
        points: &[(f64, f64)],
        color: &str,
        size: f64,
    ) -> Result<Self, ColorParseError> {
        let color = Color::parse(color)?;
        let points = points.iter().map(|&(x, y)| Point::new(x, y)).collect();
        Ok(Self::stroke(
            layer_id,
            StrokeData::new(points, color).with_brush_size(size),
        ))
    }

    /// Outlined rectangle in pixel space.
    pub fn rectangle(
        layer_id: impl Into<String>,
        bounds: Bounds,
        stroke: Color,
        stroke_width: f64,
    ) -> Self {
        Self::shape(
            layer_id,
            ShapeData::new(ShapeKind::Rectangle, bounds).with_stroke(stroke, stroke_width),
        )
    }

    /// Paint-bucket fill at a pixel, color given as CSS.
    pub fn bucket(
        layer_id: impl Into<String>,
        x: f64,
        y: f64,
        color: &str,
    ) -> Result<Self, ColorParseError> {
        let color = Color::parse(color)?;
        Ok(Self::fill(layer_id, FillData::new(Point::new(x, y), color)))
    }

    pub fn action_type(&self) -> ActionType {
        self.payload.action_type()
    }
}
