//! Resolution-independent geometry: points, bounds, and canvas dimensions.
//!
//! Every coordinate carried by a UAF action lives in normalized space,
//! `[0, 1]` relative to the canvas width (x) and height (y). Absolute pixel
//! values only exist transiently, while a tool builds a [`LocalAction`] or
//! while a renderer paints.
//!
//! [`LocalAction`]: crate::LocalAction

use serde::{Deserialize, Deserializer, Serialize};

use crate::action::now_millis;

fn default_pressure() -> f64 {
    1.0
}

/// Any JSON number or `null`; non-finite values read as 0.
pub(crate) fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?
        .filter(|v| v.is_finite())
        .unwrap_or(0.0))
}

fn lenient_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(lenient_number(deserializer)?.max(0.0) as u64)
}

/// A sampled input point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Point {
    pub x: f64,
    pub y: f64,
    /// Stylus pressure in `[0, 1]`.
    #[serde(default = "default_pressure")]
    pub pressure: f64,
    /// Sample time in milliseconds since the Unix epoch. Fractions are
    /// truncated.
    #[serde(default, deserialize_with = "lenient_millis")]
    pub timestamp: u64,
}

impl Point {
    /// Full-pressure point stamped with the current time.
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            pressure: 1.0,
            timestamp: now_millis(),
        }
    }

    pub fn with_pressure(mut self, pressure: f64) -> Self {
        self.pressure = pressure;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Same sample with x/y passed through `fx`/`fy`.
    pub(crate) fn map(&self, fx: impl Fn(f64) -> f64, fy: impl Fn(f64) -> f64) -> Self {
        Self {
            x: fx(self.x),
            y: fy(self.y),
            pressure: self.pressure,
            timestamp: self.timestamp,
        }
    }
}

/// Axis-aligned rectangle, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Pixel dimensions of a canvas.
///
/// A zero dimension is coerced to 1 so that normalization never divides by
/// zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn w(&self) -> f64 {
        self.width as f64
    }

    pub fn h(&self) -> f64 {
        self.height as f64
    }
}

impl Default for CanvasSize {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}
