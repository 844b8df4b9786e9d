//! Universal Action Format (UAF).
//!
//! One [`Action`] is the unit of synchronization: an envelope (id, author,
//! clocks, target layer, priority) around a closed [`ActionPayload`] whose
//! shape is fixed per [`ActionType`].
//!
//! Wire format (JSON, camelCase):
//! ```text
//! {
//!   "id": "…", "type": "stroke", "authorId": "…", "timestamp": 1700000000000,
//!   "vectorClock": 7, "layerId": "layer-1", "priority": 0,
//!   "data": { "points": [...], "color": {...}, "brushSize": 0.005, ... }
//! }
//! ```
//!
//! Layer management and bookkeeping kinds (`layer_*`, `transform`, `undo`,
//! `initial_state`, …) keep their `data` as an opaque JSON value that is
//! passed through untouched.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::color::Color;
use crate::geometry::{lenient_number, Bounds, Point};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ───────────────────────────────────────────────────────────────────
// Errors
// ───────────────────────────────────────────────────────────────────

/// Why an incoming action was refused.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("action is not a JSON object")]
    NotAnObject,
    #[error("action id must be a non-empty string")]
    MissingId,
    #[error("action type is missing")]
    MissingType,
    #[error("unknown action type: {0}")]
    UnknownType(String),
    #[error("priority must be 0 or 1, got {0}")]
    InvalidPriority(String),
    #[error("envelope field '{field}' is malformed")]
    MalformedField { field: &'static str },
    #[error("{kind} action requires '{field}'")]
    MissingField { kind: ActionType, field: &'static str },
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: ActionType, reason: String },
}

/// Encoding or decoding failure.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid action: {0}")]
    Invalid(#[from] ValidationError),
}

// ───────────────────────────────────────────────────────────────────
// Action kinds
// ───────────────────────────────────────────────────────────────────

/// The closed enumeration of action kinds accepted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Stroke,
    Shape,
    Fill,
    Erase,
    LayerAdd,
    LayerRemove,
    LayerMove,
    LayerMerge,
    LayerVisibility,
    LayerOpacity,
    LayerBlendMode,
    Transform,
    Undo,
    Redo,
    ClearLayer,
    InitialState,
    CursorMove,
}

impl ActionType {
    pub const ALL: [ActionType; 17] = [
        ActionType::Stroke,
        ActionType::Shape,
        ActionType::Fill,
        ActionType::Erase,
        ActionType::LayerAdd,
        ActionType::LayerRemove,
        ActionType::LayerMove,
        ActionType::LayerMerge,
        ActionType::LayerVisibility,
        ActionType::LayerOpacity,
        ActionType::LayerBlendMode,
        ActionType::Transform,
        ActionType::Undo,
        ActionType::Redo,
        ActionType::ClearLayer,
        ActionType::InitialState,
        ActionType::CursorMove,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Stroke => "stroke",
            ActionType::Shape => "shape",
            ActionType::Fill => "fill",
            ActionType::Erase => "erase",
            ActionType::LayerAdd => "layer_add",
            ActionType::LayerRemove => "layer_remove",
            ActionType::LayerMove => "layer_move",
            ActionType::LayerMerge => "layer_merge",
            ActionType::LayerVisibility => "layer_visibility",
            ActionType::LayerOpacity => "layer_opacity",
            ActionType::LayerBlendMode => "layer_blend_mode",
            ActionType::Transform => "transform",
            ActionType::Undo => "undo",
            ActionType::Redo => "redo",
            ActionType::ClearLayer => "clear_layer",
            ActionType::InitialState => "initial_state",
            ActionType::CursorMove => "cursor_move",
        }
    }

    /// `layer_*` management kinds.
    pub fn is_layer_op(&self) -> bool {
        self.as_str().starts_with("layer_")
    }

    /// Kinds whose payload carries geometry and is rendered.
    pub fn is_drawing(&self) -> bool {
        matches!(
            self,
            ActionType::Stroke | ActionType::Shape | ActionType::Fill | ActionType::Erase
        )
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownType(s.to_string()))
    }
}

/// Conflict priority. Host actions win host-override conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum Priority {
    #[default]
    Normal = 0,
    Host = 1,
}

impl TryFrom<u8> for Priority {
    type Error = ValidationError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Priority::Normal),
            1 => Ok(Priority::Host),
            other => Err(ValidationError::InvalidPriority(other.to_string())),
        }
    }
}

impl Serialize for Priority {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = u8::deserialize(deserializer)?;
        Priority::try_from(v).map_err(serde::de::Error::custom)
    }
}

// ───────────────────────────────────────────────────────────────────
// Payloads
// ───────────────────────────────────────────────────────────────────

fn default_one() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_brush_type() -> String {
    "round".to_string()
}

fn default_blend_mode() -> String {
    "source-over".to_string()
}

/// Freehand brush stroke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrokeData {
    pub points: Vec<Point>,
    #[serde(default)]
    pub color: Color,
    #[serde(default = "default_brush_type")]
    pub brush_type: String,
    /// Brush diameter, relative to canvas width once normalized.
    #[serde(default)]
    pub brush_size: f64,
    #[serde(default = "default_one")]
    pub hardness: f64,
    #[serde(default = "default_one")]
    pub opacity: f64,
    /// Canvas composite operation name, e.g. `source-over`, `multiply`.
    #[serde(default = "default_blend_mode")]
    pub blend_mode: String,
    #[serde(default)]
    pub smoothing: f64,
}

impl StrokeData {
    /// Stroke with the tool defaults: round 10px brush, full opacity.
    pub fn new(points: Vec<Point>, color: Color) -> Self {
        Self {
            points,
            color,
            brush_type: default_brush_type(),
            brush_size: 10.0,
            hardness: 1.0,
            opacity: 1.0,
            blend_mode: default_blend_mode(),
            smoothing: 0.0,
        }
    }

    pub fn with_brush_size(mut self, size: f64) -> Self {
        self.brush_size = size;
        self
    }

    pub fn with_brush_type(mut self, brush_type: impl Into<String>) -> Self {
        self.brush_type = brush_type.into();
        self
    }

    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_blend_mode(mut self, blend_mode: impl Into<String>) -> Self {
        self.blend_mode = blend_mode.into();
        self
    }
}

/// Shape kinds understood by renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    Line,
    Rectangle,
    Ellipse,
    Polygon,
}

impl ShapeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShapeKind::Line => "line",
            ShapeKind::Rectangle => "rectangle",
            ShapeKind::Ellipse => "ellipse",
            ShapeKind::Polygon => "polygon",
        }
    }
}

impl FromStr for ShapeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "line" => Ok(ShapeKind::Line),
            "rectangle" => Ok(ShapeKind::Rectangle),
            "ellipse" => Ok(ShapeKind::Ellipse),
            "polygon" => Ok(ShapeKind::Polygon),
            other => Err(other.to_string()),
        }
    }
}

/// Geometric primitive within a bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeData {
    pub shape_type: String,
    pub bounds: Bounds,
    #[serde(default)]
    pub fill: Option<Color>,
    #[serde(default)]
    pub stroke: Option<Color>,
    /// Outline width, relative to canvas width once normalized.
    #[serde(default)]
    pub stroke_width: f64,
    #[serde(default)]
    pub filled: bool,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ShapeData {
    pub fn new(kind: ShapeKind, bounds: Bounds) -> Self {
        Self {
            shape_type: kind.as_str().to_string(),
            bounds,
            fill: None,
            stroke: None,
            stroke_width: 1.0,
            filled: false,
            params: Map::new(),
        }
    }

    /// Parsed shape kind; `None` for kinds this build does not know.
    pub fn kind(&self) -> Option<ShapeKind> {
        self.shape_type.parse().ok()
    }

    pub fn with_stroke(mut self, color: Color, width: f64) -> Self {
        self.stroke = Some(color);
        self.stroke_width = width;
        self
    }

    /// Sets the fill color and marks the shape as filled.
    pub fn with_fill(mut self, color: Color) -> Self {
        self.fill = Some(color);
        self.filled = true;
        self
    }
}

/// Paint-bucket fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillData {
    pub point: Point,
    pub color: Color,
    /// Per-channel tolerance, 0–255. Wider or fractional values are floored
    /// and clamped, which matches the same channels.
    #[serde(default, deserialize_with = "tolerance_from_number")]
    pub tolerance: u8,
    #[serde(default = "default_true")]
    pub contiguous: bool,
}

fn tolerance_from_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    Ok(lenient_number(deserializer)?.floor().clamp(0.0, 255.0) as u8)
}

impl FillData {
    pub fn new(point: Point, color: Color) -> Self {
        Self {
            point,
            color,
            tolerance: 0,
            contiguous: true,
        }
    }

    pub fn with_tolerance(mut self, tolerance: u8) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_contiguous(mut self, contiguous: bool) -> Self {
        self.contiguous = contiguous;
        self
    }
}

/// Eraser path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EraseData {
    pub points: Vec<Point>,
    /// Eraser diameter, relative to canvas width once normalized.
    #[serde(default)]
    pub size: f64,
    #[serde(default = "default_one")]
    pub hardness: f64,
}

impl EraseData {
    pub fn new(points: Vec<Point>) -> Self {
        Self {
            points,
            size: 10.0,
            hardness: 1.0,
        }
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }
}

/// Type-specific action data.
///
/// Drawing kinds are fully typed; every other kind keeps its JSON `data`
/// untouched so it can be relayed without interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPayload {
    Stroke(StrokeData),
    Shape(ShapeData),
    Fill(FillData),
    Erase(EraseData),
    Opaque { kind: ActionType, data: Value },
}

impl ActionPayload {
    pub fn action_type(&self) -> ActionType {
        match self {
            ActionPayload::Stroke(_) => ActionType::Stroke,
            ActionPayload::Shape(_) => ActionType::Shape,
            ActionPayload::Fill(_) => ActionType::Fill,
            ActionPayload::Erase(_) => ActionType::Erase,
            ActionPayload::Opaque { kind, .. } => *kind,
        }
    }

    /// Opaque payload for a non-drawing kind.
    pub fn opaque(kind: ActionType, data: Value) -> Self {
        ActionPayload::Opaque { kind, data }
    }

    /// Build a typed payload from a kind and its raw `data` value.
    pub fn from_parts(kind: ActionType, data: Value) -> Result<Self, ValidationError> {
        check_required_fields(kind, &data)?;
        let invalid = |e: serde_json::Error| ValidationError::InvalidPayload {
            kind,
            reason: e.to_string(),
        };
        Ok(match kind {
            ActionType::Stroke => ActionPayload::Stroke(serde_json::from_value(data).map_err(invalid)?),
            ActionType::Shape => ActionPayload::Shape(serde_json::from_value(data).map_err(invalid)?),
            ActionType::Fill => ActionPayload::Fill(serde_json::from_value(data).map_err(invalid)?),
            ActionType::Erase => ActionPayload::Erase(serde_json::from_value(data).map_err(invalid)?),
            other => ActionPayload::Opaque { kind: other, data },
        })
    }

    /// The payload as a JSON `data` value.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            ActionPayload::Stroke(d) => serde_json::to_value(d),
            ActionPayload::Shape(d) => serde_json::to_value(d),
            ActionPayload::Fill(d) => serde_json::to_value(d),
            ActionPayload::Erase(d) => serde_json::to_value(d),
            ActionPayload::Opaque { data, .. } => Ok(data.clone()),
        }
    }
}

/// Structural checks mirrored from the wire contract; run before typed
/// decoding so that the error names the missing field.
fn check_required_fields(kind: ActionType, data: &Value) -> Result<(), ValidationError> {
    let has = |field: &str| data.get(field).is_some_and(|v| !v.is_null());
    let missing = |field: &'static str| Err(ValidationError::MissingField { kind, field });
    match kind {
        ActionType::Stroke | ActionType::Erase => {
            if !data.get("points").is_some_and(Value::is_array) {
                return missing("points");
            }
        }
        ActionType::Shape => {
            if !data.get("shapeType").is_some_and(|v| v.as_str().is_some_and(|s| !s.is_empty())) {
                return missing("shapeType");
            }
            if !has("bounds") {
                return missing("bounds");
            }
        }
        ActionType::Fill => {
            if !has("point") {
                return missing("point");
            }
            if !has("color") {
                return missing("color");
            }
        }
        _ => {}
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────────
// Action envelope
// ───────────────────────────────────────────────────────────────────

/// A single synchronized drawing operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub id: String,
    pub author_id: Option<String>,
    /// Author wall-clock time, ms since the Unix epoch.
    pub timestamp: u64,
    /// Per-author logical clock.
    pub vector_clock: u64,
    pub layer_id: String,
    pub priority: Priority,
    pub payload: ActionPayload,
    /// Client action ids this host action won against.
    pub overrides: Vec<String>,
    /// Id of a later action on the same region (last-write-wins).
    pub superseded_by: Option<String>,
}

impl Action {
    /// New action with a fresh id and the current timestamp.
    pub fn new(layer_id: impl Into<String>, payload: ActionPayload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            author_id: None,
            timestamp: now_millis(),
            vector_clock: 0,
            layer_id: layer_id.into(),
            priority: Priority::Normal,
            payload,
            overrides: Vec::new(),
            superseded_by: None,
        }
    }

    pub fn with_author(mut self, author_id: impl Into<String>) -> Self {
        self.author_id = Some(author_id.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_vector_clock(mut self, clock: u64) -> Self {
        self.vector_clock = clock;
        self
    }

    pub fn action_type(&self) -> ActionType {
        self.payload.action_type()
    }

    pub fn is_host(&self) -> bool {
        self.priority == Priority::Host
    }

    /// Checks the invariants a typed action can still violate.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::MissingId);
        }
        if let ActionPayload::Shape(shape) = &self.payload {
            if shape.shape_type.is_empty() {
                return Err(ValidationError::MissingField {
                    kind: ActionType::Shape,
                    field: "shapeType",
                });
            }
        }
        Ok(())
    }

    /// Validate and decode an untyped JSON action.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        let Value::Object(mut obj) = value else {
            return Err(ValidationError::NotAnObject);
        };

        let id = match obj.remove("id") {
            Some(Value::String(s)) if !s.is_empty() => s,
            _ => return Err(ValidationError::MissingId),
        };

        let kind: ActionType = match obj.remove("type") {
            Some(Value::String(s)) if !s.is_empty() => s.parse()?,
            Some(Value::String(_)) | None | Some(Value::Null) => {
                return Err(ValidationError::MissingType)
            }
            Some(other) => return Err(ValidationError::UnknownType(other.to_string())),
        };

        let priority = match obj.remove("priority") {
            None | Some(Value::Null) => Priority::Normal,
            Some(v) => match v.as_f64() {
                Some(p) if p == 0.0 => Priority::Normal,
                Some(p) if p == 1.0 => Priority::Host,
                _ => return Err(ValidationError::InvalidPriority(v.to_string())),
            },
        };

        let author_id = match obj.remove("authorId") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(_) => return Err(ValidationError::MalformedField { field: "authorId" }),
        };

        let layer_id = match obj.remove("layerId") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s,
            Some(_) => return Err(ValidationError::MalformedField { field: "layerId" }),
        };

        let timestamp = numeric_field(&mut obj, "timestamp")?;
        let vector_clock = numeric_field(&mut obj, "vectorClock")?;

        let overrides = match obj.remove("overrides") {
            None | Some(Value::Null) => Vec::new(),
            Some(v) => serde_json::from_value(v)
                .map_err(|_| ValidationError::MalformedField { field: "overrides" })?,
        };

        let superseded_by = match obj.remove("supersededBy") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(_) => return Err(ValidationError::MalformedField { field: "supersededBy" }),
        };

        let data = obj.remove("data").unwrap_or(Value::Null);
        let payload = ActionPayload::from_parts(kind, data)?;

        Ok(Self {
            id,
            author_id,
            timestamp,
            vector_clock,
            layer_id,
            priority,
            payload,
            overrides,
            superseded_by,
        })
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Encode to the JSON wire form.
    pub fn encode(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode and validate the JSON wire form.
    pub fn decode(raw: &str) -> Result<Self, CodecError> {
        let value: Value = serde_json::from_str(raw)?;
        Ok(Self::from_value(value)?)
    }
}

fn numeric_field(obj: &mut Map<String, Value>, field: &'static str) -> Result<u64, ValidationError> {
    match obj.remove(field) {
        None | Some(Value::Null) => Ok(0),
        Some(v) => v
            .as_u64()
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or(ValidationError::MalformedField { field }),
    }
}

/// Returns true when `value` is an acceptable UAF action.
///
/// Never panics; malformed input simply yields `false`.
pub fn validate_action(value: &Value) -> bool {
    Action::from_value(value.clone()).is_ok()
}

#[derive(Serialize)]
#[serde(untagged)]
enum PayloadRef<'a> {
    Stroke(&'a StrokeData),
    Shape(&'a ShapeData),
    Fill(&'a FillData),
    Erase(&'a EraseData),
    Opaque(&'a Value),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireAction<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: ActionType,
    author_id: Option<&'a str>,
    timestamp: u64,
    vector_clock: u64,
    layer_id: &'a str,
    priority: Priority,
    data: PayloadRef<'a>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    overrides: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    superseded_by: Option<&'a str>,
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let data = match &self.payload {
            ActionPayload::Stroke(d) => PayloadRef::Stroke(d),
            ActionPayload::Shape(d) => PayloadRef::Shape(d),
            ActionPayload::Fill(d) => PayloadRef::Fill(d),
            ActionPayload::Erase(d) => PayloadRef::Erase(d),
            ActionPayload::Opaque { data, .. } => PayloadRef::Opaque(data),
        };
        WireAction {
            id: &self.id,
            kind: self.action_type(),
            author_id: self.author_id.as_deref(),
            timestamp: self.timestamp,
            vector_clock: self.vector_clock,
            layer_id: &self.layer_id,
            priority: self.priority,
            data,
            overrides: &self.overrides,
            superseded_by: self.superseded_by.as_deref(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Action::from_value(value).map_err(serde::de::Error::custom)
    }
}
