//! # paintnook-core
//!
//! Universal Action Format (UAF): the resolution-independent description of
//! a drawing operation exchanged between PaintNook participants.
//!
//! ## Architecture
//!
//! ```text
//!  Tool (pixels)
//!       │  LocalAction
//!       ▼
//!  normalize_action()        ◀─── x / width, y / height, sizes / width
//!       │  Action (0..1 space)
//!       ▼
//!  Action::encode()          ◀─── camelCase JSON on the wire
//!       │
//!       ▼
//!  Action::decode()          ◀─── validation, typed payload
//!       │
//!       ▼
//!  denormalize_action()      ◀─── against the receiver's canvas size
//! ```
//!
//! ## Crate modules
//!
//! - [`color`]: RGBA value, CSS/hex parsing and formatting
//! - [`geometry`]: points, bounds, canvas size
//! - [`action`]: action kinds, payloads, envelope, validation, codec
//! - [`local`]: pixel-space actions built by tools
//! - [`normalize`]: pixel ↔ normalized conversion

pub mod action;
pub mod color;
pub mod geometry;
pub mod local;
pub mod normalize;

// Re-exports for convenience
pub use action::{
    now_millis, validate_action, Action, ActionPayload, ActionType, CodecError, EraseData,
    FillData, Priority, ShapeData, ShapeKind, StrokeData, ValidationError,
};
pub use color::{Color, ColorParseError};
pub use geometry::{Bounds, CanvasSize, Point};
pub use local::LocalAction;
pub use normalize::{denormalize_action, normalize_action};
