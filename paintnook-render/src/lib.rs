//! # paintnook-render
//!
//! Software rendering of UAF actions, per participant view mode.
//!
//! ## Architecture
//!
//! ```text
//!  Action (paintnook-core, 0..1 space)
//!       │
//!       ▼
//!  RenderAdapter.render()          ◀─── denormalize against local canvas size
//!       │
//!       ├── digital / vector ────▶ Surface primitives (AA, blend modes)
//!       └── pixel_art ───────────▶ raster::{BresenhamLine, midpoint_ellipse}
//!       │                             + per-cell fill_rect
//!       ▼
//!  Canvas (PixelBuffer, RGBA8)     ◀─── flood fill works on raw pixels
//! ```
//!
//! ## Crate modules
//!
//! - [`buffer`]: RGBA8 pixel storage (`bytemuck` views)
//! - [`composite`]: W3C blend modes and `destination-out`
//! - [`surface`]: the `Surface` trait, `Paint`, stroke styles
//! - [`canvas`]: software `Surface` implementation
//! - [`raster`]: Bresenham, midpoint ellipse, flood fill, palette lookup
//! - [`adapter`]: view-mode aware action rendering

pub mod adapter;
pub mod buffer;
pub mod canvas;
pub mod composite;
pub mod raster;
pub mod surface;

// Re-exports for convenience
pub use adapter::{OptionsUpdate, RenderAdapter, RenderOptions, RenderOutcome, ViewMode};
pub use buffer::{PixelBuffer, RenderError, Rgba8};
pub use canvas::Canvas;
pub use composite::CompositeOp;
pub use raster::{flood_fill, midpoint_ellipse, nearest_palette_color, replace_matching, BresenhamLine};
pub use surface::{LineCap, Paint, StrokeStyle, Surface};
