//! Raw RGBA8 pixel storage.
//!
//! Layout matches canvas `ImageData`: row-major, 4 bytes per pixel,
//! non-premultiplied alpha. [`Rgba8`] derives `bytemuck::Pod` so the byte
//! vector can be viewed as pixels without copying.

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("Pixel data length {actual} does not match {width}x{height} RGBA ({expected} bytes)")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid render option: {0}")]
    InvalidOption(String),
}

/// One RGBA8 pixel.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const TRANSPARENT: Rgba8 = Rgba8::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// True when every channel is within `tolerance` of `other`.
    pub fn within(&self, other: &Rgba8, tolerance: u8) -> bool {
        self.r.abs_diff(other.r) <= tolerance
            && self.g.abs_diff(other.g) <= tolerance
            && self.b.abs_diff(other.b) <= tolerance
            && self.a.abs_diff(other.a) <= tolerance
    }
}

impl From<[u8; 4]> for Rgba8 {
    fn from([r, g, b, a]: [u8; 4]) -> Self {
        Self { r, g, b, a }
    }
}

impl From<paintnook_core::Color> for Rgba8 {
    fn from(c: paintnook_core::Color) -> Self {
        c.to_rgba8().into()
    }
}

/// Width × height RGBA8 image.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Fully transparent buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    /// Wrap existing RGBA bytes.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, RenderError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(RenderError::BufferSize {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { width, height, data })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn pixels(&self) -> &[Rgba8] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn pixels_mut(&mut self) -> &mut [Rgba8] {
        bytemuck::cast_slice_mut(&mut self.data)
    }

    fn index(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    /// Pixel at `(x, y)`, `None` outside the buffer.
    pub fn get(&self, x: i64, y: i64) -> Option<Rgba8> {
        self.index(x, y).map(|i| self.pixels()[i])
    }

    pub fn get_mut(&mut self, x: i64, y: i64) -> Option<&mut Rgba8> {
        let i = self.index(x, y)?;
        Some(&mut self.pixels_mut()[i])
    }

    /// Overwrite a pixel; out-of-bounds writes are ignored.
    pub fn set(&mut self, x: i64, y: i64, px: Rgba8) {
        if let Some(slot) = self.get_mut(x, y) {
            *slot = px;
        }
    }

    pub fn fill(&mut self, px: Rgba8) {
        self.pixels_mut().fill(px);
    }

    /// Number of pixels equal to `px`.
    pub fn count(&self, px: Rgba8) -> usize {
        self.pixels().iter().filter(|p| **p == px).count()
    }
}
