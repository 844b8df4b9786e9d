//! Canvas composite operations on non-premultiplied RGBA8.
//!
//! Blend modes follow the W3C Compositing and Blending Level 1 formulas:
//!
//! ```text
//!  Cs' = (1 - ab) * Cs + ab * B(Cb, Cs)
//!  ao  = as + ab * (1 - as)
//!  Co  = (as * Cs' + ab * Cb * (1 - as)) / ao
//! ```
//!
//! `destination-out` keeps the backdrop color and scales its alpha by
//! `1 - as`.

use std::fmt;
use std::str::FromStr;

use crate::buffer::Rgba8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompositeOp {
    #[default]
    SourceOver,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    Hue,
    Saturation,
    Color,
    Luminosity,
    DestinationOut,
}

impl CompositeOp {
    pub const ALL: [CompositeOp; 17] = [
        CompositeOp::SourceOver,
        CompositeOp::Multiply,
        CompositeOp::Screen,
        CompositeOp::Overlay,
        CompositeOp::Darken,
        CompositeOp::Lighten,
        CompositeOp::ColorDodge,
        CompositeOp::ColorBurn,
        CompositeOp::HardLight,
        CompositeOp::SoftLight,
        CompositeOp::Difference,
        CompositeOp::Exclusion,
        CompositeOp::Hue,
        CompositeOp::Saturation,
        CompositeOp::Color,
        CompositeOp::Luminosity,
        CompositeOp::DestinationOut,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompositeOp::SourceOver => "source-over",
            CompositeOp::Multiply => "multiply",
            CompositeOp::Screen => "screen",
            CompositeOp::Overlay => "overlay",
            CompositeOp::Darken => "darken",
            CompositeOp::Lighten => "lighten",
            CompositeOp::ColorDodge => "color-dodge",
            CompositeOp::ColorBurn => "color-burn",
            CompositeOp::HardLight => "hard-light",
            CompositeOp::SoftLight => "soft-light",
            CompositeOp::Difference => "difference",
            CompositeOp::Exclusion => "exclusion",
            CompositeOp::Hue => "hue",
            CompositeOp::Saturation => "saturation",
            CompositeOp::Color => "color",
            CompositeOp::Luminosity => "luminosity",
            CompositeOp::DestinationOut => "destination-out",
        }
    }

    /// Parse a blend mode name, falling back to `source-over`.
    pub fn from_name_lossy(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            log::debug!("Unknown blend mode '{}', using source-over", name);
            CompositeOp::SourceOver
        })
    }

    /// Composite `src` (straight RGB in 0..1) with effective alpha `src_alpha`
    /// onto `dst`.
    pub fn apply(&self, dst: &mut Rgba8, src: [f32; 3], src_alpha: f32) {
        let a_s = src_alpha.clamp(0.0, 1.0);
        if a_s <= 0.0 {
            return;
        }
        let a_b = dst.a as f32 / 255.0;

        if *self == CompositeOp::DestinationOut {
            dst.a = to_byte(a_b * (1.0 - a_s));
            return;
        }

        let cb = [dst.r as f32 / 255.0, dst.g as f32 / 255.0, dst.b as f32 / 255.0];
        let blended = self.blend(cb, src);
        let a_o = a_s + a_b * (1.0 - a_s);
        let mut out = [0.0f32; 3];
        for i in 0..3 {
            let cs = (1.0 - a_b) * src[i] + a_b * blended[i];
            out[i] = (a_s * cs + a_b * cb[i] * (1.0 - a_s)) / a_o;
        }
        *dst = Rgba8::new(to_byte(out[0]), to_byte(out[1]), to_byte(out[2]), to_byte(a_o));
    }

    /// B(Cb, Cs) for this mode.
    fn blend(&self, cb: [f32; 3], cs: [f32; 3]) -> [f32; 3] {
        let sep = |f: fn(f32, f32) -> f32| [f(cb[0], cs[0]), f(cb[1], cs[1]), f(cb[2], cs[2])];
        match self {
            CompositeOp::SourceOver | CompositeOp::DestinationOut => cs,
            CompositeOp::Multiply => sep(|b, s| b * s),
            CompositeOp::Screen => sep(screen),
            CompositeOp::Overlay => sep(|b, s| hard_light(s, b)),
            CompositeOp::Darken => sep(f32::min),
            CompositeOp::Lighten => sep(f32::max),
            CompositeOp::ColorDodge => sep(color_dodge),
            CompositeOp::ColorBurn => sep(color_burn),
            CompositeOp::HardLight => sep(hard_light),
            CompositeOp::SoftLight => sep(soft_light),
            CompositeOp::Difference => sep(|b, s| (b - s).abs()),
            CompositeOp::Exclusion => sep(|b, s| b + s - 2.0 * b * s),
            CompositeOp::Hue => set_lum(set_sat(cs, sat(cb)), lum(cb)),
            CompositeOp::Saturation => set_lum(set_sat(cb, sat(cs)), lum(cb)),
            CompositeOp::Color => set_lum(cs, lum(cb)),
            CompositeOp::Luminosity => set_lum(cb, lum(cs)),
        }
    }
}

impl fmt::Display for CompositeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompositeOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CompositeOp::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

fn to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

// ---------------------------------------------------------------------------
// Separable blend functions
// ---------------------------------------------------------------------------

fn screen(b: f32, s: f32) -> f32 {
    b + s - b * s
}

fn hard_light(b: f32, s: f32) -> f32 {
    if s <= 0.5 {
        b * 2.0 * s
    } else {
        screen(b, 2.0 * s - 1.0)
    }
}

fn color_dodge(b: f32, s: f32) -> f32 {
    if b == 0.0 {
        0.0
    } else if s >= 1.0 {
        1.0
    } else {
        (b / (1.0 - s)).min(1.0)
    }
}

fn color_burn(b: f32, s: f32) -> f32 {
    if b >= 1.0 {
        1.0
    } else if s == 0.0 {
        0.0
    } else {
        1.0 - ((1.0 - b) / s).min(1.0)
    }
}

fn soft_light(b: f32, s: f32) -> f32 {
    if s <= 0.5 {
        b - (1.0 - 2.0 * s) * b * (1.0 - b)
    } else {
        let d = if b <= 0.25 {
            ((16.0 * b - 12.0) * b + 4.0) * b
        } else {
            b.sqrt()
        };
        b + (2.0 * s - 1.0) * (d - b)
    }
}

// ---------------------------------------------------------------------------
// Non-separable helpers
// ---------------------------------------------------------------------------

fn lum(c: [f32; 3]) -> f32 {
    0.3 * c[0] + 0.59 * c[1] + 0.11 * c[2]
}

fn clip_color(c: [f32; 3]) -> [f32; 3] {
    let l = lum(c);
    let n = c[0].min(c[1]).min(c[2]);
    let x = c[0].max(c[1]).max(c[2]);
    let mut out = c;
    if n < 0.0 && n < l {
        for v in &mut out {
            *v = l + (*v - l) * l / (l - n);
        }
    }
    if x > 1.0 && x > l {
        for v in &mut out {
            *v = l + (*v - l) * (1.0 - l) / (x - l);
        }
    }
    out
}

fn set_lum(c: [f32; 3], l: f32) -> [f32; 3] {
    let d = l - lum(c);
    clip_color([c[0] + d, c[1] + d, c[2] + d])
}

fn sat(c: [f32; 3]) -> f32 {
    c[0].max(c[1]).max(c[2]) - c[0].min(c[1]).min(c[2])
}

fn set_sat(c: [f32; 3], s: f32) -> [f32; 3] {
    let mut idx = [0usize, 1, 2];
    idx.sort_by(|&a, &b| c[a].total_cmp(&c[b]));
    let [min, mid, max] = idx;
    let mut out = [0.0f32; 3];
    if c[max] > c[min] {
        out[mid] = (c[mid] - c[min]) * s / (c[max] - c[min]);
        out[max] = s;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPAQUE_GRAY: Rgba8 = Rgba8::new(128, 128, 128, 255);

    #[test]
    fn test_names_round_trip() {
        for op in CompositeOp::ALL {
            assert_eq!(op.as_str().parse::<CompositeOp>(), Ok(op));
        }
        assert_eq!(CompositeOp::from_name_lossy("plasma"), CompositeOp::SourceOver);
    }

    #[test]
    fn test_source_over_opaque_replaces() {
        let mut px = OPAQUE_GRAY;
        CompositeOp::SourceOver.apply(&mut px, [1.0, 0.0, 0.0], 1.0);
        assert_eq!(px, Rgba8::new(255, 0, 0, 255));
    }

    #[test]
    fn test_source_over_on_transparent_keeps_color() {
        let mut px = Rgba8::TRANSPARENT;
        CompositeOp::SourceOver.apply(&mut px, [0.0, 0.0, 1.0], 0.5);
        assert_eq!(px, Rgba8::new(0, 0, 255, 128));
    }

    #[test]
    fn test_multiply_and_screen() {
        let mut m = OPAQUE_GRAY;
        CompositeOp::Multiply.apply(&mut m, [0.5, 0.5, 0.5], 1.0);
        assert_eq!(m.r, 64);
        let mut s = OPAQUE_GRAY;
        CompositeOp::Screen.apply(&mut s, [0.5, 0.5, 0.5], 1.0);
        assert!((191..=192).contains(&s.r));
    }

    #[test]
    fn test_difference_of_equal_is_black() {
        let mut px = Rgba8::new(200, 100, 50, 255);
        CompositeOp::Difference.apply(&mut px, [200.0 / 255.0, 100.0 / 255.0, 50.0 / 255.0], 1.0);
        assert_eq!(px, Rgba8::new(0, 0, 0, 255));
    }

    #[test]
    fn test_luminosity_of_gray_over_gray() {
        let mut px = OPAQUE_GRAY;
        CompositeOp::Luminosity.apply(&mut px, [1.0, 1.0, 1.0], 1.0);
        assert_eq!(px, Rgba8::new(255, 255, 255, 255));
    }

    #[test]
    fn test_destination_out() {
        let mut px = Rgba8::new(10, 20, 30, 255);
        CompositeOp::DestinationOut.apply(&mut px, [0.0, 0.0, 0.0], 1.0);
        assert_eq!(px.a, 0);
        let mut half = Rgba8::new(10, 20, 30, 200);
        CompositeOp::DestinationOut.apply(&mut half, [0.0, 0.0, 0.0], 0.5);
        assert_eq!(half, Rgba8::new(10, 20, 30, 100));
    }

    #[test]
    fn test_zero_alpha_is_noop() {
        for op in CompositeOp::ALL {
            let mut px = OPAQUE_GRAY;
            op.apply(&mut px, [1.0, 0.0, 0.0], 0.0);
            assert_eq!(px, OPAQUE_GRAY, "{op}");
        }
    }

    #[test]
    fn test_blend_on_transparent_backdrop_is_source() {
        for op in CompositeOp::ALL.into_iter().filter(|op| *op != CompositeOp::DestinationOut) {
            let mut px = Rgba8::TRANSPARENT;
            op.apply(&mut px, [0.2, 0.4, 0.6], 1.0);
            assert_eq!(px, Rgba8::new(51, 102, 153, 255), "{op}");
        }
    }
}
