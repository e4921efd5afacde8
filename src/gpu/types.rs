// ============================================================================
// GPU TYPES - host mirrors of the structs in STRUCTS_WGSL
// ============================================================================
//
// Every type here is `Pod` with a size that is a multiple of 4 bytes, and the
// field order/padding matches WGSL storage layout rules exactly.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Per-frame global parameter block shared by every field kernel.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FParam {
    /// 1 = Mandelbrot, 0 = Julia.
    pub mandel: i32,
    pub max_iter: i32,
    /// Julia constant (re, im).
    pub c: [f32; 2],
    /// re_min, re_max, im_min, im_max.
    pub view_rect: [f32; 4],
}

/// Orbit-trap region in the complex plane.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct TrapBox {
    pub bot: f32,
    pub top: f32,
    pub left: f32,
    pub right: f32,
}

impl Default for TrapBox {
    fn default() -> Self {
        Self {
            bot: 0.0,
            top: 0.5,
            left: 0.0,
            right: 0.5,
        }
    }
}

/// Colour-map frequencies for the single-field sine remap.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Freqs {
    pub f1: f32,
    pub f2: f32,
    pub f3: f32,
}

/// Dimensions of an uploaded map image.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ImDims {
    pub w: i32,
    pub h: i32,
}

/// Execution domain written by the dispatcher for each invocation.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Domain {
    pub rows: u32,
    pub cols: u32,
    pub _pad0: u32,
    pub _pad1: u32,
}

/// Per-channel min/max accumulator for normalised packing.  Values are the
/// bit patterns of non-negative `f32`s, which order the same as `u32`s.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct ChannelRange {
    pub lo: [u32; 3],
    pub hi: [u32; 3],
}

impl ChannelRange {
    /// Seed value: every `lo` above any finite field value, every `hi` at zero.
    pub fn empty() -> Self {
        Self {
            lo: [f32::MAX.to_bits(); 3],
            hi: [0; 3],
        }
    }

    pub fn channel(&self, ch: usize) -> (f32, f32) {
        (f32::from_bits(self.lo[ch]), f32::from_bits(self.hi[ch]))
    }
}

/// One display pixel.  Three colour channels padded with an opaque alpha so
/// a pixel is one device word.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Pixel {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Pixel {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_match_wgsl_sizes() {
        assert_eq!(std::mem::size_of::<FParam>(), 32);
        assert_eq!(std::mem::size_of::<TrapBox>(), 16);
        assert_eq!(std::mem::size_of::<Freqs>(), 12);
        assert_eq!(std::mem::size_of::<ImDims>(), 8);
        assert_eq!(std::mem::size_of::<Domain>(), 16);
        assert_eq!(std::mem::size_of::<ChannelRange>(), 24);
        assert_eq!(std::mem::size_of::<Pixel>(), 4);
    }

    #[test]
    fn pixel_word_is_little_endian_rgba() {
        let word: u32 = bytemuck::cast(Pixel::rgb(255, 0, 0));
        assert_eq!(word, 0xFF00_00FF);
    }

    #[test]
    fn empty_range_orders_correctly() {
        let r = ChannelRange::empty();
        assert!(r.lo[0] > 1.0f32.to_bits());
        assert_eq!(r.channel(2).1, 0.0);
    }
}
