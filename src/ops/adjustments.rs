// ============================================================================
// ADJUSTMENT OPERATIONS: tone and colour adjustments on BGR buffers
// ============================================================================
//
// Gamma is a pure lookup table; saturation round-trips through HSV per pixel.
// Both are parallelized per row via `map_pixels`.
// ============================================================================

use crate::canvas::{ColorSpace, ImageBuffer};
use crate::ops::color_space::{hsv_to_rgb, rgb_to_hsv};
use crate::ops::{apply_lut, map_pixels};

// ============================================================================
// GAMMA
// ============================================================================

/// `out = (in / 255) ^ (1 / gamma) * 255`, truncated toward zero.
pub fn build_gamma_lut(gamma: f32) -> [u8; 256] {
    let inv = 1.0 / gamma as f64;
    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        let x = (i as f64 / 255.0).powf(inv) * 255.0;
        *v = x.clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Per-channel gamma correction. Expects and returns BGR.
pub fn gamma_correction(src: &ImageBuffer, gamma: f32) -> ImageBuffer {
    debug_assert_eq!(src.color_space(), ColorSpace::Bgr);
    apply_lut(src, &build_gamma_lut(gamma))
}

// ============================================================================
// SATURATION
// ============================================================================

/// Scale HSV saturation by `factor` (clipped to 1.0). Hue and value are kept,
/// so a factor of 1 returns the input unchanged and 0 yields neutral grey at
/// each pixel's value.
pub fn saturation_boost(src: &ImageBuffer, factor: f32) -> ImageBuffer {
    debug_assert_eq!(src.color_space(), ColorSpace::Bgr);
    map_pixels(src, ColorSpace::Bgr, |px, out| {
        let b = px[0] as f32 / 255.0;
        let g = px[1] as f32 / 255.0;
        let r = px[2] as f32 / 255.0;
        let (h, s, v) = rgb_to_hsv(r, g, b);
        let (nr, ng, nb) = hsv_to_rgb(h, (s * factor).clamp(0.0, 1.0), v);
        out[0] = (nb * 255.0).round().clamp(0.0, 255.0) as u8;
        out[1] = (ng * 255.0).round().clamp(0.0, 255.0) as u8;
        out[2] = (nr * 255.0).round().clamp(0.0, 255.0) as u8;
    })
}
