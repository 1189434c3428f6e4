// ============================================================================
// COLOR SPACE CONVERSIONS: BGR ↔ GRAY / LAB / HSV
// ============================================================================
//
// 8-bit LAB follows the common packed convention: L is scaled from 0..100 to
// 0..255 and a/b are offset by 128.  sRGB companding is applied before the
// XYZ transform (D65 white).
// ============================================================================

use std::sync::OnceLock;

use crate::canvas::{ColorSpace, ImageBuffer};
use crate::ops::map_pixels;

// BT.601 luma weights in 14-bit fixed point (sum = 16384).
const GRAY_B: u32 = 1868;
const GRAY_G: u32 = 9617;
const GRAY_R: u32 = 4899;

const WHITE_X: f32 = 0.950456;
const WHITE_Z: f32 = 1.088754;
const LAB_EPSILON: f32 = 0.008856;
const LAB_KAPPA: f32 = 903.3;

#[inline]
pub fn luma(b: u8, g: u8, r: u8) -> u8 {
    ((b as u32 * GRAY_B + g as u32 * GRAY_G + r as u32 * GRAY_R + (1 << 13)) >> 14) as u8
}

pub fn bgr_to_gray(src: &ImageBuffer) -> ImageBuffer {
    debug_assert_eq!(src.color_space(), ColorSpace::Bgr);
    map_pixels(src, ColorSpace::Gray, |px, out| {
        out[0] = luma(px[0], px[1], px[2]);
    })
}

pub fn gray_to_bgr(src: &ImageBuffer) -> ImageBuffer {
    debug_assert_eq!(src.color_space(), ColorSpace::Gray);
    map_pixels(src, ColorSpace::Bgr, |px, out| {
        out.fill(px[0]);
    })
}

// ---------------------------------------------------------------------------
//  LAB
// ---------------------------------------------------------------------------

/// sRGB decode table: 8-bit code value → linear light.
fn srgb_to_linear_lut() -> &'static [f32; 256] {
    static LUT: OnceLock<[f32; 256]> = OnceLock::new();
    LUT.get_or_init(|| {
        let mut lut = [0.0f32; 256];
        for (i, v) in lut.iter_mut().enumerate() {
            let c = i as f32 / 255.0;
            *v = if c <= 0.04045 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            };
        }
        lut
    })
}

#[inline]
fn linear_to_srgb(v: f32) -> f32 {
    let v = v.clamp(0.0, 1.0);
    if v <= 0.003_130_8 {
        12.92 * v
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

#[inline]
fn lab_f(t: f32) -> f32 {
    if t > LAB_EPSILON {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

#[inline]
fn lab_f_inv(f: f32) -> f32 {
    let cube = f * f * f;
    if cube > LAB_EPSILON {
        cube
    } else {
        (f - 16.0 / 116.0) / 7.787
    }
}

/// BGR (8-bit) → L in 0..100, a and b unbounded floats.
#[inline]
pub fn bgr_to_lab_f32(b: u8, g: u8, r: u8) -> (f32, f32, f32) {
    let lut = srgb_to_linear_lut();
    let (rl, gl, bl) = (lut[r as usize], lut[g as usize], lut[b as usize]);
    let x = (0.412_453 * rl + 0.357_580 * gl + 0.180_423 * bl) / WHITE_X;
    let y = 0.212_671 * rl + 0.715_160 * gl + 0.072_169 * bl;
    let z = (0.019_334 * rl + 0.119_193 * gl + 0.950_227 * bl) / WHITE_Z;
    let fy = lab_f(y);
    let l = if y > LAB_EPSILON {
        116.0 * y.cbrt() - 16.0
    } else {
        LAB_KAPPA * y
    };
    (l, 500.0 * (lab_f(x) - fy), 200.0 * (fy - lab_f(z)))
}

/// L in 0..100 and a/b floats → BGR (8-bit).
#[inline]
pub fn lab_f32_to_bgr(l: f32, a: f32, b: f32) -> [u8; 3] {
    let fy = (l + 16.0) / 116.0;
    let y = if l > LAB_KAPPA * LAB_EPSILON {
        fy * fy * fy
    } else {
        l / LAB_KAPPA
    };
    let x = lab_f_inv(fy + a / 500.0) * WHITE_X;
    let z = lab_f_inv(fy - b / 200.0) * WHITE_Z;
    let r = 3.240_479 * x - 1.537_150 * y - 0.498_535 * z;
    let g = -0.969_256 * x + 1.875_991 * y + 0.041_556 * z;
    let bl = 0.055_648 * x - 0.204_043 * y + 1.057_311 * z;
    let enc = |v: f32| (linear_to_srgb(v) * 255.0).round().clamp(0.0, 255.0) as u8;
    [enc(bl), enc(g), enc(r)]
}

#[inline]
pub(crate) fn pack_lab(l: f32, a: f32, b: f32) -> [u8; 3] {
    [
        (l * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8,
        (a + 128.0).round().clamp(0.0, 255.0) as u8,
        (b + 128.0).round().clamp(0.0, 255.0) as u8,
    ]
}

#[inline]
pub fn unpack_lab(px: &[u8]) -> (f32, f32, f32) {
    (
        px[0] as f32 * 100.0 / 255.0,
        px[1] as f32 - 128.0,
        px[2] as f32 - 128.0,
    )
}

pub fn bgr_to_lab(src: &ImageBuffer) -> ImageBuffer {
    debug_assert_eq!(src.color_space(), ColorSpace::Bgr);
    map_pixels(src, ColorSpace::Lab, |px, out| {
        let (l, a, b) = bgr_to_lab_f32(px[0], px[1], px[2]);
        out.copy_from_slice(&pack_lab(l, a, b));
    })
}

pub fn lab_to_bgr(src: &ImageBuffer) -> ImageBuffer {
    debug_assert_eq!(src.color_space(), ColorSpace::Lab);
    map_pixels(src, ColorSpace::Bgr, |px, out| {
        let (l, a, b) = unpack_lab(px);
        out.copy_from_slice(&lab_f32_to_bgr(l, a, b));
    })
}

// ---------------------------------------------------------------------------
//  HSV (float, hue in degrees)
// ---------------------------------------------------------------------------

/// RGB in 0..1 → (hue 0..360, saturation 0..1, value 0..1).
pub fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let v = max;
    let s = if max > 0.0 { delta / max } else { 0.0 };
    if delta <= 0.0 {
        return (0.0, s, v);
    }
    let h = if max == r {
        60.0 * ((g - b) / delta)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    (if h < 0.0 { h + 360.0 } else { h }, s, v)
}

pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    if s <= 0.0 {
        return (v, v, v);
    }
    let h = (h % 360.0) / 60.0;
    let sector = h.floor();
    let f = h - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match sector as u32 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luma_of_neutral_is_identity() {
        for v in [0u8, 1, 77, 128, 200, 255] {
            assert_eq!(luma(v, v, v), v);
        }
    }

    #[test]
    fn lab_of_neutral_has_zero_chroma() {
        for v in [0u8, 64, 128, 255] {
            let (_, a, b) = bgr_to_lab_f32(v, v, v);
            assert!(a.abs() < 0.5, "a={a}");
            assert!(b.abs() < 0.5, "b={b}");
        }
        let (l, _, _) = bgr_to_lab_f32(255, 255, 255);
        assert!((l - 100.0).abs() < 0.1);
    }

    #[test]
    fn lab_round_trip_is_close() {
        for &(b, g, r) in &[(10u8, 200u8, 90u8), (255, 0, 0), (30, 30, 30), (128, 64, 250)] {
            let (l, a, bb) = bgr_to_lab_f32(b, g, r);
            let back = lab_f32_to_bgr(l, a, bb);
            for (x, y) in back.iter().zip([b, g, r]) {
                assert!((*x as i32 - y as i32).abs() <= 1, "{back:?} vs {:?}", (b, g, r));
            }
        }
    }

    #[test]
    fn hsv_round_trip() {
        let (h, s, v) = rgb_to_hsv(0.2, 0.6, 0.4);
        let (r, g, b) = hsv_to_rgb(h, s, v);
        assert!((r - 0.2).abs() < 1e-5);
        assert!((g - 0.6).abs() < 1e-5);
        assert!((b - 0.4).abs() < 1e-5);
    }

    #[test]
    fn packed_lab_buffer_round_trip() {
        let src = ImageBuffer::from_raw(2, 1, ColorSpace::Bgr, vec![20, 120, 220, 90, 90, 90]).unwrap();
        let lab = bgr_to_lab(&src);
        assert_eq!(lab.color_space(), ColorSpace::Lab);
        let back = lab_to_bgr(&lab);
        for (x, y) in back.samples().iter().zip(src.samples()) {
            assert!((*x as i32 - *y as i32).abs() <= 3);
        }
    }
}
