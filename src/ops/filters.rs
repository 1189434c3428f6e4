// ============================================================================
// SPATIAL FILTERS: Gaussian blur, adaptive contrast enhancement, sharpening
// ============================================================================
//
// Borders are handled by mirror reflection without repeating the edge sample
// (`dcb|abcd|cba`).  Blur runs as two separable passes on an f32 plane,
// each pass parallelized by row.
// ============================================================================

use rayon::prelude::*;

use crate::canvas::{ColorSpace, ImageBuffer};

/// Window used by adaptive contrast enhancement: 31×31, sigma 5.
pub const ACE_BLUR_RADIUS: usize = 15;
pub const ACE_BLUR_SIGMA: f32 = 5.0;
const ACE_QUANT_SLACK: f32 = 1e-3;

/// Mirror an out-of-range coordinate back into `0..n` (edge not repeated).
#[inline]
pub(crate) fn reflect101(mut i: isize, n: usize) -> usize {
    let n = n as isize;
    if n == 1 {
        return 0;
    }
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}

fn build_gaussian_kernel(radius: usize, sigma: f32) -> Vec<f32> {
    if radius == 0 {
        return vec![1.0];
    }
    let len = radius * 2 + 1;
    let mut kernel = vec![0.0f32; len];
    let s2 = 2.0 * sigma * sigma;
    let mut sum = 0.0f32;
    for (i, k) in kernel.iter_mut().enumerate() {
        let x = i as f32 - radius as f32;
        *k = (-x * x / s2).exp();
        sum += *k;
    }
    let inv = 1.0 / sum;
    for v in &mut kernel {
        *v *= inv;
    }
    kernel
}

/// Separable Gaussian blur of a single-channel f32 plane.
pub(crate) fn gaussian_blur_plane(
    plane: &[f32],
    w: usize,
    h: usize,
    radius: usize,
    sigma: f32,
) -> Vec<f32> {
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let kernel = build_gaussian_kernel(radius, sigma);
    let r = radius as isize;

    // --- Horizontal pass ---
    let mut tmp = vec![0.0f32; w * h];
    tmp.par_chunks_mut(w).enumerate().for_each(|(y, row_out)| {
        let row_in = &plane[y * w..(y + 1) * w];
        for (x, out) in row_out.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for (ki, &kv) in kernel.iter().enumerate() {
                let sx = reflect101(x as isize + ki as isize - r, w);
                acc += row_in[sx] * kv;
            }
            *out = acc;
        }
    });

    // --- Vertical pass ---
    let mut dst = vec![0.0f32; w * h];
    dst.par_chunks_mut(w).enumerate().for_each(|(y, row_out)| {
        for (x, out) in row_out.iter_mut().enumerate() {
            let mut acc = 0.0f32;
            for (ki, &kv) in kernel.iter().enumerate() {
                let sy = reflect101(y as isize + ki as isize - r, h);
                acc += tmp[sy * w + x] * kv;
            }
            *out = acc;
        }
    });
    dst
}

// ============================================================================
// ADAPTIVE CONTRAST ENHANCEMENT
// ============================================================================

/// Push each pixel away from its Gaussian-weighted local mean:
/// `out = clip(mean + strength * (g - mean), 0, 1)` on the normalised plane.
/// Expects and returns GRAY.
pub fn ace_enhance(src: &ImageBuffer, strength: f32) -> ImageBuffer {
    debug_assert_eq!(src.color_space(), ColorSpace::Gray);
    let (w, h) = (src.width() as usize, src.height() as usize);
    let norm: Vec<f32> = src.samples().iter().map(|&v| v as f32 / 255.0).collect();
    let mean = gaussian_blur_plane(&norm, w, h, ACE_BLUR_RADIUS, ACE_BLUR_SIGMA);

    let mut out = vec![0u8; w * h];
    if w > 0 && h > 0 {
        out.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
            let base = y * w;
            for (x, o) in row.iter_mut().enumerate() {
                let g = norm[base + x];
                let m = mean[base + x];
                let v = (m + strength * (g - m)).clamp(0.0, 1.0);
                *o = quantize_truncate(v);
            }
        });
    }
    ImageBuffer::from_parts(src.width(), src.height(), ColorSpace::Gray, out)
}

/// `[0, 1]` to `u8`, truncated toward zero like the gamma LUT. The slack keeps
/// f32 blur noise (e.g. 127.99998) from dropping an exact level.
fn quantize_truncate(v: f32) -> u8 {
    (v * 255.0 + ACE_QUANT_SLACK).min(255.0) as u8
}

// ============================================================================
// SHARPEN
// ============================================================================

/// 3×3 Laplacian sharpen, `[[0,-1,0],[-1,5,-1],[0,-1,0]]`, applied to each
/// channel independently with saturating output. Expects and returns BGR.
pub fn sharpen(src: &ImageBuffer) -> ImageBuffer {
    debug_assert_eq!(src.color_space(), ColorSpace::Bgr);
    let (w, h) = (src.width() as usize, src.height() as usize);
    let c = src.channels();
    let raw = src.samples();
    let stride = w * c;
    let mut dst = vec![0u8; stride * h];
    if w == 0 || h == 0 {
        return ImageBuffer::from_parts(src.width(), src.height(), ColorSpace::Bgr, dst);
    }

    dst.par_chunks_mut(stride).enumerate().for_each(|(y, row_out)| {
        let up = reflect101(y as isize - 1, h) * stride;
        let down = reflect101(y as isize + 1, h) * stride;
        let mid = y * stride;
        for x in 0..w {
            let left = reflect101(x as isize - 1, w) * c;
            let right = reflect101(x as isize + 1, w) * c;
            for ch in 0..c {
                let center = raw[mid + x * c + ch] as i32;
                let v = 5 * center
                    - raw[up + x * c + ch] as i32
                    - raw[down + x * c + ch] as i32
                    - raw[mid + left + ch] as i32
                    - raw[mid + right + ch] as i32;
                row_out[x * c + ch] = v.clamp(0, 255) as u8;
            }
        }
    });
    ImageBuffer::from_parts(src.width(), src.height(), ColorSpace::Bgr, dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn reflect101_mirrors_without_repeating_edge() {
        assert_eq!(reflect101(-1, 5), 1);
        assert_eq!(reflect101(-2, 5), 2);
        assert_eq!(reflect101(5, 5), 3);
        assert_eq!(reflect101(6, 5), 2);
        assert_eq!(reflect101(-7, 3), 1);
        assert_eq!(reflect101(4, 1), 0);
    }

    #[test]
    fn gaussian_kernel_is_normalised() {
        let k = build_gaussian_kernel(ACE_BLUR_RADIUS, ACE_BLUR_SIGMA);
        assert_eq!(k.len(), 31);
        assert_relative_eq!(k.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(k[0], k[30]);
    }

    #[test]
    fn ace_keeps_flat_image_flat() {
        let img = ImageBuffer::filled(12, 9, ColorSpace::Gray, 128);
        let out = ace_enhance(&img, 3.0);
        assert!(out.samples().iter().all(|&v| v == 128));
    }

    #[test]
    fn ace_increases_local_contrast_at_an_edge() {
        let (w, h) = (40u32, 4u32);
        let mut raw = Vec::new();
        for _ in 0..h {
            for x in 0..w {
                raw.push(if x < w / 2 { 100 } else { 150 });
            }
        }
        let img = ImageBuffer::from_raw(w, h, ColorSpace::Gray, raw).unwrap();
        let out = ace_enhance(&img, 2.0);
        let dark = out.pixel(w / 2 - 1, 0)[0];
        let bright = out.pixel(w / 2, 0)[0];
        assert!(dark < 100, "dark side {dark}");
        assert!(bright > 150, "bright side {bright}");
    }

    #[test]
    fn ace_output_truncates_toward_zero() {
        let (w, h) = (9usize, 3usize);
        let raw: Vec<u8> = (0..w * h).map(|i| 90 + (i % w) as u8 * 7).collect();
        let img = ImageBuffer::from_raw(w as u32, h as u32, ColorSpace::Gray, raw.clone()).unwrap();
        let strength = 1.7;
        let out = ace_enhance(&img, strength);

        let norm: Vec<f32> = raw.iter().map(|&v| v as f32 / 255.0).collect();
        let mean = gaussian_blur_plane(&norm, w, h, ACE_BLUR_RADIUS, ACE_BLUR_SIGMA);
        let mut upper_half_seen = false;
        for i in 0..w * h {
            let exact = (mean[i] + strength * (norm[i] - mean[i])).clamp(0.0, 1.0) * 255.0;
            assert_eq!(out.samples()[i], (exact + ACE_QUANT_SLACK) as u8, "sample {i}");
            if exact.fract() > 0.5 + ACE_QUANT_SLACK {
                upper_half_seen = true;
                assert_eq!(out.samples()[i], exact.floor() as u8, "sample {i}");
            }
        }
        assert!(upper_half_seen, "ramp should hit a value rounding would lift");
    }

    #[test]
    fn sharpen_leaves_flat_regions_untouched() {
        let img = ImageBuffer::filled(5, 5, ColorSpace::Bgr, 77);
        assert_eq!(sharpen(&img), img);
    }

    #[test]
    fn sharpen_amplifies_isolated_peak() {
        let mut raw = vec![50u8; 3 * 3 * 3];
        raw[(3 + 1) * 3] = 60; // center blue sample
        let img = ImageBuffer::from_raw(3, 3, ColorSpace::Bgr, raw).unwrap();
        let out = sharpen(&img);
        assert_eq!(out.pixel(1, 1), &[100, 50, 50]);
        // left neighbour mirrors onto the peak from both sides
        assert_eq!(out.pixel(0, 1), &[30, 50, 50]);
    }
}
