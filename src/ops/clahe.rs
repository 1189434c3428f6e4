// ============================================================================
// CLAHE: contrast-limited adaptive histogram equalization
// ============================================================================
//
// The lightness plane is divided into an 8×8 grid of tiles.  Each tile gets a
// clipped, redistributed histogram turned into a lookup table; every pixel is
// then mapped through a bilinear blend of the four nearest tile tables.
// Planes not divisible by the grid are mirror-padded for the histogram pass.
// ============================================================================

use rayon::prelude::*;

use crate::canvas::{ColorSpace, ImageBuffer};
use crate::ops::filters::reflect101;

pub const TILE_GRID: usize = 8;
const BINS: usize = 256;

/// Contrast-limited equalization of the LAB lightness channel.
/// Expects and returns BGR.
pub fn clahe_enhance(src: &ImageBuffer, clip_limit: f32) -> ImageBuffer {
    debug_assert_eq!(src.color_space(), ColorSpace::Bgr);
    if src.is_empty() {
        return src.clone();
    }
    let lab = src.convert_to(ColorSpace::Lab);
    let planes = lab.split_planes();
    let (w, h) = (src.width() as usize, src.height() as usize);
    let l = clahe_plane(&planes[0], w, h, clip_limit, TILE_GRID, TILE_GRID);
    ImageBuffer::merge_planes(
        src.width(),
        src.height(),
        ColorSpace::Lab,
        &[&l, &planes[1], &planes[2]],
    )
    .convert_to(ColorSpace::Bgr)
}

/// Run CLAHE on a single 8-bit plane with a `tiles_x × tiles_y` grid.
pub fn clahe_plane(
    plane: &[u8],
    w: usize,
    h: usize,
    clip_limit: f32,
    tiles_x: usize,
    tiles_y: usize,
) -> Vec<u8> {
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let tile_w = w.div_ceil(tiles_x);
    let tile_h = h.div_ceil(tiles_y);
    let tile_area = tile_w * tile_h;
    let clip = if clip_limit > 0.0 {
        ((clip_limit * tile_area as f32 / BINS as f32) as usize).max(1)
    } else {
        0
    };
    let lut_scale = (BINS - 1) as f32 / tile_area as f32;

    // --- Per-tile lookup tables ---
    let luts: Vec<[u8; BINS]> = (0..tiles_x * tiles_y)
        .into_par_iter()
        .map(|t| {
            let (tx, ty) = (t % tiles_x, t / tiles_x);
            let mut hist = [0usize; BINS];
            for py in ty * tile_h..(ty + 1) * tile_h {
                let sy = reflect101(py as isize, h);
                for px in tx * tile_w..(tx + 1) * tile_w {
                    let sx = reflect101(px as isize, w);
                    hist[plane[sy * w + sx] as usize] += 1;
                }
            }
            if clip > 0 {
                clip_histogram(&mut hist, clip);
            }
            let mut lut = [0u8; BINS];
            let mut sum = 0usize;
            for (v, &count) in lut.iter_mut().zip(hist.iter()) {
                sum += count;
                *v = (sum as f32 * lut_scale).round().clamp(0.0, 255.0) as u8;
            }
            lut
        })
        .collect();

    // --- Bilinear interpolation between neighbouring tiles ---
    let inv_tw = 1.0 / tile_w as f32;
    let inv_th = 1.0 / tile_h as f32;
    let mut out = vec![0u8; w * h];
    out.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        let (ty1, ty2, ya) = tile_neighbours(y as f32 * inv_th - 0.5, tiles_y);
        for (x, o) in row.iter_mut().enumerate() {
            let (tx1, tx2, xa) = tile_neighbours(x as f32 * inv_tw - 0.5, tiles_x);
            let v = plane[y * w + x] as usize;
            let top = luts[ty1 * tiles_x + tx1][v] as f32 * (1.0 - xa)
                + luts[ty1 * tiles_x + tx2][v] as f32 * xa;
            let bottom = luts[ty2 * tiles_x + tx1][v] as f32 * (1.0 - xa)
                + luts[ty2 * tiles_x + tx2][v] as f32 * xa;
            *o = (top * (1.0 - ya) + bottom * ya).round().clamp(0.0, 255.0) as u8;
        }
    });
    out
}

/// Indices of the two tiles straddling a fractional tile coordinate, plus the
/// weight of the second one.
#[inline]
fn tile_neighbours(t: f32, tiles: usize) -> (usize, usize, f32) {
    let t1 = t.floor();
    let frac = t - t1;
    let i1 = t1.max(0.0) as usize;
    let i2 = ((t1 + 1.0).max(0.0) as usize).min(tiles - 1);
    (i1.min(tiles - 1), i2, frac)
}

/// Cap every bin at `clip` and spread the excess uniformly; any remainder is
/// handed out one count at a time at an even stride across the bins.
fn clip_histogram(hist: &mut [usize; BINS], clip: usize) {
    let mut excess = 0usize;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }
    let batch = excess / BINS;
    let mut residual = excess - batch * BINS;
    for bin in hist.iter_mut() {
        *bin += batch;
    }
    if residual > 0 {
        let step = (BINS / residual).max(1);
        let mut i = 0;
        while i < BINS && residual > 0 {
            hist[i] += 1;
            residual -= 1;
            i += step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_histogram_preserves_total_count() {
        let mut hist = [0usize; BINS];
        hist[10] = 500;
        hist[200] = 37;
        clip_histogram(&mut hist, 4);
        assert_eq!(hist.iter().sum::<usize>(), 537);
        assert!(hist.iter().all(|&c| c <= 4 + 3));
    }

    #[test]
    fn tile_neighbours_clamp_at_borders() {
        assert_eq!(tile_neighbours(-0.5, 8), (0, 0, 0.5));
        let (a, b, _) = tile_neighbours(7.6, 8);
        assert_eq!((a, b), (7, 7));
        let (a, b, f) = tile_neighbours(2.25, 8);
        assert_eq!((a, b), (2, 3));
        assert!((f - 0.25).abs() < 1e-6);
    }

    #[test]
    fn low_contrast_plane_is_stretched() {
        let (w, h) = (64usize, 64usize);
        let plane: Vec<u8> = (0..w * h).map(|i| 100 + ((i % w) * 20 / w) as u8).collect();
        let out = clahe_plane(&plane, w, h, 4.0, 8, 8);
        let range = |p: &[u8]| *p.iter().max().unwrap() as i32 - *p.iter().min().unwrap() as i32;
        assert!(range(&out) > range(&plane));
    }

    #[test]
    fn uniform_image_stays_uniform_and_keeps_layout() {
        let img = ImageBuffer::filled(20, 13, ColorSpace::Bgr, 90);
        let out = clahe_enhance(&img, 2.5);
        assert_eq!(out.dimensions(), (20, 13));
        assert_eq!(out.color_space(), ColorSpace::Bgr);
        let first = out.pixel(0, 0).to_vec();
        assert!(out.samples().chunks_exact(3).all(|px| px == first.as_slice()));
    }

    #[test]
    fn non_divisible_sizes_are_handled() {
        let plane: Vec<u8> = (0..7 * 5).map(|i| (i * 7) as u8).collect();
        let out = clahe_plane(&plane, 7, 5, 2.0, 8, 8);
        assert_eq!(out.len(), 35);
    }
}
