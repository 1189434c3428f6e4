// ============================================================================
// IMAGE BUFFER: immutable, row-major sample storage shared by every component
// ============================================================================
//
// Buffers are reference-counted so history entries, the displayed image and
// background jobs can hold the same pixels without copying.  No method hands
// out mutable access to the samples: every operator builds a new buffer.
// ============================================================================

use std::fmt;
use std::sync::Arc;

use image::{GrayImage, RgbImage};

use crate::ops::color_space;

/// Pixel layout tag. Operators declare the tag they consume and the tag they
/// produce; the controller converts explicitly when the two disagree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    /// Single-channel luminance.
    Gray,
    /// Three interleaved channels in blue, green, red order.
    Bgr,
    /// Three interleaved channels: L scaled to 0..255, a and b offset by 128.
    Lab,
}

impl ColorSpace {
    pub fn channels(self) -> usize {
        match self {
            ColorSpace::Gray => 1,
            ColorSpace::Bgr | ColorSpace::Lab => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ColorSpace::Gray => "GRAY",
            ColorSpace::Bgr => "BGR",
            ColorSpace::Lab => "LAB",
        }
    }
}

impl fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned by [`ImageBuffer::from_raw`] when the sample count does not match
/// `width * height * channels`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected} samples for {width}x{height} {space}, got {actual}")]
pub struct LayoutError {
    pub width: u32,
    pub height: u32,
    pub space: ColorSpace,
    pub expected: usize,
    pub actual: usize,
}

#[derive(Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    space: ColorSpace,
    samples: Arc<[u8]>,
}

impl ImageBuffer {
    pub fn from_raw(
        width: u32,
        height: u32,
        space: ColorSpace,
        samples: Vec<u8>,
    ) -> Result<Self, LayoutError> {
        let expected = width as usize * height as usize * space.channels();
        if samples.len() != expected {
            return Err(LayoutError {
                width,
                height,
                space,
                expected,
                actual: samples.len(),
            });
        }
        Ok(Self {
            width,
            height,
            space,
            samples: samples.into(),
        })
    }

    /// A buffer where every sample of every channel holds `value`.
    pub fn filled(width: u32, height: u32, space: ColorSpace, value: u8) -> Self {
        let len = width as usize * height as usize * space.channels();
        Self {
            width,
            height,
            space,
            samples: vec![value; len].into(),
        }
    }

    /// Internal constructor for operators that already sized their output.
    pub(crate) fn from_parts(width: u32, height: u32, space: ColorSpace, samples: Vec<u8>) -> Self {
        debug_assert_eq!(
            samples.len(),
            width as usize * height as usize * space.channels()
        );
        Self {
            width,
            height,
            space,
            samples: samples.into(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn color_space(&self) -> ColorSpace {
        self.space
    }

    pub fn channels(&self) -> usize {
        self.space.channels()
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn samples(&self) -> &[u8] {
        &self.samples
    }

    /// Samples of one row (all channels interleaved).
    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &self.samples[start..start + stride]
    }

    pub fn stride(&self) -> usize {
        self.width as usize * self.channels()
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let c = self.channels();
        let start = (y as usize * self.width as usize + x as usize) * c;
        &self.samples[start..start + c]
    }

    /// True when both buffers share the same backing allocation.
    pub fn shares_samples_with(&self, other: &ImageBuffer) -> bool {
        Arc::ptr_eq(&self.samples, &other.samples)
    }

    pub fn byte_size(&self) -> usize {
        self.samples.len()
    }

    /// Explicit tag conversion. Converting to the current tag is free (the
    /// samples are shared, not copied).
    pub fn convert_to(&self, target: ColorSpace) -> ImageBuffer {
        if self.space == target {
            return self.clone();
        }
        match (self.space, target) {
            (ColorSpace::Bgr, ColorSpace::Gray) => color_space::bgr_to_gray(self),
            (ColorSpace::Gray, ColorSpace::Bgr) => color_space::gray_to_bgr(self),
            (ColorSpace::Bgr, ColorSpace::Lab) => color_space::bgr_to_lab(self),
            (ColorSpace::Lab, ColorSpace::Bgr) => color_space::lab_to_bgr(self),
            (ColorSpace::Gray, ColorSpace::Lab) => {
                color_space::bgr_to_lab(&color_space::gray_to_bgr(self))
            }
            (ColorSpace::Lab, ColorSpace::Gray) => {
                color_space::bgr_to_gray(&color_space::lab_to_bgr(self))
            }
            _ => unreachable!("identical tags handled above"),
        }
    }

    /// Split into one single-channel plane per channel.
    pub fn split_planes(&self) -> Vec<Vec<u8>> {
        let c = self.channels();
        let n = self.width as usize * self.height as usize;
        let mut planes = vec![Vec::with_capacity(n); c];
        for px in self.samples.chunks_exact(c) {
            for (plane, &s) in planes.iter_mut().zip(px) {
                plane.push(s);
            }
        }
        planes
    }

    /// Interleave equally sized planes into a buffer tagged `space`.
    pub fn merge_planes(width: u32, height: u32, space: ColorSpace, planes: &[&[u8]]) -> Self {
        let c = space.channels();
        debug_assert_eq!(planes.len(), c);
        let n = width as usize * height as usize;
        let mut samples = Vec::with_capacity(n * c);
        for i in 0..n {
            for plane in planes {
                samples.push(plane[i]);
            }
        }
        Self::from_parts(width, height, space, samples)
    }

    // ------------------------------------------------------------------
    // Interop with the `image` crate (decode / encode boundary)
    // ------------------------------------------------------------------

    pub fn from_rgb_image(img: &RgbImage) -> Self {
        let (w, h) = img.dimensions();
        let mut samples = img.as_raw().clone();
        for px in samples.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        Self::from_parts(w, h, ColorSpace::Bgr, samples)
    }

    pub fn from_gray_image(img: &GrayImage) -> Self {
        let (w, h) = img.dimensions();
        Self::from_parts(w, h, ColorSpace::Gray, img.as_raw().clone())
    }

    /// RGB view for encoders and display. LAB and GRAY are converted first.
    pub fn to_rgb_image(&self) -> RgbImage {
        let bgr = self.convert_to(ColorSpace::Bgr);
        let mut raw = bgr.samples.to_vec();
        for px in raw.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        // Length is guaranteed by the BGR layout invariant.
        RgbImage::from_raw(self.width, self.height, raw)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    pub fn to_gray_image(&self) -> GrayImage {
        let gray = self.convert_to(ColorSpace::Gray);
        GrayImage::from_raw(self.width, self.height, gray.samples.to_vec())
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }
}

impl fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("space", &self.space)
            .field("bytes", &self.samples.len())
            .finish()
    }
}

// ============================================================================
// Side-by-side composition (before/after comparison)
// ============================================================================

/// Place `left` and `right` next to each other on a black BGR canvas.
/// The shorter image is top-aligned.
pub fn side_by_side(left: &ImageBuffer, right: &ImageBuffer) -> ImageBuffer {
    let left = left.convert_to(ColorSpace::Bgr);
    let right = right.convert_to(ColorSpace::Bgr);
    let w = left.width + right.width;
    let h = left.height.max(right.height);
    let stride = w as usize * 3;
    let mut samples = vec![0u8; stride * h as usize];
    for (y, row) in samples.chunks_exact_mut(stride).enumerate() {
        let y = y as u32;
        let split = left.stride();
        if y < left.height {
            row[..split].copy_from_slice(left.row(y));
        }
        if y < right.height {
            row[split..].copy_from_slice(right.row(y));
        }
    }
    ImageBuffer::from_parts(w, h, ColorSpace::Bgr, samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_rejects_wrong_length() {
        let err = ImageBuffer::from_raw(2, 2, ColorSpace::Bgr, vec![0; 11]).unwrap_err();
        assert_eq!(err.expected, 12);
        assert_eq!(err.actual, 11);
    }

    #[test]
    fn convert_to_same_tag_shares_samples() {
        let img = ImageBuffer::filled(4, 3, ColorSpace::Bgr, 7);
        let same = img.convert_to(ColorSpace::Bgr);
        assert!(same.shares_samples_with(&img));
    }

    #[test]
    fn rgb_round_trip_swaps_channel_order() {
        let rgb = RgbImage::from_raw(1, 1, vec![10, 20, 30]).unwrap();
        let buf = ImageBuffer::from_rgb_image(&rgb);
        assert_eq!(buf.samples(), &[30, 20, 10]);
        assert_eq!(buf.to_rgb_image().as_raw(), &vec![10, 20, 30]);
    }

    #[test]
    fn planes_split_and_merge() {
        let img = ImageBuffer::from_raw(2, 1, ColorSpace::Bgr, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let planes = img.split_planes();
        assert_eq!(planes[0], vec![1, 4]);
        assert_eq!(planes[2], vec![3, 6]);
        let refs: Vec<&[u8]> = planes.iter().map(|p| p.as_slice()).collect();
        let merged = ImageBuffer::merge_planes(2, 1, ColorSpace::Bgr, &refs);
        assert_eq!(merged, img);
    }

    #[test]
    fn side_by_side_pads_shorter_image() {
        let a = ImageBuffer::filled(2, 2, ColorSpace::Bgr, 100);
        let b = ImageBuffer::filled(3, 1, ColorSpace::Gray, 50);
        let out = side_by_side(&a, &b);
        assert_eq!(out.dimensions(), (5, 2));
        assert_eq!(out.pixel(0, 1), &[100, 100, 100]);
        assert_eq!(out.pixel(2, 0), &[50, 50, 50]);
        assert_eq!(out.pixel(2, 1), &[0, 0, 0]);
    }
}
