use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::tga::TgaEncoder;
use image::{DynamicImage, ImageError, RgbImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::str::FromStr;

use crate::canvas::ImageBuffer;
use crate::error::IoError;

// ============================================================================
// SAVE FORMATS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SaveFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
    Bmp,
    Tga,
    Tiff,
}

/// Compression options for TIFF format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TiffCompression {
    #[default]
    None,
    Lzw,
    Deflate,
}

impl SaveFormat {
    pub const ALL: [SaveFormat; 6] = [
        SaveFormat::Png,
        SaveFormat::Jpeg,
        SaveFormat::Webp,
        SaveFormat::Bmp,
        SaveFormat::Tga,
        SaveFormat::Tiff,
    ];

    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Png => "png",
            SaveFormat::Jpeg => "jpg",
            SaveFormat::Webp => "webp",
            SaveFormat::Bmp => "bmp",
            SaveFormat::Tga => "tga",
            SaveFormat::Tiff => "tiff",
        }
    }

    pub fn supports_quality(&self) -> bool {
        matches!(self, SaveFormat::Jpeg)
    }

    pub fn from_extension(ext: &str) -> Option<SaveFormat> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(SaveFormat::Png),
            "jpg" | "jpeg" => Some(SaveFormat::Jpeg),
            "webp" => Some(SaveFormat::Webp),
            "bmp" => Some(SaveFormat::Bmp),
            "tga" => Some(SaveFormat::Tga),
            "tif" | "tiff" => Some(SaveFormat::Tiff),
            _ => None,
        }
    }

    /// Infer the format from a path's extension.
    pub fn infer(path: &Path) -> Result<SaveFormat, IoError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        SaveFormat::from_extension(&ext).ok_or(IoError::UnsupportedFormat(ext))
    }
}

impl FromStr for SaveFormat {
    type Err = IoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SaveFormat::from_extension(s.trim()).ok_or_else(|| IoError::UnsupportedFormat(s.to_string()))
    }
}

impl FromStr for TiffCompression {
    type Err = IoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(TiffCompression::None),
            "lzw" => Ok(TiffCompression::Lzw),
            "deflate" | "zip" => Ok(TiffCompression::Deflate),
            other => Err(IoError::UnsupportedFormat(format!("tiff compression '{}'", other))),
        }
    }
}

/// Per-save encoder options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncodeOptions {
    /// JPEG quality, 1..=100.
    pub quality: u8,
    pub tiff_compression: TiffCompression,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            quality: 90,
            tiff_compression: TiffCompression::default(),
        }
    }
}

// ============================================================================
// CODEC SEAM
// ============================================================================

/// Decode/encode collaborator used by the pipeline controller.
pub trait ImageCodec: Send {
    /// Decode into a BGR-tagged buffer.
    fn decode(&self, path: &Path) -> Result<ImageBuffer, IoError>;

    fn encode(
        &self,
        buffer: &ImageBuffer,
        path: &Path,
        format: SaveFormat,
        options: EncodeOptions,
    ) -> Result<(), IoError>;
}

/// File-system codec backed by the `image` and `tiff` crates.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileCodec;

impl ImageCodec for FileCodec {
    fn decode(&self, path: &Path) -> Result<ImageBuffer, IoError> {
        let img = image::open(path).map_err(|source| IoError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        let rgb = img.to_rgb8();
        log::info!(
            "decoded {} ({}x{}, {:?})",
            path.display(),
            rgb.width(),
            rgb.height(),
            img.color()
        );
        Ok(ImageBuffer::from_rgb_image(&rgb))
    }

    fn encode(
        &self,
        buffer: &ImageBuffer,
        path: &Path,
        format: SaveFormat,
        options: EncodeOptions,
    ) -> Result<(), IoError> {
        let rgb = buffer.to_rgb_image();
        encode_and_write(
            &rgb,
            path,
            format,
            options.quality.clamp(1, 100),
            options.tiff_compression,
        )
        .map_err(|source| IoError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("saved {} as {}", path.display(), format.extension());
        Ok(())
    }
}

/// Write an RGB image in the requested format.
pub fn encode_and_write(
    image: &RgbImage,
    path: &Path,
    format: SaveFormat,
    quality: u8,
    tiff_compression: TiffCompression,
) -> Result<(), ImageError> {
    if format == SaveFormat::Webp {
        // The webp encoder only supports the path-based API in this image version.
        let dyn_img = DynamicImage::ImageRgb8(image.clone());
        dyn_img.save_with_format(path, image::ImageFormat::WebP)?;
        return Ok(());
    }

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    match format {
        SaveFormat::Png => {
            let encoder = PngEncoder::new(&mut writer);
            #[allow(deprecated)]
            encoder.encode(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgb8,
            )?;
        }
        SaveFormat::Jpeg => {
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality);
            encoder.encode(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgb8,
            )?;
        }
        SaveFormat::Bmp => {
            let mut encoder = BmpEncoder::new(&mut writer);
            encoder.encode(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgb8,
            )?;
        }
        SaveFormat::Tga => {
            let encoder = TgaEncoder::new(&mut writer);
            encoder.encode(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgb8,
            )?;
        }
        SaveFormat::Tiff => {
            let err_map = |e: tiff::TiffError| {
                ImageError::IoError(std::io::Error::other(format!("TIFF encode error: {}", e)))
            };
            let mut tiff_enc = tiff::encoder::TiffEncoder::new(&mut writer).map_err(err_map)?;
            match tiff_compression {
                TiffCompression::None => {
                    tiff_enc
                        .write_image::<tiff::encoder::colortype::RGB8>(
                            image.width(),
                            image.height(),
                            image.as_raw(),
                        )
                        .map_err(err_map)?;
                }
                TiffCompression::Lzw => {
                    tiff_enc
                        .write_image_with_compression::<tiff::encoder::colortype::RGB8, _>(
                            image.width(),
                            image.height(),
                            tiff::encoder::compression::Lzw,
                            image.as_raw(),
                        )
                        .map_err(err_map)?;
                }
                TiffCompression::Deflate => {
                    tiff_enc
                        .write_image_with_compression::<tiff::encoder::colortype::RGB8, _>(
                            image.width(),
                            image.height(),
                            tiff::encoder::compression::Deflate::default(),
                            image.as_raw(),
                        )
                        .map_err(err_map)?;
                }
            }
        }
        SaveFormat::Webp => unreachable!("handled above"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::ColorSpace;

    fn gradient() -> ImageBuffer {
        let mut samples = Vec::new();
        for y in 0..4u8 {
            for x in 0..5u8 {
                samples.extend_from_slice(&[x * 40, y * 60, 200]);
            }
        }
        ImageBuffer::from_raw(5, 4, ColorSpace::Bgr, samples).unwrap()
    }

    #[test]
    fn lossless_formats_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let img = gradient();
        for (format, compression) in [
            (SaveFormat::Png, TiffCompression::None),
            (SaveFormat::Bmp, TiffCompression::None),
            (SaveFormat::Tga, TiffCompression::None),
            (SaveFormat::Tiff, TiffCompression::None),
            (SaveFormat::Tiff, TiffCompression::Lzw),
            (SaveFormat::Tiff, TiffCompression::Deflate),
        ] {
            let path = dir.path().join(format!("out_{:?}.{}", compression, format.extension()));
            let options = EncodeOptions {
                tiff_compression: compression,
                ..EncodeOptions::default()
            };
            FileCodec.encode(&img, &path, format, options).unwrap();
            let back = FileCodec.decode(&path).unwrap();
            assert_eq!(back, img, "{:?}/{:?}", format, compression);
        }
    }

    #[test]
    fn gray_buffers_are_saved_as_color_and_decode_to_bgr() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.png");
        let gray = ImageBuffer::filled(3, 3, ColorSpace::Gray, 77);
        FileCodec
            .encode(&gray, &path, SaveFormat::Png, EncodeOptions::default())
            .unwrap();
        let back = FileCodec.decode(&path).unwrap();
        assert_eq!(back.color_space(), ColorSpace::Bgr);
        assert!(back.samples().iter().all(|&s| s == 77));
    }

    #[test]
    fn jpeg_is_close_to_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.jpg");
        let img = ImageBuffer::filled(16, 16, ColorSpace::Bgr, 128);
        FileCodec
            .encode(&img, &path, SaveFormat::Jpeg, EncodeOptions::default())
            .unwrap();
        let back = FileCodec.decode(&path).unwrap();
        assert!(back.samples().iter().all(|&s| s.abs_diff(128) <= 2));
    }

    #[test]
    fn decode_missing_file_names_the_path() {
        let err = FileCodec.decode(Path::new("/definitely/not/here.png")).unwrap_err();
        assert!(matches!(err, IoError::Decode { .. }));
        assert!(err.to_string().contains("here.png"));
    }

    #[test]
    fn formats_are_inferred_from_extensions() {
        assert_eq!(SaveFormat::infer(Path::new("a/b.JPEG")).unwrap(), SaveFormat::Jpeg);
        assert_eq!(SaveFormat::infer(Path::new("x.tif")).unwrap(), SaveFormat::Tiff);
        assert!(matches!(
            SaveFormat::infer(Path::new("x.psd")),
            Err(IoError::UnsupportedFormat(_))
        ));
        assert!(SaveFormat::infer(Path::new("noext")).is_err());
        for f in SaveFormat::ALL {
            assert_eq!(f.extension().parse::<SaveFormat>().unwrap(), f);
        }
        assert_eq!("LZW".parse::<TiffCompression>().unwrap(), TiffCompression::Lzw);
    }
}
