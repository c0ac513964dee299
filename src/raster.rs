//! Canonical rasters: the fixed pixel representation shared with the codec.
//!
//! Every corpus image is converted to an 8-bit [`CanonicalImage`] and written
//! as binary PGM/PPM before the codec sees it. Decoder output is read back
//! with [`load_raster`], which never converts, so a codec that changes the
//! channel mode is caught as a shape mismatch rather than hidden.

use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::pnm::{PnmEncoder, PnmSubtype, SampleEncoding};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageReader};
use imgref::ImgVec;
use rgb::RGB8;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Channel layout of a canonical raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    /// Single-channel 8-bit grayscale.
    Gray,
    /// Three-channel 8-bit color.
    Rgb,
}

impl ChannelMode {
    /// Samples per pixel.
    #[must_use]
    pub fn channels(&self) -> usize {
        match self {
            Self::Gray => 1,
            Self::Rgb => 3,
        }
    }

    /// File extension of the interchange container for this mode.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Gray => "pgm",
            Self::Rgb => "ppm",
        }
    }
}

/// How source images are mapped onto a [`ChannelMode`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelPolicy {
    /// Always convert to grayscale.
    #[default]
    Gray,
    /// Keep single-channel sources gray; everything else becomes RGB.
    Auto,
}

/// Dimensions plus channel mode; two rasters are comparable only if equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterShape {
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Channel layout.
    pub mode: ChannelMode,
}

impl fmt::Display for RasterShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            ChannelMode::Gray => "gray",
            ChannelMode::Rgb => "rgb",
        };
        write!(f, "{}x{} {}", self.width, self.height, mode)
    }
}

/// An 8-bit raster in one of the canonical channel modes.
#[derive(Debug, Clone)]
pub enum CanonicalImage {
    /// Grayscale samples in row-major order.
    Gray(ImgVec<u8>),
    /// RGB pixels in row-major order.
    Rgb(ImgVec<RGB8>),
}

impl CanonicalImage {
    /// Image width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        match self {
            Self::Gray(img) => img.width(),
            Self::Rgb(img) => img.width(),
        }
    }

    /// Image height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        match self {
            Self::Gray(img) => img.height(),
            Self::Rgb(img) => img.height(),
        }
    }

    #[must_use]
    pub fn mode(&self) -> ChannelMode {
        match self {
            Self::Gray(_) => ChannelMode::Gray,
            Self::Rgb(_) => ChannelMode::Rgb,
        }
    }

    #[must_use]
    pub fn shape(&self) -> RasterShape {
        RasterShape {
            width: self.width(),
            height: self.height(),
            mode: self.mode(),
        }
    }

    /// Number of pixels (not samples).
    #[must_use]
    pub fn pixel_count(&self) -> u64 {
        (self.width() as u64) * (self.height() as u64)
    }

    /// Uncompressed sample payload size in bytes, excluding any container header.
    #[must_use]
    pub fn raw_bytes(&self) -> u64 {
        self.pixel_count() * self.mode().channels() as u64
    }

    /// Flatten into interleaved 8-bit samples.
    #[must_use]
    pub fn to_samples(&self) -> Vec<u8> {
        match self {
            Self::Gray(img) => img.pixels().collect(),
            Self::Rgb(img) => img.pixels().flat_map(|p| [p.r, p.g, p.b]).collect(),
        }
    }

    /// Write as binary PGM (gray) or PPM (RGB).
    pub fn save(&self, path: &Path) -> Result<()> {
        let (subtype, color) = match self.mode() {
            ChannelMode::Gray => (
                PnmSubtype::Graymap(SampleEncoding::Binary),
                ExtendedColorType::L8,
            ),
            ChannelMode::Rgb => (
                PnmSubtype::Pixmap(SampleEncoding::Binary),
                ExtendedColorType::Rgb8,
            ),
        };

        let writer = BufWriter::new(File::create(path)?);
        PnmEncoder::new(writer)
            .with_subtype(subtype)
            .write_image(
                &self.to_samples(),
                self.width() as u32,
                self.height() as u32,
                color,
            )
            .map_err(|e| Error::Io(std::io::Error::other(e)))
    }

    fn from_luma(img: image::GrayImage) -> Self {
        let (width, height) = (img.width() as usize, img.height() as usize);
        Self::Gray(ImgVec::new(img.into_raw(), width, height))
    }

    fn from_rgb(img: image::RgbImage) -> Self {
        let (width, height) = (img.width() as usize, img.height() as usize);
        let pixels = img
            .into_raw()
            .chunks_exact(3)
            .map(|c| RGB8::new(c[0], c[1], c[2]))
            .collect();
        Self::Rgb(ImgVec::new(pixels, width, height))
    }
}

/// Load an arbitrary image file and convert it to a canonical raster.
///
/// The format is detected from the file content, so names without a usable
/// extension still load. Any load or conversion failure is reported as
/// [`Error::UnsupportedInput`], which callers treat as "skip this file".
pub fn canonicalize(source: &Path, policy: ChannelPolicy) -> Result<CanonicalImage> {
    let img = read_image(source).map_err(|e| Error::UnsupportedInput {
        path: source.to_path_buf(),
        reason: e.to_string(),
    })?;

    if img.width() == 0 || img.height() == 0 {
        return Err(Error::UnsupportedInput {
            path: source.to_path_buf(),
            reason: "image has no pixels".to_string(),
        });
    }

    let single_channel = img.color().channel_count() == 1;
    Ok(match policy {
        ChannelPolicy::Gray => CanonicalImage::from_luma(img.to_luma8()),
        ChannelPolicy::Auto if single_channel => CanonicalImage::from_luma(img.to_luma8()),
        ChannelPolicy::Auto => CanonicalImage::from_rgb(img.to_rgb8()),
    })
}

/// Load a raster written by the codec, without any conversion.
///
/// Only 8-bit gray and 8-bit RGB are accepted; anything else is
/// [`Error::InvalidRaster`].
pub fn load_raster(path: &Path) -> Result<CanonicalImage> {
    let invalid = |reason: String| Error::InvalidRaster {
        path: path.to_path_buf(),
        reason,
    };
    match read_image(path).map_err(|e| invalid(e.to_string()))? {
        DynamicImage::ImageLuma8(gray) => Ok(CanonicalImage::from_luma(gray)),
        DynamicImage::ImageRgb8(rgb) => Ok(CanonicalImage::from_rgb(rgb)),
        other => Err(invalid(format!("unexpected pixel layout {:?}", other.color()))),
    }
}

/// Decode by content sniffing, falling back to the extension.
fn read_image(path: &Path) -> std::result::Result<DynamicImage, image::ImageError> {
    ImageReader::open(path)?.with_guessed_format()?.decode()
}

/// Deterministic gray test raster: a diagonal ramp with a checker overlay.
#[must_use]
pub fn synthetic_gradient(width: usize, height: usize) -> CanonicalImage {
    let mut buf = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            let ramp = ((x + y) * 255 / (width + height).max(2)) as u8;
            let checker = if (x / 4 + y / 4) % 2 == 0 { 0 } else { 32 };
            buf.push(ramp.saturating_add(checker));
        }
    }
    CanonicalImage::Gray(ImgVec::new(buf, width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, img: DynamicImage) {
        img.save_with_format(path, image::ImageFormat::Png).unwrap();
    }

    #[test]
    fn test_gray_policy_converts_color_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("color.png");
        write_png(&src, DynamicImage::ImageRgb8(image::RgbImage::new(7, 5)));

        let img = canonicalize(&src, ChannelPolicy::Gray).unwrap();
        assert_eq!(img.mode(), ChannelMode::Gray);
        assert_eq!((img.width(), img.height()), (7, 5));
        assert_eq!(img.raw_bytes(), 35);
    }

    #[test]
    fn test_auto_policy_keeps_gray_and_color() {
        let dir = tempfile::tempdir().unwrap();
        let gray = dir.path().join("gray.png");
        let color = dir.path().join("color.png");
        write_png(&gray, DynamicImage::ImageLuma8(image::GrayImage::new(4, 4)));
        write_png(&color, DynamicImage::ImageRgba8(image::RgbaImage::new(4, 4)));

        assert_eq!(
            canonicalize(&gray, ChannelPolicy::Auto).unwrap().mode(),
            ChannelMode::Gray
        );
        let rgb = canonicalize(&color, ChannelPolicy::Auto).unwrap();
        assert_eq!(rgb.mode(), ChannelMode::Rgb);
        assert_eq!(rgb.raw_bytes(), 48);
    }

    #[test]
    fn test_non_image_is_unsupported_input() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("notes.txt");
        std::fs::write(&src, b"not an image").unwrap();

        let err = canonicalize(&src, ChannelPolicy::Gray).unwrap_err();
        assert!(matches!(err, Error::UnsupportedInput { .. }));
    }

    #[test]
    fn test_format_detected_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("scan0001");
        let png = dir.path().join("scan0001.png");
        write_png(&png, DynamicImage::ImageLuma8(image::GrayImage::new(4, 4)));
        std::fs::rename(&png, &src).unwrap();

        let img = canonicalize(&src, ChannelPolicy::Gray).unwrap();
        assert_eq!((img.width(), img.height()), (4, 4));
    }

    #[test]
    fn test_load_raster_ignores_misleading_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decoded.jlsx");
        let img = synthetic_gradient(5, 3);
        img.save(&path).unwrap();

        assert_eq!(load_raster(&path).unwrap().to_samples(), img.to_samples());
    }

    #[test]
    fn test_load_raster_rejects_junk_and_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let junk = dir.path().join("junk.pgm");
        std::fs::write(&junk, b"junk").unwrap();
        assert!(matches!(load_raster(&junk), Err(Error::InvalidRaster { .. })));

        let alpha = dir.path().join("alpha.png");
        write_png(&alpha, DynamicImage::ImageLumaA8(image::GrayAlphaImage::new(2, 2)));
        match load_raster(&alpha).unwrap_err() {
            Error::InvalidRaster { reason, .. } => assert!(reason.contains("La8")),
            other => panic!("expected InvalidRaster, got {other:?}"),
        }
    }

    #[test]
    fn test_pgm_save_and_load_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.pgm");
        let img = synthetic_gradient(16, 9);
        img.save(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"P5"));

        let loaded = load_raster(&path).unwrap();
        assert_eq!(loaded.shape(), img.shape());
        assert_eq!(loaded.to_samples(), img.to_samples());
    }

    #[test]
    fn test_ppm_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("color.ppm");
        let img = CanonicalImage::Rgb(ImgVec::new(vec![RGB8::new(1, 2, 3); 6], 3, 2));
        img.save(&path).unwrap();

        assert!(std::fs::read(&path).unwrap().starts_with(b"P6"));
        let loaded = load_raster(&path).unwrap();
        assert_eq!(loaded.mode(), ChannelMode::Rgb);
        assert_eq!(loaded.to_samples(), img.to_samples());
    }

    #[test]
    fn test_shape_display() {
        let shape = RasterShape {
            width: 10,
            height: 12,
            mode: ChannelMode::Gray,
        };
        assert_eq!(shape.to_string(), "10x12 gray");
    }
}
