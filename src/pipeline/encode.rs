//! Image encoding: rendered pages → compressed streams ready for embedding.
//!
//! ## Why encode immediately after rendering?
//!
//! A 200-DPI render of a Letter page is a ~12 MB RGB buffer. Compressing
//! each page as soon as its render completes means the page store holds
//! kilobytes per page instead of megabytes, which is what lets a
//! several-hundred-page document flatten in bounded memory.
//!
//! ## Why JPEG by default?
//!
//! Flattened output exists to be archived; at 200 DPI and quality 85 the
//! DCT artefacts on rendered page content are invisible while the embedded
//! stream is roughly a tenth of the lossless size. The lossless path stores
//! raw samples behind zlib, which maps directly onto the PDF `FlateDecode`
//! filter with no intermediate container.

use crate::config::{ColorMode, FlattenConfig, ImageFormat};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::trace;

/// PDF colour space of an encoded page image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSpace {
    DeviceRgb,
    DeviceGray,
}

impl ColorSpace {
    /// PDF name for the colour space.
    pub fn pdf_name(self) -> &'static [u8] {
        match self {
            ColorSpace::DeviceRgb => b"DeviceRGB",
            ColorSpace::DeviceGray => b"DeviceGray",
        }
    }
}

/// PDF stream filter of an encoded page image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionFilter {
    /// JPEG (`DCTDecode`).
    Dct,
    /// zlib-compressed raw samples (`FlateDecode`).
    Flate,
}

impl CompressionFilter {
    /// PDF name for the filter.
    pub fn pdf_name(self) -> &'static [u8] {
        match self {
            CompressionFilter::Dct => b"DCTDecode",
            CompressionFilter::Flate => b"FlateDecode",
        }
    }
}

/// A page image compressed for embedding in the output document.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub data: Vec<u8>,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub color_space: ColorSpace,
    pub filter: CompressionFilter,
}

/// Compress a rendered page per the configured format and colour mode.
pub fn encode_page(img: &DynamicImage, config: &FlattenConfig) -> Result<EncodedImage, String> {
    let (width, height) = (img.width(), img.height());

    let (data, color_space, filter) = match (config.image_format, config.color_mode) {
        (ImageFormat::Jpeg, ColorMode::Rgb) => {
            let rgb = img.to_rgb8();
            let mut buf = Vec::new();
            let mut encoder = JpegEncoder::new_with_quality(&mut buf, config.jpeg_quality);
            encoder
                .encode_image(&rgb)
                .map_err(|e| format!("JPEG encoding failed: {e}"))?;
            (buf, ColorSpace::DeviceRgb, CompressionFilter::Dct)
        }
        (ImageFormat::Jpeg, ColorMode::Grayscale) => {
            let gray = img.to_luma8();
            let mut buf = Vec::new();
            let mut encoder = JpegEncoder::new_with_quality(&mut buf, config.jpeg_quality);
            encoder
                .encode_image(&gray)
                .map_err(|e| format!("JPEG encoding failed: {e}"))?;
            (buf, ColorSpace::DeviceGray, CompressionFilter::Dct)
        }
        (ImageFormat::Png, ColorMode::Rgb) => {
            let raw = img.to_rgb8().into_raw();
            (
                deflate(&raw)?,
                ColorSpace::DeviceRgb,
                CompressionFilter::Flate,
            )
        }
        (ImageFormat::Png, ColorMode::Grayscale) => {
            let raw = img.to_luma8().into_raw();
            (
                deflate(&raw)?,
                ColorSpace::DeviceGray,
                CompressionFilter::Flate,
            )
        }
    };

    trace!(
        "Encoded {}x{} page image → {} bytes ({:?})",
        width,
        height,
        data.len(),
        filter
    );

    Ok(EncodedImage {
        data,
        pixel_width: width,
        pixel_height: height,
        color_space,
        filter,
    })
}

fn deflate(raw: &[u8]) -> Result<Vec<u8>, String> {
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(raw)
        .map_err(|e| format!("zlib compression failed: {e}"))?;
    encoder
        .finish()
        .map_err(|e| format!("zlib compression failed: {e}"))
}
