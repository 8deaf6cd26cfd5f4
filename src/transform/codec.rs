//! Decode, resize, and re-encode with the `image` crate.
//!
//! Everything here is synchronous and CPU-bound; callers run it on the
//! blocking pool.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use super::TransformError;
use super::params::{OutputFormat, TransformParams};
use crate::config::ImageConfig;

/// Encoder defaults taken from configuration.
#[derive(Debug, Clone, Copy)]
pub struct CodecSettings {
    pub default_quality: u8,
    /// Target for `f=auto` when the source is not JPEG, PNG, or WebP.
    pub fallback_format: OutputFormat,
}

impl From<&ImageConfig> for CodecSettings {
    fn from(config: &ImageConfig) -> Self {
        Self {
            default_quality: config.default_quality,
            fallback_format: config.fallback_format,
        }
    }
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self::from(&ImageConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Jpeg,
    Png,
    Webp,
}

impl Encoding {
    fn from_output(format: OutputFormat) -> Option<Self> {
        match format {
            OutputFormat::Auto => None,
            OutputFormat::Webp => Some(Self::Webp),
            OutputFormat::Png => Some(Self::Png),
            OutputFormat::Jpeg | OutputFormat::Jpg => Some(Self::Jpeg),
        }
    }

    fn from_source(format: Option<ImageFormat>) -> Option<Self> {
        match format? {
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::WebP => Some(Self::Webp),
            _ => None,
        }
    }
}

/// Applies `params` to the encoded image in `source`.
///
/// - The source must decode, even when it is passed through unchanged.
/// - Resizing fits inside `width` x `height`, keeps the aspect ratio, and never upscales.
/// - `f=auto` with no quality and no resize returns the source bytes as-is.
/// - `f=auto` otherwise re-encodes in the source format, or the fallback format.
pub fn transform_bytes(
    source: &[u8],
    params: &TransformParams,
    settings: &CodecSettings,
) -> Result<Bytes, TransformError> {
    let source_format = image::guess_format(source).ok();
    let image = image::load_from_memory(source).map_err(TransformError::Decode)?;

    let encoding = match Encoding::from_output(params.format) {
        Some(encoding) => encoding,
        None if params.quality.is_none() && !params.resizes() => {
            return Ok(Bytes::copy_from_slice(source));
        }
        None => Encoding::from_source(source_format)
            .or_else(|| Encoding::from_output(settings.fallback_format))
            .unwrap_or(Encoding::Webp),
    };

    let quality = params
        .quality
        .map(|q| q.clamp(1, 100) as u8)
        .unwrap_or(settings.default_quality)
        .clamp(1, 100);

    let image = fit_within(image, params.width, params.height);
    encode(&image, encoding, quality)
}

/// Shrinks `image` to fit the box, leaving it alone if it already fits.
fn fit_within(image: DynamicImage, width: Option<u32>, height: Option<u32>) -> DynamicImage {
    let (w, h) = (image.width(), image.height());
    let box_w = width.unwrap_or(w).min(w);
    let box_h = height.unwrap_or(h).min(h);
    if box_w >= w && box_h >= h {
        return image;
    }
    image.resize(box_w.max(1), box_h.max(1), FilterType::Lanczos3)
}

fn encode(image: &DynamicImage, encoding: Encoding, quality: u8) -> Result<Bytes, TransformError> {
    let mut buf = Vec::new();
    let result = match encoding {
        // JPEG has no alpha channel.
        Encoding::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
            .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality)),
        Encoding::Png => {
            let compression = match quality {
                0..=33 => CompressionType::Best,
                34..=66 => CompressionType::Default,
                _ => CompressionType::Fast,
            };
            image.write_with_encoder(PngEncoder::new_with_quality(
                &mut buf,
                compression,
                PngFilter::Adaptive,
            ))
        }
        // The pure-Rust WebP encoder is lossless only, so quality does not apply.
        Encoding::Webp => DynamicImage::ImageRgba8(image.to_rgba8())
            .write_with_encoder(WebPEncoder::new_lossless(&mut buf)),
    };
    result.map_err(TransformError::Encode)?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};
    use std::io::Cursor;

    fn sample(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 7) as u8, (y * 5) as u8, 128, 255])
        });
        let img = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(img).to_rgb8()),
            _ => DynamicImage::ImageRgba8(img),
        };
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    fn params(format: OutputFormat) -> TransformParams {
        TransformParams { format, ..Default::default() }
    }

    fn decode(bytes: &[u8]) -> (ImageFormat, (u32, u32)) {
        let format = image::guess_format(bytes).unwrap();
        let dims = image::load_from_memory(bytes).unwrap().dimensions();
        (format, dims)
    }

    #[test]
    fn auto_without_changes_passes_source_through() {
        let src = sample(40, 20, ImageFormat::Png);
        let out = transform_bytes(&src, &params(OutputFormat::Auto), &CodecSettings::default()).unwrap();
        assert_eq!(out.as_ref(), src.as_slice());
    }

    #[test]
    fn resize_keeps_aspect_ratio_and_source_format() {
        let src = sample(40, 20, ImageFormat::Png);
        let p = TransformParams { width: Some(10), ..Default::default() };
        let out = transform_bytes(&src, &p, &CodecSettings::default()).unwrap();
        assert_eq!(decode(&out), (ImageFormat::Png, (10, 5)));
    }

    #[test]
    fn resize_fits_inside_box() {
        let src = sample(40, 20, ImageFormat::Png);
        let p = TransformParams { width: Some(30), height: Some(5), ..Default::default() };
        let out = transform_bytes(&src, &p, &CodecSettings::default()).unwrap();
        assert_eq!(decode(&out).1, (10, 5));
    }

    #[test]
    fn never_upscales() {
        let src = sample(40, 20, ImageFormat::Png);
        let p = TransformParams { width: Some(400), height: Some(400), ..Default::default() };
        let out = transform_bytes(&src, &p, &CodecSettings::default()).unwrap();
        assert_eq!(decode(&out).1, (40, 20));
    }

    #[test]
    fn explicit_formats_are_honoured() {
        let src = sample(16, 16, ImageFormat::Png);
        let settings = CodecSettings::default();
        for (format, expected) in [
            (OutputFormat::Webp, ImageFormat::WebP),
            (OutputFormat::Jpeg, ImageFormat::Jpeg),
            (OutputFormat::Jpg, ImageFormat::Jpeg),
            (OutputFormat::Png, ImageFormat::Png),
        ] {
            let out = transform_bytes(&src, &params(format), &settings).unwrap();
            assert_eq!(image::guess_format(&out).unwrap(), expected, "{format}");
        }
    }

    #[test]
    fn jpeg_quality_changes_output() {
        let src = sample(64, 64, ImageFormat::Png);
        let settings = CodecSettings::default();
        let low = TransformParams { quality: Some(5), format: OutputFormat::Jpeg, ..Default::default() };
        let high = TransformParams { quality: Some(95), format: OutputFormat::Jpeg, ..Default::default() };
        let low = transform_bytes(&src, &low, &settings).unwrap();
        let high = transform_bytes(&src, &high, &settings).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn auto_with_quality_reencodes_in_source_format() {
        let src = sample(16, 16, ImageFormat::Jpeg);
        let p = TransformParams { quality: Some(40), ..Default::default() };
        let out = transform_bytes(&src, &p, &CodecSettings::default()).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn auto_with_quality_on_unrecognized_source_uses_fallback() {
        let src = sample(16, 16, ImageFormat::Gif);
        let p = TransformParams { quality: Some(40), ..Default::default() };

        let out = transform_bytes(&src, &p, &CodecSettings::default()).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::WebP);

        let png_fallback = CodecSettings { fallback_format: OutputFormat::Png, ..Default::default() };
        let out = transform_bytes(&src, &p, &png_fallback).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn garbage_input_is_a_decode_error() {
        let err = transform_bytes(b"<html>nope</html>", &params(OutputFormat::Auto), &CodecSettings::default())
            .unwrap_err();
        assert!(matches!(err, TransformError::Decode(_)));
        assert!(!err.is_upstream());
    }
}
