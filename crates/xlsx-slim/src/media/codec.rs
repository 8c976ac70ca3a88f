use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ExtendedColorType, ImageDecoder, ImageEncoder, ImageReader};

use super::quant::at_or_below_quality;
use super::{AssetDecision, Candidate, MediaFormat, RecompressMode, RecompressOptions};
use crate::AssetError;

enum Plan {
    /// Re-encode as JPEG.
    Jpeg,
    /// Re-encode as PNG.
    Png,
    /// Convert opaque images to JPEG. Images with alpha stay PNG if they were PNG, else untouched.
    ConvertOpaque,
}

pub(super) fn process(
    bytes: &[u8],
    format: MediaFormat,
    options: &RecompressOptions,
) -> Result<AssetDecision, AssetError> {
    let aggressive = options.mode == RecompressMode::Aggressive;
    let plan = match (format, aggressive) {
        (MediaFormat::Jpeg, _) => Plan::Jpeg,
        (MediaFormat::Png, false) => Plan::Png,
        (MediaFormat::Png, true) => Plan::ConvertOpaque,
        (MediaFormat::Bmp | MediaFormat::Tiff, true) => Plan::ConvertOpaque,
        (MediaFormat::Bmp | MediaFormat::Tiff, false) => {
            return Ok(AssetDecision::Keep("only converted in aggressive mode".into()))
        }
        (MediaFormat::Gif | MediaFormat::Other, _) => {
            return Ok(AssetDecision::Keep("format is not recompressed".into()))
        }
    };

    let quality = options.effective_jpeg_quality();
    let already_coarse = format == MediaFormat::Jpeg && at_or_below_quality(bytes, quality);
    // Safe mode never resizes, so a coarse JPEG is kept without paying for a decode.
    if already_coarse && !aggressive {
        return Ok(keep_coarse(quality));
    }

    let mut img = decode_oriented(bytes)?;
    let (width, height) = (img.width(), img.height());
    let mut notes = Vec::new();
    if aggressive && width.max(height) > options.max_image_edge {
        img = img.resize(options.max_image_edge, options.max_image_edge, FilterType::Lanczos3);
        notes.push(format!(
            "resized {width}x{height} -> {}x{}",
            img.width(),
            img.height()
        ));
    } else if already_coarse {
        return Ok(keep_coarse(quality));
    }

    let mut candidate = match plan {
        Plan::Jpeg => Candidate::new(encode_jpeg(&img, quality)?, None),
        Plan::Png => Candidate::new(encode_png(&img)?, None),
        Plan::ConvertOpaque if img.color().has_alpha() => {
            if format != MediaFormat::Png {
                return Ok(AssetDecision::Keep("has transparency; not converted".into()));
            }
            Candidate::new(encode_png(&img)?, None)
        }
        // Opaque images always become JPEG, even when a resized PNG would be smaller.
        Plan::ConvertOpaque => Candidate::new(encode_jpeg(&img, quality)?, Some("jpg")),
    };

    if candidate.bytes.len() >= bytes.len() {
        return Ok(AssetDecision::Keep("no smaller encoding found".into()));
    }
    if candidate.extension.is_some() {
        notes.push(format!("{} -> jpeg", format.as_str()));
    }
    candidate.note = notes.join(", ");
    Ok(AssetDecision::Replace(candidate))
}

fn keep_coarse(quality: u8) -> AssetDecision {
    AssetDecision::Keep(format!("already at quality {quality} or lower"))
}

/// Decode and bake EXIF orientation into the pixels so later resizes see the upright image.
fn decode_oriented(bytes: &[u8]) -> Result<DynamicImage, AssetError> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, AssetError> {
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    match img.color() {
        ColorType::L8 | ColorType::L16 | ColorType::La8 | ColorType::La16 => {
            let luma = img.to_luma8();
            encoder.write_image(
                luma.as_raw(),
                luma.width(),
                luma.height(),
                ExtendedColorType::L8,
            )?;
        }
        _ => {
            let rgb = img.to_rgb8();
            encoder.write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)?;
        }
    }
    Ok(out)
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, AssetError> {
    // The PNG encoder has no float pixel formats.
    let converted;
    let img = match img.color() {
        ColorType::Rgb32F => {
            converted = DynamicImage::ImageRgb16(img.to_rgb16());
            &converted
        }
        ColorType::Rgba32F => {
            converted = DynamicImage::ImageRgba16(img.to_rgba16());
            &converted
        }
        _ => img,
    };

    let mut out = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(&mut out, CompressionType::Best, PngFilterType::Adaptive);
    encoder.write_image(img.as_bytes(), img.width(), img.height(), img.color().into())?;
    Ok(out)
}
