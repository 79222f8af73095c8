//! Image condensation: bound the size of every image attached to a response.
//!
//! Each image is decoded, flattened to RGB (JPEG has no alpha channel),
//! downscaled to fit [`ImageBounds`], and JPEG-encoded. If the result is over
//! the byte budget the quality is lowered in fixed steps until it fits or the
//! floor is reached; the floor result is accepted even when still too large.
//!
//! Condensing never fails the job. The outcome is a [`Condensed`] value that
//! says whether the image was recompressed, sent as-is, or lost.

use crate::config::ImageBounds;
use crate::engine::{ImageRef, ImageSource};
use crate::error::CondenseError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};

/// One image ready to attach to a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CondensedImage {
    pub filename: String,
    pub data: Vec<u8>,
}

/// What happened to one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condensed {
    /// Resized/recompressed within bounds (or at the quality floor).
    Recompressed { image: CondensedImage, quality: u8 },
    /// Processing failed; the unprocessed bytes are sent instead.
    Original(CondensedImage),
    /// Neither processing nor the fallback produced bytes.
    Lost { name: String, reason: String },
}

impl Condensed {
    pub fn into_image(self) -> Option<CondensedImage> {
        match self {
            Condensed::Recompressed { image, .. } | Condensed::Original(image) => Some(image),
            Condensed::Lost { .. } => None,
        }
    }
}

/// Condense one image, falling back to its original bytes on failure.
pub fn condense(source: &ImageSource, bounds: &ImageBounds) -> Condensed {
    match recompress(&source.image, bounds) {
        Ok((data, quality)) => {
            debug!(
                "Condensed {} → {} bytes at quality {}",
                source.name,
                data.len(),
                quality
            );
            Condensed::Recompressed {
                image: CondensedImage {
                    filename: jpeg_filename(&source.name),
                    data,
                },
                quality,
            }
        }
        Err(err) => {
            warn!("Image {} could not be condensed: {}", source.name, err);
            match original_bytes(&source.image) {
                Ok(data) => Condensed::Original(CondensedImage {
                    filename: source.name.clone(),
                    data,
                }),
                Err(fallback_err) => {
                    warn!("Dropping image {}: {}", source.name, fallback_err);
                    Condensed::Lost {
                        name: source.name.clone(),
                        reason: fallback_err.to_string(),
                    }
                }
            }
        }
    }
}

fn recompress(image: &ImageRef, bounds: &ImageBounds) -> Result<(Vec<u8>, u8), CondenseError> {
    let img = load(image)?;
    let img = to_rgb(img);
    let img = fit_within(img, bounds.max_width, bounds.max_height);
    reduce_quality(bounds, |q| encode_jpeg(&img, q))
}

fn load(image: &ImageRef) -> Result<DynamicImage, CondenseError> {
    match image {
        ImageRef::InMemory(img) => Ok(img.clone()),
        ImageRef::File(path) => {
            let bytes = read_file(path)?;
            image::load_from_memory(&bytes).map_err(CondenseError::Decode)
        }
    }
}

/// JPEG accepts 8-bit luma or RGB; everything else is flattened to RGB8.
fn to_rgb(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => img,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

/// Downscale preserving aspect ratio so both sides fit. Never upscales.
pub fn fit_within(img: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    if img.width() <= max_width && img.height() <= max_height {
        return img;
    }
    img.resize(max_width, max_height, FilterType::Lanczos3)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, CondenseError> {
    let mut buf = Vec::new();
    img.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))
        .map_err(CondenseError::Encode)?;
    Ok(buf)
}

/// Encode at decreasing quality until the budget is met or the floor is hit.
///
/// The kept result only ever shrinks: a lower-quality attempt that happens
/// to encode larger is discarded. Returns the bytes and the quality that
/// produced them.
pub fn reduce_quality<F>(bounds: &ImageBounds, mut encode: F) -> Result<(Vec<u8>, u8), CondenseError>
where
    F: FnMut(u8) -> Result<Vec<u8>, CondenseError>,
{
    let floor = bounds.min_quality.min(bounds.quality);
    let step = bounds.quality_step.max(1);
    let mut quality = bounds.quality;
    let mut best = (encode(quality)?, quality);

    while best.0.len() > bounds.max_bytes && quality > floor {
        quality = quality.saturating_sub(step).max(floor);
        let candidate = encode(quality)?;
        if candidate.len() < best.0.len() {
            best = (candidate, quality);
        }
    }
    Ok(best)
}

/// The unprocessed form of an image: file bytes, or a lossless PNG of a bitmap.
fn original_bytes(image: &ImageRef) -> Result<Vec<u8>, CondenseError> {
    match image {
        ImageRef::File(path) => read_file(path),
        ImageRef::InMemory(img) => {
            let mut buf = Vec::new();
            img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
                .map_err(CondenseError::Encode)?;
            Ok(buf)
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, CondenseError> {
    std::fs::read(path).map_err(|source| CondenseError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn jpeg_filename(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "image".to_string());
    format!("{stem}.jpeg")
}
