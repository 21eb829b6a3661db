//! Re-encoding selected images into baseline JPEG.

use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, ImageError, codecs::jpeg::JpegEncoder};
use std::{io, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("unsupported codec: {0}")]
    Unsupported(String),
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("could not encode jpeg: {0}")]
    Encode(String),
    #[error("transcoding did not finish within {0:?}")]
    TimedOut(Duration),
    #[error("transcoding worker failed: {0}")]
    Worker(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Converts an encoded image into JPEG bytes.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// `quality` is on the 1–100 JPEG scale.
    async fn to_jpeg(&self, input: Bytes, quality: u8) -> Result<Bytes, TranscodeError>;
}

/// Decodes with the `image` crate (and `libheif` when the `heif` feature is
/// enabled) on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageTranscoder;

#[async_trait]
impl Transcoder for ImageTranscoder {
    async fn to_jpeg(&self, input: Bytes, quality: u8) -> Result<Bytes, TranscodeError> {
        tokio::task::spawn_blocking(move || encode_jpeg(&input, quality))
            .await
            .map_err(|err| TranscodeError::Worker(err.to_string()))?
    }
}

fn encode_jpeg(input: &[u8], quality: u8) -> Result<Bytes, TranscodeError> {
    // JPEG has no alpha channel; flatten RGBA/LA/palette images first.
    let rgb = decode_image(input)?.to_rgb8();

    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder
        .encode_image(&rgb)
        .map_err(|err| TranscodeError::Encode(err.to_string()))?;
    Ok(Bytes::from(out))
}

fn decode_with_image_crate(input: &[u8]) -> Result<DynamicImage, TranscodeError> {
    image::load_from_memory(input).map_err(|err| match err {
        ImageError::Unsupported(_) => TranscodeError::Unsupported(err.to_string()),
        other => TranscodeError::Decode(other.to_string()),
    })
}

#[cfg(not(feature = "heif"))]
fn decode_image(input: &[u8]) -> Result<DynamicImage, TranscodeError> {
    decode_with_image_crate(input)
}

#[cfg(feature = "heif")]
fn decode_image(input: &[u8]) -> Result<DynamicImage, TranscodeError> {
    match decode_with_image_crate(input) {
        Err(TranscodeError::Unsupported(_)) => decode_heif(input),
        other => other,
    }
}

#[cfg(feature = "heif")]
fn decode_heif(input: &[u8]) -> Result<DynamicImage, TranscodeError> {
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let decode_err = |err: libheif_rs::HeifError| TranscodeError::Decode(err.to_string());

    let lib = LibHeif::new();
    let context = HeifContext::read_from_bytes(input).map_err(decode_err)?;
    let handle = context.primary_image_handle().map_err(decode_err)?;
    let decoded = lib
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
        .map_err(decode_err)?;

    let planes = decoded.planes();
    let plane = planes
        .interleaved
        .ok_or_else(|| TranscodeError::Decode("heif image has no interleaved plane".into()))?;

    let row_len = plane.width as usize * 3;
    let mut pixels = Vec::with_capacity(row_len * plane.height as usize);
    for row in plane.data.chunks(plane.stride).take(plane.height as usize) {
        pixels.extend_from_slice(&row[..row_len]);
    }

    image::RgbImage::from_raw(plane.width, plane.height, pixels)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| TranscodeError::Decode("heif plane size mismatch".into()))
}
