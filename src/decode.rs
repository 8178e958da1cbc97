//! Image decoding at a target resolution.
//!
//! Decoding is treated as a pluggable capability behind [`ImageDecoder`]
//! so the coordinator can be tested without real codecs. The default
//! implementation uses the `image` crate and downsamples to fit the
//! requested bounds; it never upscales a smaller source.

use image::RgbaImage;
use thiserror::Error;

/// Decode-related errors.
#[derive(Debug, Error, Clone)]
pub enum DecodeError {
    /// The payload could not be decoded as an image.
    #[error("image decode error: {0}")]
    Malformed(String),

    /// The requested target dimensions are not usable.
    #[error("invalid target dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}

/// A decoded RGBA image together with its byte footprint.
///
/// The footprint (width * height * 4) is the size unit the memory tier
/// accounts against its capacity.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pixels: RgbaImage,
}

impl DecodedImage {
    /// Wrap an already decoded RGBA buffer.
    pub fn new(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Decoded byte footprint used for cache size accounting.
    pub fn byte_footprint(&self) -> usize {
        (self.pixels.width() as usize) * (self.pixels.height() as usize) * 4
    }

    /// Borrow the underlying pixel buffer.
    pub fn as_image(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Consume the wrapper and return the pixel buffer.
    pub fn into_inner(self) -> RgbaImage {
        self.pixels
    }
}

/// Decode capability: bytes in, image at (or under) a target size out.
pub trait ImageDecoder: Send + Sync + 'static {
    /// Decode `bytes` and scale the result to fit within `width` x `height`,
    /// preserving aspect ratio.
    fn decode_at_size(
        &self,
        bytes: &[u8],
        width: u32,
        height: u32,
    ) -> Result<DecodedImage, DecodeError>;
}

/// Default decoder backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardDecoder;

impl ImageDecoder for StandardDecoder {
    fn decode_at_size(
        &self,
        bytes: &[u8],
        width: u32,
        height: u32,
    ) -> Result<DecodedImage, DecodeError> {
        if width == 0 || height == 0 {
            return Err(DecodeError::InvalidDimensions { width, height });
        }

        let full = image::load_from_memory(bytes)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        // Downsample only; a source already within bounds is kept as is.
        let scaled = if full.width() > width || full.height() > height {
            full.thumbnail(width, height)
        } else {
            full
        };

        Ok(DecodedImage::new(scaled.to_rgba8()))
    }
}
