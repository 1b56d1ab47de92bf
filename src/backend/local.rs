use std::io::Cursor;
use std::time::Instant;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};

use super::{CodecSettings, CompressionBackend, PictureFormat};
use crate::error::BackendError;
use crate::frame::{CompressedFrame, DecodedImage, FrameUnit};

/// Compresses on the calling thread.
#[derive(Debug, Clone)]
pub struct LocalEncoder {
    name: String,
    settings: CodecSettings,
}

impl LocalEncoder {
    pub fn new(thread: usize, settings: CodecSettings) -> Self {
        Self {
            name: format!("local-{thread}"),
            settings,
        }
    }
}

impl CompressionBackend for LocalEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn compress(&mut self, frame: &FrameUnit) -> Result<CompressedFrame, BackendError> {
        let started = Instant::now();
        let data = encode_picture(&frame.image, &self.settings)?;
        Ok(CompressedFrame::for_unit(frame, data, started.elapsed()))
    }
}

/// Shared by [`LocalEncoder`] and the encode server. Every failure here is
/// deterministic for the given picture, so it is reported as a codec error.
pub fn encode_picture(image: &DecodedImage, settings: &CodecSettings) -> Result<Vec<u8>, BackendError> {
    if !image.is_well_formed() {
        return Err(BackendError::Codec(format!(
            "malformed {}x{} picture: {} bytes, expected {}",
            image.width,
            image.height,
            image.data.len(),
            image.expected_len()
        )));
    }

    let mut cursor = Cursor::new(Vec::new());
    let result = match settings.format {
        PictureFormat::Jpeg => {
            let quality = settings.quality.clamp(1, 100);
            JpegEncoder::new_with_quality(&mut cursor, quality).write_image(
                &image.data,
                image.width,
                image.height,
                ExtendedColorType::Rgb8,
            )
        }
        PictureFormat::Png => {
            let compression = if settings.quality >= 80 {
                CompressionType::Best
            } else {
                CompressionType::Fast
            };
            PngEncoder::new_with_quality(&mut cursor, compression, FilterType::Adaptive)
                .write_image(&image.data, image.width, image.height, ExtendedColorType::Rgb8)
        }
    };
    result.map_err(|err| {
        BackendError::Codec(format!("{} encode failed: {err}", settings.format.as_str()))
    })?;
    Ok(cursor.into_inner())
}
