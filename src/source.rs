//! Decoded pictures for playlist content.
//!
//! Pictures are delivered at the package size; nothing here scales or
//! converts colour, so image sequences must already match.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use glob::glob;

use crate::frame::{DecodedImage, Eyes};
use crate::playlist::{Content, ContentSource};

pub trait VideoSource: Send {
    /// Picture of content frame `frame` of `content` for `eyes`.
    fn read(&mut self, content: &Content, frame: i64, eyes: Eyes) -> Result<DecodedImage>;
}

/// Files matching an image-sequence pattern, in name order.
pub fn expand_sequence(pattern: &str) -> Result<Vec<PathBuf>> {
    let matches = glob(pattern).with_context(|| format!("Invalid glob pattern: {pattern}"))?;
    let mut files = Vec::new();
    for entry in matches {
        let path = entry?;
        if path.is_file() {
            files.push(path);
        }
    }
    if files.is_empty() {
        bail!("No images matched pattern: {pattern}");
    }
    files.sort();
    Ok(files)
}

/// Flat colour with a white bar that moves one step per frame. The right
/// eye's bar sits a little to the side of the left eye's.
pub fn test_pattern(width: u32, height: u32, color: [u8; 3], frame: i64, eyes: Eyes) -> DecodedImage {
    let mut image = DecodedImage::filled(width, height, color);
    if width == 0 {
        return image;
    }
    let bar = (width / 16).max(1) as usize;
    let shift = if eyes == Eyes::Right { bar } else { 0 };
    let start = (frame.max(0) as usize * bar + shift) % width as usize;
    let stride = width as usize * 3;
    for row in image.data.chunks_exact_mut(stride) {
        for x in start..(start + bar).min(width as usize) {
            row[x * 3..x * 3 + 3].copy_from_slice(&[255, 255, 255]);
        }
    }
    image
}

/// Serves both content kinds at a fixed package size.
pub struct MediaSource {
    width: u32,
    height: u32,
    sequences: HashMap<String, Vec<PathBuf>>,
}

impl MediaSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            sequences: HashMap::new(),
        }
    }

    fn sequence(&mut self, pattern: &str) -> Result<&[PathBuf]> {
        if !self.sequences.contains_key(pattern) {
            let files = expand_sequence(pattern)?;
            self.sequences.insert(pattern.to_string(), files);
        }
        Ok(self
            .sequences
            .get(pattern)
            .map(Vec::as_slice)
            .unwrap_or_default())
    }

    fn read_image(&mut self, pattern: &str, frame: i64) -> Result<DecodedImage> {
        let (width, height) = (self.width, self.height);
        let files = self.sequence(pattern)?;
        let path = usize::try_from(frame)
            .ok()
            .and_then(|i| files.get(i))
            .with_context(|| {
                format!("Frame {frame} is outside {pattern} ({} images)", files.len())
            })?;
        let decoded = image::open(path)
            .with_context(|| format!("Failed to decode image: {}", path.display()))?
            .to_rgb8();
        if decoded.width() != width || decoded.height() != height {
            bail!(
                "{} is {}x{}, the package is {}x{}",
                path.display(),
                decoded.width(),
                decoded.height(),
                width,
                height
            );
        }
        Ok(DecodedImage::new(width, height, decoded.into_raw()))
    }
}

impl VideoSource for MediaSource {
    fn read(&mut self, content: &Content, frame: i64, eyes: Eyes) -> Result<DecodedImage> {
        match &content.source {
            ContentSource::TestPattern { color } => {
                Ok(test_pattern(self.width, self.height, *color, frame, eyes))
            }
            ContentSource::ImageSequence { path } => self
                .read_image(path, frame)
                .with_context(|| format!("Content '{}'", content.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn pattern_bar_moves_between_frames() {
        let a = test_pattern(32, 4, [10, 20, 30], 0, Eyes::Both);
        let b = test_pattern(32, 4, [10, 20, 30], 1, Eyes::Both);
        assert!(a.is_well_formed());
        assert_ne!(a, b);
        assert_eq!(&a.data[..3], &[255, 255, 255]);
        assert_ne!(
            test_pattern(32, 4, [0, 0, 0], 3, Eyes::Left),
            test_pattern(32, 4, [0, 0, 0], 3, Eyes::Right)
        );
    }

    #[test]
    fn reads_image_sequences_in_name_order() {
        let dir = tempdir().unwrap();
        for (i, shade) in [(1, 50u8), (0, 10), (2, 90)] {
            RgbImage::from_pixel(4, 2, Rgb([shade, shade, shade]))
                .save(dir.path().join(format!("frame_{i:04}.png")))
                .unwrap();
        }
        let pattern = dir.path().join("*.png").to_string_lossy().into_owned();
        assert_eq!(expand_sequence(&pattern).unwrap().len(), 3);

        let content = Content::new(
            "seq",
            ContentSource::ImageSequence {
                path: pattern.clone(),
            },
            24.0,
            3,
        );
        let mut source = MediaSource::new(4, 2);
        assert_eq!(source.read(&content, 0, Eyes::Both).unwrap().data[0], 10);
        assert_eq!(source.read(&content, 2, Eyes::Both).unwrap().data[0], 90);
        assert!(source.read(&content, 3, Eyes::Both).is_err());

        let mut wrong_size = MediaSource::new(8, 8);
        let err = wrong_size.read(&content, 0, Eyes::Both).unwrap_err();
        assert!(format!("{err:#}").contains("4x2"));
    }
}
