//! Values that move through the encode pipeline.
//!
//! A [`FrameUnit`] is owned by exactly one stage at a time: the producer
//! moves it into the work queue, a worker takes it out, and either it is
//! consumed by a compression backend or handed back to the queue for retry.

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::time::DcpTime;

/// Which eye a picture belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Eyes {
    Left,
    Right,
    Both,
}

impl Eyes {
    pub fn as_str(self) -> &'static str {
        match self {
            Eyes::Left => "left",
            Eyes::Right => "right",
            Eyes::Both => "both",
        }
    }

    fn rank(self) -> u8 {
        match self {
            Eyes::Left => 0,
            Eyes::Right => 1,
            Eyes::Both => 2,
        }
    }

    pub(crate) fn slot(self) -> usize {
        self.rank() as usize
    }

    /// Eyes emitted for every index of a session.
    pub fn for_session(stereo: bool) -> &'static [Eyes] {
        if stereo {
            &[Eyes::Left, Eyes::Right]
        } else {
            &[Eyes::Both]
        }
    }
}

impl fmt::Display for Eyes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of one picture in package order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameKey {
    pub index: u64,
    pub eyes: Eyes,
}

impl FrameKey {
    pub fn new(index: u64, eyes: Eyes) -> Self {
        Self { index, eyes }
    }

    /// First picture written for `index`.
    pub fn first(index: u64, stereo: bool) -> Self {
        let eyes = if stereo { Eyes::Left } else { Eyes::Both };
        Self { index, eyes }
    }

    /// The picture that follows this one in package order.
    pub fn successor(self) -> Self {
        match self.eyes {
            Eyes::Left => Self::new(self.index, Eyes::Right),
            Eyes::Right => Self::new(self.index + 1, Eyes::Left),
            Eyes::Both => Self::new(self.index + 1, Eyes::Both),
        }
    }
}

impl Ord for FrameKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index
            .cmp(&other.index)
            .then(self.eyes.rank().cmp(&other.eyes.rank()))
    }
}

impl PartialOrd for FrameKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.eyes {
            Eyes::Both => write!(f, "{}", self.index),
            eyes => write!(f, "{}/{}", self.index, eyes),
        }
    }
}

/// Packed RGB24 picture, `width * height * 3` bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl DecodedImage {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self::new(width, height, data)
    }

    pub fn black(width: u32, height: u32) -> Self {
        Self::filled(width, height, [0, 0, 0])
    }

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.expected_len()
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Where the pixels of a frame came from; equal origins mean equal pictures.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameOrigin {
    Black,
    Content { id: String, frame: i64 },
}

/// One decoded picture waiting to be compressed.
#[derive(Debug)]
pub struct FrameUnit {
    pub index: u64,
    pub eyes: Eyes,
    pub time: DcpTime,
    pub image: DecodedImage,
    pub origin: Option<FrameOrigin>,
    /// Generation of this compression attempt; bumped on every retry.
    pub attempt: u32,
}

impl FrameUnit {
    pub fn new(index: u64, eyes: Eyes, time: DcpTime, image: DecodedImage) -> Self {
        Self {
            index,
            eyes,
            time,
            image,
            origin: None,
            attempt: 0,
        }
    }

    pub fn with_origin(mut self, origin: FrameOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn key(&self) -> FrameKey {
        FrameKey::new(self.index, self.eyes)
    }
}

/// Output of one successful compression.
#[derive(Debug, Clone)]
pub struct CompressedFrame {
    pub index: u64,
    pub eyes: Eyes,
    pub data: Vec<u8>,
    pub encode_duration: Duration,
    pub attempt: u32,
}

impl CompressedFrame {
    pub fn for_unit(frame: &FrameUnit, data: Vec<u8>, encode_duration: Duration) -> Self {
        Self {
            index: frame.index,
            eyes: frame.eyes,
            data,
            encode_duration,
            attempt: frame.attempt,
        }
    }

    pub fn key(&self) -> FrameKey {
        FrameKey::new(self.index, self.eyes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_keys_alternate_eyes() {
        let mut key = FrameKey::first(0, true);
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(key);
            key = key.successor();
        }
        assert_eq!(
            seen,
            vec![
                FrameKey::new(0, Eyes::Left),
                FrameKey::new(0, Eyes::Right),
                FrameKey::new(1, Eyes::Left),
                FrameKey::new(1, Eyes::Right),
            ]
        );
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn malformed_images_are_detected() {
        assert!(DecodedImage::black(4, 2).is_well_formed());
        assert!(!DecodedImage::new(4, 2, vec![0; 5]).is_well_formed());
        assert!(!DecodedImage::new(0, 2, Vec::new()).is_well_formed());
    }
}
