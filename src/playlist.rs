//! Content arrangement and output timing.
//!
//! Total length and per-frame timing are always derived from the current
//! content list; nothing is cached across mutation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::PlaylistError;
use crate::time::{ContentTime, DcpTime};

/// Frame rates a package can be mastered at.
pub const ALLOWED_DCP_FRAME_RATES: [u32; 6] = [24, 25, 30, 48, 50, 60];

/// How content at one rate is fitted to the package rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRateChange {
    pub source: f64,
    pub dcp: u32,
    /// Every other content frame is dropped.
    pub skip: bool,
    /// Each content frame is shown this many times.
    pub repeat: u32,
    /// Playback speed factor applied on top of skip/repeat.
    pub speed_up: f64,
    pub change_speed: bool,
}

impl FrameRateChange {
    pub fn new(source: f64, dcp: u32) -> Self {
        let target = f64::from(dcp);
        let as_is = (source - target).abs();
        let mut skip = false;
        let mut repeat = 1;
        if (source / 2.0 - target).abs() < as_is {
            skip = true;
        } else if (source * 2.0 - target).abs() < as_is {
            repeat = (target / source).round().max(1.0) as u32;
        }
        let factor = if skip { 0.5 } else { f64::from(repeat) };
        let speed_up = target / (source * factor);
        Self {
            source,
            dcp,
            skip,
            repeat,
            speed_up,
            change_speed: (speed_up - 1.0).abs() > 1e-6,
        }
    }

    /// Output frames per content frame.
    pub fn factor(&self) -> f64 {
        if self.skip { 0.5 } else { f64::from(self.repeat) }
    }

    pub fn description(&self) -> String {
        let mut text = String::new();
        if self.skip {
            text.push_str("Every other content frame will be skipped. ");
        } else if self.repeat == 2 {
            text.push_str("Each content frame will be doubled. ");
        } else if self.repeat > 2 {
            text.push_str(&format!(
                "Each content frame will be repeated {} more times. ",
                self.repeat - 1
            ));
        }
        if self.change_speed {
            text.push_str(&format!(
                "Output will run at {:.1}% of the content speed.",
                self.speed_up * 100.0
            ));
        } else if !self.skip && self.repeat == 1 {
            text.push_str("Content and output frame rates are equal.");
        } else {
            text.push_str("Content speed is unchanged.");
        }
        text
    }
}

/// Where a piece of content's pictures come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentSource {
    TestPattern {
        #[serde(default = "default_pattern_color")]
        color: [u8; 3],
    },
    ImageSequence {
        path: String,
    },
}

fn default_pattern_color() -> [u8; 3] {
    [128, 128, 128]
}

impl ContentSource {
    fn descriptor(&self) -> String {
        match self {
            ContentSource::TestPattern { color } => {
                format!("pattern:{:02x}{:02x}{:02x}", color[0], color[1], color[2])
            }
            ContentSource::ImageSequence { path } => format!("sequence:{path}"),
        }
    }
}

/// One entry of the playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub id: String,
    pub source: ContentSource,
    pub video_frame_rate: f64,
    /// Untrimmed length.
    pub length: ContentTime,
    pub position: DcpTime,
    pub trim_start: ContentTime,
    pub trim_end: ContentTime,
}

impl Content {
    pub fn new(id: impl Into<String>, source: ContentSource, frame_rate: f64, frames: i64) -> Self {
        Self {
            id: id.into(),
            source,
            video_frame_rate: frame_rate,
            length: ContentTime::from_frames(frames, frame_rate),
            position: DcpTime::zero(),
            trim_start: ContentTime::zero(),
            trim_end: ContentTime::zero(),
        }
    }

    pub fn at(mut self, position: DcpTime) -> Self {
        self.position = position;
        self
    }

    pub fn trimmed(mut self, start_frames: i64, end_frames: i64) -> Self {
        self.trim_start = ContentTime::from_frames(start_frames, self.video_frame_rate);
        self.trim_end = ContentTime::from_frames(end_frames, self.video_frame_rate);
        self
    }

    pub fn frame_rate_change(&self, dcp_rate: u32) -> FrameRateChange {
        FrameRateChange::new(self.video_frame_rate, dcp_rate)
    }

    pub fn trimmed_length(&self) -> ContentTime {
        (self.length - self.trim_start - self.trim_end).max(ContentTime::zero())
    }

    pub fn length_after_trim(&self, dcp_rate: u32) -> DcpTime {
        DcpTime::from_content(self.trimmed_length(), &self.frame_rate_change(dcp_rate))
    }

    pub fn end(&self, dcp_rate: u32) -> DcpTime {
        self.position + self.length_after_trim(dcp_rate)
    }

    pub fn is_empty(&self, dcp_rate: u32) -> bool {
        self.length_after_trim(dcp_rate) <= DcpTime::zero()
    }

    /// Content frame shown at output time `time`, which must fall inside
    /// this content.
    pub fn content_frame_at(&self, time: DcpTime, dcp_rate: u32) -> i64 {
        let frc = self.frame_rate_change(dcp_rate);
        let into = ContentTime::from_dcp(time - self.position, &frc) + self.trim_start;
        into.frames_floor(self.video_frame_rate)
    }

    fn validate(&self) -> Result<(), PlaylistError> {
        let invalid = |reason: &str| PlaylistError::InvalidTrim {
            id: self.id.clone(),
            reason: reason.to_string(),
        };
        if !(self.video_frame_rate > 0.0) {
            return Err(invalid("frame rate must be positive"));
        }
        if self.trim_start < ContentTime::zero() || self.trim_end < ContentTime::zero() {
            return Err(invalid("trims cannot be negative"));
        }
        if self.trim_start + self.trim_end > self.length {
            return Err(invalid("trims exceed the content length"));
        }
        Ok(())
    }
}

/// Ordered content with knowledge of how it maps onto the output.
#[derive(Debug, Clone)]
pub struct Playlist {
    dcp_rate: u32,
    sequence: bool,
    /// Kept sorted by position.
    content: Vec<Content>,
}

impl Playlist {
    pub fn new(dcp_rate: u32) -> Self {
        Self {
            dcp_rate,
            sequence: false,
            content: Vec::new(),
        }
    }

    pub fn dcp_rate(&self) -> u32 {
        self.dcp_rate
    }

    pub fn content(&self) -> &[Content] {
        &self.content
    }

    /// Adds content. Overlapping content is rejected here, never at query
    /// time; sequenced playlists place new content after the last entry.
    pub fn add(&mut self, mut content: Content) -> Result<(), PlaylistError> {
        content.validate()?;
        if self.content.iter().any(|c| c.id == content.id) {
            return Err(PlaylistError::DuplicateId(content.id));
        }
        if self.sequence {
            content.position = self.next_frame_boundary(self.length());
        } else if !content.is_empty(self.dcp_rate) {
            let start = content.position;
            let end = content.end(self.dcp_rate);
            if let Some(other) = self.content.iter().find(|c| {
                !c.is_empty(self.dcp_rate) && c.position < end && start < c.end(self.dcp_rate)
            }) {
                return Err(PlaylistError::Overlap {
                    id: content.id,
                    other: other.id.clone(),
                });
            }
        }
        self.content.push(content);
        self.sort();
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<Content, PlaylistError> {
        let idx = self.find(id)?;
        let removed = self.content.remove(idx);
        self.maybe_sequence();
        Ok(removed)
    }

    /// Swaps `id` with the entry before it.
    pub fn move_earlier(&mut self, id: &str) -> Result<(), PlaylistError> {
        let idx = self.find(id)?;
        if idx == 0 {
            return Ok(());
        }
        let rate = self.dcp_rate;
        let start = self.content[idx - 1].position;
        let moved_length = self.content[idx].length_after_trim(rate);
        self.content[idx - 1].position = start + moved_length;
        self.content[idx].position = start;
        self.sort();
        self.maybe_sequence();
        Ok(())
    }

    /// Swaps `id` with the entry after it.
    pub fn move_later(&mut self, id: &str) -> Result<(), PlaylistError> {
        let idx = self.find(id)?;
        if idx + 1 >= self.content.len() {
            return Ok(());
        }
        let rate = self.dcp_rate;
        let start = self.content[idx].position;
        let next_length = self.content[idx + 1].length_after_trim(rate);
        self.content[idx].position = start + next_length;
        self.content[idx + 1].position = start;
        self.sort();
        self.maybe_sequence();
        Ok(())
    }

    pub fn set_sequence(&mut self, sequence: bool) {
        self.sequence = sequence;
        self.maybe_sequence();
    }

    /// Lays content out back to back from zero, in current order.
    pub fn maybe_sequence(&mut self) {
        if !self.sequence {
            return;
        }
        let mut next = DcpTime::zero();
        for content in &mut self.content {
            content.position = next;
            let rate = f64::from(self.dcp_rate);
            next = DcpTime::from_frames(content.end(self.dcp_rate).frames_ceil(rate), rate);
        }
    }

    /// Appends `count` copies of the selected entries after the last of
    /// them, keeping their relative offsets.
    pub fn repeat(&mut self, ids: &[&str], count: usize) -> Result<(), PlaylistError> {
        let mut selected = Vec::with_capacity(ids.len());
        for id in ids {
            selected.push(self.content[self.find(id)?].clone());
        }
        if selected.is_empty() || count == 0 {
            return Ok(());
        }
        selected.sort_by_key(|c| c.position);
        let rate = self.dcp_rate;
        let first = selected[0].position;
        let last_end = selected
            .iter()
            .map(|c| c.end(rate))
            .fold(DcpTime::zero(), DcpTime::max);
        let span = last_end - first;

        let mut base = self.next_frame_boundary(self.length()).max(last_end);
        let mut copies = Vec::with_capacity(selected.len() * count);
        for copy in 1..=count {
            for original in &selected {
                let mut content = original.clone();
                content.id = format!("{}-r{copy}", original.id);
                content.position = base + (original.position - first);
                copies.push(content);
            }
            base += span;
        }
        for (n, content) in copies.iter().enumerate() {
            if self.content.iter().any(|c| c.id == content.id)
                || copies[..n].iter().any(|c| c.id == content.id)
            {
                return Err(PlaylistError::DuplicateId(content.id.clone()));
            }
        }

        // All or nothing: a rejected copy leaves the playlist as it was.
        let before = self.content.clone();
        for content in copies {
            if let Err(err) = self.add(content) {
                self.content = before;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Earliest content position, if any.
    pub fn start(&self) -> Option<DcpTime> {
        self.content.first().map(|c| c.position)
    }

    pub fn length(&self) -> DcpTime {
        self.content
            .iter()
            .map(|c| c.end(self.dcp_rate))
            .fold(DcpTime::zero(), DcpTime::max)
    }

    /// Output frames needed to cover every piece of content.
    pub fn length_frames(&self) -> u64 {
        self.length().frames_ceil(f64::from(self.dcp_rate)).max(0) as u64
    }

    pub fn frame_time(&self, index: u64) -> DcpTime {
        DcpTime::from_frames(index as i64, f64::from(self.dcp_rate))
    }

    /// Content visible at `time`, skipping zero-length entries.
    pub fn content_at(&self, time: DcpTime) -> Option<&Content> {
        self.content.iter().rev().find(|c| {
            !c.is_empty(self.dcp_rate) && c.position <= time && time < c.end(self.dcp_rate)
        })
    }

    /// Rate conversion in force at `time`: that of the latest-starting
    /// content at or before `time`.
    pub fn active_frame_rate_change(&self, time: DcpTime) -> FrameRateChange {
        self.content
            .iter()
            .rev()
            .filter(|c| !c.is_empty(self.dcp_rate))
            .find(|c| c.position <= time)
            .map(|c| c.frame_rate_change(self.dcp_rate))
            .unwrap_or_else(|| FrameRateChange::new(f64::from(self.dcp_rate), self.dcp_rate))
    }

    pub fn best_video_frame_rate(&self) -> u32 {
        best_video_frame_rate(&self.content)
    }

    /// Smallest and largest speed-up across the content.
    pub fn speed_up_range(&self) -> (f64, f64) {
        let mut speeds = self
            .content
            .iter()
            .map(|c| c.frame_rate_change(self.dcp_rate).speed_up);
        let Some(first) = speeds.next() else {
            return (1.0, 1.0);
        };
        speeds.fold((first, first), |(lo, hi), s| (lo.min(s), hi.max(s)))
    }

    /// Digest of everything that determines the encoded pictures.
    pub fn video_identifier(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.dcp_rate.to_be_bytes());
        for content in &self.content {
            hasher.update(content.id.as_bytes());
            hasher.update(content.source.descriptor().as_bytes());
            hasher.update(content.video_frame_rate.to_bits().to_be_bytes());
            for ticks in [
                content.length.ticks(),
                content.position.ticks(),
                content.trim_start.ticks(),
                content.trim_end.ticks(),
            ] {
                hasher.update(ticks.to_be_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }

    /// One line per content entry overlapping `[from, to)`.
    pub fn content_summary(&self, from: DcpTime, to: DcpTime) -> String {
        self.content
            .iter()
            .filter(|c| c.position < to && from < c.end(self.dcp_rate))
            .map(|c| {
                format!(
                    "{} [{} - {}] {}",
                    c.id,
                    c.position,
                    c.end(self.dcp_rate),
                    c.frame_rate_change(self.dcp_rate).description()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn find(&self, id: &str) -> Result<usize, PlaylistError> {
        self.content
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| PlaylistError::UnknownContent(id.to_string()))
    }

    fn sort(&mut self) {
        self.content.sort_by_key(|c| c.position);
    }

    fn next_frame_boundary(&self, time: DcpTime) -> DcpTime {
        let rate = f64::from(self.dcp_rate);
        DcpTime::from_frames(time.frames_ceil(rate), rate)
    }
}

/// Package rate that fits `content` with the least error, preferring rates
/// reachable without skipping or repeating frames.
pub fn best_video_frame_rate(content: &[Content]) -> u32 {
    let mut candidates: Vec<(f64, u32)> = ALLOWED_DCP_FRAME_RATES
        .iter()
        .map(|&rate| (f64::from(rate), rate))
        .collect();
    for rate in ALLOWED_DCP_FRAME_RATES {
        candidates.push((f64::from(rate) / 2.0, rate));
        candidates.push((f64::from(rate) * 2.0, rate));
    }

    let mut best: Option<(f64, u32)> = None;
    for (source, dcp) in candidates {
        let error = content
            .iter()
            .map(|c| {
                (source - c.video_frame_rate)
                    .abs()
                    .min((source - c.video_frame_rate * 2.0).abs())
            })
            .fold(0.0_f64, f64::max);
        if best.is_none_or(|(best_error, _)| error < best_error) {
            best = Some((error, dcp));
        }
    }
    if content.is_empty() {
        return 24;
    }
    best.map(|(_, dcp)| dcp).unwrap_or(24)
}
