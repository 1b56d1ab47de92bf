//! Serializes concurrently completed frames into package order.
//!
//! Frames can finish in any order. The writer appends a frame only when it
//! is the next expected [`FrameKey`], buffers anything that arrives early,
//! and drains the buffer whenever the gap in front of it closes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::EncodeError;
use crate::frame::{CompressedFrame, Eyes, FrameKey};
use crate::package::{PackageSink, PackageSummary};

/// What [`Writer::write`] did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Appended, along with this many buffered frames behind it.
    Appended { drained: usize },
    /// Arrived early; buffered until the gap closes.
    Buffered,
    /// Already written or buffered; discarded.
    Duplicate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterSummary {
    pub frames: u64,
    pub bytes: u64,
    pub duplicates: u64,
    pub repeats: u64,
}

enum Pending {
    Encoded(CompressedFrame),
    /// Copy of the previous picture for the same eye.
    Repeat,
}

struct WriterState {
    sink: Box<dyn PackageSink>,
    total_frames: u64,
    stereo: bool,
    next_expected: FrameKey,
    pending: BTreeMap<FrameKey, Pending>,
    last_written: [Option<Vec<u8>>; 3],
    bytes: u64,
    duplicates: u64,
    repeats: u64,
    finished: bool,
}

/// Cloneable handle; every clone serializes through the same mutex.
#[derive(Clone)]
pub struct Writer {
    inner: Arc<Mutex<WriterState>>,
}

impl Writer {
    /// Starts after whatever complete frames the sink already holds.
    pub fn new(sink: Box<dyn PackageSink>, total_frames: u64, stereo: bool) -> Self {
        let resume = sink.resume_frames().min(total_frames);
        Self {
            inner: Arc::new(Mutex::new(WriterState {
                sink,
                total_frames,
                stereo,
                next_expected: FrameKey::first(resume, stereo),
                pending: BTreeMap::new(),
                last_written: [None, None, None],
                bytes: 0,
                duplicates: 0,
                repeats: 0,
                finished: false,
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, WriterState>, EncodeError> {
        self.inner
            .lock()
            .map_err(|_: PoisonError<_>| EncodeError::Internal("writer lock poisoned".into()))
    }

    pub fn write(&self, frame: CompressedFrame) -> Result<WriteOutcome, EncodeError> {
        let mut state = self.lock()?;
        let key = frame.key();
        state.check_key(key)?;
        state.accept(key, Pending::Encoded(frame))
    }

    /// Marks `key` as identical to the previous picture for its eye.
    pub fn repeat(&self, key: FrameKey) -> Result<WriteOutcome, EncodeError> {
        let mut state = self.lock()?;
        state.check_key(key)?;
        state.accept(key, Pending::Repeat)
    }

    /// Complete frame indices appended so far: `[0, written_count)`.
    pub fn written_count(&self) -> u64 {
        self.lock().map(|s| s.next_expected.index).unwrap_or(0)
    }

    pub fn next_expected(&self) -> FrameKey {
        self.lock()
            .map(|s| s.next_expected)
            .unwrap_or_else(|_| FrameKey::first(0, false))
    }

    pub fn total_frames(&self) -> u64 {
        self.lock().map(|s| s.total_frames).unwrap_or(0)
    }

    pub fn summary(&self) -> WriterSummary {
        self.lock().map(|s| s.summary()).unwrap_or_default()
    }

    /// Fails with `IncompleteOutput` unless every frame has been appended
    /// and nothing is left buffered; otherwise finalizes the sink.
    pub fn finish(&self) -> Result<WriterSummary, EncodeError> {
        let mut state = self.lock()?;
        let complete = FrameKey::first(state.total_frames, state.stereo);
        if !state.pending.is_empty() || state.next_expected != complete {
            return Err(EncodeError::IncompleteOutput {
                expected: state.total_frames,
                written: state.next_expected.index,
                pending: state.pending.len(),
            });
        }
        if !state.finished {
            let package = PackageSummary {
                frames: state.total_frames,
                stereo: state.stereo,
            };
            state.sink.finalize(&package)?;
            state.finished = true;
        }
        Ok(state.summary())
    }
}

impl WriterState {
    fn summary(&self) -> WriterSummary {
        WriterSummary {
            frames: self.next_expected.index,
            bytes: self.bytes,
            duplicates: self.duplicates,
            repeats: self.repeats,
        }
    }

    fn check_key(&self, key: FrameKey) -> Result<(), EncodeError> {
        if self.finished {
            return Err(EncodeError::Internal(format!(
                "frame {key} arrived after the package was finished"
            )));
        }
        if key.index >= self.total_frames {
            return Err(EncodeError::Internal(format!(
                "frame {key} is beyond the {} frame(s) expected",
                self.total_frames
            )));
        }
        let stereo_key = key.eyes != Eyes::Both;
        if stereo_key != self.stereo {
            return Err(EncodeError::Internal(format!(
                "frame {key} does not match a {} session",
                if self.stereo { "3D" } else { "2D" }
            )));
        }
        Ok(())
    }

    fn accept(&mut self, key: FrameKey, item: Pending) -> Result<WriteOutcome, EncodeError> {
        if key < self.next_expected || self.pending.contains_key(&key) {
            self.duplicates += 1;
            warn!(frame = %key, "Discarding duplicate frame");
            return Ok(WriteOutcome::Duplicate);
        }
        if key != self.next_expected {
            self.pending.insert(key, item);
            debug!(
                frame = %key,
                waiting_for = %self.next_expected,
                pending = self.pending.len(),
                "Buffered out-of-order frame"
            );
            return Ok(WriteOutcome::Buffered);
        }

        self.append(key, item)?;
        let mut drained = 0;
        while let Some(item) = self.pending.remove(&self.next_expected) {
            let key = self.next_expected;
            self.append(key, item)?;
            drained += 1;
        }
        Ok(WriteOutcome::Appended { drained })
    }

    fn append(&mut self, key: FrameKey, item: Pending) -> Result<(), EncodeError> {
        let data = match item {
            Pending::Encoded(frame) => frame.data,
            Pending::Repeat => {
                let previous = self.last_written[key.eyes.slot()].clone().ok_or_else(|| {
                    EncodeError::Internal(format!("frame {key} repeats a picture never written"))
                })?;
                self.repeats += 1;
                previous
            }
        };
        self.sink.append(key.index, key.eyes, &data)?;
        self.bytes += data.len() as u64;
        self.last_written[key.eyes.slot()] = Some(data);
        self.next_expected = key.successor();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::package::MemoryPackage;

    fn frame(index: u64, eyes: Eyes) -> CompressedFrame {
        CompressedFrame {
            index,
            eyes,
            data: format!("{index}-{eyes}").into_bytes(),
            encode_duration: Duration::ZERO,
            attempt: 0,
        }
    }

    #[test]
    fn out_of_order_frames_are_appended_in_order() {
        let package = MemoryPackage::new();
        let writer = Writer::new(Box::new(package.clone()), 5, false);

        assert_eq!(
            writer.write(frame(2, Eyes::Both)).unwrap(),
            WriteOutcome::Buffered
        );
        assert_eq!(
            writer.write(frame(1, Eyes::Both)).unwrap(),
            WriteOutcome::Buffered
        );
        assert_eq!(
            writer.write(frame(0, Eyes::Both)).unwrap(),
            WriteOutcome::Appended { drained: 2 }
        );
        assert_eq!(writer.written_count(), 3);
        writer.write(frame(4, Eyes::Both)).unwrap();
        writer.write(frame(3, Eyes::Both)).unwrap();

        assert_eq!(package.indices(), vec![0, 1, 2, 3, 4]);
        writer.finish().unwrap();
        assert!(package.finalized().is_some());
    }

    #[test]
    fn duplicates_are_discarded() {
        let package = MemoryPackage::new();
        let writer = Writer::new(Box::new(package.clone()), 3, false);
        writer.write(frame(0, Eyes::Both)).unwrap();
        writer.write(frame(2, Eyes::Both)).unwrap();

        assert_eq!(
            writer.write(frame(0, Eyes::Both)).unwrap(),
            WriteOutcome::Duplicate
        );
        assert_eq!(
            writer.write(frame(2, Eyes::Both)).unwrap(),
            WriteOutcome::Duplicate
        );
        writer.write(frame(1, Eyes::Both)).unwrap();

        assert_eq!(package.indices(), vec![0, 1, 2]);
        assert_eq!(writer.finish().unwrap().duplicates, 2);
    }

    #[test]
    fn finish_fails_on_gap_or_shortfall() {
        let writer = Writer::new(Box::new(MemoryPackage::new()), 3, false);
        writer.write(frame(0, Eyes::Both)).unwrap();
        writer.write(frame(2, Eyes::Both)).unwrap();
        match writer.finish() {
            Err(EncodeError::IncompleteOutput {
                expected,
                written,
                pending,
            }) => {
                assert_eq!((expected, written, pending), (3, 1, 1));
            }
            other => panic!("expected IncompleteOutput, got {other:?}"),
        }

        let short = Writer::new(Box::new(MemoryPackage::new()), 2, false);
        short.write(frame(0, Eyes::Both)).unwrap();
        assert!(matches!(
            short.finish(),
            Err(EncodeError::IncompleteOutput { pending: 0, .. })
        ));
    }

    #[test]
    fn repeats_copy_the_previous_picture_for_the_same_eye() {
        let package = MemoryPackage::new();
        let writer = Writer::new(Box::new(package.clone()), 3, true);
        writer.repeat(FrameKey::new(1, Eyes::Left)).unwrap();
        writer.write(frame(0, Eyes::Right)).unwrap();
        writer.write(frame(0, Eyes::Left)).unwrap();
        writer.write(frame(1, Eyes::Right)).unwrap();
        writer.repeat(FrameKey::new(2, Eyes::Left)).unwrap();
        writer.repeat(FrameKey::new(2, Eyes::Right)).unwrap();

        let appends = package.appends();
        let data: Vec<_> = appends
            .iter()
            .map(|r| String::from_utf8(r.data.clone()).unwrap())
            .collect();
        assert_eq!(
            data,
            vec!["0-left", "0-right", "0-left", "1-right", "0-left", "1-right"]
        );
        let summary = writer.finish().unwrap();
        assert_eq!(summary.repeats, 3);
        assert_eq!(summary.frames, 3);
    }

    #[test]
    fn frames_outside_the_session_are_rejected() {
        let writer = Writer::new(Box::new(MemoryPackage::new()), 2, false);
        assert!(matches!(
            writer.write(frame(2, Eyes::Both)),
            Err(EncodeError::Internal(_))
        ));
        assert!(matches!(
            writer.write(frame(0, Eyes::Left)),
            Err(EncodeError::Internal(_))
        ));
    }
}
