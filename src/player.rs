//! Walks a playlist snapshot frame by frame, producing [`FrameUnit`]s.

use tracing::trace;

use crate::error::EncodeError;
use crate::frame::{DecodedImage, Eyes, FrameOrigin, FrameUnit};
use crate::playlist::Playlist;
use crate::source::VideoSource;

pub struct Player {
    playlist: Playlist,
    width: u32,
    height: u32,
    stereo: bool,
    /// Last picture produced for each eye, reused when the origin repeats.
    last: [Option<(FrameOrigin, DecodedImage)>; 3],
}

impl Player {
    /// `playlist` is a snapshot; later edits to the original do not reach
    /// the player.
    pub fn new(playlist: Playlist, width: u32, height: u32, stereo: bool) -> Self {
        Self {
            playlist,
            width,
            height,
            stereo,
            last: [None, None, None],
        }
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn length_frames(&self) -> u64 {
        self.playlist.length_frames()
    }

    pub fn eyes(&self) -> &'static [Eyes] {
        Eyes::for_session(self.stereo)
    }

    /// What appears at output frame `index`: black in gaps.
    pub fn origin(&self, index: u64) -> FrameOrigin {
        let time = self.playlist.frame_time(index);
        match self.playlist.content_at(time) {
            Some(content) => FrameOrigin::Content {
                id: content.id.clone(),
                frame: content.content_frame_at(time, self.playlist.dcp_rate()),
            },
            None => FrameOrigin::Black,
        }
    }

    pub fn frame(
        &mut self,
        source: &mut dyn VideoSource,
        index: u64,
        eyes: Eyes,
    ) -> Result<FrameUnit, EncodeError> {
        let time = self.playlist.frame_time(index);
        let origin = self.origin(index);
        let slot = eyes.slot();

        let image = match &self.last[slot] {
            Some((previous, image)) if *previous == origin => image.clone(),
            _ => {
                let image = match &origin {
                    FrameOrigin::Black => DecodedImage::black(self.width, self.height),
                    FrameOrigin::Content { id, frame } => {
                        let content = self
                            .playlist
                            .content()
                            .iter()
                            .find(|c| &c.id == id)
                            .ok_or_else(|| {
                                EncodeError::Internal(format!("content '{id}' vanished"))
                            })?;
                        source.read(content, *frame, eyes).map_err(|err| {
                            EncodeError::Decode {
                                index,
                                message: format!("{err:#}"),
                            }
                        })?
                    }
                };
                self.last[slot] = Some((origin.clone(), image.clone()));
                image
            }
        };
        trace!(frame = index, eyes = %eyes, origin = ?origin, "Produced frame");
        Ok(FrameUnit::new(index, eyes, time, image).with_origin(origin))
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::playlist::{Content, ContentSource};
    use crate::time::DcpTime;

    struct Counting {
        reads: usize,
    }

    impl VideoSource for Counting {
        fn read(&mut self, _content: &Content, frame: i64, _eyes: Eyes) -> Result<DecodedImage> {
            self.reads += 1;
            Ok(DecodedImage::filled(2, 2, [frame as u8, 0, 0]))
        }
    }

    fn pattern() -> ContentSource {
        ContentSource::TestPattern { color: [1, 2, 3] }
    }

    #[test]
    fn gaps_are_black_and_repeats_skip_decoding() {
        let mut playlist = Playlist::new(24);
        playlist.add(Content::new("a", pattern(), 12.0, 2)).unwrap();
        playlist
            .add(Content::new("b", pattern(), 24.0, 1).at(DcpTime::from_frames(6, 24.0)))
            .unwrap();
        let mut player = Player::new(playlist, 2, 2, false);
        assert_eq!(player.length_frames(), 7);

        let mut source = Counting { reads: 0 };
        let origins: Vec<_> = (0..7)
            .map(|i| player.frame(&mut source, i, Eyes::Both).unwrap().origin)
            .collect();

        let content = |id: &str, frame| {
            Some(FrameOrigin::Content {
                id: id.into(),
                frame,
            })
        };
        assert_eq!(origins[0], content("a", 0));
        assert_eq!(origins[1], content("a", 0));
        assert_eq!(origins[2], content("a", 1));
        assert_eq!(origins[4], Some(FrameOrigin::Black));
        assert_eq!(origins[6], content("b", 0));
        assert_eq!(source.reads, 3);
    }
}
