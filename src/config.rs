use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::backend::CodecSettings;
use crate::discovery::{DEFAULT_SERVER_PORT, ServerDescription};
use crate::encoder::PoolSettings;
use crate::package::PackageHeader;
use crate::playlist::{Content, ContentSource, Playlist, best_video_frame_rate};
use crate::source::expand_sequence;
use crate::time::DcpTime;

/// Everything one encode session needs, loaded once and passed in.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    pub version: u32,
    pub output: OutputConfig,
    pub video: VideoConfig,
    #[serde(default)]
    pub encoding: EncodingConfig,
    pub playlist: PlaylistConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    pub directory: PathBuf,
    #[serde(default = "default_true")]
    pub resume: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VideoConfig {
    /// Package rate; the playlist's best rate when omitted.
    #[serde(default)]
    pub frame_rate: Option<u32>,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub three_d: bool,
    #[serde(default)]
    pub codec: CodecSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EncodingConfig {
    /// 0 uses every available core.
    #[serde(default)]
    pub local_threads: usize,
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,
    #[serde(default = "default_max_frame_retries")]
    pub max_frame_retries: u32,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            local_threads: 0,
            servers: Vec::new(),
            server_port: default_server_port(),
            remote_timeout_ms: default_remote_timeout_ms(),
            max_frame_retries: default_max_frame_retries(),
            max_consecutive_failures: default_max_consecutive_failures(),
            probe_interval_ms: default_probe_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaylistConfig {
    #[serde(default = "default_true")]
    pub sequence: bool,
    #[serde(default)]
    pub content: Vec<ContentConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContentConfig {
    pub id: String,
    pub source: ContentSource,
    pub frame_rate: f64,
    /// Content frames; image sequences default to their image count.
    #[serde(default)]
    pub length: Option<i64>,
    /// Output frame to start at; ignored when the playlist is sequenced.
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub trim_start: i64,
    #[serde(default)]
    pub trim_end: i64,
}

fn default_true() -> bool {
    true
}

fn default_server_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_remote_timeout_ms() -> u64 {
    30_000
}

fn default_max_frame_retries() -> u32 {
    3
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_probe_interval_ms() -> u64 {
    5_000
}

impl SessionConfig {
    /// Relative output and image-sequence paths are taken from the
    /// directory holding the config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read session config: {}", path.display()))?;
        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse session config YAML: {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    fn resolve_paths(&mut self, base: &Path) {
        if self.output.directory.is_relative() {
            self.output.directory = base.join(&self.output.directory);
        }
        for content in &mut self.playlist.content {
            if let ContentSource::ImageSequence { path } = &mut content.source {
                if Path::new(path.as_str()).is_relative() {
                    *path = base.join(path.as_str()).to_string_lossy().into_owned();
                }
            }
        }
    }

    pub fn local_thread_count(&self) -> usize {
        match self.encoding.local_threads {
            0 => thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        }
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.encoding.remote_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.encoding.probe_interval_ms)
    }

    pub fn server_candidates(&self) -> Result<Vec<ServerDescription>> {
        self.encoding
            .servers
            .iter()
            .map(|spec| ServerDescription::parse(spec, self.encoding.server_port))
            .collect()
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            local_threads: self.local_thread_count(),
            max_frame_retries: self.encoding.max_frame_retries,
            max_consecutive_failures: self.encoding.max_consecutive_failures,
        }
    }

    /// Content entries with lengths resolved, in config order.
    pub fn content(&self) -> Result<Vec<Content>> {
        self.playlist
            .content
            .iter()
            .map(|entry| {
                let frames = match (&entry.source, entry.length) {
                    (_, Some(frames)) => frames,
                    (ContentSource::ImageSequence { path }, None) => {
                        expand_sequence(path)
                            .with_context(|| format!("Content '{}'", entry.id))?
                            .len() as i64
                    }
                    (ContentSource::TestPattern { .. }, None) => {
                        bail!("Content '{}' needs a length", entry.id)
                    }
                };
                Ok(
                    Content::new(entry.id.clone(), entry.source.clone(), entry.frame_rate, frames)
                        .trimmed(entry.trim_start, entry.trim_end),
                )
            })
            .collect()
    }

    pub fn build_playlist(&self) -> Result<Playlist> {
        let content = self.content()?;
        let rate = self
            .video
            .frame_rate
            .unwrap_or_else(|| best_video_frame_rate(&content));
        let mut playlist = Playlist::new(rate);
        playlist.set_sequence(self.playlist.sequence);
        for (content, entry) in content.into_iter().zip(&self.playlist.content) {
            let position = entry.position.unwrap_or(0);
            let content = content.at(DcpTime::from_frames(position, f64::from(rate)));
            playlist
                .add(content)
                .with_context(|| format!("Failed to add content '{}'", entry.id))?;
        }
        Ok(playlist)
    }

    pub fn package_header(&self, playlist: &Playlist) -> PackageHeader {
        PackageHeader {
            identifier: playlist.video_identifier(),
            frame_rate: playlist.dcp_rate(),
            width: self.video.width,
            height: self.video.height,
            stereo: self.video.three_d,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
version: 1
output:
  directory: out
video:
  width: 64
  height: 32
playlist:
  content:
    - id: bars
      source: { kind: test_pattern }
      frame_rate: 25
      length: 50
    - id: slate
      source: { kind: test_pattern, color: [0, 0, 255] }
      frame_rate: 25
      length: 10
      trim_start: 2
"#;

    #[test]
    fn defaults_fill_the_gaps() {
        let config = SessionConfig::from_yaml(MINIMAL).unwrap();
        assert!(config.output.resume);
        assert!(config.playlist.sequence);
        assert_eq!(config.encoding.server_port, 6192);
        assert_eq!(config.encoding.max_frame_retries, 3);
        assert_eq!(config.remote_timeout(), Duration::from_secs(30));
        assert!(config.local_thread_count() >= 1);
        assert_eq!(config.video.codec, CodecSettings::default());
    }

    #[test]
    fn builds_a_sequenced_playlist_at_the_best_rate() {
        let config = SessionConfig::from_yaml(MINIMAL).unwrap();
        let playlist = config.build_playlist().unwrap();
        assert_eq!(playlist.dcp_rate(), 25);
        assert_eq!(playlist.length_frames(), 58);
        assert_eq!(
            playlist.content()[1].position,
            DcpTime::from_frames(50, 25.0)
        );
    }

    #[test]
    fn relative_paths_follow_the_config_file() {
        let mut config = SessionConfig::from_yaml(MINIMAL).unwrap();
        config.resolve_paths(Path::new("/srv/jobs"));
        assert_eq!(config.output.directory, PathBuf::from("/srv/jobs/out"));
    }

    #[test]
    fn server_addresses_take_the_default_port() {
        let mut config = SessionConfig::from_yaml(MINIMAL).unwrap();
        config.encoding.servers = vec!["render-a".into(), "render-b:7000".into()];
        let servers = config.server_candidates().unwrap();
        assert_eq!(servers[0].address(), "render-a:6192");
        assert_eq!(servers[1].address(), "render-b:7000");
    }
}
