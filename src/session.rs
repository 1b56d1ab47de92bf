//! One end-to-end encode pass: playlist frames in, finished package out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use tracing::{info, instrument, warn};

use crate::backend::{BackendProvider, StandardBackends};
use crate::config::SessionConfig;
use crate::discovery::ServerDiscovery;
use crate::encoder::EncoderPool;
use crate::error::EncodeError;
use crate::observability::{EncodeMetricsSnapshot, MetricsCollector};
use crate::package::{DirectoryPackage, PackageSink};
use crate::player::Player;
use crate::playlist::Playlist;
use crate::source::{MediaSource, VideoSource};
use crate::validation::validate_config;
use crate::writer::Writer;

/// Snapshot handed to the progress callback after every output frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionProgress {
    /// Pictures submitted to the encoder pool this run.
    pub frames_enqueued: u64,
    /// Complete frames in the package, including resumed ones.
    pub frames_written: u64,
    pub total_frames: u64,
    pub resumed_from: u64,
    pub encoding_rate: Option<f64>,
}

impl SessionProgress {
    pub fn fraction(&self) -> f64 {
        if self.total_frames == 0 {
            return 1.0;
        }
        (self.frames_written as f64 / self.total_frames as f64).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub frames: u64,
    pub resumed_from: u64,
    /// Bytes appended by this run.
    pub bytes: u64,
    pub repeats: u64,
    pub duplicates: u64,
    pub retries: u64,
    pub duration: Duration,
    pub metrics: EncodeMetricsSnapshot,
}

pub struct EncodeSession {
    config: SessionConfig,
    playlist: Playlist,
    source: Box<dyn VideoSource>,
    sink: Box<dyn PackageSink>,
    discovery: ServerDiscovery,
    provider: Arc<dyn BackendProvider>,
    metrics: MetricsCollector,
    cancel: Arc<AtomicBool>,
    owns_probing: bool,
}

fn ensure_valid(config: &SessionConfig) -> Result<()> {
    let report = validate_config(config);
    for warning in &report.warnings {
        warn!("{warning}");
    }
    if !report.is_ok() {
        bail!("Session config is invalid: {}", report.errors.join("; "));
    }
    Ok(())
}

/// Discovery seeded from the configured servers, probed once up front and
/// then in the background.
pub fn start_discovery(config: &SessionConfig) -> Result<ServerDiscovery> {
    let discovery = ServerDiscovery::new();
    let candidates = config.server_candidates()?;
    if !candidates.is_empty() {
        discovery.probe_once(&candidates, config.remote_timeout());
        discovery.start_probing(candidates, config.probe_interval(), config.remote_timeout())?;
    }
    Ok(discovery)
}

impl EncodeSession {
    pub fn new(
        config: SessionConfig,
        source: Box<dyn VideoSource>,
        sink: Box<dyn PackageSink>,
        discovery: ServerDiscovery,
        provider: Arc<dyn BackendProvider>,
    ) -> Result<Self> {
        ensure_valid(&config)?;
        let playlist = config.build_playlist()?;
        Ok(Self {
            config,
            playlist,
            source,
            sink,
            discovery,
            provider,
            metrics: MetricsCollector::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            owns_probing: false,
        })
    }

    /// Standard wiring: image/pattern source, directory package (resumed
    /// when allowed), probed encode servers and the standard backends.
    pub fn from_config(config: SessionConfig) -> Result<Self> {
        ensure_valid(&config)?;
        let playlist = config.build_playlist()?;
        let header = config.package_header(&playlist);
        let directory = config.output.directory.clone();
        let package = if config.output.resume {
            DirectoryPackage::open(&directory, header)?
        } else {
            DirectoryPackage::create(&directory, header)?
        };
        let discovery = start_discovery(&config)?;
        let provider = Arc::new(StandardBackends::new(
            config.video.codec,
            config.remote_timeout(),
        ));
        let source = Box::new(MediaSource::new(config.video.width, config.video.height));

        let mut session = Self::new(config, source, Box::new(package), discovery, provider)?;
        session.owns_probing = true;
        Ok(session)
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    /// Setting the flag stops production after the current frame; work
    /// already queued is drained and the run ends with `Cancelled`.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn run(self) -> Result<SessionReport, EncodeError> {
        self.run_with_progress(|_| {})
    }

    #[instrument(
        skip_all,
        fields(frames = self.playlist.length_frames(), rate = self.playlist.dcp_rate())
    )]
    pub fn run_with_progress<F>(self, progress: F) -> Result<SessionReport, EncodeError>
    where
        F: FnMut(&SessionProgress),
    {
        let discovery = self.discovery.clone();
        let owns_probing = self.owns_probing;
        let result = self.encode_all(progress);
        if owns_probing {
            discovery.stop_probing();
        }
        result
    }

    fn encode_all<F>(self, mut progress: F) -> Result<SessionReport, EncodeError>
    where
        F: FnMut(&SessionProgress),
    {
        let Self {
            config,
            playlist,
            mut source,
            sink,
            discovery,
            provider,
            metrics,
            cancel,
            ..
        } = self;
        let started = Instant::now();
        let stereo = config.video.three_d;
        let total = playlist.length_frames();

        let writer = Writer::new(sink, total, stereo);
        let resumed_from = writer.written_count();
        info!(
            total,
            resumed_from,
            rate = playlist.dcp_rate(),
            stereo,
            "Starting encode"
        );

        let mut player = Player::new(
            playlist.clone(),
            config.video.width,
            config.video.height,
            stereo,
        );
        let mut pool = EncoderPool::begin_cancellable(
            config.pool_settings(),
            writer.clone(),
            discovery,
            provider,
            metrics.clone(),
            cancel.clone(),
        )?;

        let snapshot = |pool: &EncoderPool| SessionProgress {
            frames_enqueued: pool.video_frames_enqueued(),
            frames_written: writer.written_count(),
            total_frames: total,
            resumed_from,
            encoding_rate: pool.current_encoding_rate(),
        };

        let mut produced = Ok(());
        'frames: for index in resumed_from..total {
            if cancel.load(Ordering::Acquire) {
                info!(frame = index, "Encode cancelled");
                produced = Err(EncodeError::Cancelled);
                break;
            }
            for &eyes in player.eyes() {
                let unit = match player.frame(source.as_mut(), index, eyes) {
                    Ok(unit) => unit,
                    Err(err) => {
                        produced = Err(err);
                        break 'frames;
                    }
                };
                if let Err(err) = pool.encode(unit) {
                    produced = Err(err);
                    break 'frames;
                }
            }
            progress(&snapshot(&pool));
        }

        let enqueued = pool.video_frames_enqueued();
        let final_rate = pool.current_encoding_rate();
        pool.end()?;
        produced?;
        let summary = writer.finish()?;

        progress(&SessionProgress {
            frames_enqueued: enqueued,
            frames_written: summary.frames,
            total_frames: total,
            resumed_from,
            encoding_rate: final_rate,
        });

        let duration = started.elapsed();
        metrics.record_frames_written(summary.frames);
        metrics.record_total_duration(duration);
        let snapshot = metrics.snapshot();
        info!(
            frames = summary.frames,
            resumed_from,
            bytes = summary.bytes,
            repeats = summary.repeats,
            retries = snapshot.retries,
            duration_ms = duration.as_secs_f64() * 1_000.0,
            "Encode complete"
        );

        Ok(SessionReport {
            frames: summary.frames,
            resumed_from,
            bytes: summary.bytes,
            repeats: summary.repeats,
            duplicates: summary.duplicates,
            retries: snapshot.retries,
            duration,
            metrics: snapshot,
        })
    }
}
