use std::collections::HashSet;

use serde::Serialize;

use crate::config::SessionConfig;
use crate::discovery::ServerDescription;
use crate::playlist::{ALLOWED_DCP_FRAME_RATES, ContentSource};

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

pub fn validate_config(config: &SessionConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    if config.version != 1 {
        report
            .errors
            .push(format!("Unsupported config version: {}", config.version));
    }

    if config.output.directory.as_os_str().is_empty() {
        report
            .errors
            .push("Output directory cannot be empty".into());
    }

    report.merge(validate_video(config));
    report.merge(validate_encoding(config));
    report.merge(validate_content(config));

    // Overlaps and unreadable sequences only show up once the playlist is
    // actually assembled.
    if report.is_ok() {
        match config.build_playlist() {
            Ok(playlist) => {
                if playlist.length_frames() == 0 {
                    report.errors.push("Playlist has no frames to encode".into());
                }
                for content in playlist.content() {
                    let frc = content.frame_rate_change(playlist.dcp_rate());
                    if frc.change_speed {
                        report.warnings.push(format!(
                            "Content '{}' at {} fps will play at {:.1}% speed in a {} fps package",
                            content.id,
                            content.video_frame_rate,
                            frc.speed_up * 100.0,
                            playlist.dcp_rate()
                        ));
                    }
                }
            }
            Err(err) => report.errors.push(format!("{err:#}")),
        }
    }

    report
}

fn validate_video(config: &SessionConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    let video = &config.video;
    if let Some(rate) = video.frame_rate {
        if !ALLOWED_DCP_FRAME_RATES.contains(&rate) {
            report.errors.push(format!(
                "Frame rate {rate} is not one of {ALLOWED_DCP_FRAME_RATES:?}"
            ));
        }
    }
    if video.width == 0 || video.height == 0 {
        report.errors.push(format!(
            "Picture size {}x{} must be non-zero",
            video.width, video.height
        ));
    }
    if !(1..=100).contains(&video.codec.quality) {
        report.errors.push(format!(
            "Codec quality {} must be between 1 and 100",
            video.codec.quality
        ));
    }
    report
}

fn validate_encoding(config: &SessionConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    let encoding = &config.encoding;
    for (idx, spec) in encoding.servers.iter().enumerate() {
        if let Err(err) = ServerDescription::parse(spec, encoding.server_port) {
            report
                .errors
                .push(format!("Server {} ('{}'): {err:#}", idx + 1, spec));
        }
    }
    if encoding.remote_timeout_ms == 0 {
        report
            .errors
            .push("remote_timeout_ms must be greater than zero".into());
    }
    if encoding.probe_interval_ms == 0 && !encoding.servers.is_empty() {
        report
            .errors
            .push("probe_interval_ms must be greater than zero".into());
    }
    if encoding.max_consecutive_failures == 0 {
        report
            .warnings
            .push("max_consecutive_failures of 0 is treated as 1".into());
    }
    if encoding.max_frame_retries == 0 && !encoding.servers.is_empty() {
        report.warnings.push(
            "max_frame_retries is 0: any network hiccup will fail the session".into(),
        );
    }
    report
}

fn validate_content(config: &SessionConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    let playlist = &config.playlist;
    if playlist.content.is_empty() {
        report
            .errors
            .push("Playlist must contain at least one content entry".into());
    }

    let mut seen = HashSet::new();
    for (idx, entry) in playlist.content.iter().enumerate() {
        let label = format!("Content {} ('{}')", idx + 1, entry.id);
        if entry.id.trim().is_empty() {
            report.errors.push(format!("{label}: id cannot be empty"));
        } else if !seen.insert(entry.id.as_str()) {
            report.errors.push(format!("{label}: duplicate id"));
        }
        if !(entry.frame_rate > 0.0) {
            report
                .errors
                .push(format!("{label}: frame rate must be positive"));
        }
        match &entry.source {
            ContentSource::ImageSequence { path } => {
                if let Err(err) = glob::Pattern::new(path) {
                    report
                        .errors
                        .push(format!("{label}: '{path}' is not a valid glob: {err}"));
                }
            }
            ContentSource::TestPattern { .. } => {
                if entry.length.is_none() {
                    report
                        .errors
                        .push(format!("{label}: test patterns need a length"));
                }
            }
        }
        if entry.length.is_some_and(|frames| frames < 0) {
            report
                .errors
                .push(format!("{label}: length cannot be negative"));
        }
        if entry.trim_start < 0 || entry.trim_end < 0 {
            report
                .errors
                .push(format!("{label}: trims cannot be negative"));
        }
        if playlist.sequence && entry.position.is_some() {
            report.warnings.push(format!(
                "{label}: position is ignored because the playlist is sequenced"
            ));
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(extra_content: &str) -> SessionConfig {
        SessionConfig::from_yaml(&format!(
            r#"
version: 1
output:
  directory: /tmp/out
video:
  frame_rate: 24
  width: 16
  height: 16
playlist:
  sequence: false
  content:
    - id: a
      source: {{ kind: test_pattern }}
      frame_rate: 24
      length: 24
{extra_content}"#
        ))
        .unwrap()
    }

    #[test]
    fn accepts_a_well_formed_config() {
        let report = validate_config(&config(""));
        assert!(report.is_ok(), "{:?}", report.errors);
    }

    #[test]
    fn reports_overlap_from_the_assembled_playlist() {
        let report = validate_config(&config(
            r#"    - id: b
      source: { kind: test_pattern }
      frame_rate: 24
      length: 10
      position: 12
"#,
        ));
        assert!(!report.is_ok());
        assert!(report.errors[0].contains("overlaps"), "{:?}", report.errors);
    }

    #[test]
    fn flags_speed_changes_and_bad_values() {
        let mut cfg = config(
            r#"    - id: pal
      source: { kind: test_pattern }
      frame_rate: 25
      length: 25
      position: 100
"#,
        );
        let report = validate_config(&cfg);
        assert!(report.is_ok());
        assert!(report.warnings.iter().any(|w| w.contains("96.0%")));

        cfg.video.frame_rate = Some(23);
        cfg.video.codec.quality = 0;
        cfg.encoding.servers = vec!["host:port".into()];
        let report = validate_config(&cfg);
        assert_eq!(report.errors.len(), 3, "{:?}", report.errors);
    }
}
