use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dcp_forge::backend::{CodecSettings, StandardBackends};
use dcp_forge::config::SessionConfig;
use dcp_forge::discovery::ServerDiscovery;
use dcp_forge::package::{INDEX_FILE, MANIFEST_FILE, MemoryPackage};
use dcp_forge::session::{EncodeSession, SessionProgress};
use dcp_forge::source::MediaSource;
use image::{ImageBuffer, Rgb};
use tempfile::tempdir;

const GAPPED: &str = r#"
version: 1
output:
  directory: unused
video:
  frame_rate: 24
  width: 32
  height: 16
encoding:
  local_threads: 2
playlist:
  sequence: false
  content:
    - id: opening
      source: { kind: test_pattern, color: [200, 30, 30] }
      frame_rate: 24
      length: 10
    - id: closing
      source: { kind: test_pattern }
      frame_rate: 24
      length: 5
      position: 15
"#;

fn memory_session(yaml: &str) -> (EncodeSession, MemoryPackage) {
    let config = SessionConfig::from_yaml(yaml).unwrap();
    let package = MemoryPackage::new();
    let session = EncodeSession::new(
        config,
        Box::new(MediaSource::new(32, 16)),
        Box::new(package.clone()),
        ServerDiscovery::new(),
        Arc::new(StandardBackends::new(
            CodecSettings::default(),
            Duration::from_secs(5),
        )),
    )
    .unwrap();
    (session, package)
}

#[test]
fn gaps_are_black_and_repeated() {
    let (session, package) = memory_session(GAPPED);
    assert_eq!(session.playlist().length_frames(), 20);

    let mut updates: Vec<SessionProgress> = Vec::new();
    let report = session
        .run_with_progress(|progress| updates.push(*progress))
        .unwrap();

    assert_eq!(report.frames, 20);
    assert_eq!(report.resumed_from, 0);
    assert_eq!(report.repeats, 4);
    assert_eq!(report.duplicates, 0);
    assert_eq!(report.metrics.frames_written, 20);

    let appends = package.appends();
    assert_eq!(package.indices(), (0..20).collect::<Vec<_>>());
    for index in 11..15 {
        assert_eq!(appends[index].data, appends[10].data);
    }
    assert_ne!(appends[9].data, appends[10].data);
    assert_eq!(package.finalized().map(|s| s.frames), Some(20));

    let last = updates.last().unwrap();
    assert_eq!(last.frames_written, 20);
    assert_eq!(last.frames_enqueued, 20);
    assert_eq!(last.fraction(), 1.0);
    assert!(
        updates
            .windows(2)
            .all(|pair| pair[0].frames_written <= pair[1].frames_written)
    );
}

#[test]
fn stereo_sessions_write_both_eyes() {
    let yaml = GAPPED.replace("  height: 16\n", "  height: 16\n  three_d: true\n");
    let (session, package) = memory_session(&yaml);
    let report = session.run().unwrap();
    assert_eq!(report.frames, 20);
    assert_eq!(package.appends().len(), 40);
    assert_eq!(report.repeats, 8);
}

#[test]
fn cancelled_sessions_report_cancellation() {
    let (session, package) = memory_session(GAPPED);
    session.cancel_flag().store(true, Ordering::Release);
    let err = session.run().unwrap_err();
    assert!(err.is_cancellation());
    assert!(package.finalized().is_none());
}

#[test]
fn cancelling_during_a_run_stops_early() {
    let yaml = GAPPED
        .replace("length: 10", "length: 400")
        .replace("position: 15", "position: 405");
    let (session, package) = memory_session(&yaml);
    let cancel = session.cancel_flag();
    let err = session
        .run_with_progress(|progress| {
            if progress.frames_enqueued >= 5 {
                cancel.store(true, Ordering::Release);
            }
        })
        .unwrap_err();
    assert!(err.is_cancellation());
    assert!(package.appends().len() < 410);
    assert!(package.finalized().is_none());
}

#[test]
fn invalid_configs_are_refused() {
    let yaml = GAPPED.replace("frame_rate: 24\n  width", "frame_rate: 23\n  width");
    let config = SessionConfig::from_yaml(&yaml).unwrap();
    let result = EncodeSession::new(
        config,
        Box::new(MediaSource::new(32, 16)),
        Box::new(MemoryPackage::new()),
        ServerDiscovery::new(),
        Arc::new(StandardBackends::new(
            CodecSettings::default(),
            Duration::from_secs(5),
        )),
    );
    let err = result.err().expect("invalid frame rate");
    assert!(err.to_string().contains("Frame rate 23"));
}

fn write_sequence(dir: &Path, frames: u32) {
    fs::create_dir_all(dir).unwrap();
    for frame in 0..frames {
        let img = ImageBuffer::from_fn(32, 16, |x, _| {
            Rgb([(x * 8) as u8, (frame * 20) as u8, 90])
        });
        img.save(dir.join(format!("frame_{frame:04}.png"))).unwrap();
    }
}

fn directory_config(root: &Path) -> SessionConfig {
    let yaml = r#"
version: 1
output:
  directory: package
video:
  width: 32
  height: 16
encoding:
  local_threads: 2
playlist:
  content:
    - id: shots
      source: { kind: image_sequence, path: "frames/*.png" }
      frame_rate: 24
"#;
    let path = root.join("session.yaml");
    fs::write(&path, yaml).unwrap();
    SessionConfig::load(&path).unwrap()
}

#[test]
fn directory_packages_resume_after_interruption() {
    let temp = tempdir().unwrap();
    write_sequence(&temp.path().join("frames"), 12);

    let first = EncodeSession::from_config(directory_config(temp.path()))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(first.frames, 12);
    let package = temp.path().join("package");
    assert!(package.join(MANIFEST_FILE).is_file());

    // Keep the first five pictures, as if the run had been killed.
    let index = fs::read_to_string(package.join(INDEX_FILE)).unwrap();
    let kept: String = index.lines().take(5).map(|line| format!("{line}\n")).collect();
    fs::write(package.join(INDEX_FILE), kept).unwrap();

    let second = EncodeSession::from_config(directory_config(temp.path()))
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(second.resumed_from, 5);
    assert_eq!(second.frames, 12);
    assert!(second.bytes < first.bytes);

    let index = fs::read_to_string(package.join(INDEX_FILE)).unwrap();
    assert_eq!(index.lines().count(), 12);
    let manifest = fs::read_to_string(package.join(MANIFEST_FILE)).unwrap();
    assert!(manifest.contains("frame_count: 12"));

    let mut fresh = directory_config(temp.path());
    fresh.output.resume = false;
    let third = EncodeSession::from_config(fresh).unwrap().run().unwrap();
    assert_eq!(third.resumed_from, 0);
    assert_eq!(third.bytes, first.bytes);
}
