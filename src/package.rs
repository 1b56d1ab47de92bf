//! Output package sinks.
//!
//! A sink only ever sees appends in strictly ascending [`FrameKey`] order;
//! the [`Writer`](crate::writer::Writer) guarantees that.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::frame::{Eyes, FrameKey};

pub const ESSENCE_FILE: &str = "picture.essence";
pub const INDEX_FILE: &str = "frames.jsonl";
pub const HEADER_FILE: &str = "package.yaml";
pub const MANIFEST_FILE: &str = "manifest.yaml";

/// Totals handed to [`PackageSink::finalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageSummary {
    pub frames: u64,
    pub stereo: bool,
}

/// Append-only destination for encoded pictures.
pub trait PackageSink: Send {
    fn append(&mut self, index: u64, eyes: Eyes, data: &[u8]) -> io::Result<()>;

    /// Complete frame indices already present from an earlier run.
    fn resume_frames(&self) -> u64 {
        0
    }

    fn finalize(&mut self, summary: &PackageSummary) -> io::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendRecord {
    pub index: u64,
    pub eyes: Eyes,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct MemoryRecord {
    appends: Vec<AppendRecord>,
    finalized: Option<PackageSummary>,
}

/// In-memory sink; clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct MemoryPackage {
    inner: Arc<Mutex<MemoryRecord>>,
}

impl MemoryPackage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn appends(&self) -> Vec<AppendRecord> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .appends
            .clone()
    }

    pub fn keys(&self) -> Vec<FrameKey> {
        self.appends()
            .iter()
            .map(|record| FrameKey::new(record.index, record.eyes))
            .collect()
    }

    pub fn indices(&self) -> Vec<u64> {
        self.appends().iter().map(|record| record.index).collect()
    }

    pub fn finalized(&self) -> Option<PackageSummary> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finalized
    }
}

impl PackageSink for MemoryPackage {
    fn append(&mut self, index: u64, eyes: Eyes, data: &[u8]) -> io::Result<()> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .appends
            .push(AppendRecord {
                index,
                eyes,
                data: data.to_vec(),
            });
        Ok(())
    }

    fn finalize(&mut self, summary: &PackageSummary) -> io::Result<()> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finalized = Some(*summary);
        Ok(())
    }
}

/// Identifies what a package directory is being built from. A resume is
/// only attempted when the stored header matches exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageHeader {
    pub identifier: String,
    pub frame_rate: u32,
    pub width: u32,
    pub height: u32,
    pub stereo: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FrameRecord {
    index: u64,
    eyes: Eyes,
    offset: u64,
    size: u64,
    digest: String,
}

#[derive(Debug, Serialize)]
struct PackageManifest<'a> {
    #[serde(flatten)]
    header: &'a PackageHeader,
    generated_at: DateTime<Utc>,
    frame_count: u64,
    essence_bytes: u64,
    essence_sha256: String,
}

/// Package written to a directory: one essence file of concatenated
/// pictures plus a line-per-picture index used to resume interrupted runs.
pub struct DirectoryPackage {
    directory: PathBuf,
    header: PackageHeader,
    essence: File,
    index: File,
    offset: u64,
    hasher: Sha256,
    resume_frames: u64,
}

impl DirectoryPackage {
    /// Starts an empty package, discarding anything already there.
    pub fn create(directory: &Path, header: PackageHeader) -> Result<Self> {
        fs::create_dir_all(directory).with_context(|| {
            format!("Failed to create package directory: {}", directory.display())
        })?;
        write_header(directory, &header)?;
        let essence = open_truncated(&directory.join(ESSENCE_FILE))?;
        let index = open_truncated(&directory.join(INDEX_FILE))?;
        let _ = fs::remove_file(directory.join(MANIFEST_FILE));
        Ok(Self {
            directory: directory.to_path_buf(),
            header,
            essence,
            index,
            offset: 0,
            hasher: Sha256::new(),
            resume_frames: 0,
        })
    }

    /// Re-opens a package from an earlier run with the same header, keeping
    /// every verified complete frame. Falls back to [`create`](Self::create)
    /// when there is nothing usable to resume.
    pub fn open(directory: &Path, header: PackageHeader) -> Result<Self> {
        let header_path = directory.join(HEADER_FILE);
        let existing = match fs::read_to_string(&header_path) {
            Ok(content) => serde_yaml::from_str::<PackageHeader>(&content).ok(),
            Err(_) => None,
        };
        if existing.as_ref() != Some(&header) {
            if existing.is_some() {
                warn!(
                    package = %directory.display(),
                    "Existing package was built from different settings; starting again"
                );
            }
            return Self::create(directory, header);
        }

        let (records, hasher) = verify_existing(directory, header.stereo)?;
        let kept_offset = records.last().map(|r| r.offset + r.size).unwrap_or(0);
        let resume_frames = records
            .last()
            .map(|r| r.index + 1)
            .unwrap_or(0);

        let essence_path = directory.join(ESSENCE_FILE);
        let essence = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&essence_path)
            .with_context(|| format!("Failed to open essence: {}", essence_path.display()))?;
        essence
            .set_len(kept_offset)
            .with_context(|| format!("Failed to truncate essence: {}", essence_path.display()))?;
        let mut essence = essence;
        essence.seek(SeekFrom::End(0))?;

        let mut index = open_truncated(&directory.join(INDEX_FILE))?;
        for record in &records {
            write_record(&mut index, record)?;
        }
        let _ = fs::remove_file(directory.join(MANIFEST_FILE));

        info!(
            package = %directory.display(),
            frames = resume_frames,
            "Resuming package"
        );

        Ok(Self {
            directory: directory.to_path_buf(),
            header,
            essence,
            index,
            offset: kept_offset,
            hasher,
            resume_frames,
        })
    }
}

impl PackageSink for DirectoryPackage {
    fn append(&mut self, index: u64, eyes: Eyes, data: &[u8]) -> io::Result<()> {
        self.essence.write_all(data)?;
        self.hasher.update(data);
        let record = FrameRecord {
            index,
            eyes,
            offset: self.offset,
            size: data.len() as u64,
            digest: format!("{:x}", Sha256::digest(data)),
        };
        write_record(&mut self.index, &record)?;
        self.offset += record.size;
        Ok(())
    }

    fn resume_frames(&self) -> u64 {
        self.resume_frames
    }

    fn finalize(&mut self, summary: &PackageSummary) -> io::Result<()> {
        self.essence.flush()?;
        self.essence.sync_all()?;
        self.index.flush()?;
        let manifest = PackageManifest {
            header: &self.header,
            generated_at: Utc::now(),
            frame_count: summary.frames,
            essence_bytes: self.offset,
            essence_sha256: format!("{:x}", self.hasher.clone().finalize()),
        };
        let rendered = serde_yaml::to_string(&manifest)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        fs::write(self.directory.join(MANIFEST_FILE), rendered)?;
        debug!(
            package = %self.directory.display(),
            frames = summary.frames,
            bytes = self.offset,
            "Package manifest written"
        );
        Ok(())
    }
}

fn open_truncated(path: &Path) -> Result<File> {
    File::create(path).with_context(|| format!("Failed to create file: {}", path.display()))
}

fn write_header(directory: &Path, header: &PackageHeader) -> Result<()> {
    let path = directory.join(HEADER_FILE);
    let rendered = serde_yaml::to_string(header)?;
    fs::write(&path, rendered)
        .with_context(|| format!("Failed to write package header: {}", path.display()))
}

fn write_record(index: &mut File, record: &FrameRecord) -> io::Result<()> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    index.write_all(&line)
}

/// Walks the index from the first picture, keeping records that are in
/// package order, contiguous in the essence, and match their digest.
/// Returns only records of complete frames.
fn verify_existing(directory: &Path, stereo: bool) -> Result<(Vec<FrameRecord>, Sha256)> {
    let index_path = directory.join(INDEX_FILE);
    let essence_path = directory.join(ESSENCE_FILE);
    let (Ok(index), Ok(mut essence)) = (File::open(&index_path), File::open(&essence_path)) else {
        return Ok((Vec::new(), Sha256::new()));
    };

    let essence_len = essence.metadata()?.len();
    let mut kept: Vec<FrameRecord> = Vec::new();
    let mut expected = FrameKey::first(0, stereo);
    let mut offset = 0u64;
    let mut buffer = Vec::new();

    for line in BufReader::new(index).lines() {
        let Ok(line) = line else { break };
        let Ok(record) = serde_json::from_str::<FrameRecord>(&line) else {
            break;
        };
        if FrameKey::new(record.index, record.eyes) != expected || record.offset != offset {
            break;
        }
        // The recorded size must fit in what is actually on disk.
        if record.size > essence_len - offset {
            warn!(frame = record.index, size = record.size, "Index entry runs past the essence");
            break;
        }
        let Ok(size) = usize::try_from(record.size) else {
            break;
        };
        buffer.resize(size, 0);
        if essence.read_exact(&mut buffer).is_err() {
            break;
        }
        if format!("{:x}", Sha256::digest(&buffer)) != record.digest {
            warn!(frame = record.index, "Digest mismatch in existing package");
            break;
        }
        offset += record.size;
        expected = expected.successor();
        kept.push(record);
    }

    if stereo && kept.last().is_some_and(|r| r.eyes == Eyes::Left) {
        kept.pop();
    }

    let mut hasher = Sha256::new();
    essence.seek(SeekFrom::Start(0))?;
    for record in &kept {
        // Kept records were bounded by the essence length above.
        buffer.resize(record.size as usize, 0);
        essence.read_exact(&mut buffer)?;
        hasher.update(&buffer);
    }

    Ok((kept, hasher))
}
