use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::core::hashing::HashAlgorithm;

/// A capture file as seen when its directory was listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFile {
    pub path: PathBuf,
    pub name: String,
    pub modified: SystemTime,
    pub size: u64,
}

impl CaptureFile {
    /// Age relative to `now`. A modification time in the future counts as age zero.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.modified).unwrap_or(Duration::ZERO)
    }

    /// Whether the writer has stopped touching the file for at least `quiet`.
    pub fn is_closed(&self, now: SystemTime, quiet: Duration) -> bool {
        self.age(now) >= quiet
    }
}

/// A qualifying export volume and the dated directory captures land in.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportTarget {
    pub mount_point: PathBuf,
    pub pcap_dir: PathBuf,
    pub free_bytes: u64,
    pub free_pct: f64,
}

/// Where a single move sends its file.
#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    Export(ExportTarget),
    Backlog(PathBuf),
}

impl Destination {
    pub fn dir(&self) -> &Path {
        match self {
            Self::Export(target) => &target.pcap_dir,
            Self::Backlog(dir) => dir,
        }
    }

    /// Short route label used in the mover log.
    pub fn route(&self) -> String {
        match self {
            Self::Export(target) => format!("export({})", target.mount_point.display()),
            Self::Backlog(_) => "backlog".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferResult {
    Ok,
    VerifyFail,
    IoError,
}

/// One line of the drive-resident transfer log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub ts: DateTime<Local>,
    pub hostname: String,
    pub src: PathBuf,
    pub dst: PathBuf,
    pub size: u64,
    pub algo: HashAlgorithm,
    /// First 16 hex characters of the content hash, when one was computed
    pub hash: Option<String>,
    pub result: TransferResult,
}

/// Number of hash characters kept in transfer-log records.
pub const RECORD_HASH_CHARS: usize = 16;

pub fn truncate_hash(hash: &str) -> String {
    hash.chars().take(RECORD_HASH_CHARS).collect()
}

/// Hotswap daemon state as persisted for read-only consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotswapState {
    pub drive_present: bool,
    pub last_export_ts: Option<DateTime<Local>>,
    pub total_exported: u64,
    pub updated: DateTime<Local>,
}
