//! Append-only provenance log kept at the root of the export drive.
//!
//! `TRANSFER.LOG` holds one JSON object per line, one line per attempted
//! transfer, so the drive carries its own history independent of the appliance.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::core::models::TransferRecord;

pub const TRANSFER_LOG_FILE: &str = "TRANSFER.LOG";

pub struct TransferLogAppender {
    path: PathBuf,
}

impl TransferLogAppender {
    pub fn for_drive(drive_root: &Path) -> Self {
        Self {
            path: drive_root.join(TRANSFER_LOG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `records`. All lines go out in a single write so a batch is
    /// never interleaved with or split by another writer's partial output.
    pub fn append(&self, records: &[TransferRecord]) -> io::Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&buf)?;
        file.sync_data()
    }
}

/// Read every record from a drive's transfer log.
pub fn read_records(drive_root: &Path) -> io::Result<Vec<TransferRecord>> {
    let content = fs::read_to_string(drive_root.join(TRANSFER_LOG_FILE))?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(io::Error::from))
        .collect()
}
