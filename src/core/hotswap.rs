//! Drive present/absent state machine.
//!
//! Each call to [`HotswapMachine::step`] samples the drive detector once and
//! applies exactly one transition:
//!
//! | from    | to      | action                                              |
//! |---------|---------|-----------------------------------------------------|
//! | absent  | present | drain backlog, write manifest + transfer log, persist |
//! | present | absent  | persist `drive_present = false`                     |
//! | present | present | persist refreshed `updated` timestamp               |
//! | absent  | absent  | nothing                                             |
//!
//! The backlog is drained only on the arrival edge. In-memory state always
//! starts absent; the persisted file is never read back.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::core::drive::DriveDetector;
use crate::core::hashing::HashAlgorithm;
use crate::core::manifest::{ManifestEntry, ManifestWriter};
use crate::core::models::{
    ExportTarget, HotswapState, TransferRecord, TransferResult, truncate_hash,
};
use crate::core::ring::list_captures;
use crate::core::state::StateStore;
use crate::core::transfer_engine::TransferEngine;
use crate::core::transfer_log::TransferLogAppender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveState {
    Absent,
    Present,
}

/// Summary of one backlog drain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub dest_dir: PathBuf,
    pub exported: u64,
    pub failed: u64,
    /// Files younger than the active guard, left for a later batch
    pub skipped_active: u64,
    /// Files that disappeared before their transfer started
    pub vanished: u64,
    pub manifest: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Arrived {
        target: ExportTarget,
        report: BatchReport,
    },
    Departed,
    StillPresent,
    StillAbsent,
}

pub struct HotswapMachine {
    detector: DriveDetector,
    engine: Arc<dyn TransferEngine>,
    backlog_dir: PathBuf,
    backlog_pattern: Regex,
    active_guard: Duration,
    algorithm: HashAlgorithm,
    store: StateStore,
    hostname: String,

    drive: DriveState,
    last_export_ts: Option<DateTime<Local>>,
    total_exported: u64,
}

impl HotswapMachine {
    pub fn new(
        config: &AppConfig,
        hostname: String,
        detector: DriveDetector,
        engine: Arc<dyn TransferEngine>,
    ) -> Self {
        Self {
            detector,
            engine,
            backlog_dir: config.backlog_dir.clone(),
            backlog_pattern: config.backlog_pattern(),
            active_guard: config.active_guard(),
            algorithm: config.export.hash,
            store: StateStore::new(config.hotswap.state_file.clone()),
            hostname,
            drive: DriveState::Absent,
            last_export_ts: None,
            total_exported: 0,
        }
    }

    pub fn drive_state(&self) -> DriveState {
        self.drive
    }

    pub fn total_exported(&self) -> u64 {
        self.total_exported
    }

    pub fn snapshot(&self, now: DateTime<Local>) -> HotswapState {
        HotswapState {
            drive_present: self.drive == DriveState::Present,
            last_export_ts: self.last_export_ts,
            total_exported: self.total_exported,
            updated: now,
        }
    }

    /// Write the current state. Failures degrade to a warning.
    pub fn persist(&self, now: DateTime<Local>) {
        if let Err(e) = self.store.write(&self.snapshot(now)) {
            warn!(path = %self.store.path().display(), error = %e, "Failed to write state file");
        }
    }

    /// Evaluate one poll iteration.
    ///
    /// If the backlog cannot be read on an arrival edge the error is returned
    /// and the machine stays absent, so the next step retries the drain.
    pub fn step(&mut self, now: DateTime<Local>) -> Result<Transition> {
        let target = self.detector.detect(now.date_naive());

        let transition = match (self.drive, target) {
            (DriveState::Absent, Some(target)) => {
                info!(
                    drive = %target.mount_point.display(),
                    free_mb = target.free_bytes / (1024 * 1024),
                    "Drive detected"
                );

                let report = self
                    .export_batch(&target, now)
                    .with_context(|| format!("Failed to drain backlog to {}", target.mount_point.display()))?;

                self.total_exported += report.exported;
                if report.exported > 0 {
                    self.last_export_ts = Some(now);
                    info!(
                        exported = report.exported,
                        failed = report.failed,
                        "Backlog drained"
                    );
                }
                self.drive = DriveState::Present;
                Transition::Arrived { target, report }
            }
            (DriveState::Present, None) => {
                info!("Drive removed; mover will now stage to backlog");
                self.drive = DriveState::Absent;
                Transition::Departed
            }
            (DriveState::Present, Some(_)) => Transition::StillPresent,
            (DriveState::Absent, None) => return Ok(Transition::StillAbsent),
        };

        self.persist(now);
        Ok(transition)
    }

    /// Move every eligible backlog file into the target's dated directory
    /// with verification, then write the manifest and transfer log.
    ///
    /// Per-file failures are recorded and never stop the batch.
    pub fn export_batch(&self, target: &ExportTarget, now: DateTime<Local>) -> io::Result<BatchReport> {
        fs::create_dir_all(&self.backlog_dir)?;
        let mut files = list_captures(&self.backlog_dir, &self.backlog_pattern)?;
        files.sort_by(|a, b| a.name.cmp(&b.name));

        let dest_dir = target.pcap_dir.clone();
        let mut report = BatchReport {
            dest_dir: dest_dir.clone(),
            ..BatchReport::default()
        };

        if files.is_empty() {
            debug!("Backlog empty");
            return Ok(report);
        }

        info!(
            count = files.len(),
            drive = %target.mount_point.display(),
            "Starting backlog export"
        );

        let mut manifest_entries = Vec::new();
        let mut records = Vec::new();

        for file in files {
            if file.age(now.into()) < self.active_guard {
                debug!(file = %file.name, "Skipping active file");
                report.skipped_active += 1;
                continue;
            }

            let dst = dest_dir.join(&file.name);
            let (result, hash) = match self.engine.transfer(&file.path, &dest_dir, true) {
                Ok(done) => {
                    let short = done.hash.as_deref().map(truncate_hash);
                    info!(
                        file = %file.name,
                        dest = %dest_dir.display(),
                        hash = short.as_deref().unwrap_or("-"),
                        "Exported"
                    );
                    report.exported += 1;
                    if let Some(hash) = &done.hash {
                        manifest_entries.push(ManifestEntry {
                            file_name: file.name.clone(),
                            hash: hash.clone(),
                        });
                    }
                    (TransferResult::Ok, short)
                }
                Err(e) if e.is_benign() => {
                    debug!(file = %file.name, "Backlog file vanished before export");
                    report.vanished += 1;
                    continue;
                }
                Err(e) => {
                    error!(file = %file.name, error = %e, "Failed to export");
                    report.failed += 1;
                    (e.outcome(), None)
                }
            };

            records.push(TransferRecord {
                ts: Local::now(),
                hostname: self.hostname.clone(),
                src: file.path,
                dst,
                size: file.size,
                algo: self.algorithm,
                hash,
                result,
            });
        }

        if !manifest_entries.is_empty() {
            match ManifestWriter::new(self.algorithm).write(&dest_dir, &manifest_entries, now) {
                Ok(path) => {
                    info!(path = %path.display(), files = manifest_entries.len(), "Wrote manifest");
                    report.manifest = Some(path);
                }
                Err(e) => error!(dir = %dest_dir.display(), error = %e, "Failed to write manifest"),
            }
        }

        let log = TransferLogAppender::for_drive(&target.mount_point);
        if let Err(e) = log.append(&records) {
            error!(path = %log.path().display(), error = %e, "Failed to append transfer log");
        }

        Ok(report)
    }
}
