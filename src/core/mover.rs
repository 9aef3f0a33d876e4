//! One-shot ring drain, run by an external timer.
//!
//! Each run moves at most one closed capture file out of the ring, to the
//! export drive when one qualifies and to the backlog otherwise, and appends
//! exactly one line to the mover log describing what happened.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, SecondsFormat};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::core::drive::DriveDetector;
use crate::core::models::Destination;
use crate::core::ring::{MoveDecision, RingWatcher};
use crate::core::transfer_engine::TransferEngine;
use crate::error::TransferError;

/// What a single mover run did.
#[derive(Debug, Clone, PartialEq)]
pub enum MoverOutcome {
    BelowThreshold { count: usize, threshold: u32 },
    NoClosedCandidate,
    Moved {
        file: String,
        route: String,
        destination: PathBuf,
    },
    /// The candidate disappeared before it could be moved; someone else handled it.
    Vanished { file: String },
    Failed { reason: String },
}

impl MoverOutcome {
    fn log_line(&self) -> String {
        match self {
            Self::BelowThreshold { count, threshold } => {
                format!("[noop] ring has {} files (< threshold {})", count, threshold)
            }
            Self::NoClosedCandidate => "[noop] no closed file to move".to_string(),
            Self::Moved {
                file,
                route,
                destination,
            } => format!("[moved] {} -> {} ({})", file, route, destination.display()),
            Self::Vanished { file } => format!("[noop] {} vanished before move", file),
            Self::Failed { reason } => format!("[error] {}", reason),
        }
    }
}

/// Append-only text log owned by the mover.
pub struct MoverLog {
    path: PathBuf,
}

impl MoverLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append `<timestamp> <line>`. Failure to log never stops the mover.
    pub fn append(&self, now: DateTime<Local>, line: &str) {
        if let Err(e) = self.try_append(now, line) {
            warn!(path = %self.path.display(), error = %e, "Failed to write mover log");
        }
    }

    fn try_append(&self, now: DateTime<Local>, line: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let entry = format!(
            "{} {}\n",
            now.to_rfc3339_opts(SecondsFormat::Secs, false),
            line
        );
        file.write_all(entry.as_bytes())
    }
}

pub struct Mover {
    watcher: RingWatcher,
    backlog_dir: PathBuf,
    detector: DriveDetector,
    engine: Arc<dyn TransferEngine>,
    verify: bool,
    log: MoverLog,
}

impl Mover {
    pub fn new(
        config: &AppConfig,
        detector: DriveDetector,
        engine: Arc<dyn TransferEngine>,
    ) -> Self {
        Self {
            watcher: RingWatcher::new(
                config.ring_dir.clone(),
                config.ring_pattern(),
                config.buffer_threshold,
                config.quiet_window(),
            ),
            backlog_dir: config.backlog_dir.clone(),
            detector,
            engine,
            verify: config.mover.verify,
            log: MoverLog::new(config.mover_log.clone()),
        }
    }

    /// Run one tick and record its outcome in the mover log.
    pub fn run_once(&self, now: DateTime<Local>) -> MoverOutcome {
        let outcome = self.tick(now);
        self.log.append(now, &outcome.log_line());
        outcome
    }

    fn tick(&self, now: DateTime<Local>) -> MoverOutcome {
        for dir in [self.watcher.dir(), self.backlog_dir.as_path()] {
            if let Err(e) = fs::create_dir_all(dir) {
                error!(dir = %dir.display(), error = %e, "Failed to create directory");
                return MoverOutcome::Failed {
                    reason: format!("create {}: {}", dir.display(), e),
                };
            }
        }

        let (candidate, fallbacks) = match self.watcher.evaluate(now.into()) {
            Ok(MoveDecision::BelowThreshold { count, threshold }) => {
                debug!(count, threshold, "Ring below threshold");
                return MoverOutcome::BelowThreshold { count, threshold };
            }
            Ok(MoveDecision::NoClosedCandidate { count }) => {
                debug!(count, "No closed file in ring");
                return MoverOutcome::NoClosedCandidate;
            }
            Ok(MoveDecision::Move {
                candidate,
                fallbacks,
                ..
            }) => (candidate, fallbacks),
            Err(e) => {
                error!(ring = %self.watcher.dir().display(), error = %e, "Failed to scan ring");
                return MoverOutcome::Failed {
                    reason: format!("scan {}: {}", self.watcher.dir().display(), e),
                };
            }
        };

        let destination = self.resolve_destination(now);
        let route = destination.route();
        let mut conflict = None;

        // A name already taken at the destination by different content must not
        // pin the ring; the next closed file is tried instead.
        for file in std::iter::once(candidate).chain(fallbacks) {
            match self.engine.transfer(&file.path, destination.dir(), self.verify) {
                Ok(done) => {
                    info!(file = %file.name, route = %route, method = ?done.method, "Moved capture file");
                    return MoverOutcome::Moved {
                        file: file.name,
                        route,
                        destination: done.destination,
                    };
                }
                Err(e) if e.is_benign() => {
                    debug!(file = %file.name, "Capture vanished before move");
                    return MoverOutcome::Vanished { file: file.name };
                }
                Err(e @ TransferError::DestinationExists(_)) => {
                    warn!(file = %file.name, route = %route, error = %e, "Name taken at destination; trying next file");
                    conflict.get_or_insert(format!("move {} -> {}: {}", file.name, route, e));
                }
                Err(e) => {
                    error!(file = %file.name, route = %route, error = %e, "Move failed");
                    return MoverOutcome::Failed {
                        reason: format!("move {} -> {}: {}", file.name, route, e),
                    };
                }
            }
        }

        MoverOutcome::Failed {
            reason: conflict.unwrap_or_else(|| "no movable file".to_string()),
        }
    }

    /// Export drive if one qualifies today, else the backlog.
    fn resolve_destination(&self, now: DateTime<Local>) -> Destination {
        match self.detector.detect(now.date_naive()) {
            Some(target) => Destination::Export(target),
            None => Destination::Backlog(self.backlog_dir.clone()),
        }
    }
}

/// Read the mover log back, one entry per line.
pub fn read_mover_log(path: &Path) -> io::Result<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::to_string)
        .collect())
}
