use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use regex::Regex;
use tracing::debug;

use crate::core::models::CaptureFile;

/// Outcome of inspecting the ring for one mover tick.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveDecision {
    /// Fewer files than the threshold; nothing to do.
    BelowThreshold { count: usize, threshold: u32 },
    /// Threshold reached, but every file is still within the quiet window.
    NoClosedCandidate { count: usize },
    /// Oldest closed file, ready to move, followed by the other closed files
    /// oldest first.
    Move {
        candidate: CaptureFile,
        fallbacks: Vec<CaptureFile>,
        count: usize,
    },
}

/// List regular files in `dir` whose names match `pattern`, oldest first.
///
/// Hidden files are never listed. Entries that disappear while listing are
/// skipped.
pub fn list_captures(dir: &Path, pattern: &Regex) -> io::Result<Vec<CaptureFile>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        // Hidden names are in-flight `.part` copies or editor droppings
        if name.starts_with('.') || !pattern.is_match(&name) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(file = %name, "File vanished while listing");
                continue;
            }
            Err(e) => return Err(e),
        };
        if !metadata.is_file() {
            continue;
        }

        files.push(CaptureFile {
            path: entry.path(),
            name,
            modified: metadata.modified()?,
            size: metadata.len(),
        });
    }

    files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(files)
}

/// Threshold-gated selection of the next ring file to drain.
pub struct RingWatcher {
    dir: PathBuf,
    pattern: Regex,
    threshold: u32,
    quiet: Duration,
}

impl RingWatcher {
    pub fn new(dir: PathBuf, pattern: Regex, threshold: u32, quiet: Duration) -> Self {
        Self {
            dir,
            pattern,
            threshold,
            quiet,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn evaluate(&self, now: SystemTime) -> io::Result<MoveDecision> {
        let files = list_captures(&self.dir, &self.pattern)?;
        Ok(decide(files, self.threshold, self.quiet, now))
    }
}

/// Pick the oldest *closed* file once `files` reaches `threshold`.
///
/// `files` must be sorted oldest first. A file inside the quiet window is never
/// returned, even if that leaves the ring over threshold.
pub fn decide(
    files: Vec<CaptureFile>,
    threshold: u32,
    quiet: Duration,
    now: SystemTime,
) -> MoveDecision {
    let count = files.len();
    if (count as u64) < u64::from(threshold) {
        return MoveDecision::BelowThreshold { count, threshold };
    }

    let mut closed = files.into_iter().filter(|f| f.is_closed(now, quiet));
    match closed.next() {
        Some(candidate) => MoveDecision::Move {
            candidate,
            fallbacks: closed.collect(),
            count,
        },
        None => MoveDecision::NoClosedCandidate { count },
    }
}
