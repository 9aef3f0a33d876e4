use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::core::models::ExportTarget;

/// Subdirectory on an export volume that receives capture files.
pub const PCAP_SUBDIR: &str = "pcap";

/// Capacity figures for a mounted volume, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeSpace {
    /// Space available to unprivileged writers
    pub free_bytes: u64,
    pub total_bytes: u64,
}

impl VolumeSpace {
    /// Free space as a percentage of total. A zero-sized volume reports 0.
    pub fn free_pct(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.free_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Answers the three questions drive detection asks about a candidate path.
pub trait VolumeProbe: Send + Sync {
    fn is_mount_point(&self, path: &Path) -> bool;

    fn is_writable(&self, path: &Path) -> bool;

    fn space(&self, path: &Path) -> io::Result<VolumeSpace>;
}

/// Picks the export volume from an ordered list of mount candidates.
#[derive(Clone)]
pub struct DriveDetector {
    candidates: Vec<PathBuf>,
    min_free_pct: f64,
    probe: Arc<dyn VolumeProbe>,
}

impl DriveDetector {
    pub fn new(candidates: Vec<PathBuf>, min_free_pct: f64, probe: Arc<dyn VolumeProbe>) -> Self {
        Self {
            candidates,
            min_free_pct,
            probe,
        }
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    /// Return the first candidate that is mounted, writable and has at least
    /// `min_free_pct` free. Candidate order wins over capacity: a later
    /// candidate with more room is never preferred.
    ///
    /// The dated directory is derived from `today`, the detection date.
    pub fn detect(&self, today: NaiveDate) -> Option<ExportTarget> {
        for candidate in &self.candidates {
            if !self.probe.is_mount_point(candidate) {
                debug!(candidate = %candidate.display(), "Not a mount point");
                continue;
            }
            if !self.probe.is_writable(candidate) {
                debug!(candidate = %candidate.display(), "Mount point not writable");
                continue;
            }

            let space = match self.probe.space(candidate) {
                Ok(space) => space,
                Err(e) => {
                    warn!(candidate = %candidate.display(), error = %e, "Failed to stat volume");
                    continue;
                }
            };

            let free_pct = space.free_pct();
            if free_pct >= self.min_free_pct {
                return Some(ExportTarget {
                    mount_point: candidate.clone(),
                    pcap_dir: dated_pcap_dir(candidate, today),
                    free_bytes: space.free_bytes,
                    free_pct,
                });
            }

            debug!(
                candidate = %candidate.display(),
                free_pct = format!("{:.2}", free_pct),
                min_free_pct = self.min_free_pct,
                "Insufficient free space"
            );
        }

        None
    }
}

/// `<mount>/pcap/<YYYYMMDD>`
pub fn dated_pcap_dir(mount_point: &Path, date: NaiveDate) -> PathBuf {
    mount_point
        .join(PCAP_SUBDIR)
        .join(date.format("%Y%m%d").to_string())
}
