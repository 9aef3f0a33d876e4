use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::core::drive::{VolumeProbe, VolumeSpace};

#[derive(Debug, Clone, Copy)]
struct SimulatedVolume {
    space: VolumeSpace,
    writable: bool,
}

type Volumes = Arc<Mutex<HashMap<PathBuf, SimulatedVolume>>>;

/// Attaches and detaches virtual volumes seen by a [`SimulatedProbe`].
#[derive(Clone)]
pub struct VolumeSimulator {
    volumes: Volumes,
}

impl VolumeSimulator {
    /// Mount a writable volume at `path` with the given free/total byte counts.
    pub fn attach(&self, path: impl AsRef<Path>, free_bytes: u64, total_bytes: u64) {
        let volume = SimulatedVolume {
            space: VolumeSpace {
                free_bytes,
                total_bytes,
            },
            writable: true,
        };
        self.lock().insert(path.as_ref().to_path_buf(), volume);
    }

    pub fn detach(&self, path: impl AsRef<Path>) {
        self.lock().remove(path.as_ref());
    }

    pub fn set_writable(&self, path: impl AsRef<Path>, writable: bool) {
        if let Some(volume) = self.lock().get_mut(path.as_ref()) {
            volume.writable = writable;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, SimulatedVolume>> {
        self.volumes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Volume probe backed by an in-memory table, for tests and dry runs.
pub struct SimulatedProbe {
    volumes: Volumes,
}

impl SimulatedProbe {
    pub fn new() -> (Self, VolumeSimulator) {
        let volumes: Volumes = Arc::new(Mutex::new(HashMap::new()));
        (
            Self {
                volumes: volumes.clone(),
            },
            VolumeSimulator { volumes },
        )
    }

    fn volume(&self, path: &Path) -> Option<SimulatedVolume> {
        self.volumes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied()
    }
}

impl VolumeProbe for SimulatedProbe {
    fn is_mount_point(&self, path: &Path) -> bool {
        self.volume(path).is_some()
    }

    fn is_writable(&self, path: &Path) -> bool {
        self.volume(path).is_some_and(|v| v.writable)
    }

    fn space(&self, path: &Path) -> io::Result<VolumeSpace> {
        self.volume(path).map(|v| v.space).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no simulated volume at {}", path.display()),
            )
        })
    }
}
