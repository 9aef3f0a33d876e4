use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use nix::sys::statvfs::statvfs;
use nix::unistd::{AccessFlags, access};

use crate::core::drive::{VolumeProbe, VolumeSpace};

/// Probes real mount points on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProbe;

impl VolumeProbe for SystemProbe {
    /// A path is a mount point when it sits on a different device than its
    /// parent, or when it is its own parent (`/`). Symlinks never are.
    fn is_mount_point(&self, path: &Path) -> bool {
        let Ok(meta) = path.symlink_metadata() else {
            return false;
        };
        if meta.file_type().is_symlink() || !meta.is_dir() {
            return false;
        }
        let Ok(parent) = path.join("..").metadata() else {
            return false;
        };

        meta.dev() != parent.dev() || meta.ino() == parent.ino()
    }

    fn is_writable(&self, path: &Path) -> bool {
        access(path, AccessFlags::W_OK).is_ok()
    }

    fn space(&self, path: &Path) -> io::Result<VolumeSpace> {
        let stat = statvfs(path).map_err(io::Error::from)?;
        let fragment = stat.fragment_size() as u64;

        Ok(VolumeSpace {
            free_bytes: stat.blocks_available() as u64 * fragment,
            total_bytes: stat.blocks() as u64 * fragment,
        })
    }
}
