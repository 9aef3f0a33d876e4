use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::error::LockError;

/// PID lock file guaranteeing a single live hotswap daemon.
///
/// The lock is released when the guard is dropped, on every exit path that
/// unwinds normally.
#[derive(Debug)]
pub struct SingleInstanceLock {
    path: PathBuf,
    pid: i32,
}

impl SingleInstanceLock {
    /// Take the lock at `path`, reclaiming it if the recorded owner is dead.
    ///
    /// The token is written to a private staging file and hard-linked into
    /// place, so the lock path never exists without a complete PID in it.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let pid = std::process::id() as i32;
        let io_err = |error: io::Error| LockError::Io {
            path: path.to_path_buf(),
            error,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let staging = staging_path(path, pid);
        write_token(&staging, pid).map_err(io_err)?;
        let taken = Self::publish(path, &staging, pid);
        if let Err(e) = fs::remove_file(&staging) {
            debug!(path = %staging.display(), error = %e, "Failed to remove lock staging file");
        }
        taken
    }

    fn publish(path: &Path, staging: &Path, pid: i32) -> Result<Self, LockError> {
        let io_err = |error: io::Error| LockError::Io {
            path: path.to_path_buf(),
            error,
        };

        // Two rounds: a stale token is removed once, then the link is retried.
        for _ in 0..2 {
            match fs::hard_link(staging, path) {
                Ok(()) => {
                    info!(path = %path.display(), pid, "Acquired instance lock");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        pid,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => match read_owner(path) {
                    Some(owner) if owner != pid && process_alive(owner) => {
                        return Err(LockError::Held {
                            pid: owner,
                            path: path.to_path_buf(),
                        });
                    }
                    owner => {
                        warn!(path = %path.display(), owner = ?owner, "Reclaiming stale lock");
                        match fs::remove_file(path) {
                            Ok(()) => {}
                            Err(e) if e.kind() == ErrorKind::NotFound => {}
                            Err(e) => return Err(io_err(e)),
                        }
                    }
                },
                Err(e) => return Err(io_err(e)),
            }
        }

        Err(io_err(io::Error::new(
            ErrorKind::AlreadyExists,
            "lock file reappeared while reclaiming",
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SingleInstanceLock {
    fn drop(&mut self) {
        // Only remove the token if it is still ours.
        if read_owner(&self.path) != Some(self.pid) {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Released instance lock"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to release lock"),
        }
    }
}

/// `.<lock name>.<pid>` next to the lock, on the same filesystem.
fn staging_path(path: &Path, pid: i32) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}", name, pid))
}

fn write_token(staging: &Path, pid: i32) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(staging)?;
    file.write_all(pid.to_string().as_bytes())?;
    file.sync_all()
}

fn read_owner(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Signal 0 probes existence. EPERM means the process exists under another user.
fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
