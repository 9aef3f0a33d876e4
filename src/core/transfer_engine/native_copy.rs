use crate::core::hashing::{ContentHasher, StreamingHasher};
use crate::core::transfer_engine::{TransferEngine, TransferMethod, Transferred};
use crate::error::TransferError;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Buffer size for file I/O operations (128KB for optimal throughput)
const BUFFER_SIZE: usize = 128 * 1024;

/// Native single-file transfer engine.
///
/// - Same-device moves are a single atomic rename
/// - Cross-device moves copy into a hidden `.part` file, fsync, optionally
///   verify both sides by content hash, then rename into place
/// - Permissions and timestamps are preserved
/// - The source is removed only after a verified (or unverified by request) copy
pub struct NativeCopyEngine {
    /// Whether to fsync each file after writing (safer but slower)
    pub sync_files: bool,
    /// Use rename when source and destination share a device. Disabling this
    /// forces the copy path, which tests use to exercise verification.
    pub rename_same_device: bool,
    hasher: Arc<dyn ContentHasher>,
}

impl Default for NativeCopyEngine {
    fn default() -> Self {
        Self::new(Arc::new(StreamingHasher::default()))
    }
}

impl NativeCopyEngine {
    pub fn new(hasher: Arc<dyn ContentHasher>) -> Self {
        Self {
            sync_files: true,
            rename_same_device: true,
            hasher,
        }
    }

    fn hash(&self, path: &Path) -> Result<String, TransferError> {
        self.hasher
            .hash_file(path)
            .map_err(|e| TransferError::io(format!("Failed to hash {}", path.display()), e))
    }

    fn rename_into_place(
        &self,
        source: &Path,
        dest: &Path,
        bytes: u64,
        verify: bool,
    ) -> Result<Transferred, TransferError> {
        fs::rename(source, dest).map_err(|e| classify(source, "Failed to rename", e))?;

        // The data has already moved; a hashing failure cannot be undone here.
        let hash = if verify {
            match self.hasher.hash_file(dest) {
                Ok(hash) => Some(hash),
                Err(e) => {
                    warn!(dest = %dest.display(), error = %e, "Failed to hash renamed file");
                    None
                }
            }
        } else {
            None
        };

        Ok(Transferred {
            destination: dest.to_path_buf(),
            hash,
            bytes,
            method: TransferMethod::Renamed,
        })
    }

    /// Resolve a name collision at the destination. A byte-identical file
    /// there means an earlier attempt committed but failed to remove the
    /// source, so the source is dropped. Anything else is refused.
    fn settle_existing(
        &self,
        source: &Path,
        dest: &Path,
        bytes: u64,
    ) -> Result<Transferred, TransferError> {
        if !dest.is_file() {
            return Err(TransferError::DestinationExists(dest.to_path_buf()));
        }

        let source_hash = self.hash(source).map_err(|e| match e {
            TransferError::Io { error, .. } => classify(source, "Failed to hash source", error),
            other => other,
        })?;
        let dest_hash = self.hash(dest)?;
        if source_hash != dest_hash {
            return Err(TransferError::DestinationExists(dest.to_path_buf()));
        }

        fs::remove_file(source).map_err(|e| classify(source, "Failed to remove duplicate source", e))?;
        info!(
            source = %source.display(),
            dest = %dest.display(),
            "Identical file already at destination; removed source"
        );

        Ok(Transferred {
            destination: dest.to_path_buf(),
            hash: Some(source_hash),
            bytes,
            method: TransferMethod::AlreadyPresent,
        })
    }

    fn copy_verify_commit(
        &self,
        source: &Path,
        dest: &Path,
        part: &Path,
        verify: bool,
    ) -> Result<Transferred, TransferError> {
        let bytes = copy_single_file(source, part, self.sync_files).map_err(|e| {
            if is_device_removed_error(&e.error) {
                warn!(dest = %dest.display(), "Export medium appears to have been removed");
            }
            classify(source, &e.message, e.error)
        })?;

        let hash = if verify {
            let source_hash = self.hash(source)?;
            let dest_hash = self.hash(part)?;
            if source_hash != dest_hash {
                return Err(TransferError::ChecksumMismatch {
                    source_hash,
                    dest_hash,
                });
            }
            Some(source_hash)
        } else {
            None
        };

        fs::rename(part, dest).map_err(|e| {
            TransferError::io(format!("Failed to commit {}", dest.display()), e)
        })?;
        sync_parent(dest);

        if let Err(e) = fs::remove_file(source) {
            // Destination is complete; the next attempt finds an identical
            // file there and only removes the source.
            warn!(source = %source.display(), error = %e, "Failed to remove source after transfer");
        }

        Ok(Transferred {
            destination: dest.to_path_buf(),
            hash,
            bytes,
            method: TransferMethod::Copied,
        })
    }
}

impl TransferEngine for NativeCopyEngine {
    fn transfer(
        &self,
        source: &Path,
        dest_dir: &Path,
        verify: bool,
    ) -> Result<Transferred, TransferError> {
        let start_time = Instant::now();

        let source_metadata = fs::metadata(source).map_err(|e| classify(source, "Failed to stat source", e))?;
        if !source_metadata.is_file() {
            return Err(TransferError::io(
                format!("Not a regular file: {}", source.display()),
                io::Error::from(ErrorKind::InvalidInput),
            ));
        }

        let file_name = source.file_name().ok_or_else(|| {
            TransferError::io(
                format!("Source has no file name: {}", source.display()),
                io::Error::from(ErrorKind::InvalidInput),
            )
        })?;

        fs::create_dir_all(dest_dir).map_err(|e| {
            TransferError::io(
                format!("Failed to create destination directory {}", dest_dir.display()),
                e,
            )
        })?;

        let dest = dest_dir.join(file_name);
        if dest.symlink_metadata().is_ok() {
            return self.settle_existing(source, &dest, source_metadata.len());
        }

        let dest_dir_metadata = fs::metadata(dest_dir).map_err(|e| {
            TransferError::io(format!("Failed to stat {}", dest_dir.display()), e)
        })?;
        let same_device = source_metadata.dev() == dest_dir_metadata.dev();

        let result = if same_device && self.rename_same_device {
            debug!(source = %source.display(), dest = %dest.display(), "Renaming within filesystem");
            self.rename_into_place(source, &dest, source_metadata.len(), verify)
        } else {
            let part = part_path(dest_dir, file_name);
            let _ = fs::remove_file(&part);

            debug!(source = %source.display(), dest = %dest.display(), "Copying across filesystems");
            let result = self.copy_verify_commit(source, &dest, &part, verify);
            if result.is_err() {
                let _ = fs::remove_file(&part);
            }
            result
        };

        if let Ok(done) = &result {
            info!(
                file = %file_name.to_string_lossy(),
                dest = %dest_dir.display(),
                bytes = done.bytes,
                method = ?done.method,
                verified = done.hash.is_some(),
                duration_ms = start_time.elapsed().as_millis() as u64,
                "Transfer complete"
            );
        }

        result
    }
}

/// Hidden sibling the copy is written to before it is committed.
fn part_path(dest_dir: &Path, file_name: &std::ffi::OsStr) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    name.push(file_name);
    name.push(".part");
    dest_dir.join(name)
}

/// Map a source-side I/O error, treating a missing source as a lost race.
fn classify(source: &Path, context: &str, error: io::Error) -> TransferError {
    if error.kind() == ErrorKind::NotFound && !source.exists() {
        return TransferError::SourceVanished(source.to_path_buf());
    }
    TransferError::io(context, error)
}

/// Error information from a file copy operation
struct FileCopyError {
    message: String,
    error: io::Error,
}

impl FileCopyError {
    fn new(message: &str) -> impl FnOnce(io::Error) -> Self + '_ {
        move |error| Self {
            message: message.to_string(),
            error,
        }
    }
}

/// Copy a single file with metadata preservation
fn copy_single_file(source: &Path, dest: &Path, sync_file: bool) -> Result<u64, FileCopyError> {
    let source_metadata =
        fs::metadata(source).map_err(FileCopyError::new("Failed to read source metadata"))?;

    let source_file = File::open(source).map_err(FileCopyError::new("Failed to open source file"))?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, source_file);

    let dest_file =
        File::create(dest).map_err(FileCopyError::new("Failed to create destination file"))?;
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, dest_file);

    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut bytes_written: u64 = 0;

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(FileCopyError::new("Failed to read from source")(e)),
        };

        writer
            .write_all(&buffer[..bytes_read])
            .map_err(FileCopyError::new("Failed to write to destination"))?;

        bytes_written += bytes_read as u64;
    }

    writer
        .flush()
        .map_err(FileCopyError::new("Failed to flush destination file"))?;

    let inner = writer.into_inner().map_err(|e| FileCopyError {
        message: "Failed to get inner file handle".to_string(),
        error: e.into_error(),
    })?;

    if sync_file {
        inner
            .sync_all()
            .map_err(FileCopyError::new("Failed to sync file"))?;
    }
    drop(inner);

    if let Err(e) = fs::set_permissions(dest, source_metadata.permissions()) {
        // Some export filesystems (vfat, exfat) reject permission bits
        debug!(dest = %dest.display(), error = %e, "Failed to set file permissions");
    }

    if let Err(e) = preserve_timestamps(&source_metadata, dest) {
        debug!(dest = %dest.display(), error = %e, "Failed to preserve file timestamps");
    }

    Ok(bytes_written)
}

fn preserve_timestamps(source_metadata: &fs::Metadata, dest: &Path) -> io::Result<()> {
    let atime = filetime::FileTime::from_last_access_time(source_metadata);
    let mtime = filetime::FileTime::from_last_modification_time(source_metadata);
    filetime::set_file_times(dest, atime, mtime)
}

/// Best-effort fsync of the directory holding `path` so the rename is durable.
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
            debug!(dir = %parent.display(), error = %e, "Failed to sync directory");
        }
    }
}

/// Check if an I/O error indicates the export device has gone away
pub(crate) fn is_device_removed_error(error: &io::Error) -> bool {
    match error.kind() {
        ErrorKind::BrokenPipe | ErrorKind::NotConnected => true,
        _ => matches!(
            error.raw_os_error(),
            Some(libc::EIO | libc::ENODEV | libc::ENXIO | libc::ENOMEDIUM | libc::EMEDIUMTYPE)
        ),
    }
}
