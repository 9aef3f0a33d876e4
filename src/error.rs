use std::path::PathBuf;
use thiserror::Error;

use crate::core::models::TransferResult;

/// Failure of a single file transfer. The source file is always left in place.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Source vanished before transfer: {0}")]
    SourceVanished(PathBuf),

    #[error("Destination already exists: {0}. Refusing to overwrite.")]
    DestinationExists(PathBuf),

    #[error("Checksum mismatch: {source_hash} != {dest_hash}")]
    ChecksumMismatch {
        source_hash: String,
        dest_hash: String,
    },

    #[error("{context}: {error}")]
    Io {
        context: String,
        #[source]
        error: std::io::Error,
    },
}

impl TransferError {
    pub fn io(context: impl Into<String>, error: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            error,
        }
    }

    /// The result code recorded in the transfer log for this failure.
    pub fn outcome(&self) -> TransferResult {
        match self {
            Self::ChecksumMismatch { .. } => TransferResult::VerifyFail,
            _ => TransferResult::IoError,
        }
    }

    /// Whether the failure means another actor already handled the file.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::SourceVanished(_))
    }
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Another instance is running (PID {pid}, lock {path})")]
    Held { pid: i32, path: PathBuf },

    #[error("Lock file {path}: {error}")]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}
