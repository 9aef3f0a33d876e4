mod native_copy;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::hashing::ContentHasher;
use crate::error::TransferError;

pub use native_copy::NativeCopyEngine;

/// How a file reached its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMethod {
    /// Atomic rename within one filesystem
    Renamed,
    /// Copy to the destination filesystem followed by source removal
    Copied,
    /// An identical file was already at the destination; only the source was removed
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transferred {
    pub destination: PathBuf,
    /// Full hex digest, present whenever verification was requested
    pub hash: Option<String>,
    pub bytes: u64,
    pub method: TransferMethod,
}

/// Moves one file into a destination directory.
///
/// On any error the source file is untouched and the attempt leaves nothing
/// behind in the destination directory.
pub trait TransferEngine: Send + Sync {
    fn transfer(
        &self,
        source: &Path,
        dest_dir: &Path,
        verify: bool,
    ) -> Result<Transferred, TransferError>;
}

pub fn create_engine(hasher: Arc<dyn ContentHasher>) -> Arc<dyn TransferEngine> {
    Arc::new(NativeCopyEngine::new(hasher))
}
