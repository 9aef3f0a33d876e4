use std::fmt;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Read size for streaming hashes; files of any size hash in constant memory.
const CHUNK_SIZE: usize = 128 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produces hex content digests for transfer verification.
pub trait ContentHasher: Send + Sync {
    fn algorithm(&self) -> HashAlgorithm;

    fn hash_file(&self, path: &Path) -> io::Result<String>;
}

/// Chunked file hasher for the configured algorithm.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingHasher {
    pub algorithm: HashAlgorithm,
}

impl StreamingHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }
}

impl ContentHasher for StreamingHasher {
    fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    fn hash_file(&self, path: &Path) -> io::Result<String> {
        let file = std::fs::File::open(path)?;
        match self.algorithm {
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                stream(file, |chunk| hasher.update(chunk))?;
                Ok(hex::encode(hasher.finalize()))
            }
            HashAlgorithm::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                stream(file, |chunk| {
                    hasher.update(chunk);
                })?;
                Ok(hasher.finalize().to_hex().to_string())
            }
        }
    }
}

fn stream(mut reader: impl Read, mut update: impl FnMut(&[u8])) -> io::Result<()> {
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        update(&buffer[..bytes_read]);
    }
}
