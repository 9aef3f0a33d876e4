//! Per-directory checksum manifest.
//!
//! `MANIFEST.txt` lists `<hex-hash>  <filename>` for every file a batch
//! transferred into the directory, sorted by file name, after a short comment
//! header. The body is `sha256sum -c` compatible when SHA-256 is in use. Each
//! completed batch replaces the previous manifest in full.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, SecondsFormat};

use crate::core::hashing::HashAlgorithm;

pub const MANIFEST_FILE: &str = "MANIFEST.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub file_name: String,
    pub hash: String,
}

pub struct ManifestWriter {
    algorithm: HashAlgorithm,
}

impl ManifestWriter {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Replace `<dir>/MANIFEST.txt` with `entries`, sorted by file name.
    ///
    /// The new manifest is written to a temporary sibling and renamed over the
    /// old one, so readers see either the old or the new manifest in full.
    pub fn write(
        &self,
        dir: &Path,
        entries: &[ManifestEntry],
        generated: DateTime<Local>,
    ) -> io::Result<PathBuf> {
        let mut sorted: Vec<&ManifestEntry> = entries.iter().collect();
        sorted.sort_by(|a, b| a.file_name.cmp(&b.file_name));

        let mut body = String::new();
        body.push_str("# Capture Export Manifest\n");
        body.push_str(&format!(
            "# Generated: {}\n",
            generated.to_rfc3339_opts(SecondsFormat::Secs, false)
        ));
        body.push_str(&format!("# Format: {}  filename\n\n", self.algorithm));
        for entry in sorted {
            body.push_str(&format!("{}  {}\n", entry.hash, entry.file_name));
        }

        let path = dir.join(MANIFEST_FILE);
        let tmp = dir.join(format!(".{}.tmp", MANIFEST_FILE));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        Ok(path)
    }
}

/// Parse the entries of `<dir>/MANIFEST.txt`, skipping comments and blank lines.
pub fn read_manifest(dir: &Path) -> io::Result<Vec<ManifestEntry>> {
    let content = fs::read_to_string(dir.join(MANIFEST_FILE))?;

    content
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.split_once("  ")
                .map(|(hash, name)| ManifestEntry {
                    hash: hash.to_string(),
                    file_name: name.to_string(),
                })
                .ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("malformed manifest line: {}", line),
                    )
                })
        })
        .collect()
}
