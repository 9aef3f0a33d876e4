use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::core::models::HotswapState;

/// Persists [`HotswapState`] as pretty JSON. Only the hotswap daemon writes it;
/// nothing in the daemon ever reads it back.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the state file in full via a temporary sibling and rename.
    pub fn write(&self, state: &HotswapState) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        {
            let mut file = File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, state)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }

        fs::rename(&tmp, &self.path).inspect_err(|_| {
            let _ = fs::remove_file(&tmp);
        })
    }
}

/// Read a persisted state file. For read-only consumers such as `status`.
pub fn load_state(path: &Path) -> io::Result<HotswapState> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(io::Error::from)
}
