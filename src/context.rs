use std::sync::Arc;

use crate::adapters;
use crate::config::AppConfig;
use crate::core::drive::{DriveDetector, VolumeProbe};
use crate::core::hashing::StreamingHasher;
use crate::core::transfer_engine::{TransferEngine, create_engine};

/// Immutable per-process wiring shared by the mover and the hotswap daemon.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub hostname: String,
    pub probe: Arc<dyn VolumeProbe>,
    pub engine: Arc<dyn TransferEngine>,
}

impl AppContext {
    pub fn new(config: AppConfig, simulation: bool) -> Self {
        let hasher = Arc::new(StreamingHasher::new(config.export.hash));
        Self {
            hostname: hostname(),
            probe: adapters::get_probe(simulation),
            engine: create_engine(hasher),
            config: Arc::new(config),
        }
    }

    pub fn detector(&self) -> DriveDetector {
        DriveDetector::new(
            self.config.export.mount_candidates.clone(),
            self.config.export.min_free_pct,
            self.probe.clone(),
        )
    }
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
