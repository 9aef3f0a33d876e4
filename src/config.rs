use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::hashing::HashAlgorithm;
use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "/opt/seer/etc/seer.yml";
const ENV_PREFIX: &str = "RINGDRAIN_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ring_dir: PathBuf,
    pub backlog_dir: PathBuf,
    pub buffer_threshold: u32,
    pub mover_log: PathBuf,
    pub capture: CaptureConfig,
    pub export: ExportConfig,
    pub mover: MoverConfig,
    pub hotswap: HotswapConfig,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Rotation interval of the capture writer; backlog files younger than
    /// 1.5x this value are treated as still active.
    pub rotate_seconds: u64,
    /// File-name regex selecting capture files in the ring directory.
    pub ring_pattern: String,
    /// File-name regex selecting capture files in the backlog directory.
    pub backlog_pattern: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Export mount points in priority order.
    pub mount_candidates: Vec<PathBuf>,
    pub min_free_pct: f64,
    /// Seconds between hotswap polls.
    pub poll_interval: f64,
    pub hash: HashAlgorithm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoverConfig {
    /// Seconds without modification before a ring file counts as closed.
    pub quiet_secs: u64,
    pub verify: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotswapConfig {
    pub state_file: PathBuf,
    pub lock_file: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub json: bool,
    pub verbose: bool,
    /// Also append diagnostics to this file, e.g. `/var/log/seer/hotswap.log`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ring_dir: PathBuf::from("/var/seer/pcap_ring"),
            backlog_dir: PathBuf::from("/opt/seer/var/backlog"),
            buffer_threshold: 4,
            mover_log: PathBuf::from("/var/log/seer/mover.log"),
            capture: CaptureConfig::default(),
            export: ExportConfig::default(),
            mover: MoverConfig::default(),
            hotswap: HotswapConfig::default(),
            log: LogSettings::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            rotate_seconds: 20,
            ring_pattern: r"\.pcap$".to_string(),
            backlog_pattern: r"\.pcap".to_string(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            mount_candidates: vec![
                PathBuf::from("/mnt/seer_external"),
                PathBuf::from("/mnt/SEER_EXT"),
                PathBuf::from("/media/seer_external"),
            ],
            min_free_pct: 2.0,
            poll_interval: 2.0,
            hash: HashAlgorithm::Sha256,
        }
    }
}

impl Default for MoverConfig {
    fn default() -> Self {
        Self {
            quiet_secs: 3,
            verify: true,
        }
    }
}

impl Default for HotswapConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("/var/log/seer/hotswap_state.json"),
            lock_file: PathBuf::from("/var/log/seer/seer-hotswap.lock"),
        }
    }
}

impl AppConfig {
    /// Layer defaults, the config file, `RINGDRAIN_*` environment variables and
    /// CLI overrides, then validate.
    ///
    /// A missing file is not an error; the remaining layers still apply.
    /// Returns the config together with any warnings produced while replacing
    /// invalid values with defaults.
    pub fn load<T: Serialize>(
        path: &Path,
        overrides: Option<&T>,
    ) -> Result<(Self, Vec<String>), ConfigError> {
        Self::resolve(Some(path), overrides)
    }

    /// Same layering as [`AppConfig::load`] with the file layer left out. Used
    /// when the file is unreadable, so environment and CLI settings survive.
    pub fn load_without_file<T: Serialize>(
        overrides: Option<&T>,
    ) -> Result<(Self, Vec<String>), ConfigError> {
        Self::resolve(None, overrides)
    }

    fn resolve<T: Serialize>(
        path: Option<&Path>,
        overrides: Option<&T>,
    ) -> Result<(Self, Vec<String>), ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        if let Some(path) = path {
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => figment.merge(Toml::file(path)),
                _ => figment.merge(Yaml::file(path)),
            };
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::globals(overrides));
        }

        let mut config: AppConfig = figment.extract().map_err(Box::new)?;
        let warnings = config.validate();
        Ok((config, warnings))
    }

    /// Replace out-of-range values with defaults. Each replacement yields a warning.
    pub fn validate(&mut self) -> Vec<String> {
        let defaults = AppConfig::default();
        let mut warnings = Vec::new();

        if !(0.0..=100.0).contains(&self.export.min_free_pct) {
            warnings.push(format!(
                "export.min_free_pct {} out of range 0-100, using {}",
                self.export.min_free_pct, defaults.export.min_free_pct
            ));
            self.export.min_free_pct = defaults.export.min_free_pct;
        }

        if !self.export.poll_interval.is_finite() || self.export.poll_interval <= 0.0 {
            warnings.push(format!(
                "export.poll_interval {} must be positive, using {}",
                self.export.poll_interval, defaults.export.poll_interval
            ));
            self.export.poll_interval = defaults.export.poll_interval;
        }

        if self.capture.rotate_seconds == 0 {
            warnings.push(format!(
                "capture.rotate_seconds must be positive, using {}",
                defaults.capture.rotate_seconds
            ));
            self.capture.rotate_seconds = defaults.capture.rotate_seconds;
        }

        if self.mover.quiet_secs == 0 {
            warnings.push(format!(
                "mover.quiet_secs must be positive, using {}",
                defaults.mover.quiet_secs
            ));
            self.mover.quiet_secs = defaults.mover.quiet_secs;
        }

        if let Err(e) = Regex::new(&self.capture.ring_pattern) {
            warnings.push(format!("capture.ring_pattern invalid ({}), using default", e));
            self.capture.ring_pattern = defaults.capture.ring_pattern.clone();
        }

        if let Err(e) = Regex::new(&self.capture.backlog_pattern) {
            warnings.push(format!("capture.backlog_pattern invalid ({}), using default", e));
            self.capture.backlog_pattern = defaults.capture.backlog_pattern.clone();
        }

        if self.export.mount_candidates.is_empty() {
            warnings.push("export.mount_candidates is empty; all data will stage to backlog".into());
        }

        warnings
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.export.poll_interval)
    }

    pub fn quiet_window(&self) -> Duration {
        Duration::from_secs(self.mover.quiet_secs)
    }

    /// Age below which a backlog file is assumed to still be written to.
    pub fn active_guard(&self) -> Duration {
        Duration::from_secs(self.capture.rotate_seconds).mul_f64(1.5)
    }

    pub fn ring_pattern(&self) -> Regex {
        compile_or_default(&self.capture.ring_pattern, r"\.pcap$")
    }

    pub fn backlog_pattern(&self) -> Regex {
        compile_or_default(&self.capture.backlog_pattern, r"\.pcap")
    }
}

fn compile_or_default(pattern: &str, fallback: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|_| Regex::new(fallback).expect("built-in pattern is valid"))
}
