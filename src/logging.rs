//! Diagnostic logging for ringdrain.
//!
//! Diagnostics go through the `tracing` ecosystem, either as pretty console
//! output or as JSON lines for a log collector. The mover's own append-only
//! log and the drive-resident transfer log are data artifacts and do not pass
//! through here.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::LogSettings;

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// One JSON object per event instead of human-readable lines
    pub json: bool,
    /// Default level DEBUG instead of INFO
    pub verbose: bool,
    /// Durable copy of the diagnostics, appended as plain text
    pub file: Option<PathBuf>,
}

impl From<&LogSettings> for LogConfig {
    fn from(settings: &LogSettings) -> Self {
        Self {
            json: settings.json,
            verbose: settings.verbose,
            file: settings.file.clone(),
        }
    }
}

/// Open `path` for appending, creating its directory if needed.
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Filter directive used when `RUST_LOG` is unset.
fn default_directive(verbose: bool) -> String {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    format!("ringdrain={}", level.as_str().to_lowercase())
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the level derived from `verbose`. A second call keeps
/// the first subscriber and reports the conflict on stderr.
pub fn init(config: LogConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config.verbose)));

    let json_layer = config.json.then(|| {
        fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
    });
    let console_layer = (!config.json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });

    let file_layer = config.file.as_deref().and_then(|path| match open_log_file(path) {
        Ok(file) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file)),
        ),
        Err(e) => {
            eprintln!("ringdrain: cannot open log file {}: {}", path.display(), e);
            None
        }
    });

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    if let Err(e) = installed {
        eprintln!("ringdrain: logging already initialised: {}", e);
    }
}

/// Lets a repeating message through at most once per interval, such as the
/// steady-state "drive still present" heartbeat.
pub struct LogThrottle {
    interval: Duration,
    last_emit: Mutex<Option<Instant>>,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: Mutex::new(None),
        }
    }

    pub fn should_log(&self) -> bool {
        self.should_log_at(Instant::now())
    }

    fn should_log_at(&self, now: Instant) -> bool {
        let mut last = self.last_emit.lock().unwrap_or_else(PoisonError::into_inner);
        let due = match *last {
            None => true,
            Some(prev) => now.saturating_duration_since(prev) >= self.interval,
        };
        if due {
            *last = Some(now);
        }
        due
    }

    /// Let the next message through immediately. Called on state transitions.
    pub fn reset(&self) {
        *self.last_emit.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
