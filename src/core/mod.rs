pub mod drive;
pub mod hashing;
pub mod hotswap;
pub mod lock;
pub mod manifest;
pub mod models;
pub mod mover;
pub mod orchestrator;
pub mod ring;
pub mod state;
pub mod transfer_engine;
pub mod transfer_log;

pub use drive::{DriveDetector, VolumeProbe, VolumeSpace};
pub use hashing::{ContentHasher, HashAlgorithm, StreamingHasher};
pub use hotswap::{BatchReport, DriveState, HotswapMachine, Transition};
pub use lock::SingleInstanceLock;
pub use models::{CaptureFile, Destination, ExportTarget, HotswapState, TransferRecord, TransferResult};
pub use mover::{Mover, MoverOutcome};
pub use orchestrator::{IntervalTicker, Orchestrator, Ticker};
pub use ring::{MoveDecision, RingWatcher};
