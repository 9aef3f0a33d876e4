//! Arrival-edge backlog drains through the hotswap state machine.

use chrono::Local;
use filetime::{FileTime, set_file_mtime};
use ringdrain::adapters::{SimulatedProbe, VolumeSimulator};
use ringdrain::config::AppConfig;
use ringdrain::core::drive::DriveDetector;
use ringdrain::core::hotswap::{BatchReport, DriveState, HotswapMachine, Transition};
use ringdrain::core::manifest::{MANIFEST_FILE, read_manifest};
use ringdrain::core::models::TransferResult;
use ringdrain::core::state::load_state;
use ringdrain::core::transfer_engine::{NativeCopyEngine, TransferEngine, Transferred};
use ringdrain::core::transfer_log::read_records;
use ringdrain::error::TransferError;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

struct Rig {
    _temp: TempDir,
    config: AppConfig,
    drive: PathBuf,
    sim: VolumeSimulator,
    probe: Arc<SimulatedProbe>,
}

impl Rig {
    fn backlog(&self) -> &Path {
        &self.config.backlog_dir
    }

    fn machine(&self, engine: Arc<dyn TransferEngine>) -> HotswapMachine {
        let detector = DriveDetector::new(
            self.config.export.mount_candidates.clone(),
            self.config.export.min_free_pct,
            self.probe.clone(),
        );
        HotswapMachine::new(&self.config, "sensor-01".to_string(), detector, engine)
    }

    fn native(&self) -> HotswapMachine {
        self.machine(Arc::new(NativeCopyEngine::default()))
    }
}

fn rig() -> Rig {
    let temp = tempdir().unwrap();
    let drive = temp.path().join("mnt/seer_external");
    std::fs::create_dir_all(&drive).unwrap();

    let mut config = AppConfig::default();
    config.backlog_dir = temp.path().join("backlog");
    config.hotswap.state_file = temp.path().join("state/hotswap_state.json");
    config.export.mount_candidates = vec![drive.clone()];
    std::fs::create_dir_all(&config.backlog_dir).unwrap();

    let (probe, sim) = SimulatedProbe::new();
    Rig {
        _temp: temp,
        config,
        drive,
        sim,
        probe: Arc::new(probe),
    }
}

/// Helper to create a backlog file last written `age_secs` ago
fn backlog_file(dir: &Path, name: &str, age_secs: i64) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("capture body {}", name)).unwrap();
    let mtime = FileTime::from_unix_time(FileTime::now().unix_seconds() - age_secs, 0);
    set_file_mtime(&path, mtime).unwrap();
    path
}

fn arrival_report(transition: Transition) -> BatchReport {
    match transition {
        Transition::Arrived { report, .. } => report,
        other => panic!("expected arrival, got {:?}", other),
    }
}

/// Fails the named files with a checksum mismatch or an I/O error and
/// delegates everything else to the native engine.
struct SelectiveEngine {
    mismatch: Vec<&'static str>,
    io_error: Vec<&'static str>,
    inner: NativeCopyEngine,
}

impl SelectiveEngine {
    fn failing_all() -> Self {
        Self {
            mismatch: Vec::new(),
            io_error: vec!["*"],
            inner: NativeCopyEngine::default(),
        }
    }
}

impl TransferEngine for SelectiveEngine {
    fn transfer(
        &self,
        source: &Path,
        dest_dir: &Path,
        verify: bool,
    ) -> Result<Transferred, TransferError> {
        let name = source.file_name().unwrap().to_string_lossy().to_string();
        if self.mismatch.iter().any(|m| *m == name) {
            return Err(TransferError::ChecksumMismatch {
                source_hash: "aaaa".to_string(),
                dest_hash: "bbbb".to_string(),
            });
        }
        if self.io_error.iter().any(|m| *m == "*" || *m == name) {
            return Err(TransferError::io(
                "copy",
                io::Error::from_raw_os_error(libc::EIO),
            ));
        }
        self.inner.transfer(source, dest_dir, verify)
    }
}

#[test]
fn test_arrival_exports_backlog_with_manifest_and_log() {
    let rig = rig();
    backlog_file(rig.backlog(), "b.pcap", 600);
    backlog_file(rig.backlog(), "a.pcap", 300);
    let mut machine = rig.native();
    rig.sim.attach(&rig.drive, 60, 100);

    let now = Local::now();
    let report = arrival_report(machine.step(now).unwrap());

    assert_eq!(report.exported, 2);
    assert_eq!(report.failed, 0);
    assert!(report.dest_dir.join("a.pcap").exists());
    assert!(report.dest_dir.join("b.pcap").exists());
    assert_eq!(std::fs::read_dir(rig.backlog()).unwrap().count(), 0);

    let manifest = read_manifest(&report.dest_dir).unwrap();
    let names: Vec<_> = manifest.iter().map(|e| e.file_name.as_str()).collect();
    assert_eq!(names, vec!["a.pcap", "b.pcap"]);
    for entry in &manifest {
        assert_eq!(entry.hash.len(), 64, "manifest carries full sha256 digests");
    }

    let records = read_records(&rig.drive).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].src, rig.backlog().join("a.pcap"));
    assert!(records.iter().all(|r| r.result == TransferResult::Ok));
    assert!(records.iter().all(|r| r.hostname == "sensor-01"));
    assert_eq!(records[0].hash.as_deref().map(str::len), Some(16));
    assert_eq!(records[0].size, "capture body a.pcap".len() as u64);
}

#[test]
fn test_empty_backlog_rerun_keeps_total_and_manifest() {
    let rig = rig();
    backlog_file(rig.backlog(), "a.pcap", 300);
    let mut machine = rig.native();
    rig.sim.attach(&rig.drive, 60, 100);

    let report = arrival_report(machine.step(Local::now()).unwrap());
    let manifest_path = report.dest_dir.join(MANIFEST_FILE);
    let manifest_before = std::fs::read_to_string(&manifest_path).unwrap();
    assert_eq!(machine.total_exported(), 1);

    rig.sim.detach(&rig.drive);
    assert_eq!(machine.step(Local::now()).unwrap(), Transition::Departed);
    rig.sim.attach(&rig.drive, 60, 100);
    let rerun = arrival_report(machine.step(Local::now()).unwrap());

    assert_eq!(rerun.exported, 0);
    assert!(rerun.manifest.is_none());
    assert_eq!(machine.total_exported(), 1);
    assert_eq!(std::fs::read_to_string(&manifest_path).unwrap(), manifest_before);
    assert_eq!(read_records(&rig.drive).unwrap().len(), 1);
}

#[test]
fn test_second_batch_overwrites_manifest() {
    let rig = rig();
    backlog_file(rig.backlog(), "first.pcap", 300);
    let mut machine = rig.native();
    rig.sim.attach(&rig.drive, 60, 100);
    let report = arrival_report(machine.step(Local::now()).unwrap());

    rig.sim.detach(&rig.drive);
    machine.step(Local::now()).unwrap();
    backlog_file(rig.backlog(), "second.pcap", 300);
    rig.sim.attach(&rig.drive, 60, 100);
    machine.step(Local::now()).unwrap();

    let manifest = read_manifest(&report.dest_dir).unwrap();
    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest[0].file_name, "second.pcap");
    assert!(report.dest_dir.join("first.pcap").exists());
    assert_eq!(machine.total_exported(), 2);
}

#[test]
fn test_total_never_decreases_when_every_transfer_fails() {
    let rig = rig();
    backlog_file(rig.backlog(), "a.pcap", 300);
    backlog_file(rig.backlog(), "b.pcap", 300);
    let mut machine = rig.machine(Arc::new(SelectiveEngine::failing_all()));

    let mut last_total = machine.total_exported();
    for _ in 0..3 {
        rig.sim.attach(&rig.drive, 60, 100);
        let report = arrival_report(machine.step(Local::now()).unwrap());
        assert_eq!(report.exported, 0);
        assert_eq!(report.failed, 2);
        assert!(machine.total_exported() >= last_total);
        last_total = machine.total_exported();

        rig.sim.detach(&rig.drive);
        machine.step(Local::now()).unwrap();
    }

    assert_eq!(last_total, 0);
    assert!(rig.backlog().join("a.pcap").exists());
    assert!(rig.backlog().join("b.pcap").exists());
    let today = rig.drive.join("pcap").join(Local::now().format("%Y%m%d").to_string());
    assert!(!today.join(MANIFEST_FILE).exists());
    let state = load_state(&rig.config.hotswap.state_file).unwrap();
    assert!(state.last_export_ts.is_none());
    assert_eq!(read_records(&rig.drive).unwrap().len(), 6);
}

#[test]
fn test_every_attempt_gets_one_log_record() {
    let rig = rig();
    for name in ["good.pcap", "corrupt.pcap", "broken.pcap"] {
        backlog_file(rig.backlog(), name, 300);
    }
    let engine = SelectiveEngine {
        mismatch: vec!["corrupt.pcap"],
        io_error: vec!["broken.pcap"],
        inner: NativeCopyEngine::default(),
    };
    let mut machine = rig.machine(Arc::new(engine));
    rig.sim.attach(&rig.drive, 60, 100);

    let report = arrival_report(machine.step(Local::now()).unwrap());
    assert_eq!(report.exported, 1);
    assert_eq!(report.failed, 2);

    let records = read_records(&rig.drive).unwrap();
    let outcomes: Vec<_> = records
        .iter()
        .map(|r| (r.src.file_name().unwrap().to_string_lossy().to_string(), r.result))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            ("broken.pcap".to_string(), TransferResult::IoError),
            ("corrupt.pcap".to_string(), TransferResult::VerifyFail),
            ("good.pcap".to_string(), TransferResult::Ok),
        ]
    );
    assert!(records[0].hash.is_none());
    assert!(records[1].hash.is_none());
    assert!(records[2].hash.is_some());

    let manifest = read_manifest(&report.dest_dir).unwrap();
    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest[0].file_name, "good.pcap");
    assert!(rig.backlog().join("corrupt.pcap").exists());
    assert!(rig.backlog().join("broken.pcap").exists());
}

#[test]
fn test_active_files_are_left_for_later() {
    let rig = rig();
    backlog_file(rig.backlog(), "settled.pcap", 300);
    // 1.5 x 20s rotation makes anything under 30s old active
    backlog_file(rig.backlog(), "fresh.pcap", 5);
    let mut machine = rig.native();
    rig.sim.attach(&rig.drive, 60, 100);

    let report = arrival_report(machine.step(Local::now()).unwrap());

    assert_eq!(report.exported, 1);
    assert_eq!(report.skipped_active, 1);
    assert!(rig.backlog().join("fresh.pcap").exists());
    assert_eq!(read_records(&rig.drive).unwrap().len(), 1);
}

#[test]
fn test_non_matching_backlog_files_are_ignored() {
    let rig = rig();
    backlog_file(rig.backlog(), "a.pcap", 300);
    backlog_file(rig.backlog(), "README", 300);
    let mut machine = rig.native();
    rig.sim.attach(&rig.drive, 60, 100);

    let report = arrival_report(machine.step(Local::now()).unwrap());

    assert_eq!(report.exported, 1);
    assert!(rig.backlog().join("README").exists());
}

#[test]
fn test_state_file_tracks_transitions() {
    let rig = rig();
    backlog_file(rig.backlog(), "a.pcap", 300);
    let mut machine = rig.native();

    machine.step(Local::now()).unwrap();
    assert!(
        !rig.config.hotswap.state_file.exists(),
        "absent to absent writes nothing"
    );

    rig.sim.attach(&rig.drive, 60, 100);
    let arrived_at = Local::now();
    machine.step(arrived_at).unwrap();
    let state = load_state(&rig.config.hotswap.state_file).unwrap();
    assert!(state.drive_present);
    assert_eq!(state.total_exported, 1);
    assert_eq!(state.last_export_ts, Some(arrived_at));

    rig.sim.detach(&rig.drive);
    machine.step(Local::now()).unwrap();
    let state = load_state(&rig.config.hotswap.state_file).unwrap();
    assert!(!state.drive_present);
    assert_eq!(state.total_exported, 1);
    assert_eq!(state.last_export_ts, Some(arrived_at));
}

#[test]
fn test_restart_with_drive_present_drains_again() {
    let rig = rig();
    backlog_file(rig.backlog(), "a.pcap", 300);
    rig.sim.attach(&rig.drive, 60, 100);
    let mut first = rig.native();
    arrival_report(first.step(Local::now()).unwrap());
    drop(first);

    backlog_file(rig.backlog(), "b.pcap", 300);
    let mut restarted = rig.native();
    assert_eq!(restarted.drive_state(), DriveState::Absent);
    let report = arrival_report(restarted.step(Local::now()).unwrap());

    assert_eq!(report.exported, 1);
    assert!(report.dest_dir.join("b.pcap").exists());
    assert_eq!(read_records(&rig.drive).unwrap().len(), 2);
}

#[test]
fn test_unreadable_backlog_retries_on_next_poll() {
    let rig = rig();
    std::fs::remove_dir(rig.backlog()).unwrap();
    std::fs::write(rig.backlog(), "not a directory").unwrap();
    let mut machine = rig.native();
    rig.sim.attach(&rig.drive, 60, 100);

    assert!(machine.step(Local::now()).is_err());
    assert_eq!(machine.drive_state(), DriveState::Absent);

    std::fs::remove_file(rig.backlog()).unwrap();
    std::fs::create_dir(rig.backlog()).unwrap();
    backlog_file(rig.backlog(), "a.pcap", 300);

    let report = arrival_report(machine.step(Local::now()).unwrap());
    assert_eq!(report.exported, 1);
    assert_eq!(machine.drive_state(), DriveState::Present);
}

#[test]
fn test_first_qualifying_candidate_wins() {
    let mut rig = rig();
    let roomy = rig.drive.parent().unwrap().join("SEER_EXT");
    std::fs::create_dir_all(&roomy).unwrap();
    rig.config.export.mount_candidates = vec![rig.drive.clone(), roomy.clone()];
    backlog_file(rig.backlog(), "a.pcap", 300);
    let mut machine = rig.native();

    rig.sim.attach(&rig.drive, 10, 100);
    rig.sim.attach(&roomy, 90, 100);

    match machine.step(Local::now()).unwrap() {
        Transition::Arrived { target, .. } => assert_eq!(target.mount_point, rig.drive),
        other => panic!("expected arrival, got {:?}", other),
    }
    assert!(!roomy.join("pcap").exists());
}
