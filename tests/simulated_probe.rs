//! Drive detection through the simulated probe.

use chrono::NaiveDate;
use ringdrain::adapters::SimulatedProbe;
use ringdrain::core::drive::{DriveDetector, VolumeProbe};
use std::path::PathBuf;
use std::sync::Arc;

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
}

fn candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/mnt/seer_external"),
        PathBuf::from("/mnt/SEER_EXT"),
        PathBuf::from("/media/seer_external"),
    ]
}

#[test]
fn test_attach_detach_cycle() {
    let (probe, sim) = SimulatedProbe::new();
    let detector = DriveDetector::new(candidates(), 2.0, Arc::new(probe));

    assert!(detector.detect(date()).is_none());

    sim.attach("/mnt/SEER_EXT", 500, 1000);
    let target = detector.detect(date()).unwrap();
    assert_eq!(target.mount_point, PathBuf::from("/mnt/SEER_EXT"));
    assert_eq!(target.pcap_dir, PathBuf::from("/mnt/SEER_EXT/pcap/20260314"));
    assert_eq!(target.free_bytes, 500);
    assert!((target.free_pct - 50.0).abs() < f64::EPSILON);

    sim.detach("/mnt/SEER_EXT");
    assert!(detector.detect(date()).is_none());
}

#[test]
fn test_full_first_candidate_yields_to_next() {
    let (probe, sim) = SimulatedProbe::new();
    let detector = DriveDetector::new(candidates(), 2.0, Arc::new(probe));

    // 1% free on the first candidate, plenty on the third
    sim.attach("/mnt/seer_external", 10, 1000);
    sim.attach("/media/seer_external", 900, 1000);

    let target = detector.detect(date()).unwrap();
    assert_eq!(target.mount_point, PathBuf::from("/media/seer_external"));
}

#[test]
fn test_threshold_is_inclusive() {
    let (probe, sim) = SimulatedProbe::new();
    let detector = DriveDetector::new(candidates(), 2.0, Arc::new(probe));

    sim.attach("/mnt/seer_external", 20, 1000);
    assert!(detector.detect(date()).is_some());

    sim.attach("/mnt/seer_external", 19, 1000);
    assert!(detector.detect(date()).is_none());
}

#[test]
fn test_read_only_volume_is_skipped() {
    let (probe, sim) = SimulatedProbe::new();
    let probe = Arc::new(probe);
    let detector = DriveDetector::new(candidates(), 2.0, probe.clone());

    sim.attach("/mnt/seer_external", 500, 1000);
    sim.set_writable("/mnt/seer_external", false);

    assert!(probe.is_mount_point("/mnt/seer_external".as_ref()));
    assert!(!probe.is_writable("/mnt/seer_external".as_ref()));
    assert!(detector.detect(date()).is_none());
}

#[test]
fn test_unknown_volume_space_is_an_error() {
    let (probe, _sim) = SimulatedProbe::new();
    assert!(probe.space("/mnt/nowhere".as_ref()).is_err());
}

#[test]
fn test_simulator_handles_are_shared() {
    let (probe, sim) = SimulatedProbe::new();
    let detector = DriveDetector::new(candidates(), 2.0, Arc::new(probe));
    let other = sim.clone();

    other.attach("/mnt/seer_external", 500, 1000);
    assert!(detector.detect(date()).is_some());

    sim.detach("/mnt/seer_external");
    assert!(detector.detect(date()).is_none());
}
