use std::sync::Arc;

use tracing::info;

use crate::core::drive::VolumeProbe;

mod linux;
mod simulated;

pub use linux::SystemProbe;
pub use simulated::{SimulatedProbe, VolumeSimulator};

/// Build the volume probe for this run.
///
/// In simulation mode volumes are attached and detached from stdin
/// (`attach <path> [free_pct]`, `detach <path>`), pointing at ordinary directories.
pub fn get_probe(simulation: bool) -> Arc<dyn VolumeProbe> {
    if simulation {
        let (probe, controller) = SimulatedProbe::new();

        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lines().map_while(Result::ok) {
                let parts: Vec<&str> = line.split_whitespace().collect();
                match (parts.first().copied(), parts.get(1)) {
                    (Some("attach"), Some(path)) => {
                        let pct = parts
                            .get(2)
                            .and_then(|p| p.parse::<u64>().ok())
                            .unwrap_or(50)
                            .min(100);
                        controller.attach(path, pct, 100);
                        info!(path = %path, free_pct = pct, "(Simulator) Volume attached");
                    }
                    (Some("detach"), Some(path)) => {
                        controller.detach(path);
                        info!(path = %path, "(Simulator) Volume detached");
                    }
                    _ => println!("(Simulator) Use: 'attach <path> [free_pct]' or 'detach <path>'"),
                }
            }
        });

        return Arc::new(probe);
    }

    Arc::new(SystemProbe)
}
