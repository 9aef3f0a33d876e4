use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info};

use crate::core::hotswap::{HotswapMachine, Transition};
use crate::logging::LogThrottle;

/// Paces the hotswap poll loop.
#[async_trait]
pub trait Ticker: Send {
    /// Wait until the next poll is due. Returning `false` ends the loop.
    async fn tick(&mut self) -> bool;
}

/// Wall-clock ticker sleeping a fixed interval between polls.
pub struct IntervalTicker {
    interval: Duration,
}

impl IntervalTicker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        tokio::time::sleep(self.interval).await;
        true
    }
}

/// Runs the hotswap state machine until interrupted.
pub struct Orchestrator {
    machine: Arc<Mutex<HotswapMachine>>,
    heartbeat: LogThrottle,
}

impl Orchestrator {
    pub fn new(machine: HotswapMachine) -> Self {
        Self {
            machine: Arc::new(Mutex::new(machine)),
            heartbeat: LogThrottle::new(Duration::from_secs(300)),
        }
    }

    /// Shared handle to the machine, for inspection after or between polls.
    pub fn machine(&self) -> Arc<Mutex<HotswapMachine>> {
        self.machine.clone()
    }

    /// Poll, then wait for the ticker, until the ticker stops or `shutdown`
    /// resolves. A poll that is already running always completes first, so no
    /// manifest, log or state write is left half-applied.
    pub async fn start<T, S>(&self, ticker: &mut T, shutdown: S) -> Result<()>
    where
        T: Ticker,
        S: Future<Output = ()>,
    {
        info!(">> Hotswap service started");
        tokio::pin!(shutdown);

        {
            let machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
            machine.persist(Local::now());
        }

        loop {
            self.poll_once().await;

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Received interrupt; shutting down");
                    break;
                }
                more = ticker.tick() => {
                    if !more {
                        debug!("Ticker exhausted; stopping");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Run one step on the blocking pool. Errors and panics are logged and
    /// the loop carries on.
    async fn poll_once(&self) {
        let machine = self.machine.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let mut machine = machine.lock().unwrap_or_else(PoisonError::into_inner);
            machine.step(Local::now())
        })
        .await;

        match joined {
            Ok(Ok(transition)) => self.report(&transition),
            Ok(Err(e)) => error!(error = ?e, "Error in poll iteration"),
            Err(e) => error!(error = %e, "Poll iteration panicked"),
        }
    }

    fn report(&self, transition: &Transition) {
        match transition {
            Transition::Arrived { report, .. } => {
                self.heartbeat.reset();
                debug!(
                    exported = report.exported,
                    failed = report.failed,
                    skipped_active = report.skipped_active,
                    vanished = report.vanished,
                    "Arrival batch finished"
                );
            }
            Transition::StillPresent => {
                if self.heartbeat.should_log() {
                    info!("Drive still present");
                }
            }
            Transition::Departed | Transition::StillAbsent => {}
        }
    }
}

/// Install SIGINT and SIGTERM handlers now and return a future that resolves
/// on the first of them.
///
/// Handlers are registered before this returns; a signal arriving during the
/// first poll is held until the loop checks for shutdown. Must be called
/// inside a runtime.
pub fn shutdown_signal() -> io::Result<impl Future<Output = ()> + Send + 'static> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => debug!("SIGINT received"),
            _ = terminate.recv() => debug!("SIGTERM received"),
        }
    })
}
