//! Top-level signal loop.
//!
//! The supervisor is the only consumer of the bridge signal channel. It owns
//! the workflow, decides which cycle failures end the process, and handles
//! orderly shutdown: once `Shutdown` arrives no new detection starts, and the
//! loop returns as soon as any cycle in flight has finished.

use std::sync::mpsc::Receiver;

use crate::error::CycleError;
use crate::sensor::SensorSignal;
use crate::workflow::{DetectionWorkflow, Signal, WorkflowStats};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub stats: WorkflowStats,
    pub recovered_errors: u64,
}

pub struct Supervisor {
    workflow: DetectionWorkflow,
    signals: Receiver<Signal>,
    recovered_errors: u64,
}

impl Supervisor {
    pub fn new(workflow: DetectionWorkflow, signals: Receiver<Signal>) -> Self {
        Self {
            workflow,
            signals,
            recovered_errors: 0,
        }
    }

    /// Process signals until shutdown or a fatal cycle error.
    pub fn run(mut self) -> Result<RunSummary, CycleError> {
        let mut draining = false;
        log::info!(
            "Detection workflow running ({})",
            if self.workflow.has_camera() {
                "camera enabled"
            } else {
                "no camera: motion-only notifications"
            }
        );

        while let Ok(signal) = self.signals.recv() {
            match signal {
                Signal::Shutdown => {
                    if !draining {
                        log::info!("Shutdown requested");
                    }
                    draining = true;
                }
                Signal::Sensor(SensorSignal::MotionStart) if draining => {
                    log::info!("Motion ignored: shutting down");
                }
                signal => self.dispatch(signal)?,
            }

            if draining {
                if self.workflow.is_idle() {
                    break;
                }
                log::debug!(
                    "Waiting for in-flight detection to finish ({:?})",
                    self.workflow.phase()
                );
            }
        }

        log::info!("Detection workflow stopped");
        Ok(RunSummary {
            stats: self.workflow.stats(),
            recovered_errors: self.recovered_errors,
        })
    }

    fn dispatch(&mut self, signal: Signal) -> Result<(), CycleError> {
        match self.workflow.handle(signal) {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => {
                log::error!("{}", e);
                Err(e)
            }
            Err(e) => {
                self.recovered_errors += 1;
                log::warn!("{}", e);
                Ok(())
            }
        }
    }
}
