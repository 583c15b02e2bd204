//! Worker threads for the slow side of the mechanism.
//!
//! The slope command must overlap the next acquisition, so the frame loop
//! hands it to a dedicated worker through a bounded(1) channel and moves on.
//! A full channel means the previous move is still in flight; the new
//! command is dropped with a warning, keeping at most one outstanding move.
//! Homing is long and blocking, so it runs on its own detached thread and
//! reports completion back over a channel the loop drains between frames.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{info, warn};

use hardware::isu::IsuInterface;

use crate::error::GuiderError;

/// The 5-tuple handed to the slope worker, by value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlopeCommand {
    /// Guide loop frequency, Hz (the frame rate).
    pub rate_hz: f64,
    /// Current mechanism angles, mrad.
    pub last_x: f64,
    pub last_y: f64,
    /// Target angles, mrad.
    pub next_x: f64,
    pub next_y: f64,
}

pub struct ActuatorHandle {
    sender: Sender<SlopeCommand>,
    worker: Option<JoinHandle<()>>,
}

impl ActuatorHandle {
    /// Start the slope worker on a shared ISU handle.
    pub fn spawn(isu: Arc<dyn IsuInterface>) -> Result<Self, GuiderError> {
        let (sender, receiver) = bounded::<SlopeCommand>(1);

        let worker = thread::Builder::new()
            .name("isu-slope".into())
            .spawn(move || {
                while let Ok(command) = receiver.recv() {
                    if let Err(e) = isu.setup_slope(
                        command.rate_hz,
                        command.last_x,
                        command.last_y,
                        command.next_x,
                        command.next_y,
                    ) {
                        warn!(
                            "failed setting analog output slope with arguments \
                             {} {} {} {} {}: {e}",
                            command.rate_hz,
                            command.last_x,
                            command.last_y,
                            command.next_x,
                            command.next_y
                        );
                    }
                }
            })
            .map_err(GuiderError::ThreadSpawn)?;

        Ok(Self {
            sender,
            worker: Some(worker),
        })
    }

    /// Queue a slope command without waiting. Returns false if it was
    /// dropped because the previous move is still in flight.
    pub fn dispatch(&self, command: SlopeCommand) -> bool {
        match self.sender.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("slope worker busy, dropping correction for this frame");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("slope worker has shut down");
                false
            }
        }
    }

    /// Drop the queue and wait for the worker to drain.
    pub fn shutdown(mut self) {
        self.close_and_join();
    }

    fn close_and_join(&mut self) {
        if let Some(worker) = self.worker.take() {
            // Swap in a dummy sender so the real channel closes and the
            // worker's recv loop ends.
            drop(std::mem::replace(&mut self.sender, bounded(0).0));
            if worker.join().is_err() {
                warn!("slope worker panicked");
            }
        }
    }
}

impl Drop for ActuatorHandle {
    fn drop(&mut self) {
        self.close_and_join();
    }
}

/// Pending homing notification, drained by the frame loop between frames.
#[derive(Default)]
pub struct HomingSlot {
    pending: Option<Receiver<bool>>,
}

impl HomingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_progress(&self) -> bool {
        self.pending.is_some()
    }

    /// Kick off homing on a detached thread. The worker reports success over
    /// the channel; it never touches server state.
    pub fn start(&mut self, isu: Arc<dyn IsuInterface>) -> Result<(), GuiderError> {
        let (sender, receiver) = bounded::<bool>(1);
        thread::Builder::new()
            .name("isu-homing".into())
            .spawn(move || {
                let ok = match isu.home() {
                    Ok(()) => match isu.enable() {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("failed enabling the ISU mechanism after homing: {e}");
                            false
                        }
                    },
                    Err(e) => {
                        warn!("failed homing ISU: {e}");
                        false
                    }
                };
                let _ = sender.send(ok);
            })
            .map_err(GuiderError::ThreadSpawn)?;

        self.pending = Some(receiver);
        Ok(())
    }

    /// Non-blocking check for a finished homing run.
    pub fn poll(&mut self) -> Option<bool> {
        let receiver = self.pending.as_ref()?;
        match receiver.try_recv() {
            Ok(ok) => {
                self.pending = None;
                if ok {
                    info!("ISU homing complete, mechanism enabled");
                }
                Some(ok)
            }
            Err(crossbeam_channel::TryRecvError::Empty) => None,
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                self.pending = None;
                warn!("homing worker died without reporting");
                Some(false)
            }
        }
    }
}
