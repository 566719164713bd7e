use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use super::{AudioBackend, BackendConfig, CycleCallback};
use crate::error::BackendError;

/// Timer-paced backend with silent inputs whose output is discarded. Used
/// when no device is available.
pub struct DummyBackend {
    config: Option<BackendConfig>,
    callback: Option<CycleCallback>,
    running: Option<(Sender<()>, JoinHandle<CycleCallback>)>,
    cycles: Arc<AtomicU64>,
}

impl DummyBackend {
    pub fn new() -> Self {
        Self {
            config: None,
            callback: None,
            running: None,
            cycles: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cycles requested since creation.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "dummy"
    }

    fn init(&mut self, config: BackendConfig) -> Result<(), BackendError> {
        if config.buffer_size == 0 || config.sample_rate == 0 {
            return Err(BackendError::Protocol(format!(
                "invalid stream shape {} Hz / {} frames",
                config.sample_rate, config.buffer_size
            )));
        }
        self.config = Some(config);
        Ok(())
    }

    fn on_cycle(&mut self, callback: CycleCallback) {
        self.callback = Some(callback);
    }

    fn activate(&mut self) -> Result<(), BackendError> {
        if self.running.is_some() {
            return Ok(());
        }
        let config = self.config.ok_or(BackendError::NotInitialized)?;
        let mut callback = self.callback.take().ok_or(BackendError::NoCallback)?;
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let cycles = Arc::clone(&self.cycles);
        let period = config.period();

        let spawned = thread::Builder::new()
            .name("harmoniq-dummy-backend".into())
            .spawn(move || {
                let frames = config.buffer_size;
                let silence = vec![0.0f32; frames];
                let inputs: Vec<&[f32]> = (0..config.inputs).map(|_| silence.as_slice()).collect();
                let mut playback: Vec<Vec<f32>> =
                    (0..config.outputs).map(|_| vec![0.0; frames]).collect();
                loop {
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {
                            let mut outputs: Vec<&mut [f32]> =
                                playback.iter_mut().map(Vec::as_mut_slice).collect();
                            callback(&inputs, &mut outputs, frames);
                            cycles.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                callback
            });

        match spawned {
            Ok(handle) => {
                self.running = Some((stop_tx, handle));
                Ok(())
            }
            Err(err) => Err(BackendError::Protocol(format!(
                "failed to spawn dummy backend thread: {err}"
            ))),
        }
    }

    fn deactivate(&mut self) -> Result<(), BackendError> {
        let Some((stop, handle)) = self.running.take() else {
            return Ok(());
        };
        let _ = stop.send(());
        match handle.join() {
            Ok(callback) => {
                self.callback = Some(callback);
                Ok(())
            }
            Err(_) => Err(BackendError::Protocol("dummy backend thread panicked".into())),
        }
    }

    fn take_callback(&mut self) -> Option<CycleCallback> {
        self.callback.take()
    }
}

impl Drop for DummyBackend {
    fn drop(&mut self) {
        if let Err(err) = self.deactivate() {
            tracing::error!(%err, "failed to stop dummy backend");
        }
    }
}
