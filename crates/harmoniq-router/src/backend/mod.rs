//! Audio backends drive the router once per hardware cycle.
//!
//! A backend is initialised with the stream shape, handed a cycle callback
//! and activated. If the preferred backend cannot be brought up,
//! [`open_backend`] falls back to the silent [`DummyBackend`].

mod dummy;
mod manual;
#[cfg(feature = "native")]
mod native;

pub use dummy::DummyBackend;
pub use manual::ManualBackend;
#[cfg(feature = "native")]
pub use native::CpalBackend;

use crate::error::BackendError;

/// Called once per cycle with the captured input channels, the playback
/// channels to fill and the frame count.
pub type CycleCallback = Box<dyn FnMut(&[&[f32]], &mut [&mut [f32]], usize) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendConfig {
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub inputs: u16,
    pub outputs: u16,
}

impl BackendConfig {
    pub fn new(sample_rate: u32, buffer_size: usize) -> Self {
        Self {
            sample_rate,
            buffer_size,
            inputs: 0,
            outputs: 2,
        }
    }

    pub fn with_channels(mut self, inputs: u16, outputs: u16) -> Self {
        self.inputs = inputs;
        self.outputs = outputs;
        self
    }

    pub fn period(&self) -> std::time::Duration {
        let rate = u64::from(self.sample_rate.max(1));
        std::time::Duration::from_nanos(self.buffer_size as u64 * 1_000_000_000 / rate)
    }
}

pub trait AudioBackend: Send {
    fn name(&self) -> &'static str;

    fn init(&mut self, config: BackendConfig) -> Result<(), BackendError>;

    /// Registers the callback run every cycle. Replaces any previous one.
    fn on_cycle(&mut self, callback: CycleCallback);

    fn activate(&mut self) -> Result<(), BackendError>;

    /// Stops requesting cycles. Returns once the in-flight cycle finished.
    fn deactivate(&mut self) -> Result<(), BackendError>;

    /// Hands the callback back while the backend is inactive.
    fn take_callback(&mut self) -> Option<CycleCallback>;
}

/// Brings `preferred` up with `callback`. On any failure the callback is
/// moved to a [`DummyBackend`] and a warning is logged.
pub fn open_backend(
    mut preferred: Box<dyn AudioBackend>,
    config: BackendConfig,
    callback: CycleCallback,
) -> Result<Box<dyn AudioBackend>, BackendError> {
    let failure = match preferred.init(config) {
        Ok(()) => {
            preferred.on_cycle(callback);
            match preferred.activate() {
                Ok(()) => {
                    tracing::info!(backend = preferred.name(), ?config, "audio backend active");
                    return Ok(preferred);
                }
                Err(err) => (err, preferred.take_callback()),
            }
        }
        Err(err) => (err, Some(callback)),
    };

    let (err, callback) = failure;
    tracing::warn!(
        backend = preferred.name(),
        %err,
        "audio backend unavailable, falling back to the dummy backend"
    );
    open_dummy(config, callback.ok_or(BackendError::NoCallback)?)
}

/// Starts the dummy backend driving `callback`.
pub(crate) fn open_dummy(
    config: BackendConfig,
    callback: CycleCallback,
) -> Result<Box<dyn AudioBackend>, BackendError> {
    let mut fallback = DummyBackend::new();
    fallback.init(config)?;
    fallback.on_cycle(callback);
    fallback.activate()?;
    Ok(Box::new(fallback))
}
