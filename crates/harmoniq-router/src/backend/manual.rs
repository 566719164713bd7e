use super::{AudioBackend, BackendConfig, CycleCallback};
use crate::error::BackendError;

/// A backend whose cycles are driven by the caller. Offline rendering and
/// tests use it to step the router deterministically.
pub struct ManualBackend {
    config: Option<BackendConfig>,
    callback: Option<CycleCallback>,
    active: bool,
    inputs: Vec<Vec<f32>>,
    outputs: Vec<Vec<f32>>,
}

impl ManualBackend {
    pub fn new() -> Self {
        Self {
            config: None,
            callback: None,
            active: false,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Capture buffer for `channel`, fed to the next cycle.
    pub fn input_mut(&mut self, channel: usize) -> Option<&mut [f32]> {
        self.inputs.get_mut(channel).map(Vec::as_mut_slice)
    }

    /// Playback written by the last cycle.
    pub fn output(&self, channel: usize) -> Option<&[f32]> {
        self.outputs.get(channel).map(Vec::as_slice)
    }

    /// Runs one cycle of the configured buffer size.
    pub fn cycle(&mut self) -> Result<(), BackendError> {
        let frames = self.config.ok_or(BackendError::NotInitialized)?.buffer_size;
        self.cycle_frames(frames)
    }

    /// Runs one cycle of `frames`, which may differ from the configured size.
    pub fn cycle_frames(&mut self, frames: usize) -> Result<(), BackendError> {
        if !self.active {
            return Err(BackendError::NotInitialized);
        }
        let callback = self.callback.as_mut().ok_or(BackendError::NoCallback)?;
        for buffer in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            buffer.resize(frames, 0.0);
        }
        let inputs: Vec<&[f32]> = self.inputs.iter().map(Vec::as_slice).collect();
        let mut outputs: Vec<&mut [f32]> = self.outputs.iter_mut().map(Vec::as_mut_slice).collect();
        callback(&inputs, &mut outputs, frames);
        Ok(())
    }
}

impl Default for ManualBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for ManualBackend {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn init(&mut self, config: BackendConfig) -> Result<(), BackendError> {
        if config.buffer_size == 0 {
            return Err(BackendError::Protocol("buffer size must be positive".into()));
        }
        self.inputs = vec![vec![0.0; config.buffer_size]; usize::from(config.inputs)];
        self.outputs = vec![vec![0.0; config.buffer_size]; usize::from(config.outputs)];
        self.config = Some(config);
        Ok(())
    }

    fn on_cycle(&mut self, callback: CycleCallback) {
        self.callback = Some(callback);
    }

    fn activate(&mut self) -> Result<(), BackendError> {
        if self.config.is_none() {
            return Err(BackendError::NotInitialized);
        }
        if self.callback.is_none() {
            return Err(BackendError::NoCallback);
        }
        self.active = true;
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), BackendError> {
        self.active = false;
        Ok(())
    }

    fn take_callback(&mut self) -> Option<CycleCallback> {
        if self.active {
            return None;
        }
        self.callback.take()
    }
}
