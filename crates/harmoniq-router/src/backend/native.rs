use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;

use super::{AudioBackend, BackendConfig, CycleCallback};
use crate::error::BackendError;

type SharedCallback = Arc<Mutex<Option<CycleCallback>>>;

/// Playback through the default cpal output device.
///
/// The stream lives on its own thread because cpal streams are not `Send` on
/// every host. The device callback only ever `try_lock`s the cycle callback;
/// when it cannot, the block is silent.
pub struct CpalBackend {
    config: Option<BackendConfig>,
    callback: SharedCallback,
    running: Option<(Sender<()>, JoinHandle<()>)>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            config: None,
            callback: Arc::new(Mutex::new(None)),
            running: None,
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn init(&mut self, config: BackendConfig) -> Result<(), BackendError> {
        if config.buffer_size == 0 {
            return Err(BackendError::Protocol("buffer size must be positive".into()));
        }
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| BackendError::DeviceUnavailable("no default output device".into()))?;
        let supported = device
            .default_output_config()
            .map_err(|err| BackendError::DeviceUnavailable(err.to_string()))?;
        if supported.sample_format() != SampleFormat::F32 {
            return Err(BackendError::Protocol(format!(
                "unsupported sample format {:?}",
                supported.sample_format()
            )));
        }
        self.config = Some(config);
        Ok(())
    }

    fn on_cycle(&mut self, callback: CycleCallback) {
        *self.callback.lock() = Some(callback);
    }

    fn activate(&mut self) -> Result<(), BackendError> {
        if self.running.is_some() {
            return Ok(());
        }
        let config = self.config.ok_or(BackendError::NotInitialized)?;
        if self.callback.lock().is_none() {
            return Err(BackendError::NoCallback);
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<Result<(), BackendError>>(1);
        let callback = Arc::clone(&self.callback);
        let handle = thread::Builder::new()
            .name("harmoniq-cpal-stream".into())
            .spawn(move || {
                let stream = match build_stream(config, callback) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|err| BackendError::Protocol(format!("failed to spawn stream thread: {err}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.running = Some((stop_tx, handle));
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                Err(BackendError::Protocol("stream thread exited early".into()))
            }
        }
    }

    fn deactivate(&mut self) -> Result<(), BackendError> {
        let Some((stop, handle)) = self.running.take() else {
            return Ok(());
        };
        let _ = stop.send(());
        handle
            .join()
            .map_err(|_| BackendError::Protocol("stream thread panicked".into()))
    }

    fn take_callback(&mut self) -> Option<CycleCallback> {
        if self.running.is_some() {
            return None;
        }
        self.callback.lock().take()
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        if let Err(err) = self.deactivate() {
            tracing::error!(%err, "failed to stop cpal backend");
        }
    }
}

fn build_stream(config: BackendConfig, callback: SharedCallback) -> Result<cpal::Stream, BackendError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| BackendError::DeviceUnavailable("no default output device".into()))?;
    let channels = config.outputs.max(1);
    let stream_config = StreamConfig {
        channels,
        sample_rate: SampleRate(config.sample_rate),
        buffer_size: BufferSize::Fixed(config.buffer_size as u32),
    };

    let block = config.buffer_size;
    let mut planar: Vec<Vec<f32>> = (0..channels).map(|_| vec![0.0; block]).collect();
    let stride = usize::from(channels);

    let stream = device
        .build_output_stream(
            &stream_config,
            move |output: &mut [f32], _info| {
                harmoniq_rt::enable_ftz_daz();
                let Some(mut guard) = callback.try_lock() else {
                    output.fill(0.0);
                    return;
                };
                let Some(cycle) = guard.as_mut() else {
                    output.fill(0.0);
                    return;
                };
                for chunk in output.chunks_mut(block * stride) {
                    let frames = chunk.len() / stride;
                    {
                        let mut views: arrayvec::ArrayVec<&mut [f32], 32> = planar
                            .iter_mut()
                            .take(32)
                            .map(|channel| &mut channel[..frames])
                            .collect();
                        cycle(&[], views.as_mut_slice(), frames);
                    }
                    for (frame, samples) in chunk.chunks_mut(stride).enumerate() {
                        for (channel, sample) in samples.iter_mut().enumerate() {
                            *sample = planar.get(channel).map_or(0.0, |buffer| buffer[frame]);
                        }
                    }
                }
            },
            |err| tracing::error!(?err, "cpal output stream error"),
            None,
        )
        .map_err(|err| BackendError::DeviceUnavailable(err.to_string()))?;
    stream
        .play()
        .map_err(|err| BackendError::Protocol(err.to_string()))?;
    Ok(stream)
}
