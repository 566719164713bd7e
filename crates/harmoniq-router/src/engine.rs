use std::sync::Arc;

use crate::backend::{open_backend, open_dummy, AudioBackend, BackendConfig, CycleCallback};
use crate::context::EngineContext;
use crate::error::{BackendError, EngineError};

/// A context bound to a running backend.
///
/// Dropping the engine stops it; [`Engine::shutdown`] does the same but
/// reports errors.
pub struct Engine {
    context: Arc<EngineContext>,
    backend: Option<Box<dyn AudioBackend>>,
}

impl Engine {
    /// Creates the router for `context` and starts `backend` with it. When
    /// the backend cannot be brought up, or its stream does not fit the
    /// engine's buffer size or sample rate, the engine runs on the dummy
    /// backend instead.
    pub fn start(
        context: Arc<EngineContext>,
        backend: Box<dyn AudioBackend>,
        stream: BackendConfig,
    ) -> Result<Self, EngineError> {
        let max_block = context.config().max_block;
        let sample_rate = context.config().sample_rate;
        let mismatch = if stream.buffer_size > max_block {
            Some(BackendError::BufferSizeMismatch {
                expected: max_block,
                got: stream.buffer_size,
            })
        } else if stream.sample_rate != sample_rate {
            Some(BackendError::Protocol(format!(
                "backend runs at {} Hz, engine at {} Hz",
                stream.sample_rate, sample_rate
            )))
        } else {
            None
        };

        if let Err(err) = harmoniq_rt::lock_memory() {
            tracing::warn!(%err, "failed to lock engine memory");
        }

        let mut router = context.create_router()?;
        let callback: CycleCallback = Box::new(move |inputs, outputs, frames| {
            router.process_io(inputs, outputs, frames);
        });
        let backend = match mismatch {
            None => open_backend(backend, stream, callback)?,
            Some(err) => {
                tracing::warn!(
                    backend = backend.name(),
                    %err,
                    "stream does not fit the engine, falling back to the dummy backend"
                );
                let stream = BackendConfig {
                    sample_rate,
                    buffer_size: stream.buffer_size.min(max_block),
                    ..stream
                };
                open_dummy(stream, callback)?
            }
        };
        tracing::info!(backend = backend.name(), "engine started");
        Ok(Self {
            context,
            backend: Some(backend),
        })
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.as_ref().map_or("none", |backend| backend.name())
    }

    /// Stops requesting cycles, waits for the in-flight one, then tears down
    /// the router with its worker pool and releases retired graphs.
    pub fn shutdown(mut self) -> Result<(), EngineError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        let Some(mut backend) = self.backend.take() else {
            return Ok(());
        };
        backend.deactivate()?;
        drop(backend.take_callback());
        drop(backend);
        self.context.service();
        tracing::info!("engine stopped");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::error!(%err, "engine shutdown failed");
        }
    }
}
