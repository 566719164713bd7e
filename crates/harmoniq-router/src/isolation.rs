//! Fault boundaries around processor calls.
//!
//! `Inline` runs the processor on the scheduling thread and captures unwinds;
//! an overrun is detected after the call returns. `Watchdog` runs the
//! processor on a dedicated thread against private port buffers, so a hung
//! processor can be abandoned without the audio thread waiting on it.

use std::cell::UnsafeCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::sync::{Parker, Unparker};
use crossbeam::utils::Backoff;
use harmoniq_rt::FaultReason;

use crate::error::NodeError;
use crate::node::{ProcessContext, Processor};
use crate::port::{PortCell, PortData, PortDirection};
use crate::transport::TransportSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    /// Run on the scheduling thread. With a deadline, a call that returns
    /// late counts as a fault.
    Inline { deadline: Option<Duration> },
    /// Run on a dedicated thread and abandon it after `timeout`.
    Watchdog { timeout: Duration },
}

impl Default for Isolation {
    fn default() -> Self {
        Isolation::Inline { deadline: None }
    }
}

pub(crate) enum Runner {
    Inline(InlineRunner),
    Watchdog(WatchdogHost),
}

impl Runner {
    pub(crate) fn new(
        name: &str,
        processor: Box<dyn Processor>,
        isolation: Isolation,
        ports: &[PortCell],
        max_block: usize,
        midi_capacity: usize,
    ) -> Result<Self, NodeError> {
        match isolation {
            Isolation::Inline { deadline } => Ok(Runner::Inline(InlineRunner {
                processor,
                deadline,
            })),
            Isolation::Watchdog { timeout } => {
                WatchdogHost::spawn(name, processor, timeout, ports, max_block, midi_capacity)
                    .map(Runner::Watchdog)
            }
        }
    }

    pub(crate) fn run(
        &mut self,
        ports: &[PortCell],
        offset: usize,
        frames: usize,
        transport: TransportSnapshot,
        hardware: &[&[f32]],
    ) -> Result<(), FaultReason> {
        match self {
            Runner::Inline(inline) => inline.run(ports, offset, frames, transport, hardware),
            Runner::Watchdog(host) => host.run(ports, offset, frames, transport),
        }
    }
}

pub(crate) struct InlineRunner {
    processor: Box<dyn Processor>,
    deadline: Option<Duration>,
}

impl InlineRunner {
    fn run(
        &mut self,
        ports: &[PortCell],
        offset: usize,
        frames: usize,
        transport: TransportSnapshot,
        hardware: &[&[f32]],
    ) -> Result<(), FaultReason> {
        let start = self.deadline.map(|_| Instant::now());
        let processor = &mut self.processor;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut ctx = ProcessContext::new(ports, offset, frames, transport, hardware);
            processor.process(&mut ctx)
        }));
        match outcome {
            Err(_) => Err(FaultReason::Panicked),
            Ok(Err(_)) => Err(FaultReason::Error),
            Ok(Ok(())) => match (self.deadline, start) {
                (Some(deadline), Some(start)) if start.elapsed() > deadline => {
                    Err(FaultReason::Timeout)
                }
                _ => Ok(()),
            },
        }
    }
}

impl Drop for InlineRunner {
    fn drop(&mut self) {
        self.processor.deactivate();
    }
}

const IDLE: u8 = 0;
const REQUESTED: u8 = 1;
const DONE_OK: u8 = 2;
const DONE_ERROR: u8 = 3;
const DONE_PANIC: u8 = 4;
const ABANDONED: u8 = 5;
const SHUTDOWN: u8 = 6;

#[derive(Clone, Copy)]
struct WatchRequest {
    offset: usize,
    frames: usize,
    transport: TransportSnapshot,
}

struct WatchShared {
    state: AtomicU8,
    request: UnsafeCell<WatchRequest>,
}

// SAFETY: `request` is written by the host before `REQUESTED` is published
// and read by the plugin thread after observing it.
unsafe impl Sync for WatchShared {}

pub(crate) struct WatchdogHost {
    shared: Arc<WatchShared>,
    private: Arc<[PortCell]>,
    timeout: Duration,
    unparker: Unparker,
    thread: Option<JoinHandle<()>>,
    abandoned: bool,
}

impl WatchdogHost {
    fn spawn(
        name: &str,
        mut processor: Box<dyn Processor>,
        timeout: Duration,
        ports: &[PortCell],
        max_block: usize,
        midi_capacity: usize,
    ) -> Result<Self, NodeError> {
        let private: Arc<[PortCell]> = ports
            .iter()
            .map(|port| PortCell::new(port.id(), port.spec().clone(), max_block, midi_capacity))
            .collect::<Vec<_>>()
            .into();
        let shared = Arc::new(WatchShared {
            state: AtomicU8::new(IDLE),
            request: UnsafeCell::new(WatchRequest {
                offset: 0,
                frames: 0,
                transport: TransportSnapshot::default(),
            }),
        });
        let parker = Parker::new();
        let unparker = parker.unparker().clone();

        let thread_shared = Arc::clone(&shared);
        let thread_ports = Arc::clone(&private);
        let thread = thread::Builder::new()
            .name(format!("harmoniq-plugin-{name}"))
            .spawn(move || {
                plugin_thread(&mut *processor, &thread_shared, &thread_ports, &parker);
                processor.deactivate();
            })
            .map_err(|source| NodeError::Isolation {
                name: name.to_owned(),
                source,
            })?;

        Ok(Self {
            shared,
            private,
            timeout,
            unparker,
            thread: Some(thread),
            abandoned: false,
        })
    }

    fn run(
        &mut self,
        ports: &[PortCell],
        offset: usize,
        frames: usize,
        transport: TransportSnapshot,
    ) -> Result<(), FaultReason> {
        if self.abandoned {
            return Err(FaultReason::Timeout);
        }

        // SAFETY: the plugin thread is idle, so the private buffers are ours.
        unsafe {
            for (real, private) in ports.iter().zip(self.private.iter()) {
                let dst = private.data_mut();
                match real.direction() {
                    PortDirection::Input => copy_span(dst, real.data(), offset, frames),
                    PortDirection::Output => dst.clear_span(offset, frames),
                }
            }
            *self.shared.request.get() = WatchRequest {
                offset,
                frames,
                transport,
            };
        }
        self.shared.state.store(REQUESTED, Ordering::Release);
        self.unparker.unpark();

        let start = Instant::now();
        let backoff = Backoff::new();
        loop {
            let outcome = match self.shared.state.load(Ordering::Acquire) {
                DONE_OK => Some(Ok(())),
                DONE_ERROR => Some(Err(FaultReason::Error)),
                DONE_PANIC => Some(Err(FaultReason::Panicked)),
                _ => None,
            };
            if let Some(outcome) = outcome {
                self.shared.state.store(IDLE, Ordering::Relaxed);
                if outcome.is_ok() {
                    // SAFETY: the plugin thread published DONE and went back to parking.
                    unsafe {
                        for (real, private) in ports.iter().zip(self.private.iter()) {
                            if real.direction() == PortDirection::Output {
                                copy_span(real.data_mut(), private.data(), offset, frames);
                            }
                        }
                    }
                }
                return outcome;
            }

            if start.elapsed() >= self.timeout
                && self
                    .shared
                    .state
                    .compare_exchange(REQUESTED, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                self.abandoned = true;
                return Err(FaultReason::Timeout);
            }

            if backoff.is_completed() {
                thread::yield_now();
            } else {
                backoff.snooze();
            }
        }
    }
}

impl Drop for WatchdogHost {
    fn drop(&mut self) {
        if self.abandoned {
            // The thread may never return; it exits on its own if it does.
            self.thread.take();
            return;
        }
        self.shared.state.store(SHUTDOWN, Ordering::Release);
        self.unparker.unpark();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("plugin isolation thread panicked during shutdown");
            }
        }
    }
}

fn plugin_thread(
    processor: &mut dyn Processor,
    shared: &WatchShared,
    ports: &[PortCell],
    parker: &Parker,
) {
    loop {
        parker.park();
        match shared.state.load(Ordering::Acquire) {
            REQUESTED => {
                // SAFETY: published before REQUESTED.
                let request = unsafe { *shared.request.get() };
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    let mut ctx = ProcessContext::new(
                        ports,
                        request.offset,
                        request.frames,
                        request.transport,
                        &[],
                    );
                    processor.process(&mut ctx)
                }));
                let done = match outcome {
                    Ok(Ok(())) => DONE_OK,
                    Ok(Err(_)) => DONE_ERROR,
                    Err(_) => DONE_PANIC,
                };
                if shared
                    .state
                    .compare_exchange(REQUESTED, done, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return;
                }
            }
            ABANDONED | SHUTDOWN => return,
            _ => {}
        }
    }
}

/// Copies `[offset, offset + frames)` of `src` into `dst`.
fn copy_span(dst: &mut PortData, src: &PortData, offset: usize, frames: usize) {
    match (dst, src) {
        (PortData::Signal(dst), PortData::Signal(src)) => {
            dst[offset..offset + frames].copy_from_slice(&src[offset..offset + frames]);
        }
        (PortData::Midi(dst), PortData::Midi(src)) => {
            dst.truncate_from(offset as u32);
            for event in src.range(offset as u32, (offset + frames) as u32) {
                dst.insert(*event);
            }
        }
        (PortData::Control(dst), PortData::Control(src)) => *dst = *src,
        _ => {}
    }
}
