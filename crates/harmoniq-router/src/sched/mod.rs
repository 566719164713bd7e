//! Worker pool driving one graph pass at a time.
//!
//! Nodes whose dependency counter reaches zero are pushed on a lock-free
//! ready queue. Workers and the audio thread pop and run them; there are no
//! layer barriers. The audio thread returns once every node of the pass has
//! completed.

pub(crate) mod exec;

use std::cell::UnsafeCell;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::sync::{Parker, Unparker};
use crossbeam::utils::Backoff;
use crossbeam_queue::ArrayQueue;
use harmoniq_rt::RtEvent;

use crate::graph::Graph;
use crate::transport::{Span, TransportSnapshot};
use exec::PassDesc;

struct Shared {
    ready: ArrayQueue<u32>,
    pass: UnsafeCell<PassDesc>,
    remaining: AtomicUsize,
    shutdown: AtomicBool,
    priority_warned: AtomicBool,
    events: Arc<ArrayQueue<RtEvent>>,
    unparkers: Vec<Unparker>,
}

// SAFETY: `pass` is written by the audio thread only while the ready queue is
// empty and no node of the previous pass is still running.
unsafe impl Sync for Shared {}
unsafe impl Send for Shared {}

impl Shared {
    fn execute(&self, idx: u32) {
        // SAFETY: a node index is only queued after `pass` was published, and
        // the pass outlives every queued node.
        let pass = unsafe { *self.pass.get() };
        let graph = unsafe { &*pass.graph };
        unsafe { exec::run_node(graph, idx, &pass, &self.events) };

        let mut woken = 0usize;
        for &succ in graph.plan(idx).successors.iter() {
            if graph.release(succ) {
                if self.ready.push(succ).is_err() {
                    self.execute(succ);
                } else {
                    woken += 1;
                }
            }
        }
        if woken > 1 {
            self.wake_all();
        }
        self.remaining.fetch_sub(1, Ordering::AcqRel);
    }

    fn wake_all(&self) {
        for unparker in &self.unparkers {
            unparker.unpark();
        }
    }
}

pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        workers: usize,
        queue_capacity: usize,
        pin: bool,
        events: Arc<ArrayQueue<RtEvent>>,
    ) -> io::Result<Self> {
        let parkers: Vec<Parker> = (0..workers).map(|_| Parker::new()).collect();
        let shared = Arc::new(Shared {
            ready: ArrayQueue::new(queue_capacity.max(1)),
            pass: UnsafeCell::new(PassDesc::idle()),
            remaining: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            priority_warned: AtomicBool::new(false),
            events,
            unparkers: parkers.iter().map(|parker| parker.unparker().clone()).collect(),
        });

        let mut handles = Vec::with_capacity(workers);
        for (index, parker) in parkers.into_iter().enumerate() {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("harmoniq-worker-{index}"))
                .spawn(move || worker_loop(&worker_shared, &parker, index, pin));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    let partial = Scheduler {
                        shared,
                        workers: handles,
                    };
                    drop(partial);
                    return Err(err);
                }
            }
        }

        tracing::info!(workers, "scheduler started");
        Ok(Self {
            shared,
            workers: handles,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Runs every node of `graph` once for `span` and returns when all of
    /// them have completed.
    pub(crate) fn run_pass(
        &self,
        graph: &Graph,
        span: Span,
        transport: TransportSnapshot,
        hardware: &[&[f32]],
    ) {
        if graph.is_empty() {
            return;
        }
        graph.reset_pending();
        // SAFETY: the previous pass finished, so no worker reads `pass`.
        unsafe {
            *self.shared.pass.get() = PassDesc {
                graph: graph as *const Graph,
                offset: span.offset,
                frames: span.frames,
                transport,
                hardware: hardware as *const [&[f32]] as *const [&'static [f32]],
            };
        }
        self.shared.remaining.store(graph.len(), Ordering::Release);

        for &root in graph.roots() {
            if self.shared.ready.push(root).is_err() {
                self.shared.execute(root);
            }
        }
        self.shared.wake_all();

        let backoff = Backoff::new();
        while self.shared.remaining.load(Ordering::Acquire) != 0 {
            if let Some(idx) = self.shared.ready.pop() {
                self.shared.execute(idx);
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("audio worker panicked");
            }
        }
    }
}

fn worker_loop(shared: &Shared, parker: &Parker, index: usize, pin: bool) {
    if let Err(err) = harmoniq_rt::promote_current_thread() {
        if !shared.priority_warned.swap(true, Ordering::Relaxed) {
            tracing::warn!(%err, "realtime priority denied, audio workers run at normal priority");
        }
    }
    harmoniq_rt::enable_ftz_daz();
    if pin {
        if let Err(err) = harmoniq_rt::pin_current_thread(index + 1) {
            tracing::warn!(%err, index, "failed to pin audio worker");
        }
    }

    let backoff = Backoff::new();
    loop {
        if let Some(idx) = shared.ready.pop() {
            shared.execute(idx);
            backoff.reset();
            continue;
        }
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        if backoff.is_completed() {
            parker.park();
            backoff.reset();
        } else {
            backoff.snooze();
        }
    }
}
