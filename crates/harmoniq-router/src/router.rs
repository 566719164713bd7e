use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use arrayvec::ArrayVec;
use crossbeam_queue::ArrayQueue;
use harmoniq_rt::RtEvent;
use rtrb::{Producer, PushError};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::graph::Graph;
use crate::metrics::AudioMetricsCollector;
use crate::midi::MidiEvent;
use crate::port::{PortData, PortId};
use crate::recording::RecordingCapture;
use crate::sched::Scheduler;
use crate::transport::{
    Applied, Transport, TransportHandle, TransportRequest, TransportShared, TransportState,
};

const RETIRE_BACKLOG: usize = 8;
const LOAD_REPORT_INTERVAL: u64 = 256;

/// Pieces of an [`EngineContext`](crate::EngineContext) that belong to the
/// audio thread. They can be taken once.
pub(crate) struct RouterParts {
    pub retire: Producer<Arc<Graph>>,
    pub capture: RecordingCapture,
}

/// The audio-thread entry point. A backend calls [`Router::process_io`] once
/// per hardware cycle; nothing here locks, allocates or blocks other than
/// waiting for the cycle's own nodes.
pub struct Router {
    config: EngineConfig,
    graph: Arc<Graph>,
    published: Arc<ArcSwap<Graph>>,
    retire: Producer<Arc<Graph>>,
    backlog: ArrayVec<Arc<Graph>, RETIRE_BACKLOG>,
    scheduler: Scheduler,
    transport: Transport,
    requests: Arc<ArrayQueue<TransportRequest>>,
    transport_shared: Arc<TransportShared>,
    capture: RecordingCapture,
    events: Arc<ArrayQueue<RtEvent>>,
    metrics: AudioMetricsCollector,
    cycle: u64,
    last_frames: usize,
}

impl Router {
    pub(crate) fn new(
        config: EngineConfig,
        parts: RouterParts,
        published: Arc<ArcSwap<Graph>>,
        transport: &TransportHandle,
        events: Arc<ArrayQueue<RtEvent>>,
        metrics: AudioMetricsCollector,
    ) -> Result<Self, EngineError> {
        let scheduler = Scheduler::new(
            config.workers,
            config.max_nodes,
            config.pin_workers,
            Arc::clone(&events),
        )?;
        let graph = published.load_full();
        Ok(Self {
            transport: Transport::new(config.sample_rate),
            config,
            graph,
            published,
            retire: parts.retire,
            backlog: ArrayVec::new(),
            scheduler,
            requests: transport.requests(),
            transport_shared: transport.shared(),
            capture: parts.capture,
            events,
            metrics,
            cycle: 0,
            last_frames: 0,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.scheduler.worker_count()
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn position(&self) -> u64 {
        self.transport.position()
    }

    /// The graph the last cycle ran.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Runs one cycle without hardware buffers.
    pub fn process(&mut self, frames: usize) {
        self.process_io(&[], &mut [], frames);
    }

    /// Runs one cycle. `inputs` feed hardware input nodes, `outputs` receive
    /// the sum of the hardware output nodes on each channel.
    pub fn process_io(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
        let start = Instant::now();
        for out in outputs.iter_mut() {
            let n = frames.min(out.len());
            out[..n].fill(0.0);
        }
        if frames == 0 {
            return;
        }
        if frames > self.config.max_block {
            self.emit(RtEvent::BufferSizeMismatch {
                expected: self.config.max_block as u32,
                got: frames as u32,
            });
            return;
        }

        self.flush_backlog();
        self.adopt_published_graph();
        self.apply_requests();
        self.graph.begin_cycle();

        let mut spans = self.transport.spans(frames);
        for span in spans.by_ref() {
            let snapshot = self.transport.snapshot(span.position, self.cycle);
            self.scheduler
                .run_pass(&self.graph, span, snapshot, inputs);
            self.capture
                .capture_span(&self.graph, &span, &self.transport, &self.events);
        }
        self.transport.finish_cycle(&spans);

        let graph = &*self.graph;
        for hw in graph.hw_outputs() {
            let Some(out) = outputs.get_mut(usize::from(hw.channel)) else {
                continue;
            };
            let cell = &graph.node(hw.node).ports()[usize::from(hw.port)];
            // SAFETY: every pass of this cycle has completed.
            if let PortData::Signal(buffer) = unsafe { cell.data() } {
                let n = frames.min(out.len());
                for (dst, sample) in out[..n].iter_mut().zip(&buffer[..n]) {
                    *dst += sample;
                }
            }
        }
        for &(node, port) in graph.feedback_ports() {
            unsafe { graph.node(node).ports()[usize::from(port)].commit_history() };
        }

        self.transport_shared.publish(&self.transport);
        self.metrics
            .record_dropped_frames(self.capture.take_dropped_frames());
        self.last_frames = frames;
        self.cycle += 1;

        let period_ns = self.config.period_ns(frames);
        if self.metrics.record_block(start.elapsed(), period_ns) {
            let count = self.metrics.xruns().min(u64::from(u32::MAX)) as u32;
            self.emit(RtEvent::Xrun { count });
        }
        if self.cycle % LOAD_REPORT_INTERVAL == 0 && period_ns > 0 {
            let snapshot = self.metrics.snapshot();
            let pct = (snapshot.last_block_ns.saturating_mul(100) / period_ns).min(u64::from(u16::MAX));
            self.emit(RtEvent::EngineLoad { pct: pct as u16 });
            self.emit(RtEvent::MaxBlockMicros {
                us: (snapshot.max_block_ns / 1_000).min(u64::from(u32::MAX)) as u32,
            });
        }
    }

    fn emit(&self, event: RtEvent) {
        if self.events.push(event).is_err() {
            self.metrics.record_dropped_event();
        }
    }

    fn apply_requests(&mut self) {
        while let Some(request) = self.requests.pop() {
            let code = request.code();
            match self.transport.apply(request) {
                Err(rejected) => self.emit(RtEvent::TransportRejected {
                    state: rejected.state as u8,
                    request: code,
                }),
                Ok(Applied::State { from, to }) => {
                    if from == TransportState::Recording && to != TransportState::Recording {
                        self.capture.stop_all(0, self.transport.position());
                    }
                }
                Ok(Applied::Relocated { from, .. }) => {
                    if self.transport.state() == TransportState::Recording {
                        self.capture.stop_all(0, from);
                    }
                }
                Ok(Applied::Armed(ports)) => {
                    self.capture
                        .set_armed(&ports, &self.graph, 0, self.transport.position());
                }
                Ok(Applied::Nothing) => {}
            }
        }
    }

    fn adopt_published_graph(&mut self) {
        let latest = self.published.load();
        if Arc::ptr_eq(&*latest, &self.graph) {
            return;
        }
        let next = Arc::clone(&*latest);
        drop(latest);

        // A port that just became a feedback source has stale history.
        for &(node, port) in next.feedback_ports() {
            let cell = &next.node(node).ports()[usize::from(port)];
            let already = self
                .graph
                .locate(cell.id())
                .is_some_and(|location| self.graph.feedback_ports().contains(&location));
            if !already {
                unsafe { cell.clear_history() };
            }
        }

        let old = std::mem::replace(&mut self.graph, next);
        self.capture
            .adopt(&self.graph, 0, self.transport.position());
        self.retire_graph(old);
    }

    fn retire_graph(&mut self, graph: Arc<Graph>) {
        let Err(PushError::Full(graph)) = self.retire.push(graph) else {
            return;
        };
        if let Err(overflow) = self.backlog.try_push(graph) {
            self.emit(RtEvent::RetireOverflow);
            drop(overflow.element());
        }
    }

    fn flush_backlog(&mut self) {
        while let Some(graph) = self.backlog.pop() {
            if let Err(PushError::Full(graph)) = self.retire.push(graph) {
                let _ = self.backlog.try_push(graph);
                break;
            }
        }
    }

    fn port_data(&self, port: PortId) -> Option<&PortData> {
        let (node, idx) = self.graph.locate(port)?;
        // SAFETY: `&self` excludes a running cycle.
        Some(unsafe { self.graph.node(node).ports()[usize::from(idx)].data() })
    }

    /// Signal written to `port` during the last cycle.
    pub fn read_audio(&self, port: PortId) -> Option<&[f32]> {
        match self.port_data(port)? {
            PortData::Signal(buffer) => Some(&buffer[..self.last_frames]),
            _ => None,
        }
    }

    pub fn read_control(&self, port: PortId) -> Option<f32> {
        match self.port_data(port)? {
            PortData::Control(value) => Some(*value),
            _ => None,
        }
    }

    pub fn read_midi(&self, port: PortId) -> Option<&[MidiEvent]> {
        match self.port_data(port)? {
            PortData::Midi(buffer) => Some(buffer.events()),
            _ => None,
        }
    }
}
