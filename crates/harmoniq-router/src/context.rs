//! The control-side handle of one engine instance.
//!
//! Every editing call validates synchronously, rebuilds a [`Graph`] off the
//! audio thread and publishes it with a single pointer swap. The audio
//! thread picks it up at its next cycle boundary and hands the previous
//! graph back through the retire ring, where [`EngineContext::service`]
//! releases it.

use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam_queue::ArrayQueue;
use harmoniq_rt::{FaultReason, RtEvent};
use parking_lot::Mutex;
use rtrb::{Consumer, RingBuffer};

use crate::config::{EngineConfig, TakePolicy};
use crate::connection::{validate_multiplier, ConnectionId, ConnectionRef};
use crate::error::{ConnectionError, EngineError, TransportError};
use crate::graph::Graph;
use crate::metrics::{AudioMetricsCollector, CycleMetrics};
use crate::node::{NodeId, NodeRef, NodeSpec};
use crate::port::{PortDirection, PortId, PortKind};
use crate::recording::{recording_channel, FinalizedRegion, RecordingCapture, RecordingConsumer};
use crate::router::{Router, RouterParts};
use crate::topology::Topology;
use crate::transport::{TransportHandle, TransportRequest, TransportState};

/// Something the user should hear about, produced by [`EngineContext::service`].
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    NodeFaulted {
        node: NodeId,
        name: String,
        reason: FaultReason,
    },
    Xrun {
        count: u32,
    },
    RecordingOverflow {
        port: PortId,
        frames: u32,
    },
    TransportRejected {
        state: TransportState,
        request: &'static str,
    },
    BufferSizeMismatch {
        expected: u32,
        got: u32,
    },
}

pub struct EngineContext {
    config: EngineConfig,
    topology: Mutex<Topology>,
    published: Arc<ArcSwap<Graph>>,
    transport: TransportHandle,
    recordings: Mutex<RecordingConsumer>,
    events: Arc<ArrayQueue<RtEvent>>,
    retired: Mutex<Consumer<Arc<Graph>>>,
    metrics: AudioMetricsCollector,
    router_parts: Mutex<Option<RouterParts>>,
}

impl EngineContext {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let (retire_tx, retire_rx) = RingBuffer::new(config.retire_queue);
        let (sink, consumer) = recording_channel(&config.recording);
        let parts = RouterParts {
            retire: retire_tx,
            capture: RecordingCapture::new(sink),
        };
        tracing::info!(
            sample_rate = config.sample_rate,
            max_block = config.max_block,
            workers = config.workers,
            "engine context created"
        );
        Ok(Self {
            topology: Mutex::new(Topology::new(&config)),
            published: Arc::new(ArcSwap::from_pointee(Graph::empty())),
            transport: TransportHandle::new(config.request_queue),
            recordings: Mutex::new(consumer),
            events: Arc::new(ArrayQueue::new(config.event_queue)),
            retired: Mutex::new(retire_rx),
            metrics: AudioMetricsCollector::new(config.metrics_history),
            router_parts: Mutex::new(Some(parts)),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Builds the audio-thread half of this context. Only one router may
    /// exist per context.
    pub fn create_router(&self) -> Result<Router, EngineError> {
        let parts = self
            .router_parts
            .lock()
            .take()
            .ok_or(EngineError::RouterTaken)?;
        Router::new(
            self.config.clone(),
            parts,
            Arc::clone(&self.published),
            &self.transport,
            Arc::clone(&self.events),
            self.metrics.clone(),
        )
    }

    fn publish(&self, topology: &mut Topology) {
        let graph = topology.build_graph();
        self.published.store(Arc::new(graph));
    }

    pub fn add_node(&self, spec: NodeSpec) -> Result<NodeRef, EngineError> {
        let mut topology = self.topology.lock();
        let node = topology.add_node(spec)?;
        self.publish(&mut topology);
        Ok(node)
    }

    pub fn remove_node(&self, node: NodeId) -> Result<(), EngineError> {
        let mut topology = self.topology.lock();
        topology.remove_node(node)?;
        self.publish(&mut topology);
        Ok(())
    }

    /// Takes a node out of the schedule, or puts it back, without losing
    /// its connections.
    pub fn set_node_enabled(&self, node: NodeId, enabled: bool) -> Result<(), EngineError> {
        let mut topology = self.topology.lock();
        if topology.set_enabled(node, enabled)? {
            self.publish(&mut topology);
        }
        Ok(())
    }

    pub fn connect(
        &self,
        source: PortId,
        dest: PortId,
        multiplier: f32,
    ) -> Result<ConnectionRef, EngineError> {
        let mut topology = self.topology.lock();
        let connection = topology.connect(source, dest, multiplier)?;
        self.publish(&mut topology);
        Ok(connection)
    }

    pub fn disconnect(&self, connection: ConnectionId) -> Result<(), EngineError> {
        let mut topology = self.topology.lock();
        topology.disconnect(connection)?;
        self.publish(&mut topology);
        Ok(())
    }

    /// Toggles a connection in place. Takes effect at the next cycle without
    /// a rebuild.
    pub fn enable(&self, connection: ConnectionId, enabled: bool) -> Result<(), EngineError> {
        let topology = self.topology.lock();
        topology.connection(connection)?.control.set_enabled(enabled);
        Ok(())
    }

    pub fn set_multiplier(&self, connection: ConnectionId, multiplier: f32) -> Result<(), EngineError> {
        let multiplier = validate_multiplier(multiplier)?;
        let topology = self.topology.lock();
        topology
            .connection(connection)?
            .control
            .set_multiplier(multiplier);
        Ok(())
    }

    /// Moves the base value of a control input. Returns the value after
    /// clamping to the port range.
    pub fn set_control(&self, port: PortId, value: f32) -> Result<f32, EngineError> {
        let topology = self.topology.lock();
        let cell = topology
            .port(port)
            .ok_or(ConnectionError::UnknownPort(port))?;
        if cell.kind() != PortKind::Control || cell.direction() != PortDirection::Input {
            return Err(EngineError::PortKind {
                port,
                kind: cell.kind(),
            });
        }
        Ok(cell.set_base_value(value))
    }

    pub fn transport(&self) -> &TransportHandle {
        &self.transport
    }

    pub fn play(&self) -> Result<(), EngineError> {
        Ok(self.transport.play()?)
    }

    pub fn stop(&self) -> Result<(), EngineError> {
        Ok(self.transport.stop()?)
    }

    pub fn pause(&self) -> Result<(), EngineError> {
        Ok(self.transport.pause()?)
    }

    pub fn record(&self) -> Result<(), EngineError> {
        Ok(self.transport.record()?)
    }

    pub fn relocate(&self, position: u64) -> Result<(), EngineError> {
        Ok(self.transport.relocate(position)?)
    }

    pub fn set_loop(&self, start: u64, end: u64, enabled: bool) -> Result<(), EngineError> {
        Ok(self.transport.set_loop(start, end, enabled)?)
    }

    pub fn set_punch(&self, start: u64, end: u64, enabled: bool) -> Result<(), EngineError> {
        Ok(self.transport.set_punch(start, end, enabled)?)
    }

    pub fn set_pre_roll(&self, frames: u64) -> Result<(), EngineError> {
        Ok(self.transport.set_pre_roll(frames)?)
    }

    /// Replaces the set of ports captured while recording.
    pub fn arm_recording(&self, ports: &[PortId]) -> Result<(), EngineError> {
        {
            let topology = self.topology.lock();
            if let Some(&missing) = ports.iter().find(|&&port| topology.port(port).is_none()) {
                return Err(TransportError::UnknownPort(missing).into());
            }
        }
        Ok(self.transport.arm(ports)?)
    }

    pub fn drain_recordings(&self) -> Vec<FinalizedRegion> {
        self.recordings.lock().drain()
    }

    pub fn set_take_policy(&self, policy: TakePolicy) {
        self.recordings.lock().set_policy(policy);
    }

    /// Layers of the most recently published graph.
    pub fn execution_layers(&self) -> Vec<Vec<NodeId>> {
        self.published.load().execution_layers().to_vec()
    }

    /// Longest latency through the most recently published graph.
    pub fn playback_latency(&self) -> u32 {
        self.published.load().max_playback_latency()
    }

    /// Delay the published graph inserts on `connection` to line it up with
    /// slower paths into the same node.
    pub fn compensation_delay(&self, connection: ConnectionId) -> usize {
        self.published.load().compensation_delay(connection)
    }

    pub fn is_feedback(&self, connection: ConnectionId) -> bool {
        self.published.load().is_feedback(connection)
    }

    pub fn graph(&self) -> Arc<Graph> {
        self.published.load_full()
    }

    pub fn metrics(&self) -> CycleMetrics {
        self.metrics.snapshot()
    }

    pub fn metrics_collector(&self) -> &AudioMetricsCollector {
        &self.metrics
    }

    /// Housekeeping for a control thread: logs runtime events, drops faulted
    /// nodes from the schedule and frees graphs the audio thread retired.
    pub fn service(&self) -> Vec<Notification> {
        let mut notifications = Vec::new();
        while let Some(event) = self.events.pop() {
            match event {
                RtEvent::NodeFault { node, reason } => {
                    self.metrics.record_fault();
                    let node = NodeId(node);
                    let name = self
                        .topology
                        .lock()
                        .node(node)
                        .map(|cell| cell.name().to_owned())
                        .unwrap_or_default();
                    tracing::error!(%node, name = %name, reason = reason.as_str(), "node faulted");
                    notifications.push(Notification::NodeFaulted { node, name, reason });
                }
                RtEvent::Xrun { count } => {
                    tracing::warn!(count, "audio cycle overran its period");
                    notifications.push(Notification::Xrun { count });
                }
                RtEvent::RecordingOverflow { port, frames } => {
                    tracing::warn!(port, frames, "recording ring full, frames dropped");
                    notifications.push(Notification::RecordingOverflow {
                        port: PortId(port),
                        frames,
                    });
                }
                RtEvent::TransportRejected { state, request } => {
                    let state = TransportState::from_u8(state);
                    let request = TransportRequest::name_for_code(request);
                    tracing::warn!(state = state.as_str(), request, "transport request rejected");
                    notifications.push(Notification::TransportRejected { state, request });
                }
                RtEvent::BufferSizeMismatch { expected, got } => {
                    tracing::error!(expected, got, "backend buffer larger than configured maximum");
                    notifications.push(Notification::BufferSizeMismatch { expected, got });
                }
                RtEvent::EngineLoad { pct } => tracing::debug!(pct, "engine load"),
                RtEvent::MaxBlockMicros { us } => tracing::debug!(us, "max block time"),
                RtEvent::RetireOverflow => {
                    tracing::warn!("graph retire ring full, a graph was released on the audio thread");
                }
            }
        }

        // Faults whose event was lost to a full queue are still excised.
        let mut topology = self.topology.lock();
        let excised = topology.excise_faulted();
        if !excised.is_empty() {
            for (node, name) in &excised {
                tracing::info!(%node, name = %name, "faulted node removed from the schedule");
            }
            self.publish(&mut topology);
        }
        drop(topology);

        let mut retired = self.retired.lock();
        let mut released = 0usize;
        while let Ok(graph) = retired.pop() {
            drop(graph);
            released += 1;
        }
        if released > 0 {
            tracing::trace!(released, "retired graphs released");
        }
        notifications
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("sample_rate", &self.config.sample_rate)
            .field("nodes", &self.topology.lock().node_count())
            .field("graph", &self.published.load().generation())
            .finish()
    }
}
