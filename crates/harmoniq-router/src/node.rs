use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use harmoniq_rt::FaultReason;
use serde::{Deserialize, Serialize};

use crate::error::ProcessError;
use crate::isolation::{Isolation, Runner};
use crate::midi::MidiEvent;
use crate::port::{PortCell, PortData, PortDirection, PortId, PortSpec};
use crate::transport::TransportSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HwDirection {
    Input(u16),
    Output(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Track,
    Fader,
    Plugin,
    Send,
    ModulatorMacro,
    HwIo(HwDirection),
    Monitor,
}

impl NodeKind {
    /// Summed audio inputs of faders are limited to this magnitude.
    pub const FADER_INPUT_LIMIT: f32 = 2.0;

    pub fn is_plugin(self) -> bool {
        matches!(self, NodeKind::Plugin)
    }

    pub fn hardware_output(self) -> Option<u16> {
        match self {
            NodeKind::HwIo(HwDirection::Output(channel)) => Some(channel),
            _ => None,
        }
    }
}

/// The capability every unit of work implements, whatever its origin.
///
/// `process` runs on an audio thread: it must not lock, allocate or block.
/// `activate` and `deactivate` run on control threads.
pub trait Processor: Send {
    fn name(&self) -> &str;

    fn ports(&self) -> Vec<PortSpec>;

    fn activate(&mut self, _sample_rate: f32, _max_block: usize) -> anyhow::Result<()> {
        Ok(())
    }

    fn deactivate(&mut self) {}

    /// Frames of delay the processor adds between its inputs and outputs.
    /// Read once, after `activate`.
    fn latency(&self) -> u32 {
        0
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError>;
}

/// View of a node's ports for one span of the current cycle. Port indices
/// follow the order returned by [`Processor::ports`].
pub struct ProcessContext<'a> {
    ports: &'a [PortCell],
    offset: usize,
    frames: usize,
    transport: TransportSnapshot,
    hardware: &'a [&'a [f32]],
}

impl<'a> ProcessContext<'a> {
    pub(crate) fn new(
        ports: &'a [PortCell],
        offset: usize,
        frames: usize,
        transport: TransportSnapshot,
        hardware: &'a [&'a [f32]],
    ) -> Self {
        Self {
            ports,
            offset,
            frames,
            transport,
            hardware,
        }
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Offset of this span inside the cycle.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn transport(&self) -> &TransportSnapshot {
        &self.transport
    }

    fn port(&self, index: usize, direction: PortDirection) -> Option<&'a PortCell> {
        self.ports
            .get(index)
            .filter(|port| port.direction() == direction)
    }

    /// Summed input signal for this span. Empty when `index` is not an audio
    /// or CV input.
    pub fn audio_in(&self, index: usize) -> &'a [f32] {
        match self.port(index, PortDirection::Input) {
            // SAFETY: inputs are filled before `process` and not written again
            // until the next span of this node.
            Some(port) => match unsafe { port.data() } {
                PortData::Signal(buffer) => &buffer[self.offset..self.offset + self.frames],
                _ => &[],
            },
            None => &[],
        }
    }

    pub fn audio_out(&mut self, index: usize) -> &mut [f32] {
        match self.port(index, PortDirection::Output) {
            // SAFETY: this node is the only writer of its outputs during the pass.
            Some(port) => match unsafe { port.data_mut() } {
                PortData::Signal(buffer) => &mut buffer[self.offset..self.offset + self.frames],
                _ => &mut [],
            },
            None => &mut [],
        }
    }

    pub fn cv_in(&self, index: usize) -> &'a [f32] {
        self.audio_in(index)
    }

    pub fn cv_out(&mut self, index: usize) -> &mut [f32] {
        self.audio_out(index)
    }

    pub fn control_in(&self, index: usize) -> f32 {
        match self.port(index, PortDirection::Input) {
            Some(port) => match unsafe { port.data() } {
                PortData::Control(value) => *value,
                _ => 0.0,
            },
            None => 0.0,
        }
    }

    pub fn set_control_out(&mut self, index: usize, value: f32) {
        if let Some(port) = self.port(index, PortDirection::Output) {
            let clamped = port.spec().clamp(value);
            if let PortData::Control(slot) = unsafe { port.data_mut() } {
                *slot = clamped;
            }
        }
    }

    /// Input events of this span with frames relative to the span start.
    pub fn midi_in(&self, index: usize) -> impl Iterator<Item = MidiEvent> + 'a {
        let offset = self.offset as u32;
        let events: &'a [MidiEvent] = match self.port(index, PortDirection::Input) {
            Some(port) => match unsafe { port.data() } {
                PortData::Midi(buffer) => buffer.range(offset, offset + self.frames as u32),
                _ => &[],
            },
            None => &[],
        };
        events.iter().map(move |event| event.shifted(-i64::from(offset)))
    }

    /// Queues an event at a span-relative frame. Returns `false` when the
    /// port is full or is not a MIDI output.
    pub fn push_midi(&mut self, index: usize, event: MidiEvent) -> bool {
        let Some(port) = self.port(index, PortDirection::Output) else {
            return false;
        };
        let last = self.frames.saturating_sub(1) as u32;
        let event = MidiEvent {
            frame: event.frame.min(last) + self.offset as u32,
            ..event
        };
        match unsafe { port.data_mut() } {
            PortData::Midi(buffer) => buffer.insert(event),
            _ => false,
        }
    }

    /// Samples delivered by the backend on `channel` for this span.
    pub fn hardware_input(&self, channel: usize) -> &'a [f32] {
        match self.hardware.get(channel) {
            Some(samples) if samples.len() >= self.offset + self.frames => {
                &samples[self.offset..self.offset + self.frames]
            }
            _ => &[],
        }
    }
}

/// Everything needed to add a node to a context.
pub struct NodeSpec {
    pub kind: NodeKind,
    pub name: Option<String>,
    pub processor: Box<dyn Processor>,
    pub isolation: Option<Isolation>,
}

impl NodeSpec {
    pub fn new(kind: NodeKind, processor: impl Processor + 'static) -> Self {
        Self::boxed(kind, Box::new(processor))
    }

    pub fn boxed(kind: NodeKind, processor: Box<dyn Processor>) -> Self {
        Self {
            kind,
            name: None,
            processor,
            isolation: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = Some(isolation);
        self
    }
}

/// Handle returned by `add_node`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub id: NodeId,
    pub kind: NodeKind,
    inputs: Vec<PortId>,
    outputs: Vec<PortId>,
}

impl NodeRef {
    pub fn input(&self, n: usize) -> Option<PortId> {
        self.inputs.get(n).copied()
    }

    pub fn output(&self, n: usize) -> Option<PortId> {
        self.outputs.get(n).copied()
    }

    pub fn inputs(&self) -> &[PortId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PortId] {
        &self.outputs
    }
}

/// A node as shared between the topology and every graph snapshot.
pub struct NodeCell {
    id: NodeId,
    kind: NodeKind,
    name: String,
    ports: Arc<[PortCell]>,
    runner: UnsafeCell<Runner>,
    faulted: AtomicBool,
    latency: u32,
}

// SAFETY: `runner` is only touched by the thread executing the node, and a
// node runs at most once at a time.
unsafe impl Sync for NodeCell {}

impl NodeCell {
    pub(crate) fn new(
        id: NodeId,
        kind: NodeKind,
        name: String,
        ports: Arc<[PortCell]>,
        runner: Runner,
    ) -> Self {
        Self {
            id,
            kind,
            name,
            ports,
            runner: UnsafeCell::new(runner),
            faulted: AtomicBool::new(false),
            latency: 0,
        }
    }

    pub(crate) fn with_latency(mut self, latency: u32) -> Self {
        self.latency = latency;
        self
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Processing latency reported when the node was added.
    #[inline]
    pub fn latency(&self) -> u32 {
        self.latency
    }

    #[inline]
    pub fn ports(&self) -> &[PortCell] {
        &self.ports
    }

    pub fn port_index(&self, id: PortId) -> Option<usize> {
        self.ports.iter().position(|port| port.id() == id)
    }

    #[inline]
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    /// Returns `true` the first time the node is marked.
    pub(crate) fn mark_faulted(&self) -> bool {
        !self.faulted.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn node_ref(&self) -> NodeRef {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for port in self.ports.iter() {
            match port.direction() {
                PortDirection::Input => inputs.push(port.id()),
                PortDirection::Output => outputs.push(port.id()),
            }
        }
        NodeRef {
            id: self.id,
            kind: self.kind,
            inputs,
            outputs,
        }
    }

    /// # Safety
    /// Only one thread may run a node at a time, and its inputs must already
    /// be gathered for the span.
    pub(crate) unsafe fn run(
        &self,
        offset: usize,
        frames: usize,
        transport: TransportSnapshot,
        hardware: &[&[f32]],
    ) -> Result<(), FaultReason> {
        let runner = &mut *self.runner.get();
        runner.run(&self.ports, offset, frames, transport, hardware)
    }

    /// Silences every output for the rest of the cycle after a fault.
    /// Control outputs fall back to their default.
    ///
    /// # Safety
    /// Caller must be the node's executor for the current pass.
    pub(crate) unsafe fn silence_outputs(&self, offset: usize, frames: usize) {
        for port in self.ports.iter() {
            if port.direction() != PortDirection::Output {
                continue;
            }
            match port.data_mut() {
                PortData::Control(value) => *value = port.spec().default,
                data => data.clear_span(offset, frames),
            }
        }
    }
}

impl fmt::Debug for NodeCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCell")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("faulted", &self.is_faulted())
            .finish()
    }
}
