use crossbeam_queue::ArrayQueue;
use harmoniq_rt::RtEvent;

use crate::graph::{Graph, NodePlan};
use crate::node::{NodeCell, NodeKind};
use crate::port::{PortData, PortDirection, PortKind};
use crate::transport::TransportSnapshot;

/// Everything a node needs to know about the pass it runs in. Lifetimes are
/// erased: the router keeps the graph and hardware buffers alive until the
/// pass completes.
#[derive(Clone, Copy)]
pub(crate) struct PassDesc {
    pub graph: *const Graph,
    pub offset: usize,
    pub frames: usize,
    pub transport: TransportSnapshot,
    pub hardware: *const [&'static [f32]],
}

impl PassDesc {
    pub(crate) fn idle() -> Self {
        let hardware: &'static [&'static [f32]] = &[];
        Self {
            graph: std::ptr::null(),
            offset: 0,
            frames: 0,
            transport: TransportSnapshot::default(),
            hardware,
        }
    }
}

/// Gathers inputs, runs the processor inside its fault boundary and clears
/// the outputs of a faulted node.
///
/// # Safety
/// `idx` must be ready in the current pass and executed by exactly one thread.
pub(crate) unsafe fn run_node(graph: &Graph, idx: u32, pass: &PassDesc, events: &ArrayQueue<RtEvent>) {
    let node = graph.node(idx);
    let offset = pass.offset;
    let frames = pass.frames;

    gather_inputs(graph, node, graph.plan(idx), offset, frames);
    for port in node.ports() {
        if port.direction() == PortDirection::Output {
            port.data_mut().clear_span(offset, frames);
        }
    }

    if node.is_faulted() {
        return;
    }
    let hardware: &[&[f32]] = &*pass.hardware;
    if let Err(reason) = node.run(offset, frames, pass.transport, hardware) {
        node.silence_outputs(offset, frames);
        if node.mark_faulted() {
            let _ = events.push(RtEvent::NodeFault {
                node: node.id().0,
                reason,
            });
        }
    }
}

/// Sums every source of every input port of `node` into that port for the
/// span, in connection order, using the gains latched for this cycle.
unsafe fn gather_inputs(graph: &Graph, node: &NodeCell, plan: &NodePlan, offset: usize, frames: usize) {
    let end = offset + frames;
    for input in plan.inputs.iter() {
        let port = &node.ports()[usize::from(input.port)];
        match port.data_mut() {
            PortData::Signal(buffer) => {
                let dst = &mut buffer[offset..end];
                dst.fill(0.0);
                for source in input.sources.iter() {
                    let gain = source.gain();
                    let cell = &graph.node(source.node).ports()[usize::from(source.port)];
                    let data = if source.feedback { cell.history() } else { cell.data() };
                    match (data, &source.delay) {
                        // The line keeps running while muted so it holds the
                        // right history when the gain comes back.
                        (PortData::Signal(src), Some(line)) => {
                            line.mix_into(&src[offset..end], gain, dst);
                        }
                        _ if gain == 0.0 => {}
                        (PortData::Signal(src), None) => {
                            for (out, sample) in dst.iter_mut().zip(&src[offset..end]) {
                                *out += sample * gain;
                            }
                        }
                        (PortData::Control(value), _) => {
                            let value = value * gain;
                            for out in dst.iter_mut() {
                                *out += value;
                            }
                        }
                        (PortData::Midi(_), _) => {}
                    }
                }
                let limit = match (port.kind(), node.kind()) {
                    (PortKind::Audio, NodeKind::Fader) => {
                        Some((-NodeKind::FADER_INPUT_LIMIT, NodeKind::FADER_INPUT_LIMIT))
                    }
                    (PortKind::Cv, _) if !input.sources.is_empty() => {
                        Some((port.spec().min, port.spec().max))
                    }
                    _ => None,
                };
                if let Some((lo, hi)) = limit {
                    for sample in dst.iter_mut() {
                        *sample = sample.clamp(lo, hi);
                    }
                }
            }
            PortData::Control(value) => {
                let depth = port.spec().depth();
                let mut modulated = port.base_value();
                for source in input.sources.iter() {
                    let gain = source.gain();
                    if gain == 0.0 {
                        continue;
                    }
                    let cell = &graph.node(source.node).ports()[usize::from(source.port)];
                    let data = if source.feedback { cell.history() } else { cell.data() };
                    let amount = match data {
                        PortData::Control(v) => *v,
                        PortData::Signal(src) => src[offset],
                        PortData::Midi(_) => 0.0,
                    };
                    modulated += depth * gain * amount;
                }
                *value = if plan.mute == Some(input.port) && plan.is_solo_muted() {
                    port.spec().max
                } else {
                    port.spec().clamp(modulated)
                };
            }
            PortData::Midi(buffer) => {
                buffer.truncate_from(offset as u32);
                for source in input.sources.iter() {
                    if source.gain() == 0.0 {
                        continue;
                    }
                    let cell = &graph.node(source.node).ports()[usize::from(source.port)];
                    let data = if source.feedback { cell.history() } else { cell.data() };
                    if let PortData::Midi(src) = data {
                        for event in src.range(offset as u32, end as u32) {
                            buffer.insert(*event);
                        }
                    }
                }
            }
        }
    }
}
