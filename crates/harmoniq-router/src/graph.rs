//! Immutable graph snapshots.
//!
//! A [`Graph`] is built off the audio thread from the live nodes and
//! connections, then published whole. It is never edited afterwards; only
//! the per-pass dependency counters change while it runs.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF32;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::connection::{Connection, ConnectionControl, ConnectionId};
use crate::latency::{Compensation, DelayLine, LatencyMap};
use crate::node::{NodeCell, NodeId, NodeKind};
use crate::port::{PortDirection, PortId, PortKind};

/// One incoming contribution to an input port.
#[derive(Debug)]
pub(crate) struct Source {
    pub connection: ConnectionId,
    pub node: u32,
    pub port: u16,
    pub feedback: bool,
    pub control: Arc<ConnectionControl>,
    /// Connection gain latched at the start of the cycle.
    gain: AtomicF32,
    /// Aligns this path with the slowest path into the same node.
    pub delay: Option<DelayLine>,
}

impl Source {
    fn new(conn: &Connection, node: u32, port: u16, feedback: bool) -> Self {
        Self {
            connection: conn.id,
            node,
            port,
            feedback,
            gain: AtomicF32::new(conn.control.gain()),
            control: Arc::clone(&conn.control),
            delay: None,
        }
    }

    /// Gain for every span of the current cycle.
    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain.load(Ordering::Relaxed)
    }

    #[inline]
    fn latch(&self) {
        self.gain.store(self.control.gain(), Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub(crate) struct InputPlan {
    pub port: u16,
    /// Ordered by connection id.
    pub sources: Box<[Source]>,
}

#[derive(Debug)]
pub(crate) struct NodePlan {
    pub successors: Box<[u32]>,
    pub initial_pending: u32,
    pub inputs: Box<[InputPlan]>,
    /// Mute input of a fader, forced on while other faders are soloed.
    pub mute: Option<u16>,
    pub solo_muted: AtomicBool,
}

impl NodePlan {
    #[inline]
    pub fn is_solo_muted(&self) -> bool {
        self.solo_muted.load(Ordering::Relaxed)
    }
}

/// A fader taking part in solo: its solo input and the faders upstream or
/// downstream of it, as indices into [`Graph::solos`].
#[derive(Debug)]
struct SoloMember {
    node: u32,
    solo: u16,
    related: Box<[u32]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HwOutput {
    pub node: u32,
    pub port: u16,
    pub channel: u16,
}

pub struct Graph {
    nodes: Box<[Arc<NodeCell>]>,
    plans: Box<[NodePlan]>,
    pending: Box<[AtomicU32]>,
    roots: Box<[u32]>,
    layers: Vec<Vec<NodeId>>,
    feedback: BTreeSet<ConnectionId>,
    feedback_ports: Box<[(u32, u16)]>,
    hw_outputs: Box<[HwOutput]>,
    port_index: HashMap<PortId, (u32, u16)>,
    solos: Box<[SoloMember]>,
    latency: LatencyMap,
    generation: u64,
}

impl Graph {
    pub fn empty() -> Self {
        Self::build(Vec::new(), &[], 0, Compensation::default())
    }

    /// Orders `nodes`, classifies `connections` and sizes the delay lines
    /// that compensate node latency. Connections touching a port outside
    /// `nodes` are ignored.
    pub(crate) fn build(
        mut nodes: Vec<Arc<NodeCell>>,
        connections: &[Connection],
        generation: u64,
        compensation: Compensation,
    ) -> Self {
        nodes.sort_by_key(|node| node.id());

        let mut port_index = HashMap::new();
        for (node_idx, node) in nodes.iter().enumerate() {
            for (port_idx, port) in node.ports().iter().enumerate() {
                port_index.insert(port.id(), (node_idx as u32, port_idx as u16));
            }
        }

        let mut ordered: Vec<&Connection> = connections
            .iter()
            .filter(|conn| port_index.contains_key(&conn.source) && port_index.contains_key(&conn.dest))
            .collect();
        ordered.sort_by_key(|conn| conn.id);

        let mut dag: DiGraph<(), ()> = DiGraph::with_capacity(nodes.len(), ordered.len());
        for _ in 0..nodes.len() {
            dag.add_node(());
        }

        let mut feedback = BTreeSet::new();
        let mut sources: Vec<Vec<Vec<Source>>> = nodes
            .iter()
            .map(|node| node.ports().iter().map(|_| Vec::new()).collect())
            .collect();

        for conn in &ordered {
            let (src_node, src_port) = port_index[&conn.source];
            let (dst_node, dst_port) = port_index[&conn.dest];
            let from = NodeIndex::new(src_node as usize);
            let to = NodeIndex::new(dst_node as usize);
            let is_feedback = src_node == dst_node || has_path_connecting(&dag, to, from, None);
            if is_feedback {
                feedback.insert(conn.id);
            } else {
                dag.update_edge(from, to, ());
            }
            sources[dst_node as usize][dst_port as usize].push(Source::new(
                conn,
                src_node,
                src_port,
                is_feedback,
            ));
        }

        let count = nodes.len();
        let mut successors: Vec<BTreeSet<u32>> = vec![BTreeSet::new(); count];
        let mut indegree = vec![0u32; count];
        for edge in dag.raw_edges() {
            let from = edge.source().index();
            let to = edge.target().index();
            if successors[from].insert(to as u32) {
                indegree[to] += 1;
            }
        }

        let mut layers = Vec::new();
        let mut order = Vec::with_capacity(count);
        let mut remaining = indegree.clone();
        let mut current: Vec<u32> = (0..count as u32)
            .filter(|&idx| remaining[idx as usize] == 0)
            .collect();
        let roots = current.clone().into_boxed_slice();
        while !current.is_empty() {
            let mut next = Vec::new();
            for &idx in &current {
                for &succ in &successors[idx as usize] {
                    let slot = &mut remaining[succ as usize];
                    *slot -= 1;
                    if *slot == 0 {
                        next.push(succ);
                    }
                }
            }
            next.sort_unstable();
            order.extend_from_slice(&current);
            layers.push(current.iter().map(|&idx| nodes[idx as usize].id()).collect());
            current = next;
        }

        let mut feedback_ports: Vec<(u32, u16)> = sources
            .iter()
            .flatten()
            .flatten()
            .filter(|source| source.feedback)
            .map(|source| (source.node, source.port))
            .collect();
        feedback_ports.sort_unstable();
        feedback_ports.dedup();

        let latency = compensate(&nodes, &order, &successors, &mut sources, compensation);
        let solos = solo_members(&nodes, &dag);

        let mut hw_outputs = Vec::new();
        let plans = nodes
            .iter()
            .enumerate()
            .zip(sources)
            .map(|((idx, node), node_sources)| {
                let inputs = node
                    .ports()
                    .iter()
                    .zip(node_sources)
                    .enumerate()
                    .filter(|(_, (port, _))| port.direction() == PortDirection::Input)
                    .map(|(port_idx, (_, sources))| InputPlan {
                        port: port_idx as u16,
                        sources: sources.into_boxed_slice(),
                    })
                    .collect::<Vec<_>>()
                    .into_boxed_slice();
                if let Some(channel) = node.kind().hardware_output() {
                    if let Some(plan) = inputs.first() {
                        hw_outputs.push(HwOutput {
                            node: idx as u32,
                            port: plan.port,
                            channel,
                        });
                    }
                }
                let mute = (node.kind() == NodeKind::Fader)
                    .then(|| control_input(node, "mute"))
                    .flatten();
                NodePlan {
                    successors: successors[idx].iter().copied().collect(),
                    initial_pending: indegree[idx],
                    inputs,
                    mute,
                    solo_muted: AtomicBool::new(false),
                }
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let pending = indegree.iter().map(|&count| AtomicU32::new(count)).collect();

        Self {
            nodes: nodes.into_boxed_slice(),
            plans,
            pending,
            roots,
            layers,
            feedback,
            feedback_ports: feedback_ports.into_boxed_slice(),
            hw_outputs: hw_outputs.into_boxed_slice(),
            port_index,
            solos,
            latency,
            generation,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Topological partition of the nodes; each layer is ordered by id.
    pub fn execution_layers(&self) -> &[Vec<NodeId>] {
        &self.layers
    }

    pub fn is_feedback(&self, connection: ConnectionId) -> bool {
        self.feedback.contains(&connection)
    }

    pub fn feedback_connections(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.feedback.iter().copied()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.binary_search_by_key(&node, |cell| cell.id()).is_ok()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<NodeCell>> {
        self.nodes.iter()
    }

    #[inline]
    pub(crate) fn node(&self, idx: u32) -> &NodeCell {
        &self.nodes[idx as usize]
    }

    #[inline]
    pub(crate) fn plan(&self, idx: u32) -> &NodePlan {
        &self.plans[idx as usize]
    }

    #[inline]
    pub(crate) fn roots(&self) -> &[u32] {
        &self.roots
    }

    pub(crate) fn feedback_ports(&self) -> &[(u32, u16)] {
        &self.feedback_ports
    }

    pub(crate) fn hw_outputs(&self) -> &[HwOutput] {
        &self.hw_outputs
    }

    pub(crate) fn locate(&self, port: PortId) -> Option<(u32, u16)> {
        self.port_index.get(&port).copied()
    }

    fn index_of(&self, node: NodeId) -> Option<usize> {
        self.nodes.binary_search_by_key(&node, |cell| cell.id()).ok()
    }

    /// Latency from `node` to the end of its longest downstream chain, its
    /// own latency included.
    pub fn playback_latency(&self, node: NodeId) -> Option<u32> {
        self.index_of(node).map(|idx| self.latency.playback[idx])
    }

    /// Latency of the signal arriving at `node`'s inputs once the graph's
    /// delay lines are applied.
    pub fn input_latency(&self, node: NodeId) -> Option<u32> {
        self.index_of(node).map(|idx| self.latency.arrival[idx])
    }

    pub fn max_playback_latency(&self) -> u32 {
        self.latency.max_playback()
    }

    /// Delay inserted on `connection` to line it up with the other paths
    /// into its destination. Zero when it needs none.
    pub fn compensation_delay(&self, connection: ConnectionId) -> usize {
        self.sources()
            .find(|source| source.connection == connection)
            .and_then(|source| source.delay.as_ref())
            .map_or(0, DelayLine::delay)
    }

    fn sources(&self) -> impl Iterator<Item = &Source> {
        self.plans
            .iter()
            .flat_map(|plan| plan.inputs.iter())
            .flat_map(|input| input.sources.iter())
    }

    /// Latches connection gains and solo state for the next cycle.
    pub(crate) fn begin_cycle(&self) {
        for source in self.sources() {
            source.latch();
        }
        self.update_solo();
    }

    fn is_soloed(&self, member: &SoloMember) -> bool {
        self.node(member.node).ports()[usize::from(member.solo)].base_value() > 0.5
    }

    fn update_solo(&self) {
        let any = self.solos.iter().any(|member| self.is_soloed(member));
        for member in self.solos.iter() {
            let muted = any
                && !self.is_soloed(member)
                && !member
                    .related
                    .iter()
                    .any(|&other| self.is_soloed(&self.solos[other as usize]));
            self.plans[member.node as usize]
                .solo_muted
                .store(muted, Ordering::Relaxed);
        }
    }

    /// Restores every dependency counter ahead of a pass.
    pub(crate) fn reset_pending(&self) {
        for (counter, plan) in self.pending.iter().zip(self.plans.iter()) {
            counter.store(plan.initial_pending, Ordering::Relaxed);
        }
    }

    /// Returns `true` when `idx` became ready.
    #[inline]
    pub(crate) fn release(&self, idx: u32) -> bool {
        self.pending[idx as usize].fetch_sub(1, Ordering::AcqRel) == 1
    }
}

fn control_input(node: &NodeCell, name: &str) -> Option<u16> {
    node.ports()
        .iter()
        .position(|port| {
            port.direction() == PortDirection::Input
                && port.kind() == PortKind::Control
                && port.spec().name == name
        })
        .map(|idx| idx as u16)
}

/// Walks the graph in execution order, lines up the signal paths into every
/// node and aligns all hardware outputs. Only audio and CV paths are delayed.
fn compensate(
    nodes: &[Arc<NodeCell>],
    order: &[u32],
    successors: &[BTreeSet<u32>],
    sources: &mut [Vec<Vec<Source>>],
    compensation: Compensation,
) -> LatencyMap {
    let count = nodes.len();
    let own: Vec<u32> = nodes.iter().map(|node| node.latency()).collect();
    let is_signal = |node: u32, port: u16| nodes[node as usize].ports()[usize::from(port)].kind().is_signal();

    let mut arrival = vec![0u32; count];
    for &idx in order {
        let idx = idx as usize;
        arrival[idx] = sources[idx]
            .iter()
            .enumerate()
            .filter(|&(port, _)| nodes[idx].ports()[port].kind().is_signal())
            .flat_map(|(_, port_sources)| port_sources.iter())
            .filter(|source| !source.feedback && is_signal(source.node, source.port))
            .map(|source| arrival[source.node as usize] + own[source.node as usize])
            .max()
            .unwrap_or(0);
    }

    let hw_arrival = (0..count)
        .filter(|&idx| nodes[idx].kind().hardware_output().is_some())
        .map(|idx| arrival[idx])
        .max()
        .unwrap_or(0);
    for (idx, node) in nodes.iter().enumerate() {
        if node.kind().hardware_output().is_some() {
            arrival[idx] = hw_arrival;
        }
    }

    for (idx, node_sources) in sources.iter_mut().enumerate() {
        for (port, port_sources) in node_sources.iter_mut().enumerate() {
            if !nodes[idx].ports()[port].kind().is_signal() {
                continue;
            }
            for source in port_sources.iter_mut() {
                if source.feedback || !is_signal(source.node, source.port) {
                    continue;
                }
                let ready = arrival[source.node as usize] + own[source.node as usize];
                let mut delay = arrival[idx].saturating_sub(ready) as usize;
                if delay == 0 {
                    continue;
                }
                if delay > compensation.max_frames {
                    tracing::warn!(
                        node = nodes[idx].name(),
                        wanted = delay,
                        max = compensation.max_frames,
                        "latency compensation clamped"
                    );
                    delay = compensation.max_frames;
                }
                source.delay = Some(DelayLine::new(delay, compensation.max_block));
            }
        }
    }

    let mut playback = vec![0u32; count];
    for &idx in order.iter().rev() {
        let idx = idx as usize;
        let downstream = successors[idx]
            .iter()
            .map(|&succ| playback[succ as usize])
            .max()
            .unwrap_or(0);
        playback[idx] = downstream + own[idx];
    }

    LatencyMap { arrival, playback }
}

/// Faders with a solo input and, for each, the faders it feeds or is fed by
/// over non-feedback connections.
fn solo_members(nodes: &[Arc<NodeCell>], dag: &DiGraph<(), ()>) -> Box<[SoloMember]> {
    let faders: Vec<(u32, u16)> = nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| node.kind() == NodeKind::Fader)
        .filter_map(|(idx, node)| control_input(node, "solo").map(|solo| (idx as u32, solo)))
        .collect();
    faders
        .iter()
        .map(|&(node, solo)| {
            let here = NodeIndex::new(node as usize);
            let related = faders
                .iter()
                .enumerate()
                .filter(|&(_, &(other, _))| other != node)
                .filter(|&(_, &(other, _))| {
                    let there = NodeIndex::new(other as usize);
                    has_path_connecting(dag, here, there, None) || has_path_connecting(dag, there, here, None)
                })
                .map(|(pos, _)| pos as u32)
                .collect();
            SoloMember { node, solo, related }
        })
        .collect()
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("generation", &self.generation)
            .field("layers", &self.layers)
            .field("feedback", &self.feedback)
            .finish()
    }
}
