//! The editable side of the engine: nodes and connections as the user sees
//! them. Every mutation here is validated synchronously; the audio thread
//! only ever sees the [`Graph`] snapshots built from it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::{EngineConfig, IsolationMode};
use crate::connection::{validate_multiplier, Connection, ConnectionId, ConnectionRef};
use crate::error::{ConnectionError, NodeError};
use crate::graph::Graph;
use crate::isolation::{Isolation, Runner};
use crate::latency::Compensation;
use crate::node::{NodeCell, NodeId, NodeRef, NodeSpec};
use crate::port::{PortCell, PortDirection, PortId};

struct NodeEntry {
    cell: Arc<NodeCell>,
    enabled: bool,
    /// Faulted and already dropped from the graph.
    excised: bool,
}

impl NodeEntry {
    fn scheduled(&self) -> bool {
        self.enabled && !self.excised
    }
}

pub(crate) struct Topology {
    sample_rate: u32,
    max_block: usize,
    compensation: Compensation,
    midi_capacity: usize,
    max_nodes: usize,
    max_fan_in: usize,
    plugin_isolation: Isolation,
    nodes: BTreeMap<NodeId, NodeEntry>,
    connections: BTreeMap<ConnectionId, Connection>,
    port_owner: HashMap<PortId, (NodeId, usize)>,
    next_node: u32,
    next_port: u32,
    next_connection: u32,
    generation: u64,
}

impl Topology {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        let timeout = config.plugin_timeout();
        let plugin_isolation = match config.plugin_isolation {
            IsolationMode::Inline => Isolation::Inline {
                deadline: Some(timeout),
            },
            IsolationMode::Watchdog => Isolation::Watchdog { timeout },
        };
        Self {
            sample_rate: config.sample_rate,
            max_block: config.max_block,
            compensation: Compensation {
                max_block: config.max_block,
                max_frames: config.max_compensation_frames,
            },
            midi_capacity: config.midi_capacity,
            max_nodes: config.max_nodes,
            max_fan_in: config.max_fan_in,
            plugin_isolation,
            nodes: BTreeMap::new(),
            connections: BTreeMap::new(),
            port_owner: HashMap::new(),
            next_node: 0,
            next_port: 0,
            next_connection: 0,
            generation: 0,
        }
    }

    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn add_node(&mut self, spec: NodeSpec) -> Result<NodeRef, NodeError> {
        if self.nodes.len() >= self.max_nodes {
            return Err(NodeError::CapacityExceeded(self.max_nodes));
        }
        let NodeSpec {
            kind,
            name,
            mut processor,
            isolation,
        } = spec;
        let name = name.unwrap_or_else(|| processor.name().to_owned());
        let specs = processor.ports();
        if specs.is_empty() {
            return Err(NodeError::NoPorts);
        }

        processor
            .activate(self.sample_rate as f32, self.max_block)
            .map_err(|err| NodeError::Activation {
                name: name.clone(),
                reason: format!("{err:#}"),
            })?;

        let latency = processor.latency();

        let first_port = self.next_port;
        let ports: Arc<[PortCell]> = specs
            .into_iter()
            .enumerate()
            .map(|(idx, spec)| {
                PortCell::new(
                    PortId(first_port + idx as u32),
                    spec,
                    self.max_block,
                    self.midi_capacity,
                )
            })
            .collect::<Vec<_>>()
            .into();

        let isolation = isolation.unwrap_or(if kind.is_plugin() {
            self.plugin_isolation
        } else {
            Isolation::default()
        });
        let runner = Runner::new(
            &name,
            processor,
            isolation,
            &ports,
            self.max_block,
            self.midi_capacity,
        )?;

        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.next_port += ports.len() as u32;
        for (idx, port) in ports.iter().enumerate() {
            self.port_owner.insert(port.id(), (id, idx));
        }

        let cell = Arc::new(NodeCell::new(id, kind, name, ports, runner).with_latency(latency));
        let node_ref = cell.node_ref();
        tracing::debug!(node = %id, name = cell.name(), ?kind, latency, "node added");
        self.nodes.insert(
            id,
            NodeEntry {
                cell,
                enabled: true,
                excised: false,
            },
        );
        Ok(node_ref)
    }

    /// Removes `id` together with every connection touching it.
    pub(crate) fn remove_node(&mut self, id: NodeId) -> Result<Vec<ConnectionId>, NodeError> {
        let entry = self.nodes.remove(&id).ok_or(NodeError::UnknownNode(id))?;
        for port in entry.cell.ports() {
            self.port_owner.remove(&port.id());
        }
        let owned = |port: &PortId| entry.cell.port_index(*port).is_some();
        let removed: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|conn| owned(&conn.source) || owned(&conn.dest))
            .map(|conn| conn.id)
            .collect();
        for conn in &removed {
            self.connections.remove(conn);
        }
        tracing::debug!(node = %id, connections = removed.len(), "node removed");
        Ok(removed)
    }

    pub(crate) fn set_enabled(&mut self, id: NodeId, enabled: bool) -> Result<bool, NodeError> {
        let entry = self.nodes.get_mut(&id).ok_or(NodeError::UnknownNode(id))?;
        let changed = entry.enabled != enabled;
        entry.enabled = enabled;
        Ok(changed)
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<&Arc<NodeCell>> {
        self.nodes.get(&id).map(|entry| &entry.cell)
    }

    pub(crate) fn port(&self, id: PortId) -> Option<&PortCell> {
        let (node, idx) = self.port_owner.get(&id)?;
        self.nodes.get(node).map(|entry| &entry.cell.ports()[*idx])
    }

    pub(crate) fn connect(
        &mut self,
        source: PortId,
        dest: PortId,
        multiplier: f32,
    ) -> Result<ConnectionRef, ConnectionError> {
        let multiplier = validate_multiplier(multiplier)?;
        let src = self.port(source).ok_or(ConnectionError::UnknownPort(source))?;
        let dst = self.port(dest).ok_or(ConnectionError::UnknownPort(dest))?;
        if src.direction() != PortDirection::Output {
            return Err(ConnectionError::Direction {
                port: source,
                found: src.direction(),
            });
        }
        if dst.direction() != PortDirection::Input {
            return Err(ConnectionError::Direction {
                port: dest,
                found: dst.direction(),
            });
        }
        if !src.kind().compatible_with(dst.kind()) {
            return Err(ConnectionError::IncompatibleKinds {
                source_kind: src.kind(),
                dest_kind: dst.kind(),
            });
        }

        let mut fan_in = 0usize;
        for conn in self.connections.values().filter(|conn| conn.dest == dest) {
            if conn.source == source {
                return Err(ConnectionError::Duplicate {
                    from: source,
                    to: dest,
                });
            }
            fan_in += 1;
        }
        if fan_in >= self.max_fan_in {
            return Err(ConnectionError::FanInExceeded {
                port: dest,
                limit: self.max_fan_in,
            });
        }

        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;
        self.connections
            .insert(id, Connection::new(id, source, dest, multiplier));
        tracing::debug!(connection = %id, %source, %dest, multiplier, "connected");
        Ok(ConnectionRef { id, source, dest })
    }

    pub(crate) fn disconnect(&mut self, id: ConnectionId) -> Result<(), ConnectionError> {
        self.connections
            .remove(&id)
            .map(|_| ())
            .ok_or(ConnectionError::UnknownConnection(id))
    }

    pub(crate) fn connection(&self, id: ConnectionId) -> Result<&Connection, ConnectionError> {
        self.connections
            .get(&id)
            .ok_or(ConnectionError::UnknownConnection(id))
    }

    /// Faulted nodes still scheduled. They are marked excised.
    pub(crate) fn excise_faulted(&mut self) -> Vec<(NodeId, String)> {
        self.nodes
            .values_mut()
            .filter(|entry| !entry.excised && entry.cell.is_faulted())
            .map(|entry| {
                entry.excised = true;
                (entry.cell.id(), entry.cell.name().to_owned())
            })
            .collect()
    }

    /// Snapshot of every enabled, healthy node and the connections between
    /// them.
    pub(crate) fn build_graph(&mut self) -> Graph {
        self.generation += 1;
        let nodes: Vec<Arc<NodeCell>> = self
            .nodes
            .values()
            .filter(|entry| entry.scheduled())
            .map(|entry| Arc::clone(&entry.cell))
            .collect();
        let connections: Vec<Connection> = self.connections.values().cloned().collect();
        let graph = Graph::build(nodes, &connections, self.generation, self.compensation);
        tracing::debug!(
            generation = self.generation,
            nodes = graph.len(),
            layers = graph.execution_layers().len(),
            latency = graph.max_playback_latency(),
            "graph rebuilt"
        );
        graph
    }
}
