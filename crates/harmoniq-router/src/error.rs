use thiserror::Error;

use crate::connection::ConnectionId;
use crate::node::NodeId;
use crate::port::{PortDirection, PortId, PortKind};

/// Rejections raised synchronously by the connection API. None of them
/// touches the published graph.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("port {0} does not exist")]
    UnknownPort(PortId),
    #[error("connection {0} does not exist")]
    UnknownConnection(ConnectionId),
    #[error("cannot connect {source_kind} port to {dest_kind} port")]
    IncompatibleKinds {
        source_kind: PortKind,
        dest_kind: PortKind,
    },
    #[error("port {port} is an {found} port")]
    Direction {
        port: PortId,
        found: PortDirection,
    },
    #[error("multiplier {0} is not finite or outside [-16, 16]")]
    InvalidMultiplier(f32),
    #[error("{from} is already connected to {to}")]
    Duplicate { from: PortId, to: PortId },
    #[error("input port {port} already has {limit} connections")]
    FanInExceeded { port: PortId, limit: usize },
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),
    #[error("node limit of {0} reached")]
    CapacityExceeded(usize),
    #[error("processor declared no ports")]
    NoPorts,
    #[error("failed to activate {name}: {reason}")]
    Activation { name: String, reason: String },
    #[error("failed to spawn isolation thread for {name}: {source}")]
    Isolation {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("loop range {start}..{end} is empty")]
    InvalidLoop { start: u64, end: u64 },
    #[error("punch range {start}..{end} is empty")]
    InvalidPunch { start: u64, end: u64 },
    #[error("transport request queue is full")]
    QueueFull,
    #[error("cannot arm {requested} ports, the limit is {limit}")]
    TooManyArmedPorts { requested: usize, limit: usize },
    #[error("port {0} cannot be armed for recording")]
    UnknownPort(PortId),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("backend protocol error: {0}")]
    Protocol(String),
    #[error("backend delivered {got} frames, engine was configured for at most {expected}")]
    BufferSizeMismatch { expected: usize, got: usize },
    #[error("backend used before init")]
    NotInitialized,
    #[error("backend has no cycle callback")]
    NoCallback,
}

/// Errors raised while processing a single node. They never leave the audio
/// thread; the scheduler turns them into fault events.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    #[error("processor reported a failure")]
    Failed,
    #[error("processor received an unexpected port layout")]
    PortLayout,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be at least {min}")]
    TooSmall { field: &'static str, min: usize },
    #[error("sample rate {0} is not supported")]
    SampleRate(u32),
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("the router for this context was already created")]
    RouterTaken,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("port {port} is a {kind} port")]
    PortKind { port: PortId, kind: PortKind },
}
