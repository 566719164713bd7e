//! Harmoniq Router
//! =================
//! Real-time signal routing for Harmoniq Studio. Tracks, faders, plugins,
//! sends, modulators and hardware I/O are nodes in one directed graph of
//! typed ports; the router runs that graph once per hardware cycle across a
//! fixed worker pool, keeps the transport in sync and captures armed ports
//! for recording.

pub mod backend;
pub mod config;
pub mod connection;
pub mod context;
pub mod engine;
pub mod error;
pub mod graph;
pub mod isolation;
mod latency;
pub mod metrics;
pub mod midi;
pub mod node;
pub mod nodes;
pub mod port;
pub mod recording;
pub mod router;
mod sched;
mod topology;
pub mod transport;

pub use backend::{open_backend, AudioBackend, BackendConfig, CycleCallback, DummyBackend, ManualBackend};
pub use config::{EngineConfig, IsolationMode, RecordingConfig, TakePolicy};
pub use connection::{ConnectionId, ConnectionRef, MAX_MULTIPLIER};
pub use context::{EngineContext, Notification};
pub use engine::Engine;
pub use error::{
    BackendError, ConfigError, ConnectionError, EngineError, NodeError, ProcessError, TransportError,
};
pub use graph::Graph;
pub use harmoniq_rt::{FaultReason, RtEvent};
pub use isolation::Isolation;
pub use metrics::{AudioMetricsCollector, CycleMetrics};
pub use midi::{MidiBuffer, MidiEvent};
pub use node::{HwDirection, NodeId, NodeKind, NodeRef, NodeSpec, ProcessContext, Processor};
pub use port::{PortDirection, PortId, PortKind, PortSpec};
pub use recording::{FinalizedRegion, RecordedMidi, RegionId, RegionPayload};
pub use router::Router;
pub use transport::{TransportHandle, TransportSnapshot, TransportState};
