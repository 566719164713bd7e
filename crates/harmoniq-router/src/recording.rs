//! Recording capture.
//!
//! The audio thread copies armed ports into three bounded SPSC rings (event
//! headers, samples, MIDI) and never blocks: when a ring is full the data is
//! dropped and the loss is carried as a gap on the next header. A control
//! thread drains the rings with [`RecordingConsumer::drain`] and folds the
//! events into regions.

use std::collections::HashMap;

use arrayvec::ArrayVec;
use crossbeam_queue::ArrayQueue;
use harmoniq_rt::RtEvent;
use rtrb::{Consumer, Producer, RingBuffer};
use serde::Serialize;

use crate::config::{RecordingConfig, TakePolicy};
use crate::graph::Graph;
use crate::midi::MidiEvent;
use crate::port::{PortData, PortId, PortKind};
use crate::transport::{ArmedPorts, Span, Transport, TransportState, MAX_ARMED_PORTS};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordingEventKind {
    Start { kind: PortKind },
    Audio { frames: u32, gap: u32 },
    Midi { frames: u32, count: u32, gap: u32 },
    Control { frames: u32, value: f32, gap: u32 },
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordingEvent {
    pub port: PortId,
    /// Frame offset inside the cycle the event was captured in.
    pub timestamp: u32,
    /// Timeline position of the first captured frame.
    pub position: u64,
    pub kind: RecordingEventKind,
}

pub fn recording_channel(config: &RecordingConfig) -> (RecordingSink, RecordingConsumer) {
    let (headers_tx, headers_rx) = RingBuffer::new(config.header_capacity);
    let (samples_tx, samples_rx) = RingBuffer::new(config.audio_ring_frames);
    let (midi_tx, midi_rx) = RingBuffer::new(config.midi_capacity);
    (
        RecordingSink {
            headers: headers_tx,
            samples: samples_tx,
            midi: midi_tx,
            reserve: MAX_ARMED_PORTS,
        },
        RecordingConsumer::new(headers_rx, samples_rx, midi_rx, config.take_policy),
    )
}

/// Producer half of the recording rings.
pub struct RecordingSink {
    headers: Producer<RecordingEvent>,
    samples: Producer<f32>,
    midi: Producer<MidiEvent>,
    /// Header slots kept free for start/stop markers.
    reserve: usize,
}

impl RecordingSink {
    /// Pushes a start or stop marker. Returns `false` if the ring is full.
    pub fn marker(&mut self, port: PortId, timestamp: u32, position: u64, kind: RecordingEventKind) -> bool {
        self.headers
            .push(RecordingEvent {
                port,
                timestamp,
                position,
                kind,
            })
            .is_ok()
    }

    fn data_slots_available(&self) -> bool {
        self.headers.slots() > self.reserve
    }

    /// Queues `samples`. On overflow nothing is written and `Err` carries the
    /// number of frames lost.
    pub fn audio(&mut self, port: PortId, timestamp: u32, position: u64, samples: &[f32], gap: u32) -> Result<(), u32> {
        let frames = samples.len();
        if !self.data_slots_available() || self.samples.slots() < frames {
            return Err(frames as u32);
        }
        let Ok(mut chunk) = self.samples.write_chunk(frames) else {
            return Err(frames as u32);
        };
        let (first, second) = chunk.as_mut_slices();
        let split = first.len();
        first.copy_from_slice(&samples[..split]);
        second.copy_from_slice(&samples[split..]);
        chunk.commit_all();
        self.header(port, timestamp, position, RecordingEventKind::Audio {
            frames: frames as u32,
            gap,
        })
        .map_err(|_| frames as u32)
    }

    /// Queues MIDI captured over `frames` frames. Event frames are rebased
    /// by `base` so they end up relative to `position`. Either every event is
    /// queued or none is.
    #[allow(clippy::too_many_arguments)]
    pub fn midi(
        &mut self,
        port: PortId,
        timestamp: u32,
        position: u64,
        frames: u32,
        events: &[MidiEvent],
        base: u32,
        gap: u32,
    ) -> Result<(), u32> {
        if !self.data_slots_available() || self.midi.slots() < events.len() {
            return Err(frames);
        }
        for event in events {
            if self.midi.push(event.shifted(-i64::from(base))).is_err() {
                return Err(frames);
            }
        }
        self.header(port, timestamp, position, RecordingEventKind::Midi {
            frames,
            count: events.len() as u32,
            gap,
        })
        .map_err(|_| frames)
    }

    pub fn control(
        &mut self,
        port: PortId,
        timestamp: u32,
        position: u64,
        frames: u32,
        value: f32,
        gap: u32,
    ) -> Result<(), u32> {
        if !self.data_slots_available() {
            return Err(frames);
        }
        self.header(port, timestamp, position, RecordingEventKind::Control { frames, value, gap })
            .map_err(|_| frames)
    }

    fn header(&mut self, port: PortId, timestamp: u32, position: u64, kind: RecordingEventKind) -> Result<(), ()> {
        self.headers
            .push(RecordingEvent {
                port,
                timestamp,
                position,
                kind,
            })
            .map_err(|_| ())
    }
}

#[derive(Debug, Clone, Copy)]
struct ArmedSlot {
    port: PortId,
    location: Option<(u32, u16)>,
    kind: PortKind,
    open: bool,
    gap: u32,
}

/// Audio-thread capture of armed ports.
pub struct RecordingCapture {
    sink: RecordingSink,
    slots: ArrayVec<ArmedSlot, MAX_ARMED_PORTS>,
    dropped_frames: u64,
}

impl RecordingCapture {
    pub fn new(sink: RecordingSink) -> Self {
        Self {
            sink,
            slots: ArrayVec::new(),
            dropped_frames: 0,
        }
    }

    pub fn armed(&self) -> impl Iterator<Item = PortId> + '_ {
        self.slots.iter().map(|slot| slot.port)
    }

    pub fn is_capturing(&self) -> bool {
        self.slots.iter().any(|slot| slot.open)
    }

    /// Frames lost to full rings since the last call.
    pub fn take_dropped_frames(&mut self) -> u64 {
        std::mem::take(&mut self.dropped_frames)
    }

    /// Replaces the armed set. Ports leaving the set close their region at
    /// `position`.
    pub fn set_armed(&mut self, ports: &ArmedPorts, graph: &Graph, timestamp: u32, position: u64) {
        for slot in self.slots.iter_mut() {
            if slot.open && !ports.contains(&slot.port) {
                self.sink
                    .marker(slot.port, timestamp, position, RecordingEventKind::Stop);
                slot.open = false;
            }
        }
        let previous = std::mem::take(&mut self.slots);
        for &port in ports {
            let carried = previous.iter().find(|slot| slot.port == port).copied();
            let location = graph.locate(port);
            let kind = location
                .map(|(node, idx)| graph.node(node).ports()[usize::from(idx)].kind())
                .unwrap_or(PortKind::Audio);
            self.slots.push(ArmedSlot {
                port,
                location,
                kind,
                open: carried.map(|slot| slot.open).unwrap_or(false),
                gap: carried.map(|slot| slot.gap).unwrap_or(0),
            });
        }
    }

    /// Re-resolves armed ports against a freshly adopted graph.
    pub fn adopt(&mut self, graph: &Graph, timestamp: u32, position: u64) {
        for slot in self.slots.iter_mut() {
            slot.location = graph.locate(slot.port);
            if slot.location.is_none() && slot.open {
                self.sink
                    .marker(slot.port, timestamp, position, RecordingEventKind::Stop);
                slot.open = false;
            }
        }
    }

    /// Closes every open region at `position`.
    pub fn stop_all(&mut self, timestamp: u32, position: u64) {
        for slot in self.slots.iter_mut().filter(|slot| slot.open) {
            self.sink
                .marker(slot.port, timestamp, position, RecordingEventKind::Stop);
            slot.open = false;
            slot.gap = 0;
        }
    }

    /// Captures the armed ports for one span after its pass has completed.
    pub fn capture_span(
        &mut self,
        graph: &Graph,
        span: &Span,
        transport: &Transport,
        events: &ArrayQueue<RtEvent>,
    ) {
        if transport.state() != TransportState::Recording || self.slots.is_empty() {
            return;
        }
        let Some((start, frames)) = transport.punch_window(span) else {
            self.stop_all(span.offset as u32, span.position);
            return;
        };
        let timestamp = (span.offset + start) as u32;
        let position = span.position + start as u64;
        let begin = span.offset + start;
        let end = begin + frames;

        for i in 0..self.slots.len() {
            let slot = self.slots[i];
            let Some((node, idx)) = slot.location else {
                continue;
            };
            if !slot.open {
                self.sink.marker(
                    slot.port,
                    timestamp,
                    position,
                    RecordingEventKind::Start { kind: slot.kind },
                );
                self.slots[i].open = true;
            }
            let cell = &graph.node(node).ports()[usize::from(idx)];
            // SAFETY: no pass is running while the router captures.
            let result = match unsafe { cell.data() } {
                PortData::Signal(buffer) => {
                    self.sink
                        .audio(slot.port, timestamp, position, &buffer[begin..end], slot.gap)
                }
                PortData::Midi(buffer) => self.sink.midi(
                    slot.port,
                    timestamp,
                    position,
                    frames as u32,
                    buffer.range(begin as u32, end as u32),
                    begin as u32,
                    slot.gap,
                ),
                PortData::Control(value) => {
                    self.sink
                        .control(slot.port, timestamp, position, frames as u32, *value, slot.gap)
                }
            };
            match result {
                Ok(()) => self.slots[i].gap = 0,
                Err(lost) => {
                    self.slots[i].gap = slot.gap.saturating_add(lost);
                    self.dropped_frames += u64::from(lost);
                    let _ = events.push(RtEvent::RecordingOverflow {
                        port: slot.port.0,
                        frames: lost,
                    });
                }
            }
        }

        if start + frames < span.frames {
            self.stop_all(end as u32, position + frames as u64);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RegionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordedMidi {
    /// Frames since the start of the region.
    pub offset: u64,
    pub event: MidiEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RegionPayload {
    Audio(Vec<f32>),
    Midi(Vec<RecordedMidi>),
    /// `(offset, value)` points, one per captured span.
    Control(Vec<(u64, f32)>),
}

impl RegionPayload {
    fn for_kind(kind: PortKind) -> Self {
        match kind {
            PortKind::Audio | PortKind::Cv => RegionPayload::Audio(Vec::new()),
            PortKind::Midi => RegionPayload::Midi(Vec::new()),
            PortKind::Control => RegionPayload::Control(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalizedRegion {
    pub id: RegionId,
    pub port: PortId,
    pub take: u32,
    pub start: u64,
    pub length: u64,
    pub payload: RegionPayload,
    /// Earlier regions this one replaces under the overwrite policy.
    pub supersedes: Vec<RegionId>,
}

#[derive(Debug)]
struct OpenRegion {
    start: u64,
    length: u64,
    payload: RegionPayload,
}

#[derive(Debug, Clone, Copy)]
struct RegionSummary {
    id: RegionId,
    start: u64,
    end: u64,
    take: u32,
    superseded: bool,
}

/// Control-thread half: turns captured events into regions.
pub struct RecordingConsumer {
    headers: Consumer<RecordingEvent>,
    samples: Consumer<f32>,
    midi: Consumer<MidiEvent>,
    policy: TakePolicy,
    open: HashMap<PortId, OpenRegion>,
    history: HashMap<PortId, Vec<RegionSummary>>,
    next_id: u64,
}

impl RecordingConsumer {
    fn new(
        headers: Consumer<RecordingEvent>,
        samples: Consumer<f32>,
        midi: Consumer<MidiEvent>,
        policy: TakePolicy,
    ) -> Self {
        Self {
            headers,
            samples,
            midi,
            policy,
            open: HashMap::new(),
            history: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn policy(&self) -> TakePolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: TakePolicy) {
        self.policy = policy;
    }

    /// Ports with a region still being captured.
    pub fn open_ports(&self) -> Vec<PortId> {
        let mut ports: Vec<_> = self.open.keys().copied().collect();
        ports.sort();
        ports
    }

    /// Consumes everything captured so far and returns the regions that were
    /// closed by it, in the order they were closed.
    pub fn drain(&mut self) -> Vec<FinalizedRegion> {
        let mut finished = Vec::new();
        while let Ok(event) = self.headers.pop() {
            match event.kind {
                RecordingEventKind::Start { kind } => {
                    if let Some(region) = self.finalize(event.port) {
                        finished.push(region);
                    }
                    self.open.insert(
                        event.port,
                        OpenRegion {
                            start: event.position,
                            length: 0,
                            payload: RegionPayload::for_kind(kind),
                        },
                    );
                }
                RecordingEventKind::Audio { frames, gap } => {
                    let region = open_for(&mut self.open, event.port, event.position, gap, PortKind::Audio);
                    pad(region, gap);
                    let mut received = 0usize;
                    if let Ok(chunk) = self.samples.read_chunk(frames as usize) {
                        let (first, second) = chunk.as_slices();
                        if let RegionPayload::Audio(samples) = &mut region.payload {
                            samples.extend_from_slice(first);
                            samples.extend_from_slice(second);
                        }
                        received = first.len() + second.len();
                        chunk.commit_all();
                    }
                    region.length += received as u64;
                    pad(region, frames - received as u32);
                }
                RecordingEventKind::Midi { frames, count, gap } => {
                    let region = open_for(&mut self.open, event.port, event.position, gap, PortKind::Midi);
                    pad(region, gap);
                    let base = region.length;
                    for _ in 0..count {
                        let Ok(midi) = self.midi.pop() else {
                            break;
                        };
                        if let RegionPayload::Midi(events) = &mut region.payload {
                            events.push(RecordedMidi {
                                offset: base + u64::from(midi.frame),
                                event: MidiEvent { frame: 0, ..midi },
                            });
                        }
                    }
                    region.length += u64::from(frames);
                }
                RecordingEventKind::Control { frames, value, gap } => {
                    let region = open_for(&mut self.open, event.port, event.position, gap, PortKind::Control);
                    pad(region, gap);
                    let offset = region.length;
                    if let RegionPayload::Control(points) = &mut region.payload {
                        points.push((offset, value));
                    }
                    region.length += u64::from(frames);
                }
                RecordingEventKind::Stop => {
                    if let Some(region) = self.finalize(event.port) {
                        finished.push(region);
                    }
                }
            }
        }
        finished
    }

    fn finalize(&mut self, port: PortId) -> Option<FinalizedRegion> {
        let region = self.open.remove(&port)?;
        if region.length == 0 {
            return None;
        }
        let id = RegionId(self.next_id);
        self.next_id += 1;
        let start = region.start;
        let end = start + region.length;

        let history = self.history.entry(port).or_default();
        let overlapping = history
            .iter_mut()
            .filter(|summary| !summary.superseded && summary.start < end && start < summary.end);
        let (take, supersedes) = match self.policy {
            TakePolicy::Overwrite => {
                let mut replaced = Vec::new();
                for summary in overlapping {
                    summary.superseded = true;
                    replaced.push(summary.id);
                }
                (0, replaced)
            }
            TakePolicy::NewTake => {
                let take = overlapping.map(|summary| summary.take + 1).max().unwrap_or(0);
                (take, Vec::new())
            }
        };
        history.push(RegionSummary {
            id,
            start,
            end,
            take,
            superseded: false,
        });
        tracing::debug!(%port, ?id, start, length = region.length, take, "recorded region finalized");

        Some(FinalizedRegion {
            id,
            port,
            take,
            start,
            length: region.length,
            payload: region.payload,
            supersedes,
        })
    }
}

/// The open region for `port`, opening one implicitly when its start marker
/// was lost.
fn open_for(
    open: &mut HashMap<PortId, OpenRegion>,
    port: PortId,
    position: u64,
    gap: u32,
    kind: PortKind,
) -> &mut OpenRegion {
    open.entry(port).or_insert_with(|| OpenRegion {
        start: position.saturating_sub(u64::from(gap)),
        length: 0,
        payload: RegionPayload::for_kind(kind),
    })
}

/// Fills dropped frames with silence so later material keeps its timing.
fn pad(region: &mut OpenRegion, frames: u32) {
    if frames == 0 {
        return;
    }
    if let RegionPayload::Audio(samples) = &mut region.payload {
        samples.resize(samples.len() + frames as usize, 0.0);
    }
    region.length += u64::from(frames);
}
