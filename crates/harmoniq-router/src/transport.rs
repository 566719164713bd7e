//! Sample-accurate playhead.
//!
//! Control threads enqueue [`TransportRequest`]s through a
//! [`TransportHandle`]; the router applies them at the next cycle boundary
//! and publishes the result through shared atomics.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use arrayvec::ArrayVec;
use crossbeam_queue::ArrayQueue;

use crate::error::TransportError;
use crate::port::PortId;

/// Ports that can be armed for recording at once.
pub const MAX_ARMED_PORTS: usize = 32;

pub type ArmedPorts = ArrayVec<PortId, MAX_ARMED_PORTS>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransportState {
    #[default]
    Stopped = 0,
    Rolling = 1,
    Recording = 2,
    Paused = 3,
}

impl TransportState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => TransportState::Rolling,
            2 => TransportState::Recording,
            3 => TransportState::Paused,
            _ => TransportState::Stopped,
        }
    }

    /// Whether the playhead advances.
    #[inline]
    pub fn is_moving(self) -> bool {
        matches!(self, TransportState::Rolling | TransportState::Recording)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransportState::Stopped => "stopped",
            TransportState::Rolling => "rolling",
            TransportState::Recording => "recording",
            TransportState::Paused => "paused",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportRequest {
    Play,
    Stop,
    Pause,
    Record,
    Relocate(u64),
    SetLoop { start: u64, end: u64, enabled: bool },
    SetPunch { start: u64, end: u64, enabled: bool },
    SetPreRoll(u64),
    Arm(ArmedPorts),
}

impl TransportRequest {
    pub fn code(&self) -> u8 {
        match self {
            TransportRequest::Play => 0,
            TransportRequest::Stop => 1,
            TransportRequest::Pause => 2,
            TransportRequest::Record => 3,
            TransportRequest::Relocate(_) => 4,
            TransportRequest::SetLoop { .. } => 5,
            TransportRequest::SetPunch { .. } => 6,
            TransportRequest::SetPreRoll(_) => 7,
            TransportRequest::Arm(_) => 8,
        }
    }

    pub fn name_for_code(code: u8) -> &'static str {
        match code {
            0 => "play",
            1 => "stop",
            2 => "pause",
            3 => "record",
            4 => "relocate",
            5 => "set_loop",
            6 => "set_punch",
            7 => "set_pre_roll",
            8 => "arm",
            _ => "unknown",
        }
    }
}

/// What the router has to react to after a request was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Nothing,
    State {
        from: TransportState,
        to: TransportState,
    },
    Relocated {
        from: u64,
        to: u64,
    },
    Armed(ArmedPorts),
}

/// A state transition that is not allowed from `state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    pub state: TransportState,
}

/// Transport values handed to processors for one span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportSnapshot {
    pub state: TransportState,
    /// Timeline position of the first frame of the span.
    pub position: u64,
    pub sample_rate: u32,
    pub cycle: u64,
}

impl TransportSnapshot {
    #[inline]
    pub fn is_rolling(&self) -> bool {
        self.state.is_moving()
    }
}

/// One contiguous run of timeline samples inside a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: usize,
    pub frames: usize,
    pub position: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Range {
    pub start: u64,
    pub end: u64,
    pub enabled: bool,
}

impl Range {
    #[inline]
    fn active(&self) -> bool {
        self.enabled && self.end > self.start
    }
}

/// Audio-thread side of the transport. Only the router mutates it.
#[derive(Debug, Clone)]
pub struct Transport {
    state: TransportState,
    position: u64,
    looping: Range,
    punch: Range,
    pre_roll: u64,
    sample_rate: u32,
}

impl Transport {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            state: TransportState::Stopped,
            position: 0,
            looping: Range::default(),
            punch: Range::default(),
            pre_roll: 0,
            sample_rate,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn loop_range(&self) -> Range {
        self.looping
    }

    pub fn punch_range(&self) -> Range {
        self.punch
    }

    pub fn snapshot(&self, position: u64, cycle: u64) -> TransportSnapshot {
        TransportSnapshot {
            state: self.state,
            position,
            sample_rate: self.sample_rate,
            cycle,
        }
    }

    /// Applies one request. `Err` means the transition is not allowed from
    /// the current state; the transport is left untouched.
    pub fn apply(&mut self, request: TransportRequest) -> Result<Applied, Rejected> {
        use TransportState::*;

        let from = self.state;
        let to = match request {
            TransportRequest::Play => match from {
                Stopped => {
                    if self.punch.active() && self.pre_roll > 0 {
                        self.position = self.punch.start.saturating_sub(self.pre_roll);
                    }
                    Rolling
                }
                Paused | Recording => Rolling,
                Rolling => return Ok(Applied::Nothing),
            },
            TransportRequest::Stop => match from {
                Stopped => return Ok(Applied::Nothing),
                _ => Stopped,
            },
            TransportRequest::Pause => match from {
                Rolling => Paused,
                Paused => return Ok(Applied::Nothing),
                Stopped | Recording => return Err(Rejected { state: from }),
            },
            TransportRequest::Record => match from {
                Rolling => Recording,
                Recording => return Ok(Applied::Nothing),
                Stopped | Paused => return Err(Rejected { state: from }),
            },
            TransportRequest::Relocate(to) => {
                let previous = self.position;
                self.position = to;
                return Ok(Applied::Relocated { from: previous, to });
            }
            TransportRequest::SetLoop { start, end, enabled } => {
                self.looping = Range { start, end, enabled };
                return Ok(Applied::Nothing);
            }
            TransportRequest::SetPunch { start, end, enabled } => {
                self.punch = Range { start, end, enabled };
                return Ok(Applied::Nothing);
            }
            TransportRequest::SetPreRoll(frames) => {
                self.pre_roll = frames;
                return Ok(Applied::Nothing);
            }
            TransportRequest::Arm(ports) => return Ok(Applied::Armed(ports)),
        };
        self.state = to;
        Ok(Applied::State { from, to })
    }

    /// Splits a cycle of `frames` samples at loop seams.
    pub fn spans(&self, frames: usize) -> Spans {
        Spans {
            moving: self.state.is_moving(),
            looping: self.looping,
            position: self.position,
            offset: 0,
            remaining: frames,
        }
    }

    /// Moves the playhead to where `spans` ended.
    pub fn finish_cycle(&mut self, spans: &Spans) {
        self.position = spans.position;
    }

    /// The part of `span` that lies inside the punch range, as
    /// `(offset within span, frames)`. The whole span when punch is off.
    pub fn punch_window(&self, span: &Span) -> Option<(usize, usize)> {
        if !self.punch.active() {
            return Some((0, span.frames));
        }
        let start = span.position.max(self.punch.start);
        let end = (span.position + span.frames as u64).min(self.punch.end);
        (end > start).then(|| ((start - span.position) as usize, (end - start) as usize))
    }
}

/// Iterator over the spans of one cycle. After exhaustion,
/// [`Transport::finish_cycle`] commits its end position.
#[derive(Debug, Clone)]
pub struct Spans {
    moving: bool,
    looping: Range,
    position: u64,
    offset: usize,
    remaining: usize,
}

impl Spans {
    pub fn position(&self) -> u64 {
        self.position
    }

    #[inline]
    fn wrap_if_at_end(&mut self) {
        if self.looping.active() && self.position == self.looping.end {
            self.position = self.looping.start;
        }
    }
}

impl Iterator for Spans {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        if self.remaining == 0 {
            return None;
        }
        if !self.moving {
            let span = Span {
                offset: self.offset,
                frames: self.remaining,
                position: self.position,
            };
            self.offset += self.remaining;
            self.remaining = 0;
            return Some(span);
        }

        self.wrap_if_at_end();
        let mut frames = self.remaining;
        if self.looping.active()
            && self.position < self.looping.end
            && self.position + frames as u64 > self.looping.end
        {
            frames = (self.looping.end - self.position) as usize;
        }
        let span = Span {
            offset: self.offset,
            frames,
            position: self.position,
        };
        self.offset += frames;
        self.remaining -= frames;
        self.position += frames as u64;
        self.wrap_if_at_end();
        Some(span)
    }
}

/// Transport state published once per cycle for control-thread readers.
#[derive(Debug, Default)]
pub struct TransportShared {
    state: AtomicU8,
    position: AtomicU64,
    loop_enabled: AtomicBool,
    punch_enabled: AtomicBool,
}

impl TransportShared {
    pub fn publish(&self, transport: &Transport) {
        self.position.store(transport.position, Ordering::Relaxed);
        self.loop_enabled
            .store(transport.looping.enabled, Ordering::Relaxed);
        self.punch_enabled
            .store(transport.punch.enabled, Ordering::Relaxed);
        self.state.store(transport.state as u8, Ordering::Release);
    }

    pub fn state(&self) -> TransportState {
        TransportState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled.load(Ordering::Relaxed)
    }

    pub fn punch_enabled(&self) -> bool {
        self.punch_enabled.load(Ordering::Relaxed)
    }
}

/// Control-thread entry point to the transport.
#[derive(Clone)]
pub struct TransportHandle {
    requests: Arc<ArrayQueue<TransportRequest>>,
    shared: Arc<TransportShared>,
}

impl TransportHandle {
    pub fn new(capacity: usize) -> Self {
        Self {
            requests: Arc::new(ArrayQueue::new(capacity.max(1))),
            shared: Arc::new(TransportShared::default()),
        }
    }

    pub(crate) fn requests(&self) -> Arc<ArrayQueue<TransportRequest>> {
        Arc::clone(&self.requests)
    }

    pub(crate) fn shared(&self) -> Arc<TransportShared> {
        Arc::clone(&self.shared)
    }

    pub fn send(&self, request: TransportRequest) -> Result<(), TransportError> {
        self.requests
            .push(request)
            .map_err(|_| TransportError::QueueFull)
    }

    pub fn play(&self) -> Result<(), TransportError> {
        self.send(TransportRequest::Play)
    }

    pub fn stop(&self) -> Result<(), TransportError> {
        self.send(TransportRequest::Stop)
    }

    pub fn pause(&self) -> Result<(), TransportError> {
        self.send(TransportRequest::Pause)
    }

    pub fn record(&self) -> Result<(), TransportError> {
        self.send(TransportRequest::Record)
    }

    pub fn relocate(&self, position: u64) -> Result<(), TransportError> {
        self.send(TransportRequest::Relocate(position))
    }

    pub fn set_loop(&self, start: u64, end: u64, enabled: bool) -> Result<(), TransportError> {
        if end <= start {
            return Err(TransportError::InvalidLoop { start, end });
        }
        self.send(TransportRequest::SetLoop { start, end, enabled })
    }

    pub fn set_punch(&self, start: u64, end: u64, enabled: bool) -> Result<(), TransportError> {
        if end <= start {
            return Err(TransportError::InvalidPunch { start, end });
        }
        self.send(TransportRequest::SetPunch { start, end, enabled })
    }

    pub fn set_pre_roll(&self, frames: u64) -> Result<(), TransportError> {
        self.send(TransportRequest::SetPreRoll(frames))
    }

    pub fn arm(&self, ports: &[PortId]) -> Result<(), TransportError> {
        if ports.len() > MAX_ARMED_PORTS {
            return Err(TransportError::TooManyArmedPorts {
                requested: ports.len(),
                limit: MAX_ARMED_PORTS,
            });
        }
        let armed: ArmedPorts = ports.iter().copied().collect();
        self.send(TransportRequest::Arm(armed))
    }

    pub fn state(&self) -> TransportState {
        self.shared.state()
    }

    pub fn position(&self) -> u64 {
        self.shared.position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rolling() -> Transport {
        let mut transport = Transport::new(48_000);
        transport.apply(TransportRequest::Play).unwrap();
        transport
    }

    #[test]
    fn legal_transitions() {
        use TransportState::*;
        let mut transport = Transport::new(48_000);
        assert!(transport.apply(TransportRequest::Record).is_err());
        assert!(transport.apply(TransportRequest::Pause).is_err());
        assert_eq!(
            transport.apply(TransportRequest::Play),
            Ok(Applied::State { from: Stopped, to: Rolling })
        );
        assert_eq!(
            transport.apply(TransportRequest::Record),
            Ok(Applied::State { from: Rolling, to: Recording })
        );
        assert!(transport.apply(TransportRequest::Pause).is_err());
        assert_eq!(
            transport.apply(TransportRequest::Play),
            Ok(Applied::State { from: Recording, to: Rolling })
        );
        assert_eq!(
            transport.apply(TransportRequest::Pause),
            Ok(Applied::State { from: Rolling, to: Paused })
        );
        assert!(transport.apply(TransportRequest::Record).is_err());
        assert_eq!(
            transport.apply(TransportRequest::Stop),
            Ok(Applied::State { from: Paused, to: Stopped })
        );
    }

    #[test]
    fn stopped_cycle_is_one_span_without_movement() {
        let transport = Transport::new(48_000);
        let mut spans = transport.spans(64);
        assert_eq!(
            spans.next(),
            Some(Span {
                offset: 0,
                frames: 64,
                position: 0
            })
        );
        assert_eq!(spans.next(), None);
        assert_eq!(spans.position(), 0);
    }

    #[test]
    fn loop_seam_splits_cycle() {
        let mut transport = rolling();
        transport
            .apply(TransportRequest::SetLoop {
                start: 100,
                end: 200,
                enabled: true,
            })
            .unwrap();
        transport.apply(TransportRequest::Relocate(180)).unwrap();

        let mut spans = transport.spans(64);
        let collected: Vec<_> = spans.by_ref().collect();
        assert_eq!(
            collected,
            vec![
                Span {
                    offset: 0,
                    frames: 20,
                    position: 180
                },
                Span {
                    offset: 20,
                    frames: 44,
                    position: 100
                },
            ]
        );
        transport.finish_cycle(&spans);
        assert_eq!(transport.position(), 144);
    }

    #[test]
    fn landing_on_loop_end_wraps_at_boundary() {
        let mut transport = rolling();
        transport
            .apply(TransportRequest::SetLoop {
                start: 0,
                end: 128,
                enabled: true,
            })
            .unwrap();
        transport.apply(TransportRequest::Relocate(64)).unwrap();
        let mut spans = transport.spans(64);
        assert_eq!(spans.by_ref().count(), 1);
        transport.finish_cycle(&spans);
        assert_eq!(transport.position(), 0);
    }

    #[test]
    fn playhead_past_loop_plays_on() {
        let mut transport = rolling();
        transport
            .apply(TransportRequest::SetLoop {
                start: 0,
                end: 100,
                enabled: true,
            })
            .unwrap();
        transport.apply(TransportRequest::Relocate(500)).unwrap();
        let mut spans = transport.spans(64);
        assert_eq!(spans.by_ref().count(), 1);
        transport.finish_cycle(&spans);
        assert_eq!(transport.position(), 564);
    }

    #[test]
    fn short_loop_wraps_repeatedly() {
        let mut transport = rolling();
        transport
            .apply(TransportRequest::SetLoop {
                start: 10,
                end: 20,
                enabled: true,
            })
            .unwrap();
        transport.apply(TransportRequest::Relocate(10)).unwrap();
        let mut spans = transport.spans(25);
        let frames: Vec<_> = spans.by_ref().map(|span| span.frames).collect();
        assert_eq!(frames, vec![10, 10, 5]);
        transport.finish_cycle(&spans);
        assert_eq!(transport.position(), 15);
    }

    #[test]
    fn pre_roll_starts_before_punch_in() {
        let mut transport = Transport::new(48_000);
        transport
            .apply(TransportRequest::SetPunch {
                start: 1_000,
                end: 2_000,
                enabled: true,
            })
            .unwrap();
        transport.apply(TransportRequest::SetPreRoll(300)).unwrap();
        transport.apply(TransportRequest::Play).unwrap();
        assert_eq!(transport.position(), 700);
    }

    #[test]
    fn punch_window_clips_span() {
        let mut transport = rolling();
        transport
            .apply(TransportRequest::SetPunch {
                start: 100,
                end: 150,
                enabled: true,
            })
            .unwrap();
        let span = Span {
            offset: 0,
            frames: 64,
            position: 64,
        };
        assert_eq!(transport.punch_window(&span), Some((36, 28)));
        let outside = Span {
            offset: 0,
            frames: 64,
            position: 200,
        };
        assert_eq!(transport.punch_window(&outside), None);
    }

    #[test]
    fn handle_validates_ranges() {
        let handle = TransportHandle::new(4);
        assert_eq!(
            handle.set_loop(10, 10, true),
            Err(TransportError::InvalidLoop { start: 10, end: 10 })
        );
        assert!(handle.set_punch(5, 1, true).is_err());
        let ports: Vec<_> = (0..40).map(PortId).collect();
        assert!(matches!(
            handle.arm(&ports),
            Err(TransportError::TooManyArmedPorts { requested: 40, .. })
        ));
    }

    #[test]
    fn handle_reports_full_queue() {
        let handle = TransportHandle::new(1);
        handle.play().unwrap();
        assert_eq!(handle.stop(), Err(TransportError::QueueFull));
    }
}
