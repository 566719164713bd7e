use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::Ordering;

use atomic_float::AtomicF32;
use serde::{Deserialize, Serialize};

use crate::midi::MidiBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(pub u32);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    Audio,
    Midi,
    Control,
    Cv,
}

impl PortKind {
    /// Audio only feeds audio and MIDI only feeds MIDI. Control and CV feed
    /// each other freely.
    pub fn compatible_with(self, dest: PortKind) -> bool {
        match (self, dest) {
            (PortKind::Audio, PortKind::Audio) | (PortKind::Midi, PortKind::Midi) => true,
            (PortKind::Control | PortKind::Cv, PortKind::Control | PortKind::Cv) => true,
            _ => false,
        }
    }

    pub fn is_signal(self) -> bool {
        matches!(self, PortKind::Audio | PortKind::Cv)
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortKind::Audio => "audio",
            PortKind::Midi => "midi",
            PortKind::Control => "control",
            PortKind::Cv => "cv",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::Input => f.write_str("input"),
            PortDirection::Output => f.write_str("output"),
        }
    }
}

/// Declaration of a port as reported by a processor.
#[derive(Debug, Clone, PartialEq)]
pub struct PortSpec {
    pub name: String,
    pub kind: PortKind,
    pub direction: PortDirection,
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

impl PortSpec {
    fn new(name: impl Into<String>, kind: PortKind, direction: PortDirection) -> Self {
        Self {
            name: name.into(),
            kind,
            direction,
            min: -1.0,
            max: 1.0,
            default: 0.0,
        }
    }

    pub fn audio_in(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Audio, PortDirection::Input)
    }

    pub fn audio_out(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Audio, PortDirection::Output)
    }

    pub fn midi_in(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Midi, PortDirection::Input)
    }

    pub fn midi_out(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Midi, PortDirection::Output)
    }

    pub fn cv_in(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Cv, PortDirection::Input)
    }

    pub fn cv_out(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Cv, PortDirection::Output)
    }

    pub fn control_in(name: impl Into<String>, min: f32, max: f32, default: f32) -> Self {
        Self::new(name, PortKind::Control, PortDirection::Input).with_range(min, max, default)
    }

    pub fn control_out(name: impl Into<String>, min: f32, max: f32) -> Self {
        Self::new(name, PortKind::Control, PortDirection::Output).with_range(min, max, min)
    }

    pub fn with_range(mut self, min: f32, max: f32, default: f32) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        self.min = min;
        self.max = max;
        self.default = default.clamp(min, max);
        self
    }

    #[inline]
    pub fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.min, self.max)
    }

    /// Modulation depth applied to CV and control sources feeding this port.
    #[inline]
    pub fn depth(&self) -> f32 {
        (self.max - self.min) * 0.5
    }
}

pub(crate) enum PortData {
    Signal(Box<[f32]>),
    Midi(MidiBuffer),
    Control(f32),
}

impl PortData {
    fn for_spec(spec: &PortSpec, max_block: usize, midi_capacity: usize) -> Self {
        match spec.kind {
            PortKind::Audio | PortKind::Cv => PortData::Signal(vec![0.0; max_block].into_boxed_slice()),
            PortKind::Midi => PortData::Midi(MidiBuffer::with_capacity(midi_capacity)),
            PortKind::Control => PortData::Control(spec.default),
        }
    }

    pub(crate) fn copy_from(&mut self, other: &PortData) {
        match (self, other) {
            (PortData::Signal(dst), PortData::Signal(src)) => dst.copy_from_slice(src),
            (PortData::Midi(dst), PortData::Midi(src)) => dst.copy_from(src),
            (PortData::Control(dst), PortData::Control(src)) => *dst = *src,
            _ => {}
        }
    }

    pub(crate) fn silence(&mut self) {
        match self {
            PortData::Signal(buffer) => buffer.fill(0.0),
            PortData::Midi(buffer) => buffer.clear(),
            PortData::Control(_) => {}
        }
    }

    /// Clears `[offset, offset + frames)` ahead of a span being written.
    pub(crate) fn clear_span(&mut self, offset: usize, frames: usize) {
        match self {
            PortData::Signal(buffer) => buffer[offset..offset + frames].fill(0.0),
            PortData::Midi(buffer) => buffer.truncate_from(offset as u32),
            PortData::Control(_) => {}
        }
    }
}

/// Storage for one port. The owning node is the only writer of `data` while
/// a pass runs; readers are ordered after it by the dependency counters.
/// `history` holds last cycle's value for feedback readers and is written
/// only between passes.
pub struct PortCell {
    id: PortId,
    spec: PortSpec,
    base: AtomicF32,
    data: UnsafeCell<PortData>,
    history: UnsafeCell<PortData>,
}

unsafe impl Sync for PortCell {}

impl PortCell {
    pub(crate) fn new(id: PortId, spec: PortSpec, max_block: usize, midi_capacity: usize) -> Self {
        let data = PortData::for_spec(&spec, max_block, midi_capacity);
        let history = PortData::for_spec(&spec, max_block, midi_capacity);
        Self {
            id,
            base: AtomicF32::new(spec.default),
            spec,
            data: UnsafeCell::new(data),
            history: UnsafeCell::new(history),
        }
    }

    #[inline]
    pub fn id(&self) -> PortId {
        self.id
    }

    #[inline]
    pub fn spec(&self) -> &PortSpec {
        &self.spec
    }

    #[inline]
    pub fn kind(&self) -> PortKind {
        self.spec.kind
    }

    #[inline]
    pub fn direction(&self) -> PortDirection {
        self.spec.direction
    }

    /// Base value of a control input before modulation is applied.
    pub fn base_value(&self) -> f32 {
        self.base.load(Ordering::Relaxed)
    }

    pub(crate) fn set_base_value(&self, value: f32) -> f32 {
        let value = self.spec.clamp(value);
        self.base.store(value, Ordering::Relaxed);
        value
    }

    /// # Safety
    /// No thread may be writing this port's current buffer.
    #[inline]
    pub(crate) unsafe fn data(&self) -> &PortData {
        &*self.data.get()
    }

    /// # Safety
    /// The caller must be the port's single writer for the current pass.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub(crate) unsafe fn data_mut(&self) -> &mut PortData {
        &mut *self.data.get()
    }

    /// # Safety
    /// History is only mutated between passes.
    #[inline]
    pub(crate) unsafe fn history(&self) -> &PortData {
        &*self.history.get()
    }

    /// Copies the current buffer into history. Called with every worker idle.
    ///
    /// # Safety
    /// No pass may be running.
    pub(crate) unsafe fn commit_history(&self) {
        (*self.history.get()).copy_from(&*self.data.get());
    }

    /// # Safety
    /// No pass may be running.
    pub(crate) unsafe fn clear_history(&self) {
        (*self.history.get()).silence();
    }
}

impl fmt::Debug for PortCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortCell")
            .field("id", &self.id)
            .field("spec", &self.spec)
            .finish()
    }
}
