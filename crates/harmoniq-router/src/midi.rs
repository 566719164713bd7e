//! Fixed-capacity MIDI event storage used by MIDI ports.

use serde::{Deserialize, Serialize};

/// A short MIDI message stamped with its frame inside the current cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiEvent {
    pub frame: u32,
    pub data: [u8; 3],
    pub len: u8,
}

impl MidiEvent {
    pub fn new(frame: u32, bytes: &[u8]) -> Self {
        let mut data = [0u8; 3];
        let len = bytes.len().min(3);
        data[..len].copy_from_slice(&bytes[..len]);
        Self {
            frame,
            data,
            len: len as u8,
        }
    }

    pub fn note_on(frame: u32, channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(frame, &[0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F])
    }

    pub fn note_off(frame: u32, channel: u8, note: u8) -> Self {
        Self::new(frame, &[0x80 | (channel & 0x0F), note & 0x7F, 0])
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..usize::from(self.len)]
    }

    pub fn channel(&self) -> Option<u8> {
        let status = self.data[0];
        (0x80..0xF0).contains(&status).then_some(status & 0x0F)
    }

    #[inline]
    pub fn shifted(mut self, delta: i64) -> Self {
        self.frame = (i64::from(self.frame) + delta).max(0) as u32;
        self
    }
}

/// Events kept in frame order. Capacity is fixed at construction so pushes
/// on the audio thread never reallocate; overflowing events are counted and
/// dropped.
#[derive(Debug, Clone)]
pub struct MidiBuffer {
    events: Vec<MidiEvent>,
    capacity: usize,
    dropped: u32,
}

impl MidiBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    #[inline]
    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.dropped = 0;
    }

    /// Removes every event at or after `frame`.
    pub fn truncate_from(&mut self, frame: u32) {
        let cut = self.events.partition_point(|event| event.frame < frame);
        self.events.truncate(cut);
    }

    /// Inserts after every event with the same or an earlier frame, so events
    /// merged one source at a time keep the source order on ties.
    pub fn insert(&mut self, event: MidiEvent) -> bool {
        if self.events.len() >= self.capacity {
            self.dropped = self.dropped.saturating_add(1);
            return false;
        }
        let at = self.events.partition_point(|queued| queued.frame <= event.frame);
        self.events.insert(at, event);
        true
    }

    /// Events with `start <= frame < end`.
    pub fn range(&self, start: u32, end: u32) -> &[MidiEvent] {
        let lo = self.events.partition_point(|event| event.frame < start);
        let hi = self.events.partition_point(|event| event.frame < end);
        &self.events[lo..hi]
    }

    pub fn copy_from(&mut self, other: &MidiBuffer) {
        self.events.clear();
        let take = other.events.len().min(self.capacity);
        self.events.extend_from_slice(&other.events[..take]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_keep_insertion_order() {
        let mut buffer = MidiBuffer::with_capacity(8);
        buffer.insert(MidiEvent::note_on(4, 0, 60, 100));
        buffer.insert(MidiEvent::note_on(1, 1, 62, 100));
        buffer.insert(MidiEvent::note_on(4, 2, 64, 100));

        let channels: Vec<_> = buffer.events().iter().filter_map(MidiEvent::channel).collect();
        assert_eq!(channels, vec![1, 0, 2]);
    }

    #[test]
    fn overflow_is_counted_not_stored() {
        let mut buffer = MidiBuffer::with_capacity(2);
        assert!(buffer.insert(MidiEvent::note_on(0, 0, 60, 1)));
        assert!(buffer.insert(MidiEvent::note_on(0, 0, 61, 1)));
        assert!(!buffer.insert(MidiEvent::note_on(0, 0, 62, 1)));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped(), 1);
        assert_eq!(buffer.events.capacity(), 2);
    }

    #[test]
    fn range_and_truncate_follow_frames() {
        let mut buffer = MidiBuffer::with_capacity(8);
        for frame in [0, 10, 20, 30] {
            buffer.insert(MidiEvent::note_off(frame, 0, 60));
        }
        assert_eq!(buffer.range(10, 30).len(), 2);
        buffer.truncate_from(20);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn short_messages_report_their_length() {
        let event = MidiEvent::new(0, &[0xC0, 5]);
        assert_eq!(event.bytes(), &[0xC0, 5]);
        assert_eq!(event.channel(), Some(0));
    }
}
