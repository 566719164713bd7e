//! Latency bookkeeping and the delay lines that align parallel paths.
//!
//! Every node reports the latency it adds. When a graph is built, the signal
//! arriving at a node over a short path is delayed until it lines up with the
//! longest path into the same node, and all hardware outputs are aligned to
//! the slowest one.

use std::cell::UnsafeCell;

/// Bounds applied when delay lines are allocated for a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Compensation {
    pub max_block: usize,
    /// Longest delay a single connection may be given.
    pub max_frames: usize,
}

impl Default for Compensation {
    fn default() -> Self {
        Self {
            max_block: 1024,
            max_frames: 1 << 16,
        }
    }
}

/// Latencies derived from one graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct LatencyMap {
    /// Latency of the signal at each node's inputs after compensation.
    pub arrival: Vec<u32>,
    /// Remaining latency from each node to the end of its longest chain,
    /// the node's own latency included.
    pub playback: Vec<u32>,
}

impl LatencyMap {
    /// Output latency of node `idx`.
    pub fn output(&self, idx: usize, own: u32) -> u32 {
        self.arrival[idx].saturating_add(own)
    }

    pub fn max_playback(&self) -> u32 {
        self.playback.iter().copied().max().unwrap_or(0)
    }
}

/// Single-channel ring that delays a signal by a fixed number of frames.
#[derive(Debug)]
pub(crate) struct DelayLine {
    delay: usize,
    state: UnsafeCell<DelayState>,
}

#[derive(Debug)]
struct DelayState {
    buffer: Box<[f32]>,
    write: usize,
}

// SAFETY: the state is only touched by the executor of the node that owns
// the connection, and a node runs on one thread at a time.
unsafe impl Sync for DelayLine {}

impl DelayLine {
    pub fn new(delay: usize, max_block: usize) -> Self {
        let capacity = delay + max_block.max(1);
        Self {
            delay,
            state: UnsafeCell::new(DelayState {
                buffer: vec![0.0; capacity].into_boxed_slice(),
                write: 0,
            }),
        }
    }

    #[inline]
    pub fn delay(&self) -> usize {
        self.delay
    }

    /// Feeds `input` through the line and adds the delayed signal, scaled by
    /// `gain`, to `out`.
    ///
    /// # Safety
    /// Only the executor of the destination node may call this, once per
    /// span it processes.
    pub unsafe fn mix_into(&self, input: &[f32], gain: f32, out: &mut [f32]) {
        let state = &mut *self.state.get();
        let capacity = state.buffer.len();
        let mut write = state.write;
        let mut read = (write + capacity - self.delay) % capacity;
        for (dst, &sample) in out.iter_mut().zip(input) {
            let delayed = state.buffer[read];
            state.buffer[write] = sample;
            *dst += delayed * gain;
            write += 1;
            if write == capacity {
                write = 0;
            }
            read += 1;
            if read == capacity {
                read = 0;
            }
        }
        state.write = write;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_across_calls() {
        let line = DelayLine::new(3, 4);
        let mut out = [0.0f32; 4];
        unsafe { line.mix_into(&[1.0, 2.0, 3.0, 4.0], 1.0, &mut out) };
        assert_eq!(out, [0.0, 0.0, 0.0, 1.0]);

        let mut out = [0.0f32; 4];
        unsafe { line.mix_into(&[5.0, 6.0, 7.0, 8.0], 0.5, &mut out) };
        assert_eq!(out, [1.0, 1.5, 2.0, 2.5]);
    }

    #[test]
    fn short_spans_keep_continuity() {
        let line = DelayLine::new(2, 4);
        let mut collected = Vec::new();
        for chunk in [&[1.0f32][..], &[2.0, 3.0], &[4.0, 5.0, 6.0]] {
            let mut out = vec![0.0; chunk.len()];
            unsafe { line.mix_into(chunk, 1.0, &mut out) };
            collected.extend(out);
        }
        assert_eq!(collected, vec![0.0, 0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn playback_maximum_covers_all_nodes() {
        let map = LatencyMap {
            arrival: vec![0, 0, 64],
            playback: vec![64, 96, 0],
        };
        assert_eq!(map.max_playback(), 96);
        assert_eq!(map.output(2, 32), 96);
    }
}
