use crate::error::ProcessError;
use crate::node::{ProcessContext, Processor};
use crate::port::PortSpec;

/// An audio clip placed on the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub start: u64,
    pub samples: Vec<f32>,
}

impl Clip {
    pub fn new(start: u64, samples: Vec<f32>) -> Self {
        Self { start, samples }
    }

    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Track head: passes its live input through and, while the transport
/// rolls, mixes in the clips under the playhead.
///
/// Ports: `in` (audio), `out` (audio).
#[derive(Debug, Clone, Default)]
pub struct TrackSource {
    clips: Vec<Clip>,
}

impl TrackSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clip(mut self, clip: Clip) -> Self {
        self.clips.push(clip);
        self
    }
}

impl Processor for TrackSource {
    fn name(&self) -> &str {
        "track"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::audio_in("in"), PortSpec::audio_out("out")]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        let transport = *ctx.transport();
        let input = ctx.audio_in(0);
        let out = ctx.audio_out(1);
        out.copy_from_slice(input);
        if !transport.is_rolling() {
            return Ok(());
        }

        let span_start = transport.position;
        let span_end = span_start + out.len() as u64;
        for clip in &self.clips {
            let from = clip.start.max(span_start);
            let to = clip.end().min(span_end);
            if from >= to {
                continue;
            }
            let src = &clip.samples[(from - clip.start) as usize..(to - clip.start) as usize];
            let dst = &mut out[(from - span_start) as usize..(to - span_start) as usize];
            for (sample, value) in dst.iter_mut().zip(src) {
                *sample += value;
            }
        }
        Ok(())
    }
}
