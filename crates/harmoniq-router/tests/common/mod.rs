#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use harmoniq_router::{
    EngineConfig, EngineContext, MidiEvent, NodeKind, NodeRef, NodeSpec, ProcessContext,
    ProcessError, Processor, PortSpec,
};

pub const BLOCK: usize = 64;

pub fn config(workers: usize) -> EngineConfig {
    EngineConfig {
        max_block: BLOCK,
        workers,
        ..EngineConfig::default()
    }
}

pub fn context(workers: usize) -> EngineContext {
    EngineContext::new(config(workers)).expect("context")
}

pub fn add(ctx: &EngineContext, kind: NodeKind, processor: impl Processor + 'static) -> NodeRef {
    ctx.add_node(NodeSpec::new(kind, processor)).expect("add node")
}

/// Audio in, audio out, output = input * gain.
pub struct Gain(pub f32);

impl Processor for Gain {
    fn name(&self) -> &str {
        "gain"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::audio_in("in"), PortSpec::audio_out("out")]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        let input = ctx.audio_in(0);
        for (out, sample) in ctx.audio_out(1).iter_mut().zip(input) {
            *out = sample * self.0;
        }
        Ok(())
    }
}

/// Ramp that keeps counting across cycles, so every cycle differs.
#[derive(Default)]
pub struct Ramp {
    next: f32,
}

impl Processor for Ramp {
    fn name(&self) -> &str {
        "ramp"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::audio_out("out")]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        for sample in ctx.audio_out(0).iter_mut() {
            *sample = (self.next * 0.001).sin();
            self.next += 1.0;
        }
        Ok(())
    }
}

/// Records the transport position of the first span of every cycle.
pub struct PositionSpy {
    pub seen: Arc<AtomicU64>,
}

impl Processor for PositionSpy {
    fn name(&self) -> &str {
        "position-spy"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::audio_out("out")]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        if ctx.offset() == 0 {
            self.seen.store(ctx.transport().position, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub struct Panics;

impl Processor for Panics {
    fn name(&self) -> &str {
        "panics"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::audio_out("out")]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        ctx.audio_out(0).fill(1.0);
        panic!("plugin crashed");
    }
}

pub struct Fails;

impl Processor for Fails {
    fn name(&self) -> &str {
        "fails"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::audio_out("out")]
    }

    fn process(&mut self, _ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        Err(ProcessError::Failed)
    }
}

pub struct Hangs;

impl Processor for Hangs {
    fn name(&self) -> &str {
        "hangs"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::audio_out("out")]
    }

    fn process(&mut self, _ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        loop {
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

/// Writes the timeline position of every frame it renders.
pub struct Timeline;

impl Processor for Timeline {
    fn name(&self) -> &str {
        "timeline"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::audio_out("out")]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        let position = ctx.transport().position;
        for (i, sample) in ctx.audio_out(0).iter_mut().enumerate() {
            *sample = (position + i as u64) as f32;
        }
        Ok(())
    }
}

/// Pushes `count` note-ons per span, spread over the span.
pub struct MidiBurst {
    pub count: usize,
}

impl Processor for MidiBurst {
    fn name(&self) -> &str {
        "midi-burst"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::midi_out("out")]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        let frames = ctx.frames();
        for i in 0..self.count {
            ctx.push_midi(0, MidiEvent::note_on((i % frames) as u32, 0, (i % 128) as u8, 100));
        }
        Ok(())
    }
}

/// Emits the same note-ons at fixed span-relative frames every span.
pub struct ScriptedMidi {
    pub notes: Vec<(u32, u8)>,
}

impl Processor for ScriptedMidi {
    fn name(&self) -> &str {
        "scripted-midi"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::midi_out("out")]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        for &(frame, note) in &self.notes {
            ctx.push_midi(0, MidiEvent::note_on(frame, 0, note, 100));
        }
        Ok(())
    }
}
