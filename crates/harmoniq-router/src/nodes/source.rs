use std::f32::consts::TAU;

use crate::error::ProcessError;
use crate::node::{ProcessContext, Processor};
use crate::port::PortSpec;

/// Writes the same value to every frame.
#[derive(Debug, Clone, Copy)]
pub struct ConstantSource {
    value: f32,
}

impl ConstantSource {
    pub fn new(value: f32) -> Self {
        Self { value }
    }
}

impl Processor for ConstantSource {
    fn name(&self) -> &str {
        "constant"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::audio_out("out")]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        ctx.audio_out(0).fill(self.value);
        Ok(())
    }
}

/// A minimal sine oscillator, handy for smoke tests of a running engine.
#[derive(Debug, Clone, Copy)]
pub struct SineOscillator {
    frequency: f32,
    amplitude: f32,
    phase: f32,
    phase_delta: f32,
}

impl SineOscillator {
    pub fn new(frequency: f32) -> Self {
        Self {
            frequency: frequency.max(0.0),
            amplitude: 1.0,
            phase: 0.0,
            phase_delta: 0.0,
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }
}

impl Processor for SineOscillator {
    fn name(&self) -> &str {
        "sine"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::audio_out("out")]
    }

    fn activate(&mut self, sample_rate: f32, _max_block: usize) -> anyhow::Result<()> {
        anyhow::ensure!(sample_rate > 0.0, "invalid sample rate {sample_rate}");
        self.phase_delta = TAU * self.frequency / sample_rate;
        Ok(())
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        let mut phase = self.phase;
        for sample in ctx.audio_out(0).iter_mut() {
            *sample = phase.sin() * self.amplitude;
            phase = (phase + self.phase_delta).rem_euclid(TAU);
        }
        self.phase = phase;
        Ok(())
    }
}

/// Forwards MIDI unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct MidiThru;

impl Processor for MidiThru {
    fn name(&self) -> &str {
        "midi-thru"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::midi_in("in"), PortSpec::midi_out("out")]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        for event in ctx.midi_in(0) {
            ctx.push_midi(1, event);
        }
        Ok(())
    }
}
