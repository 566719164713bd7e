use std::f32::consts::TAU;

use crate::error::ProcessError;
use crate::node::{ProcessContext, Processor};
use crate::port::PortSpec;

/// Sine LFO writing a bipolar CV signal.
///
/// Ports: `rate` (control, 0.01..20 Hz), `out` (CV, -1..1).
#[derive(Debug, Clone, Copy)]
pub struct Lfo {
    rate: f32,
    phase: f32,
    sample_rate: f32,
}

impl Lfo {
    pub fn new(rate: f32) -> Self {
        Self {
            rate: rate.clamp(0.01, 20.0),
            phase: 0.0,
            sample_rate: 48_000.0,
        }
    }
}

impl Processor for Lfo {
    fn name(&self) -> &str {
        "lfo"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::control_in("rate", 0.01, 20.0, self.rate),
            PortSpec::cv_out("out"),
        ]
    }

    fn activate(&mut self, sample_rate: f32, _max_block: usize) -> anyhow::Result<()> {
        anyhow::ensure!(sample_rate > 0.0, "invalid sample rate {sample_rate}");
        self.sample_rate = sample_rate;
        self.phase = 0.0;
        Ok(())
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        let delta = TAU * ctx.control_in(0) / self.sample_rate;
        let mut phase = self.phase;
        for sample in ctx.cv_out(1).iter_mut() {
            *sample = phase.sin();
            phase = (phase + delta).rem_euclid(TAU);
        }
        self.phase = phase;
        Ok(())
    }
}

/// A macro control. The knob position and any modulation routed onto it come
/// out as a single control value.
///
/// Ports: `value` (control in, 0..1), `out` (control out, 0..1).
#[derive(Debug, Clone, Copy)]
pub struct MacroKnob {
    initial: f32,
}

impl MacroKnob {
    pub fn new(initial: f32) -> Self {
        Self {
            initial: initial.clamp(0.0, 1.0),
        }
    }
}

impl Processor for MacroKnob {
    fn name(&self) -> &str {
        "macro"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::control_in("value", 0.0, 1.0, self.initial),
            PortSpec::control_out("out", 0.0, 1.0),
        ]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        let value = ctx.control_in(0);
        ctx.set_control_out(1, value);
        Ok(())
    }
}
