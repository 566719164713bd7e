use serde::{Deserialize, Serialize};

use crate::error::ProcessError;
use crate::node::{NodeKind, NodeRef, ProcessContext, Processor};
use crate::port::{PortId, PortSpec};

const INPUT: usize = 0;
const AMOUNT: usize = 1;
const OUTPUT: usize = 2;
const MUTE: usize = 3;
const PRE: usize = 5;

fn scale(ctx: &mut ProcessContext<'_>) {
    let gain = ctx.control_in(AMOUNT);
    let input = ctx.audio_in(INPUT);
    let output = ctx.audio_out(OUTPUT);
    for (out, sample) in output.iter_mut().zip(input) {
        *out = sample * gain;
    }
}

/// Channel fader. Its summed input is limited to ±2 before the gain stage.
///
/// Ports: `in` (audio), `gain` (control, 0..2), `out` (audio), `mute`
/// (control toggle), `solo` (control toggle), `pre` (audio).
///
/// `pre` carries the limited input ahead of gain and mute. While any fader
/// is soloed, faders that are neither soloed nor routed to or from a soloed
/// fader see their `mute` input forced on.
#[derive(Debug, Clone, Copy)]
pub struct Fader {
    gain: f32,
    muted: bool,
}

impl Fader {
    pub fn new(gain: f32) -> Self {
        Self {
            gain: gain.clamp(0.0, 2.0),
            muted: false,
        }
    }

    pub fn muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    pub fn gain_port(node: &NodeRef) -> Option<PortId> {
        node.input(1)
    }

    pub fn mute_port(node: &NodeRef) -> Option<PortId> {
        node.input(2)
    }

    pub fn solo_port(node: &NodeRef) -> Option<PortId> {
        node.input(3)
    }

    /// Output of `node` that a send with the given tap should read from.
    pub fn tap(node: &NodeRef, tap: SendTap) -> Option<PortId> {
        if node.kind != NodeKind::Fader {
            return None;
        }
        match tap {
            SendTap::PostFader => node.output(0),
            SendTap::PreFader => node.output(1),
        }
    }
}

impl Default for Fader {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Processor for Fader {
    fn name(&self) -> &str {
        "fader"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::audio_in("in"),
            PortSpec::control_in("gain", 0.0, 2.0, self.gain),
            PortSpec::audio_out("out"),
            PortSpec::control_in("mute", 0.0, 1.0, if self.muted { 1.0 } else { 0.0 }),
            PortSpec::control_in("solo", 0.0, 1.0, 0.0),
            PortSpec::audio_out("pre"),
        ]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        let input = ctx.audio_in(INPUT);
        ctx.audio_out(PRE).copy_from_slice(input);
        if ctx.control_in(MUTE) > 0.5 {
            return Ok(());
        }
        scale(ctx);
        Ok(())
    }
}

/// Where a send picks up a channel's signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendTap {
    /// Ahead of the fader's gain and mute.
    PreFader,
    /// After the fader.
    #[default]
    PostFader,
}

/// Send tapping a fader into another bus.
///
/// Ports: `in` (audio), `amount` (control, 0..1), `out` (audio). Connect
/// `in` to the port returned by [`Fader::tap`] for the send's [`SendTap`].
#[derive(Debug, Clone, Copy)]
pub struct AuxSend {
    amount: f32,
    tap: SendTap,
}

impl AuxSend {
    pub fn new(amount: f32) -> Self {
        Self {
            amount: amount.clamp(0.0, 1.0),
            tap: SendTap::PostFader,
        }
    }

    pub fn pre_fader(amount: f32) -> Self {
        Self {
            tap: SendTap::PreFader,
            ..Self::new(amount)
        }
    }

    pub fn tap(&self) -> SendTap {
        self.tap
    }
}

impl Processor for AuxSend {
    fn name(&self) -> &str {
        match self.tap {
            SendTap::PreFader => "send-pre",
            SendTap::PostFader => "send",
        }
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::audio_in("in"),
            PortSpec::control_in("amount", 0.0, 1.0, self.amount),
            PortSpec::audio_out("out"),
        ]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        scale(ctx);
        Ok(())
    }
}

/// Linear stereo balance, centred at 0.5. Turning towards one side lowers
/// the other channel and leaves this one untouched.
///
/// Ports: `in_l`, `in_r` (audio), `balance` (control, 0..1), `out_l`,
/// `out_r` (audio).
#[derive(Debug, Clone, Copy)]
pub struct Balance {
    balance: f32,
}

impl Balance {
    pub fn new(balance: f32) -> Self {
        Self {
            balance: balance.clamp(0.0, 1.0),
        }
    }

    /// Left and right gains for a balance position.
    pub fn gains(balance: f32) -> (f32, f32) {
        let balance = balance.clamp(0.0, 1.0);
        if balance < 0.5 {
            (1.0, balance / 0.5)
        } else {
            ((1.0 - balance) / 0.5, 1.0)
        }
    }
}

impl Default for Balance {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl Processor for Balance {
    fn name(&self) -> &str {
        "balance"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![
            PortSpec::audio_in("in_l"),
            PortSpec::audio_in("in_r"),
            PortSpec::control_in("balance", 0.0, 1.0, self.balance),
            PortSpec::audio_out("out_l"),
            PortSpec::audio_out("out_r"),
        ]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        let (left, right) = Self::gains(ctx.control_in(2));
        for (channel, gain) in [(0, left), (1, right)] {
            let input = ctx.audio_in(channel);
            for (out, sample) in ctx.audio_out(channel + 3).iter_mut().zip(input) {
                *out = sample * gain;
            }
        }
        Ok(())
    }
}

/// Listening bus. Its input already holds the sum of everything routed to
/// it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Monitor;

impl Processor for Monitor {
    fn name(&self) -> &str {
        "monitor"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::audio_in("in"), PortSpec::audio_out("out")]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        let input = ctx.audio_in(0);
        ctx.audio_out(1).copy_from_slice(input);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_is_linear_around_centre() {
        assert_eq!(Balance::gains(0.5), (1.0, 1.0));
        assert_eq!(Balance::gains(0.0), (1.0, 0.0));
        assert_eq!(Balance::gains(1.0), (0.0, 1.0));
        assert_eq!(Balance::gains(0.25), (1.0, 0.5));
        assert_eq!(Balance::gains(0.75), (0.5, 1.0));
    }

    #[test]
    fn fader_appends_mute_solo_and_pre_after_out() {
        let names: Vec<_> = Fader::default().ports().into_iter().map(|spec| spec.name).collect();
        assert_eq!(names, ["in", "gain", "out", "mute", "solo", "pre"]);
    }
}
