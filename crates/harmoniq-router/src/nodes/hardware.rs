use crate::error::ProcessError;
use crate::node::{ProcessContext, Processor};
use crate::port::PortSpec;

/// Copies one backend capture channel into the graph. Use it with
/// `NodeKind::HwIo(HwDirection::Input(channel))`.
#[derive(Debug, Clone, Copy)]
pub struct HardwareInput {
    channel: u16,
}

impl HardwareInput {
    pub fn new(channel: u16) -> Self {
        Self { channel }
    }
}

impl Processor for HardwareInput {
    fn name(&self) -> &str {
        "hw-in"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::audio_out("capture")]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        let captured = ctx.hardware_input(usize::from(self.channel));
        let out = ctx.audio_out(0);
        if captured.len() == out.len() {
            out.copy_from_slice(captured);
        }
        Ok(())
    }
}

/// Playback sink. The router sums this node's input into the backend
/// channel named by `NodeKind::HwIo(HwDirection::Output(channel))` at the end
/// of every cycle, so processing is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct HardwareOutput;

impl Processor for HardwareOutput {
    fn name(&self) -> &str {
        "hw-out"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::audio_in("playback")]
    }

    fn process(&mut self, _ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        Ok(())
    }
}
