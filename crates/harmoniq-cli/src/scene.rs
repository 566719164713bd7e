use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use harmoniq_router::nodes::{
    AuxSend, ConstantSource, Fader, HardwareOutput, Lfo, Monitor, SendTap, SineOscillator,
    TrackSource,
};
use harmoniq_router::{
    ConnectionId, EngineContext, HwDirection, NodeKind, NodeRef, NodeSpec, PortId,
    ProcessContext, ProcessError, Processor, PortSpec,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

/// A small mixer description: sources into tracks, tracks through faders to
/// a master bus, optional sends into an effect bus whose return may feed
/// back into a track.
#[derive(Debug, Deserialize)]
pub struct SceneSpec {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub tracks: Vec<TrackSpec>,
    /// Track index that receives the effect bus return, creating a feedback
    /// loop.
    #[serde(default)]
    pub return_to: Option<usize>,
    #[serde(default = "default_return_gain")]
    pub return_gain: f32,
    /// Rate of an LFO routed onto the first fader's gain.
    #[serde(default)]
    pub lfo_rate: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct TrackSpec {
    #[serde(flatten)]
    pub source: SourceKind,
    #[serde(default = "default_gain")]
    pub gain: f32,
    #[serde(default)]
    pub send: f32,
    #[serde(default)]
    pub send_tap: SendTap,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub solo: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    Sine {
        #[serde(default = "default_frequency")]
        frequency: f32,
        #[serde(default = "default_amplitude")]
        amplitude: f32,
    },
    Noise {
        #[serde(default = "default_amplitude")]
        amplitude: f32,
    },
    Constant {
        value: f32,
    },
}

fn default_name() -> String {
    "scene".to_owned()
}

fn default_gain() -> f32 {
    0.8
}

fn default_return_gain() -> f32 {
    0.3
}

fn default_frequency() -> f32 {
    440.0
}

fn default_amplitude() -> f32 {
    0.25
}

impl SceneSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read scene file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("{} is not a valid scene file", path.display()))
    }

    /// Four detuned sines, one send returning into the first track.
    pub fn demo() -> Self {
        let tracks = [110.0, 164.8, 220.0, 329.6]
            .into_iter()
            .map(|frequency| TrackSpec {
                source: SourceKind::Sine {
                    frequency,
                    amplitude: 0.2,
                },
                gain: 0.7,
                send: 0.25,
                send_tap: SendTap::PostFader,
                mute: false,
                solo: false,
            })
            .collect();
        Self {
            name: "demo".to_owned(),
            tracks,
            return_to: Some(0),
            return_gain: 0.3,
            lfo_rate: Some(0.5),
        }
    }
}

/// Handles to the interesting parts of a built scene.
pub struct Scene {
    pub master: NodeRef,
    pub tracks: Vec<NodeRef>,
    pub feedback: Option<ConnectionId>,
}

impl Scene {
    pub fn master_output(&self) -> PortId {
        self.master.outputs()[0]
    }
}

pub fn build(ctx: &EngineContext, spec: &SceneSpec) -> Result<Scene> {
    let master = ctx.add_node(NodeSpec::new(NodeKind::Monitor, Monitor).with_name("master"))?;
    let bus = ctx.add_node(NodeSpec::new(NodeKind::Monitor, Monitor).with_name("fx-bus"))?;
    for channel in 0..2u16 {
        let out = ctx.add_node(NodeSpec::new(
            NodeKind::HwIo(HwDirection::Output(channel)),
            HardwareOutput,
        ))?;
        ctx.connect(master.outputs()[0], out.inputs()[0], 1.0)?;
    }

    let mut tracks = Vec::with_capacity(spec.tracks.len());
    let mut faders = Vec::with_capacity(spec.tracks.len());
    for (index, track_spec) in spec.tracks.iter().enumerate() {
        let source = ctx.add_node(
            NodeSpec::boxed(NodeKind::Track, instantiate(&track_spec.source, index as u64))
                .with_name(format!("source-{index}")),
        )?;
        let track = ctx.add_node(
            NodeSpec::new(NodeKind::Track, TrackSource::new()).with_name(format!("track-{index}")),
        )?;
        let fader = ctx.add_node(
            NodeSpec::new(NodeKind::Fader, Fader::new(track_spec.gain).muted(track_spec.mute))
                .with_name(format!("fader-{index}")),
        )?;
        if track_spec.solo {
            if let Some(solo) = Fader::solo_port(&fader) {
                ctx.set_control(solo, 1.0)?;
            }
        }
        ctx.connect(source.outputs()[0], track.inputs()[0], 1.0)?;
        ctx.connect(track.outputs()[0], fader.inputs()[0], 1.0)?;
        ctx.connect(fader.outputs()[0], master.inputs()[0], 1.0)?;
        if track_spec.send > 0.0 {
            let processor = match track_spec.send_tap {
                SendTap::PreFader => AuxSend::pre_fader(track_spec.send),
                SendTap::PostFader => AuxSend::new(track_spec.send),
            };
            let send = ctx.add_node(
                NodeSpec::new(NodeKind::Send, processor).with_name(format!("send-{index}")),
            )?;
            let tap = Fader::tap(&fader, track_spec.send_tap)
                .context("fader has no output for the requested send tap")?;
            ctx.connect(tap, send.inputs()[0], 1.0)?;
            ctx.connect(send.outputs()[0], bus.inputs()[0], 1.0)?;
        }
        tracks.push(track);
        faders.push(fader);
    }
    ctx.connect(bus.outputs()[0], master.inputs()[0], 0.5)?;

    let feedback = match spec.return_to.and_then(|index| tracks.get(index)) {
        Some(track) => Some(
            ctx.connect(bus.outputs()[0], track.inputs()[0], spec.return_gain)?
                .id,
        ),
        None => None,
    };

    if let (Some(rate), Some(fader)) = (spec.lfo_rate, faders.first()) {
        let lfo = ctx.add_node(NodeSpec::new(NodeKind::ModulatorMacro, Lfo::new(rate)))?;
        let gain = Fader::gain_port(fader).context("fader has no gain input")?;
        ctx.connect(lfo.outputs()[0], gain, 0.2)?;
    }

    tracing::info!(
        scene = %spec.name,
        tracks = tracks.len(),
        feedback = feedback.is_some(),
        "scene built"
    );
    Ok(Scene {
        master,
        tracks,
        feedback,
    })
}

fn instantiate(kind: &SourceKind, seed: u64) -> Box<dyn Processor> {
    match kind {
        SourceKind::Sine {
            frequency,
            amplitude,
        } => Box::new(SineOscillator::new(*frequency).with_amplitude(*amplitude)),
        SourceKind::Noise { amplitude } => Box::new(Noise::new(*amplitude, seed)),
        SourceKind::Constant { value } => Box::new(ConstantSource::new(*value)),
    }
}

struct Noise {
    amplitude: f32,
    rng: StdRng,
}

impl Noise {
    fn new(amplitude: f32, seed: u64) -> Self {
        Self {
            amplitude: amplitude.abs(),
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Processor for Noise {
    fn name(&self) -> &str {
        "noise"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::audio_out("out")]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        if self.amplitude == 0.0 {
            return Ok(());
        }
        let amplitude = self.amplitude;
        for sample in ctx.audio_out(0).iter_mut() {
            *sample = self.rng.gen_range(-amplitude..amplitude);
        }
        Ok(())
    }
}
