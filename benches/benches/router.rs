use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use harmoniq_router::nodes::{
    AuxSend, Fader, HardwareOutput, Monitor, SineOscillator, TrackSource,
};
use harmoniq_router::{EngineConfig, EngineContext, HwDirection, NodeKind, NodeSpec, Router};

/// 48 tracks of oscillator, track, fader and send, a shared effect bus that
/// returns into the first track, and a stereo master.
fn mixer_48_tracks(workers: usize) -> (EngineContext, Router) {
    let ctx = EngineContext::new(EngineConfig {
        sample_rate: 96_000,
        max_block: 64,
        workers,
        ..EngineConfig::default()
    })
    .expect("context");
    let add = |spec: NodeSpec| ctx.add_node(spec).expect("add node");

    let master = add(NodeSpec::new(NodeKind::Monitor, Monitor));
    let bus = add(NodeSpec::new(NodeKind::Monitor, Monitor));
    for channel in 0..2 {
        let out = add(
            NodeSpec::new(NodeKind::HwIo(HwDirection::Output(channel)), HardwareOutput),
        );
        ctx.connect(master.outputs()[0], out.inputs()[0], 1.0)
            .expect("connect");
    }

    let mut first_track = None;
    for track in 0..48 {
        let osc = add(
            NodeSpec::new(
                NodeKind::Track,
                SineOscillator::new(110.0 + track as f32).with_amplitude(0.02),
            ),
        );
        let source = add(NodeSpec::new(NodeKind::Track, TrackSource::new()));
        let fader = add(NodeSpec::new(NodeKind::Fader, Fader::new(0.8)));
        let send = add(NodeSpec::new(NodeKind::Send, AuxSend::new(0.1)));
        ctx.connect(osc.outputs()[0], source.inputs()[0], 1.0).expect("connect");
        ctx.connect(source.outputs()[0], fader.inputs()[0], 1.0).expect("connect");
        ctx.connect(fader.outputs()[0], master.inputs()[0], 1.0).expect("connect");
        ctx.connect(fader.outputs()[0], send.inputs()[0], 1.0).expect("connect");
        ctx.connect(send.outputs()[0], bus.inputs()[0], 1.0).expect("connect");
        first_track.get_or_insert(source);
    }
    ctx.connect(bus.outputs()[0], master.inputs()[0], 0.5).expect("connect");
    if let Some(track) = first_track {
        ctx.connect(bus.outputs()[0], track.inputs()[0], 0.2)
            .expect("connect");
    }

    let router = ctx.create_router().expect("router");
    ctx.play().expect("play");
    (ctx, router)
}

fn scene_48_tracks(c: &mut Criterion) {
    let mut group = c.benchmark_group("router");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    for workers in [0usize, 1, 3] {
        group.bench_with_input(
            BenchmarkId::new("48_tracks_96k_block64", workers),
            &workers,
            |b, &workers| {
                let (ctx, mut router) = mixer_48_tracks(workers);
                let mut left = vec![0.0f32; 64];
                let mut right = vec![0.0f32; 64];
                b.iter(|| {
                    let mut outputs: [&mut [f32]; 2] = [left.as_mut_slice(), right.as_mut_slice()];
                    router.process_io(&[], &mut outputs, 64);
                });
                ctx.service();
            },
        );
    }

    group.finish();
}

criterion_group!(benches, scene_48_tracks);
criterion_main!(benches);
