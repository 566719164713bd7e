mod common;

use common::{add, config, Gain, MidiBurst, Timeline, BLOCK};
use harmoniq_router::nodes::ConstantSource;
use harmoniq_router::{
    EngineConfig, EngineContext, NodeKind, NodeRef, Notification, RecordingConfig, RegionPayload,
    Router, TakePolicy,
};

fn armed_source(config: EngineConfig) -> (EngineContext, NodeRef, Router) {
    let ctx = EngineContext::new(config).unwrap();
    let source = add(&ctx, NodeKind::Track, ConstantSource::new(0.5));
    let router = ctx.create_router().unwrap();
    ctx.arm_recording(&[source.outputs()[0]]).unwrap();
    (ctx, source, router)
}

fn audio(payload: &RegionPayload) -> &[f32] {
    match payload {
        RegionPayload::Audio(samples) => samples,
        other => panic!("expected audio, got {other:?}"),
    }
}

#[test]
fn contiguous_pass_yields_one_region() {
    let (ctx, source, mut router) = armed_source(config(1));
    ctx.play().unwrap();
    ctx.record().unwrap();
    for _ in 0..3 {
        router.process(BLOCK);
    }
    assert!(ctx.drain_recordings().is_empty());

    ctx.stop().unwrap();
    router.process(BLOCK);
    let regions = ctx.drain_recordings();
    assert_eq!(regions.len(), 1);
    let region = &regions[0];
    assert_eq!(region.port, source.outputs()[0]);
    assert_eq!(region.start, 0);
    assert_eq!(region.length, 3 * BLOCK as u64);
    let samples = audio(&region.payload);
    assert_eq!(samples.len(), 3 * BLOCK);
    assert!(samples.iter().all(|&s| s == 0.5));
}

#[test]
fn loop_wrap_does_not_split_the_region() {
    let (ctx, _, mut router) = armed_source(config(0));
    ctx.set_loop(0, 100, true).unwrap();
    ctx.play().unwrap();
    ctx.record().unwrap();
    router.process(BLOCK);
    router.process(BLOCK);
    assert_eq!(router.position(), 28);

    ctx.stop().unwrap();
    router.process(BLOCK);
    let regions = ctx.drain_recordings();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].length, 2 * BLOCK as u64);
    assert_eq!(audio(&regions[0].payload).len(), 2 * BLOCK);
}

#[test]
fn leaving_recording_for_rolling_finalizes() {
    let (ctx, _, mut router) = armed_source(config(0));
    ctx.play().unwrap();
    ctx.record().unwrap();
    router.process(BLOCK);
    ctx.play().unwrap();
    router.process(BLOCK);
    router.process(BLOCK);

    let regions = ctx.drain_recordings();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].length, BLOCK as u64);
}

#[test]
fn ring_overflow_pads_with_silence() {
    let mut cfg = config(0);
    cfg.recording = RecordingConfig {
        audio_ring_frames: BLOCK,
        ..RecordingConfig::default()
    };
    let (ctx, source, mut router) = armed_source(cfg);
    ctx.play().unwrap();
    ctx.record().unwrap();

    router.process(BLOCK);
    // Ring is full, this cycle's audio is dropped.
    router.process(BLOCK);
    assert!(ctx.drain_recordings().is_empty());
    router.process(BLOCK);
    ctx.stop().unwrap();
    router.process(BLOCK);

    let notifications = ctx.service();
    assert!(notifications.contains(&Notification::RecordingOverflow {
        port: source.outputs()[0],
        frames: BLOCK as u32,
    }));
    assert_eq!(ctx.metrics().dropped_recording_frames, BLOCK as u64);

    let regions = ctx.drain_recordings();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].length, 3 * BLOCK as u64);
    let samples = audio(&regions[0].payload);
    assert!(samples[..BLOCK].iter().all(|&s| s == 0.5));
    assert!(samples[BLOCK..2 * BLOCK].iter().all(|&s| s == 0.0));
    assert!(samples[2 * BLOCK..].iter().all(|&s| s == 0.5));
}

fn record_twice(policy: TakePolicy) -> Vec<harmoniq_router::FinalizedRegion> {
    let (ctx, _, mut router) = armed_source(config(0));
    ctx.set_take_policy(policy);
    let mut regions = Vec::new();
    for cycles in [2, 1] {
        ctx.relocate(0).unwrap();
        ctx.play().unwrap();
        ctx.record().unwrap();
        for _ in 0..cycles {
            router.process(BLOCK);
        }
        ctx.stop().unwrap();
        router.process(BLOCK);
        regions.extend(ctx.drain_recordings());
    }
    regions
}

#[test]
fn overwrite_policy_supersedes_overlapping_takes() {
    let regions = record_twice(TakePolicy::Overwrite);
    assert_eq!(regions.len(), 2);
    assert_eq!(regions[1].take, 0);
    assert_eq!(regions[1].supersedes, vec![regions[0].id]);
}

#[test]
fn new_take_policy_stacks_takes() {
    let regions = record_twice(TakePolicy::NewTake);
    assert_eq!(regions.len(), 2);
    assert_eq!(regions[0].take, 0);
    assert_eq!(regions[1].take, 1);
    assert!(regions[1].supersedes.is_empty());
}

#[test]
fn record_from_stopped_is_rejected() {
    let (ctx, _, mut router) = armed_source(config(0));
    ctx.record().unwrap();
    router.process(BLOCK);
    assert!(ctx
        .service()
        .iter()
        .any(|n| matches!(n, Notification::TransportRejected { request: "record", .. })));
    ctx.stop().unwrap();
    router.process(BLOCK);
    assert!(ctx.drain_recordings().is_empty());
}

fn midi(payload: &RegionPayload) -> &[harmoniq_router::RecordedMidi] {
    match payload {
        RegionPayload::Midi(events) => events,
        other => panic!("expected midi, got {other:?}"),
    }
}

#[test]
fn armed_input_captures_its_summed_sources() {
    let ctx = EngineContext::new(config(2)).unwrap();
    let low = add(&ctx, NodeKind::Track, ConstantSource::new(0.25));
    let high = add(&ctx, NodeKind::Track, ConstantSource::new(0.5));
    let gain = add(&ctx, NodeKind::Plugin, Gain(1.0));
    ctx.connect(low.outputs()[0], gain.inputs()[0], 1.0).unwrap();
    ctx.connect(high.outputs()[0], gain.inputs()[0], 1.0).unwrap();
    let mut router = ctx.create_router().unwrap();
    ctx.arm_recording(&[gain.inputs()[0]]).unwrap();

    ctx.play().unwrap();
    ctx.record().unwrap();
    for _ in 0..3 {
        router.process(BLOCK);
    }
    ctx.stop().unwrap();
    router.process(BLOCK);

    let regions = ctx.drain_recordings();
    assert_eq!(regions.len(), 1);
    assert_eq!(regions[0].port, gain.inputs()[0]);
    assert_eq!(regions[0].length, 3 * BLOCK as u64);
    let samples = audio(&regions[0].payload);
    assert_eq!(samples.len(), 3 * BLOCK);
    assert!(samples.iter().all(|&s| s == 0.75));
}

#[test]
fn arming_a_missing_port_is_rejected() {
    let (ctx, source, _router) = armed_source(config(0));
    let missing = harmoniq_router::PortId(source.outputs()[0].0 + 100);
    assert!(ctx.arm_recording(&[missing]).is_err());
}

#[test]
fn dense_midi_span_is_captured_in_full() {
    let ctx = EngineContext::new(config(0)).unwrap();
    let burst = add(&ctx, NodeKind::Plugin, MidiBurst { count: 300 });
    let mut router = ctx.create_router().unwrap();
    ctx.arm_recording(&[burst.outputs()[0]]).unwrap();

    ctx.play().unwrap();
    ctx.record().unwrap();
    router.process(BLOCK);
    ctx.stop().unwrap();
    router.process(BLOCK);

    assert!(!ctx
        .service()
        .iter()
        .any(|n| matches!(n, Notification::RecordingOverflow { .. })));
    let regions = ctx.drain_recordings();
    assert_eq!(regions.len(), 1);
    let events = midi(&regions[0].payload);
    assert_eq!(events.len(), 300);
    assert!(events.windows(2).all(|pair| pair[0].offset <= pair[1].offset));
}

#[test]
fn midi_ring_overflow_is_reported() {
    let mut cfg = config(0);
    cfg.recording = RecordingConfig {
        midi_capacity: 100,
        ..RecordingConfig::default()
    };
    let ctx = EngineContext::new(cfg).unwrap();
    let burst = add(&ctx, NodeKind::Plugin, MidiBurst { count: 300 });
    let mut router = ctx.create_router().unwrap();
    ctx.arm_recording(&[burst.outputs()[0]]).unwrap();

    ctx.play().unwrap();
    ctx.record().unwrap();
    router.process(BLOCK);
    ctx.stop().unwrap();
    router.process(BLOCK);

    let notifications = ctx.service();
    assert!(notifications.contains(&Notification::RecordingOverflow {
        port: burst.outputs()[0],
        frames: BLOCK as u32,
    }));
    assert_eq!(ctx.metrics().dropped_recording_frames, BLOCK as u64);
}

#[test]
fn punch_range_bounds_the_region() {
    let ctx = EngineContext::new(config(1)).unwrap();
    let timeline = add(&ctx, NodeKind::Track, Timeline);
    let mut router = ctx.create_router().unwrap();
    ctx.arm_recording(&[timeline.outputs()[0]]).unwrap();
    ctx.set_punch(100, 300, true).unwrap();

    ctx.play().unwrap();
    ctx.record().unwrap();
    for _ in 0..4 {
        router.process(BLOCK);
        assert!(ctx.drain_recordings().is_empty());
    }
    // Punch-out falls inside this cycle.
    router.process(BLOCK);
    let regions = ctx.drain_recordings();
    assert_eq!(regions.len(), 1);
    let region = &regions[0];
    assert_eq!(region.start, 100);
    assert_eq!(region.length, 200);
    let samples = audio(&region.payload);
    assert_eq!(samples.len(), 200);
    assert_eq!(samples[0], 100.0);
    assert_eq!(samples[199], 299.0);

    for _ in 0..2 {
        router.process(BLOCK);
    }
    ctx.stop().unwrap();
    router.process(BLOCK);
    assert!(ctx.drain_recordings().is_empty());
}
