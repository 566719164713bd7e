mod common;

use common::{add, context, Gain, BLOCK};
use harmoniq_router::nodes::{ConstantSource, Lfo, MacroKnob, MidiThru, Monitor};
use harmoniq_router::{ConnectionError, EngineError, NodeError, NodeKind};

fn all(samples: &[f32], value: f32) -> bool {
    samples.iter().all(|&s| (s - value).abs() < 1e-6)
}

#[test]
fn disabled_node_leaves_downstream_silent() {
    let ctx = context(2);
    let source = add(&ctx, NodeKind::Track, ConstantSource::new(1.0));
    let insert = add(&ctx, NodeKind::Plugin, Gain(0.5));
    let master = add(&ctx, NodeKind::Monitor, Monitor);
    ctx.connect(source.outputs()[0], insert.inputs()[0], 1.0).unwrap();
    ctx.connect(insert.outputs()[0], master.inputs()[0], 1.0).unwrap();

    let mut router = ctx.create_router().unwrap();
    router.process(BLOCK);
    assert!(all(router.read_audio(master.outputs()[0]).unwrap(), 0.5));

    ctx.set_node_enabled(insert.id, false).unwrap();
    router.process(BLOCK);
    assert!(router.read_audio(insert.outputs()[0]).is_none());
    assert!(all(router.read_audio(master.outputs()[0]).unwrap(), 0.0));
    assert_eq!(ctx.execution_layers(), vec![vec![source.id, master.id]]);

    ctx.set_node_enabled(insert.id, true).unwrap();
    router.process(BLOCK);
    assert!(all(router.read_audio(master.outputs()[0]).unwrap(), 0.5));
}

#[test]
fn removing_a_node_drops_its_connections() {
    let ctx = context(0);
    let source = add(&ctx, NodeKind::Track, ConstantSource::new(1.0));
    let insert = add(&ctx, NodeKind::Plugin, Gain(2.0));
    let master = add(&ctx, NodeKind::Monitor, Monitor);
    let first = ctx.connect(source.outputs()[0], insert.inputs()[0], 1.0).unwrap();
    ctx.connect(insert.outputs()[0], master.inputs()[0], 1.0).unwrap();

    let mut router = ctx.create_router().unwrap();
    router.process(BLOCK);
    assert!(all(router.read_audio(master.outputs()[0]).unwrap(), 2.0));

    ctx.remove_node(insert.id).unwrap();
    router.process(BLOCK);
    assert!(all(router.read_audio(master.outputs()[0]).unwrap(), 0.0));
    assert!(matches!(
        ctx.disconnect(first.id),
        Err(EngineError::Connection(ConnectionError::UnknownConnection(_)))
    ));
    assert!(matches!(
        ctx.remove_node(insert.id),
        Err(EngineError::Node(NodeError::UnknownNode(_)))
    ));
}

#[test]
fn multiplier_and_enable_apply_without_rebuild() {
    let ctx = context(1);
    let source = add(&ctx, NodeKind::Track, ConstantSource::new(1.0));
    let master = add(&ctx, NodeKind::Monitor, Monitor);
    let conn = ctx.connect(source.outputs()[0], master.inputs()[0], 1.0).unwrap();

    let mut router = ctx.create_router().unwrap();
    router.process(BLOCK);
    let generation = router.graph().generation();

    ctx.set_multiplier(conn.id, -0.25).unwrap();
    router.process(BLOCK);
    assert!(all(router.read_audio(master.outputs()[0]).unwrap(), -0.25));

    ctx.enable(conn.id, false).unwrap();
    router.process(BLOCK);
    assert!(all(router.read_audio(master.outputs()[0]).unwrap(), 0.0));
    assert_eq!(router.graph().generation(), generation);
}

#[test]
fn invalid_connections_are_rejected() {
    let ctx = context(0);
    let source = add(&ctx, NodeKind::Track, ConstantSource::new(1.0));
    let master = add(&ctx, NodeKind::Monitor, Monitor);
    let thru = add(&ctx, NodeKind::Plugin, MidiThru);

    let expect = |result: Result<_, EngineError>| match result {
        Err(EngineError::Connection(err)) => err,
        other => panic!("expected connection error, got {other:?}"),
    };

    assert!(matches!(
        expect(ctx.connect(source.outputs()[0], thru.inputs()[0], 1.0)),
        ConnectionError::IncompatibleKinds { .. }
    ));
    assert!(matches!(
        expect(ctx.connect(master.inputs()[0], source.outputs()[0], 1.0)),
        ConnectionError::Direction { .. }
    ));
    assert!(matches!(
        expect(ctx.connect(source.outputs()[0], master.inputs()[0], f32::NAN)),
        ConnectionError::InvalidMultiplier(_)
    ));
    ctx.connect(source.outputs()[0], master.inputs()[0], 1.0).unwrap();
    assert!(matches!(
        expect(ctx.connect(source.outputs()[0], master.inputs()[0], 0.5)),
        ConnectionError::Duplicate { .. }
    ));
}

#[test]
fn fan_in_limit_is_enforced() {
    let mut cfg = common::config(0);
    cfg.max_fan_in = 2;
    let ctx = harmoniq_router::EngineContext::new(cfg).unwrap();
    let master = add(&ctx, NodeKind::Monitor, Monitor);
    for n in 0..3 {
        let source = add(&ctx, NodeKind::Track, ConstantSource::new(1.0));
        let result = ctx.connect(source.outputs()[0], master.inputs()[0], 1.0);
        if n < 2 {
            assert!(result.is_ok());
        } else {
            assert!(matches!(
                result,
                Err(EngineError::Connection(ConnectionError::FanInExceeded { limit: 2, .. }))
            ));
        }
    }
}

#[test]
fn modulator_drives_a_control_input() {
    let ctx = context(0);
    let knob = add(&ctx, NodeKind::ModulatorMacro, MacroKnob::new(0.25));
    let lfo = add(&ctx, NodeKind::ModulatorMacro, Lfo::new(1.0));
    let target = add(&ctx, NodeKind::ModulatorMacro, MacroKnob::new(0.5));
    ctx.connect(knob.outputs()[0], target.inputs()[0], 1.0).unwrap();

    let mut router = ctx.create_router().unwrap();
    router.process(BLOCK);
    // base 0.5 plus 0.25 scaled by half the target range
    let value = router.read_control(target.outputs()[0]).unwrap();
    assert!((value - 0.625).abs() < 1e-6);

    ctx.set_control(knob.inputs()[0], 1.0).unwrap();
    router.process(BLOCK);
    assert_eq!(router.read_control(target.outputs()[0]), Some(1.0));

    ctx.connect(lfo.outputs()[0], target.inputs()[0], 0.0).unwrap();
    router.process(BLOCK);
    assert!(router.read_audio(lfo.outputs()[0]).is_some());
}
