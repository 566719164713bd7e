mod common;

use std::time::{Duration, Instant};

use common::{add, context, Fails, Hangs, Panics, BLOCK};
use harmoniq_router::nodes::{ConstantSource, MacroKnob, Monitor};
use harmoniq_router::{
    FaultReason, Isolation, NodeKind, NodeSpec, Notification, PortSpec, ProcessContext,
    ProcessError, Processor,
};

/// Drives its control output to the top of its range, then panics.
struct StuckControl;

impl Processor for StuckControl {
    fn name(&self) -> &str {
        "stuck-control"
    }

    fn ports(&self) -> Vec<PortSpec> {
        vec![PortSpec::control_out("level", 0.0, 1.0)]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), ProcessError> {
        ctx.set_control_out(0, 1.0);
        panic!("modulator crashed");
    }
}

#[test]
fn panicking_plugin_is_silenced_and_excised() {
    let ctx = context(2);
    let healthy = add(&ctx, NodeKind::Track, ConstantSource::new(0.5));
    let broken = add(&ctx, NodeKind::Plugin, Panics);
    let master = add(&ctx, NodeKind::Monitor, Monitor);
    ctx.connect(healthy.outputs()[0], master.inputs()[0], 1.0).unwrap();
    ctx.connect(broken.outputs()[0], master.inputs()[0], 1.0).unwrap();

    let mut router = ctx.create_router().unwrap();
    router.process(BLOCK);
    assert!(router
        .read_audio(master.outputs()[0])
        .unwrap()
        .iter()
        .all(|&s| s == 0.5));

    let notifications = ctx.service();
    assert_eq!(
        notifications,
        vec![Notification::NodeFaulted {
            node: broken.id,
            name: "panics".into(),
            reason: FaultReason::Panicked,
        }]
    );
    assert_eq!(ctx.metrics().faults, 1);
    assert!(!ctx.graph().contains(broken.id));
    assert!(ctx.graph().contains(master.id));

    // The excised node does not come back and the rest keeps running.
    router.process(BLOCK);
    assert!(!router.graph().contains(broken.id));
    assert!(router
        .read_audio(master.outputs()[0])
        .unwrap()
        .iter()
        .all(|&s| s == 0.5));
    assert!(ctx.service().is_empty());
}

#[test]
fn processor_error_is_reported_once() {
    let ctx = context(0);
    let failing = add(&ctx, NodeKind::Plugin, Fails);
    let master = add(&ctx, NodeKind::Monitor, Monitor);
    ctx.connect(failing.outputs()[0], master.inputs()[0], 1.0).unwrap();

    let mut router = ctx.create_router().unwrap();
    router.process(BLOCK);
    router.process(BLOCK);

    let faults: Vec<_> = ctx
        .service()
        .into_iter()
        .filter(|n| matches!(n, Notification::NodeFaulted { .. }))
        .collect();
    assert_eq!(faults.len(), 1);
    assert!(matches!(
        faults[0],
        Notification::NodeFaulted {
            reason: FaultReason::Error,
            ..
        }
    ));
    assert!(router
        .read_audio(master.outputs()[0])
        .unwrap()
        .iter()
        .all(|&s| s == 0.0));
}

#[test]
fn hung_plugin_is_abandoned_by_the_watchdog() {
    let ctx = context(1);
    let source = add(&ctx, NodeKind::Track, ConstantSource::new(0.25));
    let hung = ctx
        .add_node(
            NodeSpec::new(NodeKind::Plugin, Hangs).with_isolation(Isolation::Watchdog {
                timeout: Duration::from_millis(20),
            }),
        )
        .unwrap();
    let master = add(&ctx, NodeKind::Monitor, Monitor);
    ctx.connect(source.outputs()[0], master.inputs()[0], 1.0).unwrap();
    ctx.connect(hung.outputs()[0], master.inputs()[0], 1.0).unwrap();

    let mut router = ctx.create_router().unwrap();
    let started = Instant::now();
    router.process(BLOCK);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(router
        .read_audio(master.outputs()[0])
        .unwrap()
        .iter()
        .all(|&s| s == 0.25));

    let notifications = ctx.service();
    assert!(notifications.iter().any(|n| matches!(
        n,
        Notification::NodeFaulted {
            reason: FaultReason::Timeout,
            ..
        }
    )));

    // Later cycles never wait on the abandoned thread again.
    let started = Instant::now();
    for _ in 0..4 {
        router.process(BLOCK);
    }
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn faulted_control_output_falls_back_to_default() {
    let ctx = context(1);
    let stuck = add(&ctx, NodeKind::Plugin, StuckControl);
    let knob = add(&ctx, NodeKind::ModulatorMacro, MacroKnob::new(0.0));
    ctx.connect(stuck.outputs()[0], knob.inputs()[0], 1.0).unwrap();

    let mut router = ctx.create_router().unwrap();
    router.process(BLOCK);
    assert_eq!(router.read_control(stuck.outputs()[0]), Some(0.0));
    assert_eq!(router.read_control(knob.outputs()[0]), Some(0.0));
    assert!(matches!(
        ctx.service().as_slice(),
        [Notification::NodeFaulted {
            reason: FaultReason::Panicked,
            ..
        }]
    ));
}
