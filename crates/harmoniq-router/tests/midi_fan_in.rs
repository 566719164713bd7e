mod common;

use common::{add, context, ScriptedMidi, BLOCK};
use harmoniq_router::nodes::MidiThru;
use harmoniq_router::{EngineContext, NodeKind, NodeRef, Router};

struct FanIn {
    ctx: EngineContext,
    thru: NodeRef,
    first: harmoniq_router::ConnectionRef,
    second: harmoniq_router::ConnectionRef,
    router: Router,
}

/// Two MIDI sources merged into one input. The first connection emits notes
/// 1 and 2 at frames 10 and 20, the second emits notes 3 and 4 at 5 and 10.
fn fan_in(workers: usize) -> FanIn {
    let ctx = context(workers);
    let a = add(&ctx, NodeKind::Track, ScriptedMidi { notes: vec![(10, 1), (20, 2)] });
    let b = add(&ctx, NodeKind::Track, ScriptedMidi { notes: vec![(5, 3), (10, 4)] });
    let thru = add(&ctx, NodeKind::Plugin, MidiThru);
    let first = ctx.connect(a.outputs()[0], thru.inputs()[0], 1.0).unwrap();
    let second = ctx.connect(b.outputs()[0], thru.inputs()[0], 1.0).unwrap();
    let router = ctx.create_router().unwrap();
    FanIn {
        ctx,
        thru,
        first,
        second,
        router,
    }
}

fn merged(router: &Router, thru: &NodeRef) -> Vec<(u32, u8)> {
    router
        .read_midi(thru.outputs()[0])
        .unwrap()
        .iter()
        .map(|event| (event.frame, event.bytes()[1]))
        .collect()
}

#[test]
fn sources_interleave_by_timestamp() {
    let mut fan = fan_in(2);
    fan.router.process(BLOCK);
    assert_eq!(
        merged(&fan.router, &fan.thru),
        vec![(5, 3), (10, 1), (10, 4), (20, 2)]
    );
}

#[test]
fn ties_follow_connection_creation_order() {
    let mut fan = fan_in(0);
    for _ in 0..3 {
        fan.router.process(BLOCK);
        let at_ten: Vec<u8> = merged(&fan.router, &fan.thru)
            .into_iter()
            .filter(|&(frame, _)| frame == 10)
            .map(|(_, note)| note)
            .collect();
        assert_eq!(at_ten, vec![1, 4]);
    }
}

#[test]
fn zero_multiplier_mutes_one_source() {
    let mut fan = fan_in(1);
    fan.router.process(BLOCK);
    fan.ctx.set_multiplier(fan.second.id, 0.0).unwrap();
    fan.router.process(BLOCK);
    assert_eq!(merged(&fan.router, &fan.thru), vec![(10, 1), (20, 2)]);

    fan.ctx.enable(fan.first.id, false).unwrap();
    fan.ctx.set_multiplier(fan.second.id, 1.0).unwrap();
    fan.router.process(BLOCK);
    assert_eq!(merged(&fan.router, &fan.thru), vec![(5, 3), (10, 4)]);
}
