mod common;

use common::{add, context, Gain, Ramp, BLOCK};
use harmoniq_router::nodes::{AuxSend, Fader, HardwareOutput, Monitor};
use harmoniq_router::{HwDirection, NodeKind};

/// A mixer-shaped graph: ramps into faders, sends into a shared bus, all
/// summed on a master feeding two hardware channels.
fn render_with_workers(workers: usize) -> Vec<u32> {
    let ctx = context(workers);
    let master = add(&ctx, NodeKind::Monitor, Monitor);
    let bus = add(&ctx, NodeKind::Monitor, Monitor);
    let left = add(&ctx, NodeKind::HwIo(HwDirection::Output(0)), HardwareOutput);
    let right = add(&ctx, NodeKind::HwIo(HwDirection::Output(1)), HardwareOutput);

    for track in 0..8 {
        let source = add(&ctx, NodeKind::Track, Ramp::default());
        let insert = add(&ctx, NodeKind::Plugin, Gain(0.5 + track as f32 * 0.05));
        let fader = add(&ctx, NodeKind::Fader, Fader::new(0.8));
        let send = add(&ctx, NodeKind::Send, AuxSend::new(0.25));
        ctx.connect(source.outputs()[0], insert.inputs()[0], 1.0).unwrap();
        ctx.connect(insert.outputs()[0], fader.inputs()[0], 1.0).unwrap();
        ctx.connect(fader.outputs()[0], master.inputs()[0], 1.0).unwrap();
        ctx.connect(fader.outputs()[0], send.inputs()[0], 1.0).unwrap();
        ctx.connect(send.outputs()[0], bus.inputs()[0], 1.0).unwrap();
    }
    ctx.connect(bus.outputs()[0], master.inputs()[0], 0.5).unwrap();
    ctx.connect(master.outputs()[0], left.inputs()[0], 1.0).unwrap();
    ctx.connect(master.outputs()[0], right.inputs()[0], -1.0).unwrap();

    let mut router = ctx.create_router().unwrap();
    assert_eq!(router.worker_count(), workers);
    let mut rendered = Vec::new();
    let mut l = vec![0.0f32; BLOCK];
    let mut r = vec![0.0f32; BLOCK];
    for _ in 0..32 {
        {
            let mut outputs: Vec<&mut [f32]> = vec![l.as_mut_slice(), r.as_mut_slice()];
            router.process_io(&[], &mut outputs, BLOCK);
        }
        rendered.extend(l.iter().chain(r.iter()).map(|s| s.to_bits()));
    }
    rendered
}

#[test]
fn parallel_is_bit_identical_to_serial() {
    let baseline = render_with_workers(0);
    assert!(baseline.iter().any(|&bits| f32::from_bits(bits) != 0.0));
    for workers in [1, 2, 4] {
        assert_eq!(baseline, render_with_workers(workers), "workers = {workers}");
    }
}
