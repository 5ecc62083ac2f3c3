/// With a tight bandwidth budget the drain order shows how sendables are
/// ranked: queue order, then pulses, scheduling params and distance to the
/// channel's witness.

use replica_shared::{
    AspectFlags, AspectMask, ChannelId, ObjectId, SchedulingParams, SendableKind, Vec3,
};
use replica_test::TestHarness;

const OBJECTS: [u32; 3] = [1, 2, 3];

fn setup() -> (TestHarness, ChannelId) {
    let mut harness = TestHarness::new();
    harness.declare("script", 0, AspectFlags::NONE);
    for id in OBJECTS {
        harness
            .context
            .bind_object(ObjectId::new(id), AspectMask::single(0), false)
            .unwrap();
    }
    let channel = harness.connect();
    // one sendable per tick
    harness.context.set_channel_bandwidth(channel, 1).unwrap();
    (harness, channel)
}

fn change(harness: &mut TestHarness, id: u32) {
    let object = ObjectId::new(id);
    harness
        .game
        .lock()
        .unwrap()
        .set_value(object, 0, &[id as u8]);
    harness
        .context
        .notify_aspects_changed(object, AspectMask::single(0), None)
        .unwrap();
}

/// Objects in the order their updates went out
fn drain_order(harness: &mut TestHarness, channel: ChannelId, count: usize) -> Vec<u32> {
    let mut order = Vec::new();
    for _ in 0..count {
        let sent = harness.tick_and_ack(channel);
        assert_eq!(sent.len(), 1);
        if let SendableKind::AspectUpdate { object, .. } = sent[0].kind {
            order.push(object.to_u32());
        }
    }
    order
}

#[test]
fn equal_priority_keeps_queue_order() {
    let (mut harness, channel) = setup();
    for id in [3, 1, 2] {
        change(&mut harness, id);
    }
    assert_eq!(drain_order(&mut harness, channel, 3), vec![3, 1, 2]);
}

#[test]
fn substitution_keeps_queue_position() {
    let (mut harness, channel) = setup();
    for id in [1, 2, 3] {
        change(&mut harness, id);
    }
    // a newer value for object 1 does not send it to the back
    change(&mut harness, 1);
    assert_eq!(drain_order(&mut harness, channel, 3), vec![1, 2, 3]);
}

#[test]
fn pulse_boosts_object() {
    let (mut harness, channel) = setup();
    for id in [1, 2, 3] {
        change(&mut harness, id);
    }
    let now = harness.now;
    harness
        .context
        .pulse_object(ObjectId::new(3), 42, now)
        .unwrap();
    assert_eq!(drain_order(&mut harness, channel, 3), vec![3, 1, 2]);
}

#[test]
fn scheduling_params_raise_base_priority() {
    let (mut harness, channel) = setup();
    harness
        .context
        .set_scheduling_params(
            ObjectId::new(2),
            Some(SchedulingParams {
                normal: 3.0,
                owned: 3.0,
            }),
        )
        .unwrap();
    harness
        .context
        .set_scheduling_params(
            ObjectId::new(1),
            Some(SchedulingParams {
                normal: 0.5,
                owned: 9.0,
            }),
        )
        .unwrap();
    for id in [1, 2, 3] {
        change(&mut harness, id);
    }
    assert_eq!(drain_order(&mut harness, channel, 3), vec![2, 3, 1]);
}

#[test]
fn witnessed_object_uses_owned_priority() {
    let (mut harness, channel) = setup();
    harness
        .context
        .set_scheduling_params(
            ObjectId::new(3),
            Some(SchedulingParams {
                normal: 0.5,
                owned: 9.0,
            }),
        )
        .unwrap();
    harness
        .context
        .set_channel_witness(channel, Some(ObjectId::new(3)))
        .unwrap();
    for id in [1, 2, 3] {
        change(&mut harness, id);
    }
    assert_eq!(drain_order(&mut harness, channel, 3)[0], 3);
}

#[test]
fn far_objects_go_last() {
    let (mut harness, channel) = setup();
    let player = ObjectId::new(10);
    harness
        .context
        .bind_object(player, AspectMask::EMPTY, false)
        .unwrap();
    harness.tick_and_ack(channel);
    harness
        .context
        .changed_transform(player, Vec3::new(0.0, 0.0, 0.0), None)
        .unwrap();
    harness
        .context
        .set_channel_witness(channel, Some(player))
        .unwrap();

    let positions = [(1, 5_000.0), (2, 10.0), (3, 300.0)];
    for (id, x) in positions {
        harness
            .context
            .changed_transform(ObjectId::new(id), Vec3::new(x, 0.0, 0.0), Some(100.0))
            .unwrap();
    }
    for id in [1, 2, 3] {
        change(&mut harness, id);
    }
    assert_eq!(drain_order(&mut harness, channel, 3), vec![2, 3, 1]);
}
