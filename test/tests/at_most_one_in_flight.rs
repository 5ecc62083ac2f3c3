/// PROPERTY-BASED TESTS: aspect update invariants
///
/// Random interleavings of changes, ticks, delivery outcomes and timeouts
/// never leave more than one live update per aspect and channel, and once
/// the transport settles every aspect converges to its latest version.

use proptest::prelude::*;
use replica_shared::{
    AspectFlags, AspectMask, DeliveryHandle, DeliveryOutcome, ObjectId, OutgoingSendable,
};
use replica_test::{assert_single_in_flight, TestHarness};

#[derive(Clone, Debug)]
enum Op {
    Change(u8),
    Profile(u8),
    Tick,
    Outcome(usize, DeliveryOutcome),
    Timeout,
}

fn outcome_strategy() -> impl Strategy<Value = DeliveryOutcome> {
    prop_oneof![
        3 => Just(DeliveryOutcome::Delivered),
        1 => Just(DeliveryOutcome::Dropped),
        1 => Just(DeliveryOutcome::Nacked),
    ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => any::<u8>().prop_map(Op::Change),
        1 => (0u8..4).prop_map(Op::Profile),
        4 => Just(Op::Tick),
        4 => (any::<usize>(), outcome_strategy()).prop_map(|(index, outcome)| Op::Outcome(index, outcome)),
        1 => Just(Op::Timeout),
    ]
}

fn setup(hash_state: bool) -> (TestHarness, ObjectId) {
    let mut harness = TestHarness::new();
    let flags = if hash_state {
        AspectFlags::HASH_STATE
    } else {
        AspectFlags::NONE
    };
    harness.declare("physics", 0, flags);
    let object = ObjectId::new(1);
    harness
        .context
        .bind_object(object, AspectMask::single(0), false)
        .unwrap();
    (harness, object)
}

fn run(harness: &mut TestHarness, object: ObjectId, ops: Vec<Op>) {
    let channel = harness.connect();
    let timeout = harness.context.config().sent_timeout;
    let mut in_flight: Vec<(DeliveryHandle, OutgoingSendable)> = Vec::new();

    for op in ops {
        match op {
            Op::Change(value) => {
                harness.game.lock().unwrap().set_value(object, 0, &[value]);
                harness
                    .context
                    .notify_aspects_changed(object, AspectMask::single(0), None)
                    .unwrap();
            }
            Op::Profile(profile) => {
                harness
                    .context
                    .set_aspect_profile(object, 0, replica_shared::Profile::new(profile))
                    .unwrap();
            }
            Op::Tick => {
                harness.tick();
                in_flight.extend(harness.take_sent(channel));
            }
            Op::Outcome(index, outcome) => {
                if !in_flight.is_empty() {
                    let (delivery, _) = in_flight.remove(index % in_flight.len());
                    harness.deliver(channel, delivery, outcome);
                }
            }
            Op::Timeout => {
                harness.advance(timeout);
                harness.tick();
                in_flight.extend(harness.take_sent(channel));
            }
        }
        assert_single_in_flight!(harness, channel, object, 0);
    }

    // settle everything, late outcomes of requeued sendables included
    for (delivery, _) in in_flight.drain(..) {
        harness.deliver(channel, delivery, DeliveryOutcome::Delivered);
    }
    for _ in 0..8 {
        harness.tick_and_ack(channel);
    }

    assert_eq!(harness.live_aspect_updates(channel, object, 0), 0);
    let binding = harness.context.binding(&object).unwrap();
    let state = binding.aspect(0).unwrap().channel(&channel).unwrap();
    assert!(!state.dirty, "aspect still dirty after convergence: {:?}", state);
    assert!(!state.profile_pending);
}

proptest! {
    #[test]
    fn prop_single_live_update(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let (mut harness, object) = setup(false);
        run(&mut harness, object, ops);
    }

    #[test]
    fn prop_single_live_hashed_update(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let (mut harness, object) = setup(true);
        run(&mut harness, object, ops);
    }
}
