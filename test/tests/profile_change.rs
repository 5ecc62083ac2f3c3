/// A profile change travels reliable-ordered together with the state
/// serialized under the new profile, and keeps doing so until the remote
/// acknowledges it.

use replica_shared::{
    AspectFlags, AspectMask, DeliveryOutcome, ObjectId, OutgoingSendable, Profile, Reliability,
    SendableKind,
};
use replica_test::TestHarness;

fn update_of(sent: &[OutgoingSendable]) -> (Reliability, Profile, bool, Vec<u8>) {
    let update = sent
        .iter()
        .find(|sendable| sendable.kind.is_aspect_update())
        .expect("an aspect update was sent");
    let SendableKind::AspectUpdate {
        profile,
        profile_changed,
        ..
    } = update.kind
    else {
        unreachable!()
    };
    (update.reliability, profile, profile_changed, update.payload.clone())
}

#[test]
fn profile_change_is_reliable_ordered_until_acknowledged() {
    let mut harness = TestHarness::new();
    harness.declare("physics", 0, AspectFlags::NONE);
    let object = ObjectId::new(1);
    harness
        .context
        .bind_object(object, AspectMask::single(0), false)
        .unwrap();
    let channel = harness.connect();

    harness
        .context
        .set_aspect_profile(object, 0, Profile::new(2))
        .unwrap();

    harness.tick();
    let first = harness.take_sent(channel);
    let sendables: Vec<OutgoingSendable> = first.iter().map(|(_, s)| s.clone()).collect();
    let (reliability, profile, changed, payload) = update_of(&sendables);
    assert_eq!(reliability, Reliability::ReliableOrdered);
    assert_eq!(profile, Profile::new(2));
    assert!(changed);
    // serialized under the new profile
    assert_eq!(payload, vec![0, 2]);

    harness.deliver_all(channel, &first, DeliveryOutcome::Nacked);
    let resent = harness.tick_and_ack(channel);
    let (reliability, profile, changed, _) = update_of(&resent);
    assert_eq!(reliability, Reliability::ReliableOrdered);
    assert_eq!(profile, Profile::new(2));
    assert!(changed);

    harness
        .context
        .notify_aspects_changed(object, AspectMask::single(0), None)
        .unwrap();
    let plain = harness.tick_and_ack(channel);
    let (reliability, profile, changed, _) = update_of(&plain);
    assert_eq!(
        reliability,
        harness.context.config().aspect_update_reliability
    );
    assert_eq!(profile, Profile::new(2));
    assert!(!changed);
}

#[test]
fn second_profile_change_in_flight_keeps_flag() {
    let mut harness = TestHarness::new();
    harness.declare("physics", 0, AspectFlags::NONE);
    let object = ObjectId::new(1);
    harness
        .context
        .bind_object(object, AspectMask::single(0), false)
        .unwrap();
    let channel = harness.connect();

    harness
        .context
        .set_aspect_profile(object, 0, Profile::new(2))
        .unwrap();
    harness.tick();
    let first = harness.take_sent(channel);

    harness
        .context
        .set_aspect_profile(object, 0, Profile::new(4))
        .unwrap();
    harness.deliver_all(channel, &first, DeliveryOutcome::Delivered);

    let second = harness.tick_and_ack(channel);
    let (reliability, profile, changed, _) = update_of(&second);
    assert_eq!(reliability, Reliability::ReliableOrdered);
    assert_eq!(profile, Profile::new(4));
    assert!(changed);
}

#[test]
fn refused_profile_leaves_binding_untouched() {
    let mut harness = TestHarness::new();
    harness.declare("physics", 0, AspectFlags::NONE);
    let object = ObjectId::new(1);
    harness
        .context
        .bind_object(object, AspectMask::single(0), false)
        .unwrap();
    let channel = harness.connect();
    harness.game.lock().unwrap().refused_profiles.insert(3);

    assert!(harness
        .context
        .set_aspect_profile(object, 0, Profile::new(3))
        .is_err());
    assert_eq!(harness.context.aspect_profile(object, 0), Ok(Profile::default()));
    assert!(harness.tick_and_ack(channel).is_empty());
}
