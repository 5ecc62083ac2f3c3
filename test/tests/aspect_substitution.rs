/// Changes to an aspect collapse into its one live update on each channel.
/// A queued update is substituted in place; an update in flight is left
/// alone and the aspect is re-derived once its outcome arrives.

use replica_shared::{AspectFlags, AspectMask, DeliveryOutcome, ObjectId, SendableSlot};
use replica_test::{aspect_payloads, assert_single_in_flight, TestHarness};

fn harness_with_object(object: ObjectId) -> TestHarness {
    let mut harness = TestHarness::new();
    harness.declare("script", 0, AspectFlags::NONE);
    harness
        .context
        .bind_object(object, AspectMask::single(0), false)
        .unwrap();
    harness
}

fn change(harness: &mut TestHarness, object: ObjectId, value: u8) {
    harness.game.lock().unwrap().set_value(object, 0, &[value]);
    harness
        .context
        .notify_aspects_changed(object, AspectMask::single(0), None)
        .unwrap();
}

#[test]
fn changes_before_send_share_one_sendable() {
    let object = ObjectId::new(1);
    let mut harness = harness_with_object(object);
    let channel = harness.connect();

    change(&mut harness, object, 1);
    let first = harness
        .channel(channel)
        .queue()
        .slot_handle(&SendableSlot::Aspect(object, 0))
        .unwrap();

    change(&mut harness, object, 2);
    let second = harness
        .channel(channel)
        .queue()
        .slot_handle(&SendableSlot::Aspect(object, 0))
        .unwrap();

    assert_eq!(first, second);
    assert_single_in_flight!(harness, channel, object, 0);

    let sent = harness.tick_and_ack(channel);
    assert_eq!(aspect_payloads(&sent, object, 0), vec![vec![2]]);
    assert_eq!(sent[0].handle, first);
}

#[test]
fn change_while_in_flight_waits_for_outcome() {
    let object = ObjectId::new(1);
    let mut harness = harness_with_object(object);
    let channel = harness.connect();

    change(&mut harness, object, 1);
    harness.tick();
    let in_flight = harness.take_sent(channel);
    assert_eq!(in_flight.len(), 1);

    change(&mut harness, object, 2);
    assert_single_in_flight!(harness, channel, object, 0);
    assert_eq!(harness.channel(channel).queue().queued_len(), 0);

    harness.tick();
    assert!(harness.take_sent(channel).is_empty());

    // the stale acknowledgement leaves the newer change pending
    harness.deliver_all(channel, &in_flight, DeliveryOutcome::Delivered);
    assert_eq!(harness.channel(channel).queue().queued_len(), 1);

    let sent = harness.tick_and_ack(channel);
    assert_eq!(aspect_payloads(&sent, object, 0), vec![vec![2]]);

    assert!(harness.tick_and_ack(channel).is_empty());
}

#[test]
fn each_channel_gets_its_own_update() {
    let object = ObjectId::new(1);
    let mut harness = harness_with_object(object);
    let first = harness.connect();
    let second = harness.connect();

    change(&mut harness, object, 5);
    assert_single_in_flight!(harness, first, object, 0);
    assert_single_in_flight!(harness, second, object, 0);

    // only the first channel acknowledges
    harness.tick();
    let first_sent = harness.take_sent(first);
    let second_sent = harness.take_sent(second);
    harness.deliver_all(first, &first_sent, DeliveryOutcome::Delivered);
    assert_eq!(harness.live_aspect_updates(first, object, 0), 0);
    assert_eq!(harness.live_aspect_updates(second, object, 0), 1);
    assert_eq!(second_sent.len(), 1);
}

#[test]
fn unchanged_hash_state_is_not_resent() {
    let mut harness = TestHarness::new();
    harness.declare("inventory", 0, AspectFlags::HASH_STATE);
    let object = ObjectId::new(1);
    harness
        .context
        .bind_object(object, AspectMask::single(0), false)
        .unwrap();
    let channel = harness.connect();

    // same value as the acknowledged one
    harness
        .context
        .notify_aspects_changed(object, AspectMask::single(0), None)
        .unwrap();
    assert_eq!(harness.live_aspect_updates(channel, object, 0), 0);

    change(&mut harness, object, 9);
    let sent = harness.tick_and_ack(channel);
    assert_eq!(aspect_payloads(&sent, object, 0), vec![vec![9]]);
}

#[test]
fn skipped_synch_sends_nothing() {
    let object = ObjectId::new(1);
    let mut harness = harness_with_object(object);
    let channel = harness.connect();

    harness.game.lock().unwrap().skipped.insert((object, 0));
    harness
        .context
        .notify_aspects_changed(object, AspectMask::single(0), None)
        .unwrap();
    assert!(harness.tick_and_ack(channel).is_empty());
}

#[test]
fn disabled_aspect_produces_nothing_until_enabled() {
    let object = ObjectId::new(1);
    let mut harness = harness_with_object(object);
    let channel = harness.connect();

    change(&mut harness, object, 1);
    assert_eq!(harness.live_aspect_updates(channel, object, 0), 1);
    harness
        .context
        .enable_aspects(object, AspectMask::single(0), false)
        .unwrap();
    assert_eq!(harness.live_aspect_updates(channel, object, 0), 0);

    change(&mut harness, object, 2);
    assert!(harness.tick_and_ack(channel).is_empty());

    harness
        .context
        .enable_aspects(object, AspectMask::single(0), true)
        .unwrap();
    let sent = harness.tick_and_ack(channel);
    assert_eq!(aspect_payloads(&sent, object, 0), vec![vec![2]]);
}

#[test]
fn re_enabling_waits_for_update_in_flight() {
    let object = ObjectId::new(1);
    let mut harness = harness_with_object(object);
    let channel = harness.connect();

    change(&mut harness, object, 1);
    harness.tick();
    let in_flight = harness.take_sent(channel);
    let mask = AspectMask::single(0);
    harness.context.enable_aspects(object, mask, false).unwrap();
    harness.context.enable_aspects(object, mask, true).unwrap();
    assert_single_in_flight!(harness, channel, object, 0);
    assert_eq!(harness.live_aspect_updates(channel, object, 0), 1);

    change(&mut harness, object, 3);
    harness.deliver_all(channel, &in_flight, DeliveryOutcome::Delivered);
    let sent = harness.tick_and_ack(channel);
    assert_eq!(aspect_payloads(&sent, object, 0), vec![vec![3]]);
}

#[test]
fn timestamp_state_updates_carry_creation_time() {
    let object = ObjectId::new(1);
    let mut harness = TestHarness::new();
    harness.declare("script", 0, AspectFlags::NONE);
    harness.declare("movement", 1, AspectFlags::TIMESTAMP_STATE);
    harness
        .context
        .bind_object(object, AspectMask::from_bits(0b11), false)
        .unwrap();
    let channel = harness.connect();
    let created = harness.now;

    harness
        .context
        .notify_aspects_changed(object, AspectMask::from_bits(0b11), None)
        .unwrap();
    let sent = harness.tick_and_ack(channel);
    assert_ne!(harness.now, created);
    assert_eq!(sent.len(), 2);
    for sendable in &sent {
        let stamped = matches!(
            sendable.kind,
            replica_shared::SendableKind::AspectUpdate { aspect: 1, .. }
        );
        let expected = if stamped { Some(created) } else { None };
        assert_eq!(sendable.timestamp, expected);
    }
}
