/// Nacked, dropped and timed out updates are resent with the state current
/// at the time of the resend, never with the stale payload.

use std::time::Duration;

use replica_shared::{
    AspectFlags, AspectMask, ContextEvent, DeliveryOutcome, ObjectId, SendableKind,
    SendableStateUpdate,
};
use replica_test::{aspect_payloads, TestHarness};

fn setup() -> (TestHarness, ObjectId) {
    let mut harness = TestHarness::new();
    harness.declare("script", 0, AspectFlags::NONE);
    let object = ObjectId::new(1);
    harness
        .context
        .bind_object(object, AspectMask::single(0), false)
        .unwrap();
    (harness, object)
}

fn change(harness: &mut TestHarness, object: ObjectId, value: u8) {
    harness.game.lock().unwrap().set_value(object, 0, &[value]);
    harness
        .context
        .notify_aspects_changed(object, AspectMask::single(0), None)
        .unwrap();
}

#[test]
fn nack_resends_current_state() {
    let (mut harness, object) = setup();
    let channel = harness.connect();

    change(&mut harness, object, 1);
    harness.tick();
    let in_flight = harness.take_sent(channel);
    change(&mut harness, object, 2);

    harness.deliver_all(channel, &in_flight, DeliveryOutcome::Nacked);
    let events = harness.context.take_events();
    assert!(events.iter().any(|event| matches!(
        event,
        ContextEvent::DeliveryFailed(failure)
            if failure.update == SendableStateUpdate::Nack
                && matches!(failure.kind, SendableKind::AspectUpdate { .. })
    )));

    let sent = harness.tick_and_ack(channel);
    assert_eq!(aspect_payloads(&sent, object, 0), vec![vec![2]]);
    assert_ne!(sent[0].handle, in_flight[0].1.handle);
}

#[test]
fn nack_without_newer_change_resends_same_state() {
    let (mut harness, object) = setup();
    let channel = harness.connect();

    change(&mut harness, object, 4);
    harness.tick();
    let in_flight = harness.take_sent(channel);
    harness.deliver_all(channel, &in_flight, DeliveryOutcome::Nacked);

    let sent = harness.tick_and_ack(channel);
    assert_eq!(aspect_payloads(&sent, object, 0), vec![vec![4]]);
    assert!(harness.tick_and_ack(channel).is_empty());
}

#[test]
fn dropped_update_is_requeued_with_fresh_payload() {
    let (mut harness, object) = setup();
    let channel = harness.connect();

    change(&mut harness, object, 3);
    harness.tick();
    let in_flight = harness.take_sent(channel);
    change(&mut harness, object, 4);

    harness.deliver_all(channel, &in_flight, DeliveryOutcome::Dropped);
    assert_eq!(harness.live_aspect_updates(channel, object, 0), 1);

    let sent = harness.tick_and_ack(channel);
    assert_eq!(aspect_payloads(&sent, object, 0), vec![vec![4]]);
    // requeued, not recreated
    assert_eq!(sent[0].handle, in_flight[0].1.handle);
}

#[test]
fn timed_out_update_is_resent_and_late_outcome_ignored() {
    let (mut harness, object) = setup();
    let channel = harness.connect();

    change(&mut harness, object, 6);
    harness.tick();
    let in_flight = harness.take_sent(channel);
    assert_eq!(in_flight.len(), 1);

    harness.advance(Duration::from_secs(3));
    harness.tick();
    let resent = harness.take_sent(channel);
    assert_eq!(aspect_payloads(
        &resent.iter().map(|(_, sendable)| sendable.clone()).collect::<Vec<_>>(),
        object,
        0
    ), vec![vec![6]]);

    // the first delivery is no longer tracked
    harness.deliver_all(channel, &in_flight, DeliveryOutcome::Delivered);
    assert_eq!(harness.live_aspect_updates(channel, object, 0), 1);

    harness.deliver_all(channel, &resent, DeliveryOutcome::Delivered);
    assert_eq!(harness.live_aspect_updates(channel, object, 0), 0);
}

#[test]
fn rejected_update_is_dropped() {
    let (mut harness, object) = setup();
    let channel = harness.connect();

    change(&mut harness, object, 8);
    harness.tick();
    let in_flight = harness.take_sent(channel);
    harness.deliver_all(channel, &in_flight, DeliveryOutcome::Rejected);

    assert!(harness.tick_and_ack(channel).is_empty());
    let events = harness.context.take_events();
    assert!(events.iter().any(|event| matches!(
        event,
        ContextEvent::DeliveryFailed(failure) if failure.update == SendableStateUpdate::Rejected
    )));
}

#[test]
fn nacked_spawn_is_recreated() {
    let (mut harness, object) = setup();
    let channel = harness.connect();

    let late = ObjectId::new(2);
    harness
        .context
        .bind_object(late, AspectMask::single(0), false)
        .unwrap();
    harness.tick();
    let sent = harness.take_sent(channel);
    let spawn: Vec<_> = sent
        .iter()
        .filter(|(_, sendable)| matches!(sendable.kind, SendableKind::Spawn { object } if object == late))
        .cloned()
        .collect();
    assert_eq!(spawn.len(), 1);

    harness.deliver_all(channel, &sent, DeliveryOutcome::Nacked);
    assert!(!harness.channel(channel).is_established(&late));

    let resent = harness.tick_and_ack(channel);
    assert!(matches!(resent[0].kind, SendableKind::Spawn { object } if object == late));
    assert!(harness.channel(channel).is_established(&late));
    assert!(harness.channel(channel).is_established(&object));
}
