/// Unbinding an object cancels its queued traffic, tells every channel that
/// knows it, and only completes once nothing in flight references it.

use replica_shared::{
    AspectFlags, AspectMask, ConfigurationError, ContextEvent, DeliveryOutcome, DisconnectCause,
    ObjectId, ReplicationError, SendableKind,
};
use replica_test::{position_of, TestHarness};

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

fn completed(harness: &mut TestHarness, object: ObjectId) -> bool {
    harness
        .context
        .take_events()
        .iter()
        .any(|event| *event == ContextEvent::UnbindCompleted(object))
}

#[test]
fn unbind_waits_for_traffic_in_flight() {
    let (mut harness, object) = setup();
    let channel = harness.connect();

    harness.game.lock().unwrap().set_value(object, 0, &[1]);
    harness
        .context
        .notify_aspects_changed(object, AspectMask::single(0), None)
        .unwrap();
    harness.tick();
    let update = harness.take_sent(channel);
    assert_eq!(update.len(), 1);

    harness.context.unbind_object(object).unwrap();
    assert!(!harness.context.is_bound(&object));
    assert!(harness.context.is_retiring(&object));
    assert_eq!(harness.game.lock().unwrap().unbound, vec![object]);

    assert!(matches!(
        harness.context.bind_object(object, AspectMask::single(0), false),
        Err(ReplicationError::Configuration(
            ConfigurationError::ObjectIdInFlight { .. }
        ))
    ));

    harness.tick();
    let unbind = harness.take_sent(channel);
    assert!(matches!(
        unbind.as_slice(),
        [(_, sendable)] if sendable.kind == (SendableKind::Unbind { object })
    ));

    harness.deliver_all(channel, &update, DeliveryOutcome::Delivered);
    assert!(harness.context.is_retiring(&object));
    assert!(!completed(&mut harness, object));

    harness.deliver_all(channel, &unbind, DeliveryOutcome::Delivered);
    assert!(!harness.context.is_retiring(&object));
    assert!(completed(&mut harness, object));
    assert_eq!(harness.game.lock().unwrap().completed, vec![object]);

    harness
        .context
        .bind_object(object, AspectMask::single(0), false)
        .unwrap();
}

#[test]
fn unsent_spawn_completes_immediately() {
    let mut harness = TestHarness::new();
    harness.declare("script", 0, AspectFlags::NONE);
    let channel = harness.connect();

    let object = ObjectId::new(9);
    harness
        .context
        .bind_object(object, AspectMask::single(0), false)
        .unwrap();
    assert!(harness.channel(channel).has_seen_spawn(&object));

    harness.context.unbind_object(object).unwrap();
    assert!(!harness.context.is_retiring(&object));
    assert!(completed(&mut harness, object));
    assert!(harness.channel(channel).queue().is_empty());
    assert!(harness.tick_and_ack(channel).is_empty());
}

#[test]
fn nacked_unbind_is_resent() {
    let (mut harness, object) = setup();
    let channel = harness.connect();

    harness.context.unbind_object(object).unwrap();
    harness.tick();
    let first = harness.take_sent(channel);
    harness.deliver_all(channel, &first, DeliveryOutcome::Nacked);
    assert!(harness.context.is_retiring(&object));

    let second = harness.tick_and_ack(channel);
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].kind, SendableKind::Unbind { object });
    assert_ne!(second[0].handle, first[0].1.handle);
    assert!(!harness.context.is_retiring(&object));
}

#[test]
fn unbind_sent_before_game_starts_flows() {
    let (mut harness, object) = setup();
    let channel = harness.add_channel();
    harness.handshake(channel);

    // the spawn goes out while the channel is still establishing
    harness.tick();
    let spawn = harness.take_sent(channel);
    assert!(position_of(
        &spawn.iter().map(|(_, s)| s.clone()).collect::<Vec<_>>(),
        |kind| *kind == SendableKind::Spawn { object }
    )
    .is_some());
    assert!(!harness.channel(channel).is_in_game());

    harness.context.unbind_object(object).unwrap();
    harness.tick();
    let unbind = harness.take_sent(channel);
    assert!(unbind
        .iter()
        .any(|(_, sendable)| sendable.kind == SendableKind::Unbind { object }));

    harness.deliver_all(channel, &spawn, DeliveryOutcome::Delivered);
    harness.deliver_all(channel, &unbind, DeliveryOutcome::Delivered);
    assert!(completed(&mut harness, object));
}

#[test]
fn disconnect_releases_retiring_objects() {
    let (mut harness, object) = setup();
    let channel = harness.connect();

    harness.context.unbind_object(object).unwrap();
    assert!(harness.context.is_retiring(&object));

    harness
        .context
        .disconnect_channel(channel, DisconnectCause::Kicked, "bye", harness.now)
        .unwrap();
    assert!(!harness.context.is_retiring(&object));
    assert!(completed(&mut harness, object));
}

#[test]
fn children_release_parent_link_on_completion() {
    let mut harness = TestHarness::new();
    harness.declare("script", 0, AspectFlags::NONE);
    let (parent, child) = (ObjectId::new(1), ObjectId::new(2));
    for object in [parent, child] {
        harness
            .context
            .bind_object(object, AspectMask::EMPTY, false)
            .unwrap();
    }
    harness.context.set_parent_object(child, Some(parent)).unwrap();

    harness.context.unbind_object(parent).unwrap();
    assert!(completed(&mut harness, parent));
    assert_eq!(harness.context.binding(&child).unwrap().parent, None);
}
