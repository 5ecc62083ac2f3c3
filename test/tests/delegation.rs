/// Delegating authority over an object stops update production for its
/// delegatable aspects on every channel; taking it back resumes it.

use replica_shared::{
    AspectFlags, AspectMask, AuthorityError, DeliveryOutcome, ObjectId, Profile, ReplicationError,
    SendableKind, SendableSlot,
};
use replica_test::{aspect_payloads, TestHarness};

const SCRIPT: u8 = 0;
const PHYSICS: u8 = 1;
const ANIMATION: u8 = 2;

fn setup() -> (TestHarness, ObjectId) {
    let mut harness = TestHarness::new();
    harness.declare("script", SCRIPT, AspectFlags::NONE);
    harness.declare("physics", PHYSICS, AspectFlags::DELEGATABLE);
    harness.declare(
        "animation",
        ANIMATION,
        AspectFlags::DELEGATABLE | AspectFlags::SERVER_MANAGED_PROFILE,
    );
    let object = ObjectId::new(1);
    harness
        .context
        .bind_object(object, AspectMask::from_bits(0b111), false)
        .unwrap();
    (harness, object)
}

fn change_all(harness: &mut TestHarness, object: ObjectId, value: u8) {
    {
        let mut game = harness.game.lock().unwrap();
        for aspect in [SCRIPT, PHYSICS, ANIMATION] {
            game.set_value(object, aspect, &[value]);
        }
    }
    harness
        .context
        .notify_aspects_changed(object, AspectMask::from_bits(0b111), None)
        .unwrap();
}

#[test]
fn delegation_stops_delegatable_updates_everywhere() {
    let (mut harness, object) = setup();
    let owner = harness.connect();
    let observer = harness.connect();

    harness.context.delegate_authority(object, Some(owner)).unwrap();
    change_all(&mut harness, object, 1);

    for channel in [owner, observer] {
        let sent = harness.tick_and_ack(channel);
        assert_eq!(aspect_payloads(&sent, object, SCRIPT), vec![vec![1]]);
        assert!(aspect_payloads(&sent, object, PHYSICS).is_empty());
        assert!(aspect_payloads(&sent, object, ANIMATION).is_empty());
    }
    assert_eq!(
        harness.game.lock().unwrap().controllers,
        vec![(object, Some(owner))]
    );
}

#[test]
fn delegation_cancels_queued_updates() {
    let (mut harness, object) = setup();
    let owner = harness.connect();

    change_all(&mut harness, object, 2);
    assert_eq!(harness.live_aspect_updates(owner, object, PHYSICS), 1);

    harness.context.delegate_authority(object, Some(owner)).unwrap();
    assert_eq!(harness.live_aspect_updates(owner, object, PHYSICS), 0);
    assert_eq!(harness.live_aspect_updates(owner, object, SCRIPT), 1);
}

#[test]
fn returning_authority_resumes_updates() {
    let (mut harness, object) = setup();
    let owner = harness.connect();

    harness.context.delegate_authority(object, Some(owner)).unwrap();
    change_all(&mut harness, object, 3);
    harness.tick_and_ack(owner);

    harness.context.delegate_authority(object, None).unwrap();
    assert!(!harness.context.remote_has_authority(&owner, &object));
    let sent = harness.tick_and_ack(owner);
    assert_eq!(aspect_payloads(&sent, object, PHYSICS), vec![vec![3]]);
    assert_eq!(aspect_payloads(&sent, object, ANIMATION), vec![vec![3]]);
}

#[test]
fn server_managed_profile_still_flows_while_delegated() {
    let (mut harness, object) = setup();
    let owner = harness.connect();
    harness.context.delegate_authority(object, Some(owner)).unwrap();

    harness
        .context
        .set_aspect_profile(object, ANIMATION, Profile::new(1))
        .unwrap();
    let sent = harness.tick_and_ack(owner);
    assert!(sent.iter().any(|sendable| matches!(
        sendable.kind,
        SendableKind::AspectUpdate { aspect: ANIMATION, profile_changed: true, .. }
    )));

    // after the profile landed the aspect is silent again
    change_all(&mut harness, object, 4);
    let sent = harness.tick_and_ack(owner);
    assert!(aspect_payloads(&sent, object, ANIMATION).is_empty());
}

#[test]
fn disconnecting_controller_returns_authority() {
    let (mut harness, object) = setup();
    let owner = harness.connect();
    let observer = harness.connect();
    harness.context.delegate_authority(object, Some(owner)).unwrap();

    harness
        .context
        .disconnect_channel(
            owner,
            replica_shared::DisconnectCause::Timeout,
            "gone",
            harness.now,
        )
        .unwrap();
    assert!(harness.context.binding(&object).unwrap().controller.is_none());

    change_all(&mut harness, object, 5);
    let sent = harness.tick_and_ack(observer);
    assert_eq!(aspect_payloads(&sent, object, PHYSICS), vec![vec![5]]);
}

fn remote_update_requests(
    sent: &[replica_shared::OutgoingSendable],
    object: ObjectId,
) -> Vec<AspectMask> {
    sent.iter()
        .filter_map(|sendable| match sendable.kind {
            SendableKind::RemoteUpdateRequest { object: target, aspects } if target == object => {
                Some(aspects)
            }
            _ => None,
        })
        .collect()
}

#[test]
fn remote_update_request_needs_a_controller() {
    let (mut harness, object) = setup();
    harness.connect();

    assert!(matches!(
        harness
            .context
            .request_remote_update(object, AspectMask::single(PHYSICS)),
        Err(ReplicationError::Authority(AuthorityError::NotDelegated { .. }))
    ));
}

#[test]
fn remote_update_request_rejects_owned_aspects() {
    let (mut harness, object) = setup();
    let owner = harness.connect();
    harness.context.delegate_authority(object, Some(owner)).unwrap();

    assert!(matches!(
        harness
            .context
            .request_remote_update(object, AspectMask::single(SCRIPT)),
        Err(ReplicationError::Authority(AuthorityError::AspectNotDelegatable { aspect: SCRIPT, .. }))
    ));
    assert!(harness
        .channel(owner)
        .queue()
        .slot_handle(&SendableSlot::RemoteUpdate(object))
        .is_none());
}

#[test]
fn remote_update_requests_merge_on_the_controller() {
    let (mut harness, object) = setup();
    let owner = harness.connect();
    let observer = harness.connect();
    harness.context.delegate_authority(object, Some(owner)).unwrap();

    harness
        .context
        .request_remote_update(object, AspectMask::single(PHYSICS))
        .unwrap();
    harness
        .context
        .request_remote_update(object, AspectMask::single(ANIMATION))
        .unwrap();

    let sent = harness.tick_and_ack(owner);
    let requests = remote_update_requests(&sent, object);
    assert_eq!(requests, vec![AspectMask::from_bits(0b110)]);
    let request = sent
        .iter()
        .find(|sendable| matches!(sendable.kind, SendableKind::RemoteUpdateRequest { .. }))
        .unwrap();
    assert_eq!(request.payload, vec![0b110]);

    assert!(remote_update_requests(&harness.tick_and_ack(observer), object).is_empty());
}

#[test]
fn nacked_remote_update_request_is_resent() {
    let (mut harness, object) = setup();
    let owner = harness.connect();
    harness.context.delegate_authority(object, Some(owner)).unwrap();
    harness
        .context
        .request_remote_update(object, AspectMask::single(PHYSICS))
        .unwrap();

    harness.tick();
    let sent = harness.take_sent(owner);
    harness.deliver_all(owner, &sent, DeliveryOutcome::Nacked);

    let resent = harness.tick_and_ack(owner);
    assert_eq!(
        remote_update_requests(&resent, object),
        vec![AspectMask::single(PHYSICS)]
    );
}

#[test]
fn returning_authority_drops_queued_remote_update_request() {
    let (mut harness, object) = setup();
    let owner = harness.connect();
    harness.context.delegate_authority(object, Some(owner)).unwrap();
    harness
        .context
        .request_remote_update(object, AspectMask::single(PHYSICS))
        .unwrap();

    harness.context.delegate_authority(object, None).unwrap();
    let sent = harness.tick_and_ack(owner);
    assert!(remote_update_requests(&sent, object).is_empty());
}
