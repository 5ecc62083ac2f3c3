use replica_shared::{AspectIndex, ObjectId, OutgoingSendable, SendableKind};

/// Payloads of the aspect updates in `sent`, for one object and aspect
pub fn aspect_payloads(
    sent: &[OutgoingSendable],
    object: ObjectId,
    aspect: AspectIndex,
) -> Vec<Vec<u8>> {
    sent.iter()
        .filter(|sendable| {
            matches!(
                sendable.kind,
                SendableKind::AspectUpdate { object: o, aspect: a, .. } if o == object && a == aspect
            )
        })
        .map(|sendable| sendable.payload.clone())
        .collect()
}

/// Position of the first sendable matching `predicate`
pub fn position_of(
    sent: &[OutgoingSendable],
    predicate: impl Fn(&SendableKind) -> bool,
) -> Option<usize> {
    sent.iter().position(|sendable| predicate(&sendable.kind))
}

/// Assert that at most one update per aspect is live on a channel
#[macro_export]
macro_rules! assert_single_in_flight {
    ($harness:expr, $channel:expr, $object:expr, $aspect:expr) => {
        let live = $harness.live_aspect_updates($channel, $object, $aspect);
        assert!(
            live <= 1,
            "{} live updates for aspect {} of {} on {}",
            live,
            $aspect,
            $object,
            $channel
        );
    };
}
