use crate::{
    channel::disconnect_cause::DisconnectCause,
    sendable::{sendable::SendableKind, sendable_queue::SendableStateUpdate},
    types::{ChannelId, ObjectId},
};

/// A sendable the remote refused. Nacked aspect updates are re-derived and
/// spawns are resent; everything else is dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub channel: ChannelId,
    pub description: String,
    pub kind: SendableKind,
    pub update: SendableStateUpdate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContextEvent {
    /// Both establishers reached `InGame`; gameplay sendables flow
    ChannelEstablished(ChannelId),
    ChannelDisconnected {
        channel: ChannelId,
        cause: DisconnectCause,
        reason: String,
    },
    DeliveryFailed(DeliveryFailure),
    /// No channel references the object any more
    UnbindCompleted(ObjectId),
}
