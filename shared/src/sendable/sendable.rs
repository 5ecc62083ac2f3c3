use std::time::Instant;

use crate::{
    aspect::aspect_flags::{AspectIndex, AspectMask},
    types::{FunctionId, GroupId, ObjectId, Profile, RmiId, SendOrder},
};

use super::{
    handle::SendableHandle, message_flags::MessageFlags, priority::PositionInfo,
    pulse::PulseState, reliability::Reliability,
};

/// Logical slot a sendable occupies in a channel's queue. A queued sendable
/// in a slot can be substituted by a newer one for the same slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SendableSlot {
    Spawn(ObjectId),
    Aspect(ObjectId, AspectIndex),
    PostSpawn(ObjectId),
    Unbind(ObjectId),
    RemoteUpdate(ObjectId),
}

/// What a sendable represents, used to route delivery feedback
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendableKind {
    Spawn {
        object: ObjectId,
    },
    AspectUpdate {
        object: ObjectId,
        aspect: AspectIndex,
        profile: Profile,
        profile_changed: bool,
        version: u32,
        hash: Option<u32>,
    },
    /// Game data that follows an acknowledged spawn
    PostSpawn {
        object: ObjectId,
    },
    Unbind {
        object: ObjectId,
    },
    /// Asks the controlling remote to resend delegated aspects
    RemoteUpdateRequest {
        object: ObjectId,
        aspects: AspectMask,
    },
    Rmi {
        object: ObjectId,
        function: FunctionId,
        rmi_id: RmiId,
    },
    Message,
}

impl SendableKind {
    pub fn object(&self) -> Option<ObjectId> {
        match self {
            SendableKind::Spawn { object }
            | SendableKind::AspectUpdate { object, .. }
            | SendableKind::PostSpawn { object }
            | SendableKind::Unbind { object }
            | SendableKind::RemoteUpdateRequest { object, .. }
            | SendableKind::Rmi { object, .. } => Some(*object),
            SendableKind::Message => None,
        }
    }

    pub fn is_aspect_update(&self) -> bool {
        matches!(self, SendableKind::AspectUpdate { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            SendableKind::Spawn { .. } => "spawn",
            SendableKind::AspectUpdate { .. } => "aspect update",
            SendableKind::PostSpawn { .. } => "post spawn",
            SendableKind::Unbind { .. } => "unbind",
            SendableKind::RemoteUpdateRequest { .. } => "remote update request",
            SendableKind::Rmi { .. } => "rmi",
            SendableKind::Message => "message",
        }
    }
}

/// A unit of outbound work
#[derive(Clone)]
pub struct Sendable {
    description: String,
    reliability: Reliability,
    kind: SendableKind,
    group: GroupId,
    priority_delta: f32,
    flags: MessageFlags,
    slot: Option<SendableSlot>,
    position: Option<PositionInfo>,
    pulses: Option<PulseState>,
    timestamp: Option<Instant>,
    payload: Vec<u8>,
}

impl Sendable {
    pub fn new(
        description: &str,
        reliability: Reliability,
        kind: SendableKind,
        payload: Vec<u8>,
    ) -> Self {
        let group = kind.object().map(|object| object.to_u32()).unwrap_or(0);
        Self {
            description: description.to_string(),
            reliability,
            kind,
            group,
            priority_delta: 0.0,
            flags: MessageFlags::NONE,
            slot: None,
            position: None,
            pulses: None,
            timestamp: None,
            payload,
        }
    }

    /// A plain message that is not tied to any object
    pub fn message(description: &str, reliability: Reliability, payload: Vec<u8>) -> Self {
        Self::new(description, reliability, SendableKind::Message, payload)
    }

    pub fn with_group(mut self, group: GroupId) -> Self {
        self.group = group;
        self
    }

    pub fn with_priority_delta(mut self, priority_delta: f32) -> Self {
        self.priority_delta = priority_delta;
        self
    }

    pub fn with_flags(mut self, flags: MessageFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_slot(mut self, slot: SendableSlot) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn with_position(mut self, position: Option<PositionInfo>) -> Self {
        self.position = position;
        self
    }

    pub fn with_pulses(mut self, pulses: PulseState) -> Self {
        self.pulses = Some(pulses);
        self
    }

    pub fn with_timestamp(mut self, timestamp: Instant) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn reliability(&self) -> Reliability {
        self.reliability
    }

    pub fn kind(&self) -> &SendableKind {
        &self.kind
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn priority_delta(&self) -> f32 {
        self.priority_delta
    }

    pub fn flags(&self) -> MessageFlags {
        self.flags
    }

    pub fn slot(&self) -> Option<SendableSlot> {
        self.slot
    }

    pub fn position(&self) -> Option<&PositionInfo> {
        self.position.as_ref()
    }

    pub fn pulses(&self) -> Option<&PulseState> {
        self.pulses.as_ref()
    }

    pub fn timestamp(&self) -> Option<Instant> {
        self.timestamp
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload size used for bandwidth accounting
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub(crate) fn set_position(&mut self, position: Option<PositionInfo>) {
        self.position = position;
    }
}

/// A sendable handed to the transport, stamped with its send order
#[derive(Clone, Debug)]
pub struct OutgoingSendable {
    pub handle: SendableHandle,
    pub order: SendOrder,
    pub description: String,
    pub reliability: Reliability,
    pub flags: MessageFlags,
    pub kind: SendableKind,
    pub timestamp: Option<Instant>,
    pub payload: Vec<u8>,
}
