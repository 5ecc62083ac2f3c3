use std::sync::Arc;

use crate::{
    sendable::{message_flags::MessageFlags, reliability::Reliability},
    types::{ChannelId, FunctionId, ObjectId, SendOrder},
};

/// Where an RMI lands relative to pending aspect updates of its object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttachmentPoint {
    /// Before any pending aspect update of the object
    PreAttach,
    /// After every pending aspect update of the object
    PostAttach,
    /// No constraint relative to aspect sync
    NoAttach,
}

impl AttachmentPoint {
    pub fn name(&self) -> &'static str {
        match self {
            AttachmentPoint::PreAttach => "pre-attach",
            AttachmentPoint::PostAttach => "post-attach",
            AttachmentPoint::NoAttach => "no-attach",
        }
    }
}

/// Notified about every destination sendable of an RMI
pub trait RmiListener: Send + Sync {
    fn on_send(&self, channel: ChannelId, user_id: u32, order: SendOrder);

    /// `acked` is false on Nack, Rejected, or when the RMI was dropped
    fn on_ack(&self, channel: ChannelId, user_id: u32, acked: bool);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RmiTarget {
    Channel(ChannelId),
    AllChannels,
    AllExcept(ChannelId),
}

impl RmiTarget {
    pub fn includes(&self, channel: &ChannelId) -> bool {
        match self {
            RmiTarget::Channel(target) => target == channel,
            RmiTarget::AllChannels => true,
            RmiTarget::AllExcept(excluded) => excluded != channel,
        }
    }
}

#[derive(Clone)]
pub struct RmiRequest {
    pub object: ObjectId,
    pub function: FunctionId,
    pub reliability: Reliability,
    pub attachment: AttachmentPoint,
    /// Must exist on the remote side before the RMI is delivered
    pub dependent: Option<ObjectId>,
    pub listener: Option<Arc<dyn RmiListener>>,
    pub user_id: u32,
    pub flags: MessageFlags,
    pub priority_delta: f32,
    pub description: String,
    pub payload: Vec<u8>,
}

impl RmiRequest {
    pub fn new(
        object: ObjectId,
        function: FunctionId,
        reliability: Reliability,
        attachment: AttachmentPoint,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            object,
            function,
            reliability,
            attachment,
            dependent: None,
            listener: None,
            user_id: 0,
            flags: MessageFlags::NONE,
            priority_delta: 0.0,
            description: format!("rmi {} on {}", function, object),
            payload,
        }
    }

    pub fn with_dependent(mut self, dependent: ObjectId) -> Self {
        self.dependent = Some(dependent);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn RmiListener>, user_id: u32) -> Self {
        self.listener = Some(listener);
        self.user_id = user_id;
        self
    }

    pub fn with_flags(mut self, flags: MessageFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_priority_delta(mut self, priority_delta: f32) -> Self {
        self.priority_delta = priority_delta;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Objects that must be known to a channel before this RMI may be queued
    /// there
    pub fn required_objects(&self) -> Vec<ObjectId> {
        let mut output = vec![self.object];
        if let Some(dependent) = self.dependent {
            if dependent != self.object {
                output.push(dependent);
            }
        }
        output
    }
}
