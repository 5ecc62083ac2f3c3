use crate::sendable::{sendable::OutgoingSendable, sendable_queue::SendableStateUpdate};

/// Identifies one unit handed to a `Transport`. Assigned by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryHandle(u64);

impl DeliveryHandle {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn to_u64(&self) -> u64 {
        self.0
    }
}

/// What the transport learned about a delivery
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Lost before delivery completed
    Dropped,
    /// The remote refused it
    Nacked,
    /// Permanent failure, e.g. the remote no longer knows the object
    Rejected,
}

impl DeliveryOutcome {
    pub fn to_state_update(&self) -> SendableStateUpdate {
        match self {
            DeliveryOutcome::Delivered => SendableStateUpdate::Ack,
            DeliveryOutcome::Dropped => SendableStateUpdate::Requeue,
            DeliveryOutcome::Nacked => SendableStateUpdate::Nack,
            DeliveryOutcome::Rejected => SendableStateUpdate::Rejected,
        }
    }
}

/// Physical delivery of serialized sendables. Outcomes are reported back
/// through `ReplicationContext::process_delivery`.
pub trait Transport: Send {
    fn send(&mut self, sendable: &OutgoingSendable) -> DeliveryHandle;
}
