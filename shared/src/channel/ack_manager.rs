use std::collections::HashMap;

use log::debug;

use crate::sendable::handle::SendableHandle;

use super::transport::DeliveryHandle;

/// Keeps track of which sendable each in-flight delivery carries
pub struct AckManager {
    in_flight: HashMap<DeliveryHandle, SendableHandle>,
    by_sendable: HashMap<SendableHandle, DeliveryHandle>,
}

impl AckManager {
    pub fn new() -> Self {
        Self {
            in_flight: HashMap::new(),
            by_sendable: HashMap::new(),
        }
    }

    pub fn record(&mut self, delivery: DeliveryHandle, sendable: SendableHandle) {
        if let Some(old_sendable) = self.in_flight.insert(delivery, sendable) {
            debug!(
                "Delivery {:?} reused, dropping record of sendable {}",
                delivery, old_sendable
            );
            self.by_sendable.remove(&old_sendable);
        }
        if let Some(old_delivery) = self.by_sendable.insert(sendable, delivery) {
            if old_delivery != delivery {
                self.in_flight.remove(&old_delivery);
            }
        }
    }

    /// Stop tracking a delivery once its outcome arrived
    pub fn take(&mut self, delivery: &DeliveryHandle) -> Option<SendableHandle> {
        let sendable = self.in_flight.remove(delivery)?;
        self.by_sendable.remove(&sendable);
        Some(sendable)
    }

    /// Stop tracking the delivery of a sendable, so a late outcome is ignored
    pub fn forget(&mut self, sendable: &SendableHandle) -> Option<DeliveryHandle> {
        let delivery = self.by_sendable.remove(sendable)?;
        self.in_flight.remove(&delivery);
        Some(delivery)
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
        self.by_sendable.clear();
    }
}

impl Default for AckManager {
    fn default() -> Self {
        Self::new()
    }
}
