use std::sync::{Arc, Mutex};

use replica_shared::{DeliveryHandle, OutgoingSendable, Transport};

/// Everything a `RecordingTransport` was handed, shared with the test
#[derive(Clone, Default)]
pub struct SentLog {
    inner: Arc<Mutex<SentLogInner>>,
}

#[derive(Default)]
struct SentLogInner {
    next_delivery: u64,
    sent: Vec<(DeliveryHandle, OutgoingSendable)>,
}

impl SentLog {
    /// Takes every sendable sent since the last call, in send order
    pub fn take(&self) -> Vec<(DeliveryHandle, OutgoingSendable)> {
        std::mem::take(&mut self.inner.lock().unwrap().sent)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transport that never touches a socket; outcomes are fed back by the test
pub struct RecordingTransport {
    log: SentLog,
}

impl RecordingTransport {
    pub fn new() -> (Self, SentLog) {
        let log = SentLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, sendable: &OutgoingSendable) -> DeliveryHandle {
        let mut inner = self.log.inner.lock().unwrap();
        inner.next_delivery += 1;
        let delivery = DeliveryHandle::new(inner.next_delivery);
        inner.sent.push((delivery, sendable.clone()));
        delivery
    }
}
