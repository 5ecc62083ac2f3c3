use std::{collections::VecDeque, fmt};

/// Handle to a sendable inside one channel's queue. The salt changes every
/// time an id is recycled, so stale handles never alias a newer sendable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SendableHandle {
    id: u32,
    salt: u32,
}

impl SendableHandle {
    pub const NULL: SendableHandle = SendableHandle { id: 0, salt: 0 };

    pub fn is_null(&self) -> bool {
        self.id == 0 && self.salt == 0
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn salt(&self) -> u32 {
        self.salt
    }
}

impl fmt::Display for SendableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}:{:08x}", self.id, self.salt)
    }
}

pub struct HandleGenerator {
    next_id: u32,
    recycled: VecDeque<SendableHandle>,
}

impl HandleGenerator {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            recycled: VecDeque::new(),
        }
    }

    pub fn generate(&mut self) -> SendableHandle {
        if let Some(old) = self.recycled.pop_front() {
            return SendableHandle {
                id: old.id,
                salt: old.salt.wrapping_add(1).max(1),
            };
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        SendableHandle { id, salt: 1 }
    }

    pub fn recycle(&mut self, handle: SendableHandle) {
        if !handle.is_null() {
            self.recycled.push_back(handle);
        }
    }
}

impl Default for HandleGenerator {
    fn default() -> Self {
        Self::new()
    }
}
