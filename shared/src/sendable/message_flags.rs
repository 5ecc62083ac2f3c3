use std::ops::BitOr;

/// Per-sendable hints consumed by the queue and handed through to the
/// transport for the remote decoder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MessageFlags(u32);

impl MessageFlags {
    pub const NONE: Self = Self(0);
    pub const BLOCKS_STATE_CHANGE: Self = Self(0x0001);
    /// Remote side decodes this in step with the simulation frame
    pub const DECODE_IN_SYNC: Self = Self(0x0002);
    /// Taken ahead of every other eligible sendable when draining
    pub const NO_SEND_DELAY: Self = Self(0x0004);
    /// Drop instead of deferring when the dependent object is unknown remotely
    pub const DISCARD_IF_NO_ENTITY: Self = Self(0x0008);
    /// Part of context establishment; may flow before the channel is in game
    pub const STATE_CHANGE: Self = Self(0x0010);
    pub const DONT_AWAKE: Self = Self(0x0020);
    pub const AFTER_SPAWNING: Self = Self(0x0040);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: MessageFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MessageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
