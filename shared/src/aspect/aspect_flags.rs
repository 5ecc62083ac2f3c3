use std::{
    fmt,
    ops::{BitAnd, BitOr, Not},
};

use crate::constants::MAX_ASPECTS;

/// Index of an aspect in `0..MAX_ASPECTS`; the aspect's bit is `1 << index`
pub type AspectIndex = u8;

/// Characteristics declared once for an aspect
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AspectFlags(u8);

impl AspectFlags {
    pub const NONE: Self = Self(0);
    /// Write authority may be handed to a remote channel
    pub const DELEGATABLE: Self = Self(0x10);
    /// Profile changes stay with the local side even while delegated
    pub const SERVER_MANAGED_PROFILE: Self = Self(0x20);
    /// Unchanged state hashes suppress resends
    pub const HASH_STATE: Self = Self(0x40);
    /// Updates carry the instant they were produced
    pub const TIMESTAMP_STATE: Self = Self(0x80);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, other: AspectFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AspectFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for AspectFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// A set of up to 8 aspects
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AspectMask(u8);

impl AspectMask {
    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self(u8::MAX);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Mask with only `index` set, or `None` if the index is out of range
    pub fn try_single(index: AspectIndex) -> Option<Self> {
        if index >= MAX_ASPECTS {
            return None;
        }
        Some(Self(1 << index))
    }

    /// # Panics
    ///
    /// Panics if `index >= MAX_ASPECTS`.
    pub fn single(index: AspectIndex) -> Self {
        Self::try_single(index).expect("aspect index must be below MAX_ASPECTS")
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, index: AspectIndex) -> bool {
        index < MAX_ASPECTS && self.0 & (1 << index) != 0
    }

    pub fn union(&self, other: AspectMask) -> Self {
        Self(self.0 | other.0)
    }

    pub fn intersection(&self, other: AspectMask) -> Self {
        Self(self.0 & other.0)
    }

    pub fn difference(&self, other: AspectMask) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Indices of the set aspects, lowest first
    pub fn iter(&self) -> impl Iterator<Item = AspectIndex> {
        let bits = self.0;
        (0..MAX_ASPECTS).filter(move |index| bits & (1 << index) != 0)
    }
}

impl BitOr for AspectMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitAnd for AspectMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.intersection(rhs)
    }
}

impl Not for AspectMask {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Display for AspectMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010b}", self.0)
    }
}
