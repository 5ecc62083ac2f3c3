use std::fmt;

pub type GroupId = u32;
pub type FunctionId = u8;
pub type SendOrder = u64;
pub type EstablishToken = u32;

/// Stable identifier of a simulation object bound to the network
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn to_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({})", self.0)
    }
}

/// Identifies one logical peer connection owned by a `ReplicationContext`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u32);

impl ChannelId {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn to_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel({})", self.0)
    }
}

/// Selects which field layout an aspect currently uses
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Profile(u8);

impl Profile {
    pub fn new(value: u8) -> Self {
        Self(value)
    }

    pub fn to_u8(&self) -> u8 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance_squared(&self, other: &Vec3) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    pub fn distance(&self, other: &Vec3) -> f32 {
        self.distance_squared(other).sqrt()
    }
}

/// Identifies one dispatched RMI request across all of its destination channels
pub type RmiId = u32;
