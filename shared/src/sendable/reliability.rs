/// Delivery guarantees of a single sendable. Fixed at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Reliability {
    /// Guaranteed delivery, arrives in send order relative to other
    /// reliable-ordered sendables on the same channel
    ReliableOrdered,
    /// Guaranteed delivery, any order
    ReliableUnordered,
    /// Best effort, but a late arrival never overtakes a later one
    UnreliableOrdered,
    /// Best effort, any order
    UnreliableUnordered,
}

impl Reliability {
    pub const ALL: [Reliability; 4] = [
        Reliability::ReliableOrdered,
        Reliability::ReliableUnordered,
        Reliability::UnreliableOrdered,
        Reliability::UnreliableUnordered,
    ];

    pub fn is_reliable(&self) -> bool {
        matches!(
            self,
            Reliability::ReliableOrdered | Reliability::ReliableUnordered
        )
    }

    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            Reliability::ReliableOrdered | Reliability::UnreliableOrdered
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Reliability::ReliableOrdered => "reliable-ordered",
            Reliability::ReliableUnordered => "reliable-unordered",
            Reliability::UnreliableOrdered => "unreliable-ordered",
            Reliability::UnreliableUnordered => "unreliable-unordered",
        }
    }
}
