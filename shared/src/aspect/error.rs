use thiserror::Error;

/// Programmer misuse of the binding API.
///
/// These are fatal when `ReplicationConfig::fatal_configuration_errors` is set
/// (the default for debug builds) and logged no-ops otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// Aspect index does not fit in an 8-bit aspect mask
    #[error("Aspect index {index} out of range - objects carry at most 8 aspects")]
    AspectIndexOutOfRange { index: u8 },

    /// Aspect declared twice with different flags
    #[error("Aspect {index} ({name}) already declared with flags {existing:#04x}, cannot redeclare with {requested:#04x}")]
    AspectRedeclared {
        index: u8,
        name: String,
        existing: u8,
        requested: u8,
    },

    /// Aspect used before `declare_aspect`
    #[error("Aspect {index} used before being declared")]
    AspectNotDeclared { index: u8 },

    /// `bind_object` called for an id that is already bound
    #[error("{object_id} is already bound")]
    DuplicateBinding { object_id: String },

    /// `bind_object` called for an id that channels still reference in flight
    #[error("{object_id} cannot be rebound while unbind traffic is still in flight")]
    ObjectIdInFlight { object_id: String },

    /// Static objects only leave the context through a full teardown
    #[error("{object_id} is static and can only be unbound by changing context")]
    StaticObjectUnbind { object_id: String },

    /// Profile does not fit the per-aspect profile table
    #[error("Profile {profile} out of range for aspect {index} - must be below {limit}")]
    ProfileOutOfRange { index: u8, profile: u8, limit: u8 },

    /// An object cannot be its own network parent
    #[error("{object_id} cannot be its own parent")]
    SelfParent { object_id: String },

    /// Parenting would make an object its own ancestor
    #[error("{object_id} cannot be parented to {parent_id}: {parent_id} already descends from it")]
    ParentCycle { object_id: String, parent_id: String },

    /// An RMI's attachment point contradicts the ordering of its reliability class
    #[error("RMI {function} on {object_id} ({attachment}) conflicts with queued aspect updates: {reason}")]
    RmiOrderingConflict {
        object_id: String,
        function: u8,
        attachment: &'static str,
        reason: String,
    },
}
