use thiserror::Error;

use crate::{
    aspect::error::ConfigurationError, establish::error::EstablishmentError,
    sendable::error::SendableError,
};

/// Operation on an object or channel the context does not know. Reported,
/// never fatal; the operation is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeBindingError {
    #[error("Cannot {operation}: {object_id} is not bound")]
    ObjectNotBound {
        object_id: String,
        operation: &'static str,
    },

    #[error("{channel_id} not found")]
    ChannelNotFound { channel_id: String },

    #[error("{channel_id} is disconnecting")]
    ChannelDisconnecting { channel_id: String },

    #[error("Aspect {aspect} is not part of {object_id}'s binding")]
    AspectNotBound { object_id: String, aspect: u8 },

    #[error("Game context refused profile {profile} for aspect {aspect} of {object_id}")]
    ProfileRejected {
        object_id: String,
        aspect: u8,
        profile: u8,
    },
}

/// Write-authority violations around delegated objects
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorityError {
    #[error("{channel_id} does not hold authority over {object_id}")]
    NotAuthoritative {
        object_id: String,
        channel_id: String,
    },

    #[error("{object_id} is not delegated to any channel")]
    NotDelegated { object_id: String },

    #[error("Aspect {aspect} of {object_id} is not delegatable")]
    AspectNotDelegatable { object_id: String, aspect: u8 },

    #[error("Profile of aspect {aspect} of {object_id} is controlled remotely while delegated")]
    ProfileNotServerManaged { object_id: String, aspect: u8 },
}

/// Any error surfaced by a `ReplicationContext` operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplicationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Binding(#[from] RuntimeBindingError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error(transparent)]
    Establishment(#[from] EstablishmentError),

    #[error(transparent)]
    Sendable(#[from] SendableError),
}
