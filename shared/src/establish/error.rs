use thiserror::Error;

use crate::channel::disconnect_cause::DisconnectCause;

/// Errors that can occur while bringing a channel into the game
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EstablishmentError {
    #[error("Establishment task '{task}' failed in state {state} ({cause}): {reason}")]
    TaskFailed {
        task: String,
        state: &'static str,
        cause: DisconnectCause,
        reason: String,
    },

    #[error("Protocol version mismatch: expected {expected}, received {received}")]
    VersionMismatch { expected: u32, received: u32 },

    #[error("Authentication failed for {channel}")]
    AuthenticationFailed { channel: String },

    #[error("Handshake for {channel} received in state {state}")]
    UnexpectedHandshake { channel: String, state: &'static str },
}

impl EstablishmentError {
    pub fn cause(&self) -> DisconnectCause {
        match self {
            EstablishmentError::TaskFailed { cause, .. } => *cause,
            EstablishmentError::VersionMismatch { .. } => DisconnectCause::VersionMismatch,
            EstablishmentError::AuthenticationFailed { .. } => {
                DisconnectCause::AuthenticationFailed
            }
            EstablishmentError::UnexpectedHandshake { .. } => DisconnectCause::ProtocolError,
        }
    }
}
