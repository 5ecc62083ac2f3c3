use thiserror::Error;

/// Errors that can occur during SendableQueue operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendableError {
    /// Handle does not name a live sendable in this queue
    #[error("Sendable {handle} not found in queue")]
    HandleNotFound { handle: String },

    /// Queue grew past its limit; substitution should make this impossible,
    /// so it indicates corruption elsewhere
    #[error("Sendable queue overflow: {queued} sendables queued, limit is {limit}")]
    QueueOverflow { queued: usize, limit: usize },

    /// An ordering dependency contradicts another ordering constraint
    #[error("Sendable {handle} cannot be ordered after {after}: {reason}")]
    OrderingConflict {
        handle: String,
        after: String,
        reason: &'static str,
    },

    /// Delivery feedback arrived for a sendable in the wrong state
    #[error("Cannot apply {update} to sendable {handle} while it is {state}")]
    InvalidTransition {
        handle: String,
        state: &'static str,
        update: &'static str,
    },
}

impl SendableError {
    /// Overflow means the queue bound was broken elsewhere; nothing can
    /// recover from that
    pub fn is_fatal(&self) -> bool {
        matches!(self, SendableError::QueueOverflow { .. })
    }
}

/// Panics on fatal queue errors, passes everything else through
pub(crate) fn check_fatal<T>(result: Result<T, SendableError>) -> Result<T, SendableError> {
    match result {
        Err(error) if error.is_fatal() => panic!("{}", error),
        other => other,
    }
}
