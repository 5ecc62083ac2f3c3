pub mod error;
pub mod handle;
pub mod message_flags;
pub mod priority;
pub mod pulse;
pub mod reliability;
pub mod sendable;
pub mod sendable_queue;
