pub mod context_establisher;
pub mod context_view_state;
pub mod error;
pub mod establish_task;
pub mod handshake;
