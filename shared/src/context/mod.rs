pub mod error;
pub mod events;
pub mod game_context;
pub mod object_binding;
pub mod replication_context;
