pub mod ack_manager;
pub mod channel;
pub mod disconnect_cause;
pub mod transport;
