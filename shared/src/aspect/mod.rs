pub mod aspect_flags;
pub mod aspect_table;
pub mod error;
