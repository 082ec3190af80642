//! Utility functions and helpers
//!
//! Timestamp helpers and crash-safe file writes.

pub mod atomic;
pub mod time;

pub use atomic::{atomic_write, atomic_write_with, cleanup_temp_files};
pub use time::{format_wire_date, now, unix_millis, unix_seconds};
