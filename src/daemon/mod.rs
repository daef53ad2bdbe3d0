//! Daemon subsystem: startup sequence, command script, signal handling.

#[cfg(feature = "daemon")]
pub mod loop_main;
pub mod script;
#[cfg(feature = "daemon")]
pub mod signals;
