//! Platform abstraction: volume mounts, usage figures, and digital outputs.

pub mod pal;
