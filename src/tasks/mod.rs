//! Periodic tasks sharing the storage gateway: liveness, compression, synthetic writer.

pub mod compression;
pub mod lifecycle;
pub mod liveness;
pub mod writer;
