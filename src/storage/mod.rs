//! Storage coordination: the lock, the volumes, the gateway, and transfers.

pub mod gateway;
pub mod lock;
pub mod transfer;
pub mod volumes;
