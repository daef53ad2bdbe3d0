#![forbid(unsafe_code)]

//! sdcloud: field data logger runtime.
//!
//! Records land on a removable card and are moved onto always-present flash,
//! where periodic tasks work on them:
//! 1. **Transfer admission**: capacity-checked, sliced copies from the card to flash
//! 2. **Liveness monitor**: a digital output pulse whenever the record file grows
//! 3. **Compression worker**: run-length or delta encoding of the record file
//!
//! Every filesystem touch goes through one [`storage::gateway::StorageGateway`],
//! which serializes access behind a single bounded-wait lock.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use sdcloud::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use sdcloud::core::config::Config;
//! use sdcloud::compress::{Algorithm, encode_bytes};
//! ```

pub mod prelude;

pub mod compress;
pub mod core;
pub mod daemon;
pub mod logger;
pub mod platform;
pub mod storage;
pub mod tasks;
