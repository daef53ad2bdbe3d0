//! Activity logging: JSONL writer and the non-blocking logger thread.

pub mod activity;
pub mod jsonl;
