//! Per-frame rendering systems

pub mod batching;
