//! Error types shared across the receiver.

pub mod types;
