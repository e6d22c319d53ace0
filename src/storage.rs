//! Storage subsystem
//!
//! This module provides the snapshot slot abstraction and its backends.
//!
//! Components:
//! - `storage_trait`: the Storage trait defining the single-slot API.
//! - `file_storage`: filesystem-backed implementation with atomic replace.
//! - `memory_storage`: in-process implementation for tests and ephemeral deployments.

pub mod file_storage;
pub mod memory_storage;
pub mod storage_trait;

pub use file_storage::FileStorage;
pub use memory_storage::MemoryStorage;
pub use storage_trait::Storage;
