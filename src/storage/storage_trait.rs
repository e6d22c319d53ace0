//! Storage Trait
//!
//! This module defines the `Storage` trait, the single-slot interface the receiver reads and
//! writes the current snapshot through.
//!
//! Implementors of this trait are responsible for:
//! - Replacing the snapshot as a whole on every save (no append, no versioning)
//! - Never exposing a partially written snapshot to readers
//! - Reporting "nothing stored yet" as `Ok(None)` rather than as an error
//!
//! All methods return a `Result` to handle potential storage errors.

use crate::error_handling::types::StorageError;

/// The `Storage` trait defines the interface for snapshot storage backends.
///
/// A backend holds at most one snapshot, an opaque byte sequence. The receiver shares one
/// backend between all connections through an `Arc<dyn Storage>`, so implementations must be
/// safe to call concurrently. Concurrent saves resolve as last-writer-wins.
pub trait Storage: Send + Sync {
    /// Replaces the stored snapshot with `data`.
    ///
    /// On failure the previously stored snapshot must remain readable and unchanged.
    fn save_snapshot(&self, data: &[u8]) -> Result<(), StorageError>;

    /// Returns the current snapshot, or `None` when nothing has been saved yet.
    fn get_snapshot(&self) -> Result<Option<Vec<u8>>, StorageError>;
}
