use clap::ValueEnum;
use serde::Deserialize;

/// Backing store for the snapshot slot.
#[derive(Debug, PartialEq, Clone, Copy, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Single file on disk, replaced atomically on every ingest
    #[default]
    File,
    /// Process-local slot, lost on restart
    Memory,
}
