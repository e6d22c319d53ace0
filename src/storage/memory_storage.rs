use std::sync::RwLock;

use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::Storage;
use log::{debug, error};

/// In-process snapshot slot. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
    slot: RwLock<Option<Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn save_snapshot(&self, data: &[u8]) -> Result<(), StorageError> {
        let mut slot = self.slot.write().map_err(|e| {
            error!("Snapshot slot lock poisoned: {}", e);
            StorageError::WriteFailed
        })?;
        *slot = Some(data.to_vec());
        debug!("Stored {} byte(s) in memory", data.len());
        Ok(())
    }

    fn get_snapshot(&self) -> Result<Option<Vec<u8>>, StorageError> {
        let slot = self.slot.read().map_err(|e| {
            error!("Snapshot slot lock poisoned: {}", e);
            StorageError::ReadFailed
        })?;
        Ok(slot.clone())
    }
}
