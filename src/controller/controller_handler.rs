use crate::configuration::config::Config;
use crate::configuration::types::StorageBackend;
use crate::error_handling::types::*;
use crate::network::receiver::{ReceiverHandle, ReceiverService, ReceiverSettings};
use crate::storage::{FileStorage, MemoryStorage, Storage};
use log::{error, info};
use std::sync::Arc;

/// Owns the configuration and drives the receiver from startup to shutdown.
pub struct Controller {
    pub config: Config,
}

impl Controller {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Instantiates the configured snapshot backend.
    pub fn build_storage(&self) -> Result<Arc<dyn Storage>, ControllerError> {
        match self.config.storage_backend {
            StorageBackend::File => {
                let storage = FileStorage::new(&self.config.store_path).map_err(|e| {
                    error!(
                        "Unable to prepare snapshot file {}: {}",
                        self.config.store_path.display(),
                        e
                    );
                    ControllerError::InitializationFailed(e.to_string())
                })?;
                Ok(Arc::new(storage))
            }
            StorageBackend::Memory => {
                info!("Using in-memory snapshot storage, nothing survives a restart");
                Ok(Arc::new(MemoryStorage::new()))
            }
        }
    }

    /// Builds storage and starts serving, returning once the listener is bound.
    pub async fn start(&self) -> Result<ReceiverHandle, ControllerError> {
        let settings = ReceiverSettings::from_config(&self.config)?;
        let storage = self.build_storage()?;
        let handle = ReceiverService::new(settings, storage).start().await?;
        Ok(handle)
    }

    /// Serves until Ctrl-C, then stops the listener.
    pub async fn run(&self) -> Result<(), ControllerError> {
        let handle = self.start().await?;

        tokio::signal::ctrl_c().await.map_err(|e| {
            error!("Unable to listen for shutdown signal: {}", e);
            ControllerError::InitializationFailed(e.to_string())
        })?;
        info!("Shutdown requested");

        handle.stop().await?;
        Ok(())
    }
}
