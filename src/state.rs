//! Application state management

use std::sync::Arc;

use crate::access::RuleChecker;
use crate::config::{Config, StorageType};
use crate::error::Result;
use crate::hooks::{CommandNotifier, HookNotifier, LogNotifier};
use crate::storage::S3Client;
use crate::upload::{
    LocalBackend, MultipartBackend, SessionRegistry, SweeperHandle, UploadBackend,
    UploadCoordinator,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    coordinator: UploadCoordinator,
}

impl AppState {
    /// Create a new application state
    ///
    /// The storage backend is chosen here, once, from `STORAGE_TYPE`.
    pub async fn new(config: Config) -> Result<Self> {
        let backend = build_backend(&config).await?;

        let hooks: Arc<dyn HookNotifier> = match &config.upload.hook_command {
            Some(command) => {
                tracing::info!("Upload hook command: {}", command);
                Arc::new(CommandNotifier::new(command.clone()))
            }
            None => Arc::new(LogNotifier),
        };

        let coordinator = UploadCoordinator::new(
            SessionRegistry::new(config.upload.idle_timeout),
            backend,
            Arc::new(RuleChecker::from_config(&config.access)),
            hooks,
            config.upload.keepalive_interval,
        );

        Ok(Self::from_parts(config, coordinator))
    }

    /// Assemble state from an already wired coordinator
    pub fn from_parts(config: Config, coordinator: UploadCoordinator) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                coordinator,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the upload coordinator
    pub fn coordinator(&self) -> &UploadCoordinator {
        &self.inner.coordinator
    }

    /// Start evicting idle sessions in the background
    pub fn start_sweeper(&self) -> SweeperHandle {
        let coordinator = &self.inner.coordinator;
        coordinator.registry().start_sweeper(
            self.inner.config.upload.sweep_interval,
            coordinator.backend().clone(),
        )
    }
}

async fn build_backend(config: &Config) -> Result<Arc<dyn UploadBackend>> {
    match config.storage.storage_type {
        StorageType::Local => {
            let root = &config.storage.root;
            tokio::fs::create_dir_all(root).await?;
            tracing::info!("Local storage root: {}", root.display());
            Ok(Arc::new(LocalBackend::new(root.clone())))
        }
        StorageType::S3 => {
            let client = S3Client::new(&config.storage).await?;
            tracing::info!(
                "S3 endpoint: {} (provider {:?})",
                config.storage.endpoint,
                config.storage.provider
            );
            tracing::info!("S3 bucket: {}", client.bucket());
            Ok(Arc::new(MultipartBackend::new(
                Arc::new(client),
                config.upload.max_chunk_size,
            )))
        }
    }
}
