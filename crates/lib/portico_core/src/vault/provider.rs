//! Provider capability interface and construction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::VaultError;
use super::cloud::UnconfiguredProvider;
use super::local::LocalProvider;
use crate::crypto::EncryptionService;
use crate::models::vault::{KeyRequest, ProviderType, Secret, SecretRequest, SecretVersion, VaultKey};

/// Secret backend. One implementation per provider type.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Newest enabled, unexpired version.
    async fn get_secret(&self, name: &str) -> Result<Secret, VaultError>;

    /// A specific version, regardless of its enabled/expiry state.
    async fn get_secret_version(&self, name: &str, version: &str) -> Result<Secret, VaultError>;

    /// Append a new version.
    async fn set_secret(&self, request: SecretRequest) -> Result<Secret, VaultError>;

    /// Remove every version.
    async fn delete_secret(&self, name: &str) -> Result<(), VaultError>;

    async fn list_secrets(&self) -> Result<Vec<String>, VaultError>;

    /// Version summaries, oldest first.
    async fn get_versions(&self, name: &str) -> Result<Vec<SecretVersion>, VaultError>;

    /// Append a version with a new value, keeping tags and content type.
    async fn rotate_secret(&self, name: &str, new_value: &str) -> Result<Secret, VaultError>;

    async fn get_key(&self, name: &str) -> Result<VaultKey, VaultError>;

    async fn create_key(&self, request: KeyRequest) -> Result<VaultKey, VaultError>;

    async fn delete_key(&self, name: &str) -> Result<(), VaultError>;

    /// Verify the backend is reachable and correctly configured.
    async fn validate_configuration(&self) -> Result<(), VaultError>;
}

/// Builds providers by type.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, provider_type: ProviderType) -> Result<Arc<dyn SecretProvider>, VaultError>;
}

/// Local provider over a storage root; cloud types become stubs.
#[derive(Debug, Clone)]
pub struct DefaultProviderFactory {
    storage_root: PathBuf,
    encryption: EncryptionService,
    settings: HashMap<ProviderType, HashMap<String, String>>,
}

impl DefaultProviderFactory {
    pub fn new(storage_root: impl Into<PathBuf>, encryption: EncryptionService) -> Self {
        Self {
            storage_root: storage_root.into(),
            encryption,
            settings: HashMap::new(),
        }
    }

    /// Attach backend settings (vault URL, region, ...) for a cloud provider.
    pub fn with_settings(mut self, provider_type: ProviderType, settings: HashMap<String, String>) -> Self {
        self.settings.insert(provider_type, settings);
        self
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }
}

impl ProviderFactory for DefaultProviderFactory {
    fn create(&self, provider_type: ProviderType) -> Result<Arc<dyn SecretProvider>, VaultError> {
        match provider_type {
            ProviderType::Local => Ok(Arc::new(LocalProvider::open(
                &self.storage_root,
                self.encryption.clone(),
            )?)),
            other => Ok(Arc::new(UnconfiguredProvider::new(
                other,
                self.settings.get(&other).cloned().unwrap_or_default(),
            ))),
        }
    }
}
