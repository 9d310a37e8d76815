//! Helpers shared by the integration suites.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use portico_core::models::vault::{KeyRequest, ProviderType, Secret, SecretRequest, SecretVersion, VaultKey};
use portico_core::vault::{LocalProvider, SecretProvider, VaultError};

/// Local provider that counts backend reads of current secret values.
pub struct CountingProvider {
    inner: LocalProvider,
    reads: AtomicUsize,
}

impl CountingProvider {
    pub fn new(inner: LocalProvider) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretProvider for CountingProvider {
    fn provider_type(&self) -> ProviderType {
        self.inner.provider_type()
    }

    async fn get_secret(&self, name: &str) -> Result<Secret, VaultError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_secret(name).await
    }

    async fn get_secret_version(&self, name: &str, version: &str) -> Result<Secret, VaultError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_secret_version(name, version).await
    }

    async fn set_secret(&self, request: SecretRequest) -> Result<Secret, VaultError> {
        self.inner.set_secret(request).await
    }

    async fn delete_secret(&self, name: &str) -> Result<(), VaultError> {
        self.inner.delete_secret(name).await
    }

    async fn list_secrets(&self) -> Result<Vec<String>, VaultError> {
        self.inner.list_secrets().await
    }

    async fn get_versions(&self, name: &str) -> Result<Vec<SecretVersion>, VaultError> {
        self.inner.get_versions(name).await
    }

    async fn rotate_secret(&self, name: &str, new_value: &str) -> Result<Secret, VaultError> {
        self.inner.rotate_secret(name, new_value).await
    }

    async fn get_key(&self, name: &str) -> Result<VaultKey, VaultError> {
        self.inner.get_key(name).await
    }

    async fn create_key(&self, request: KeyRequest) -> Result<VaultKey, VaultError> {
        self.inner.create_key(request).await
    }

    async fn delete_key(&self, name: &str) -> Result<(), VaultError> {
        self.inner.delete_key(name).await
    }

    async fn validate_configuration(&self) -> Result<(), VaultError> {
        self.inner.validate_configuration().await
    }
}
