//! Cloud backends without a client implementation.
//!
//! Every call fails fast with `ProviderNotImplemented`, including
//! `validate_configuration`, so a switch to one of them is rolled back.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::warn;

use super::VaultError;
use super::provider::SecretProvider;
use crate::models::vault::{KeyRequest, ProviderType, Secret, SecretRequest, SecretVersion, VaultKey};

#[derive(Debug, Clone)]
pub struct UnconfiguredProvider {
    provider_type: ProviderType,
    settings: HashMap<String, String>,
}

impl UnconfiguredProvider {
    pub fn new(provider_type: ProviderType, settings: HashMap<String, String>) -> Self {
        Self {
            provider_type,
            settings,
        }
    }

    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    fn unavailable<T>(&self, operation: &str) -> Result<T, VaultError> {
        warn!(provider = %self.provider_type, operation, "vault provider not implemented");
        Err(VaultError::ProviderNotImplemented(self.provider_type))
    }
}

#[async_trait]
impl SecretProvider for UnconfiguredProvider {
    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    async fn get_secret(&self, _name: &str) -> Result<Secret, VaultError> {
        self.unavailable("get_secret")
    }

    async fn get_secret_version(&self, _name: &str, _version: &str) -> Result<Secret, VaultError> {
        self.unavailable("get_secret_version")
    }

    async fn set_secret(&self, _request: SecretRequest) -> Result<Secret, VaultError> {
        self.unavailable("set_secret")
    }

    async fn delete_secret(&self, _name: &str) -> Result<(), VaultError> {
        self.unavailable("delete_secret")
    }

    async fn list_secrets(&self) -> Result<Vec<String>, VaultError> {
        self.unavailable("list_secrets")
    }

    async fn get_versions(&self, _name: &str) -> Result<Vec<SecretVersion>, VaultError> {
        self.unavailable("get_versions")
    }

    async fn rotate_secret(&self, _name: &str, _new_value: &str) -> Result<Secret, VaultError> {
        self.unavailable("rotate_secret")
    }

    async fn get_key(&self, _name: &str) -> Result<VaultKey, VaultError> {
        self.unavailable("get_key")
    }

    async fn create_key(&self, _request: KeyRequest) -> Result<VaultKey, VaultError> {
        self.unavailable("create_key")
    }

    async fn delete_key(&self, _name: &str) -> Result<(), VaultError> {
        self.unavailable("delete_key")
    }

    async fn validate_configuration(&self) -> Result<(), VaultError> {
        self.unavailable("validate_configuration")
    }
}
