//! Credential vault models.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::new_id;

/// One stored version of a named secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub version: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl Secret {
    /// Materialise a new version from a write request.
    pub fn from_request(request: SecretRequest) -> Self {
        let now = Utc::now();
        Self {
            name: request.name,
            value: request.value,
            content_type: request.content_type,
            version: new_id().simple().to_string(),
            enabled: request.enabled,
            created_at: now,
            updated_at: now,
            expires_at: request.expires_at,
            tags: request.tags,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Enabled and not expired.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.enabled && !self.is_expired(now)
    }

    /// Version summary without the value.
    pub fn summary(&self) -> SecretVersion {
        SecretVersion {
            version: self.version.clone(),
            enabled: self.enabled,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// Version listing entry (never carries the value).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretVersion {
    pub version: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Input for writing a secret version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRequest {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl SecretRequest {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            content_type: None,
            tags: HashMap::new(),
            expires_at: None,
            enabled: true,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Key algorithm family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyType {
    Symmetric,
    Rsa2048,
    Rsa4096,
    EcP256,
}

impl KeyType {
    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::Symmetric)
    }
}

/// Stored key material.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultKey {
    pub name: String,
    pub key_type: KeyType,
    pub key_size: u32,
    /// Base64-encoded key material.
    pub key_material: String,
    pub key_operations: Vec<String>,
    pub version: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultKey")
            .field("name", &self.name)
            .field("key_type", &self.key_type)
            .field("key_size", &self.key_size)
            .field("key_operations", &self.key_operations)
            .field("version", &self.version)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Input for creating a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRequest {
    pub name: String,
    pub key_type: KeyType,
    pub key_size: u32,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl KeyRequest {
    /// A 256-bit symmetric key request.
    pub fn symmetric(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_type: KeyType::Symmetric,
            key_size: 256,
            expires_at: None,
        }
    }
}

/// One entry of a bulk import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretImport {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Per-item bulk import outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkImportResult {
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Secret backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    Local,
    AzureKeyVault,
    AwsSecretsManager,
    HashiCorpVault,
    GoogleSecretManager,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::AzureKeyVault => "azure-key-vault",
            Self::AwsSecretsManager => "aws-secrets-manager",
            Self::HashiCorpVault => "hashicorp-vault",
            Self::GoogleSecretManager => "google-secret-manager",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "azure" | "azure-key-vault" => Ok(Self::AzureKeyVault),
            "aws" | "aws-secrets-manager" => Ok(Self::AwsSecretsManager),
            "hashicorp" | "hashicorp-vault" => Ok(Self::HashiCorpVault),
            "gcp" | "google-secret-manager" => Ok(Self::GoogleSecretManager),
            other => Err(format!("unknown vault provider: {other}")),
        }
    }
}
