//! File-backed vault provider.
//!
//! Secrets and keys live in `secrets.vault` and `keys.vault` under the
//! storage root. Each file holds one JSON [`EncryptedBlob`] whose plaintext
//! is the full `name -> [versions, oldest first]` map. Every save re-encrypts
//! the whole map and replaces the file via write-temp-then-rename.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::provider::SecretProvider;
use super::{SYMMETRIC_KEY_OPERATIONS, VaultError, validate_name};
use crate::crypto::{self, EncryptedBlob, EncryptionService};
use crate::models::new_id;
use crate::models::vault::{
    KeyRequest, ProviderType, Secret, SecretRequest, SecretVersion, VaultKey,
};

pub const SECRETS_FILE: &str = "secrets.vault";
pub const KEYS_FILE: &str = "keys.vault";

/// Key size (bits) produced by the local backend.
const SYMMETRIC_KEY_BITS: u32 = 256;

type SecretMap = BTreeMap<String, Vec<Secret>>;
type KeyMap = BTreeMap<String, Vec<VaultKey>>;

#[derive(Debug, Default)]
struct LocalState {
    secrets: SecretMap,
    keys: KeyMap,
}

#[derive(Debug)]
pub struct LocalProvider {
    root: PathBuf,
    encryption: EncryptionService,
    state: RwLock<LocalState>,
}

impl LocalProvider {
    /// Load both stores from `root`. Missing files are empty stores.
    pub fn open(root: impl AsRef<Path>, encryption: EncryptionService) -> Result<Self, VaultError> {
        let root = root.as_ref().to_path_buf();
        let secrets: SecretMap = load_store(&root.join(SECRETS_FILE), &encryption)?;
        let keys: KeyMap = load_store(&root.join(KEYS_FILE), &encryption)?;
        debug!(
            root = %root.display(),
            secrets = secrets.len(),
            keys = keys.len(),
            "opened local vault"
        );
        Ok(Self {
            root,
            encryption,
            state: RwLock::new(LocalState { secrets, keys }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn save_secrets(&self, secrets: &SecretMap) -> Result<(), VaultError> {
        save_store(&self.root, SECRETS_FILE, secrets, &self.encryption).await
    }

    async fn save_keys(&self, keys: &KeyMap) -> Result<(), VaultError> {
        save_store(&self.root, KEYS_FILE, keys, &self.encryption).await
    }

    /// Append a version and persist; the in-memory map is untouched on failure.
    async fn append_secret(&self, secret: Secret) -> Result<Secret, VaultError> {
        let mut state = self.state.write().await;
        self.append_secret_locked(&mut state, secret).await
    }

    async fn append_secret_locked(&self, state: &mut LocalState, secret: Secret) -> Result<Secret, VaultError> {
        let mut next = state.secrets.clone();
        next.entry(secret.name.clone()).or_default().push(secret.clone());
        self.save_secrets(&next).await?;
        state.secrets = next;
        info!(name = %secret.name, version = %secret.version, "stored secret version");
        Ok(secret)
    }
}

fn load_store<T>(path: &Path, encryption: &EncryptionService) -> Result<T, VaultError>
where
    T: DeserializeOwned + Default,
{
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(e.into()),
    };
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    let blob: EncryptedBlob = serde_json::from_str(&raw)?;
    let plaintext = encryption.decrypt(&blob)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

async fn save_store<T: Serialize>(
    root: &Path,
    file_name: &str,
    value: &T,
    encryption: &EncryptionService,
) -> Result<(), VaultError> {
    let plaintext = serde_json::to_vec(value)?;
    let blob = encryption.encrypt(&plaintext)?;
    let body = serde_json::to_vec_pretty(&blob)?;

    tokio::fs::create_dir_all(root).await?;
    let target = root.join(file_name);
    let temp = root.join(format!("{file_name}.tmp"));
    tokio::fs::write(&temp, &body).await?;
    tokio::fs::rename(&temp, &target).await?;
    Ok(())
}

fn newest_usable<'a, T, F>(versions: &'a [T], usable: F) -> Option<&'a T>
where
    F: Fn(&T) -> bool,
{
    versions.iter().rev().find(|v| usable(v))
}

#[async_trait]
impl SecretProvider for LocalProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Local
    }

    async fn get_secret(&self, name: &str) -> Result<Secret, VaultError> {
        let now = Utc::now();
        let state = self.state.read().await;
        state
            .secrets
            .get(name)
            .and_then(|versions| newest_usable(versions, |s| s.is_usable(now)))
            .cloned()
            .ok_or_else(|| VaultError::SecretNotFound(name.to_string()))
    }

    async fn get_secret_version(&self, name: &str, version: &str) -> Result<Secret, VaultError> {
        let state = self.state.read().await;
        state
            .secrets
            .get(name)
            .and_then(|versions| versions.iter().find(|s| s.version == version))
            .cloned()
            .ok_or_else(|| VaultError::SecretNotFound(format!("{name}@{version}")))
    }

    async fn set_secret(&self, request: SecretRequest) -> Result<Secret, VaultError> {
        validate_name(&request.name)?;
        self.append_secret(Secret::from_request(request)).await
    }

    async fn delete_secret(&self, name: &str) -> Result<(), VaultError> {
        let mut state = self.state.write().await;
        if !state.secrets.contains_key(name) {
            return Err(VaultError::SecretNotFound(name.to_string()));
        }
        let mut next = state.secrets.clone();
        next.remove(name);
        self.save_secrets(&next).await?;
        state.secrets = next;
        info!(name = %name, "deleted secret");
        Ok(())
    }

    async fn list_secrets(&self) -> Result<Vec<String>, VaultError> {
        Ok(self.state.read().await.secrets.keys().cloned().collect())
    }

    async fn get_versions(&self, name: &str) -> Result<Vec<SecretVersion>, VaultError> {
        let state = self.state.read().await;
        state
            .secrets
            .get(name)
            .map(|versions| versions.iter().map(Secret::summary).collect())
            .ok_or_else(|| VaultError::SecretNotFound(name.to_string()))
    }

    async fn rotate_secret(&self, name: &str, new_value: &str) -> Result<Secret, VaultError> {
        // Lookup and append share one guard so a concurrent delete cannot
        // fall between them.
        let mut state = self.state.write().await;
        let current = state
            .secrets
            .get(name)
            .and_then(|v| v.last())
            .cloned()
            .ok_or_else(|| VaultError::SecretNotFound(name.to_string()))?;
        let request = SecretRequest {
            name: name.to_string(),
            value: new_value.to_string(),
            content_type: current.content_type,
            tags: current.tags,
            expires_at: None,
            enabled: true,
        };
        self.append_secret_locked(&mut state, Secret::from_request(request)).await
    }

    async fn get_key(&self, name: &str) -> Result<VaultKey, VaultError> {
        let now = Utc::now();
        let state = self.state.read().await;
        state
            .keys
            .get(name)
            .and_then(|versions| {
                newest_usable(versions, |k| {
                    k.enabled && k.expires_at.is_none_or(|at| at > now)
                })
            })
            .cloned()
            .ok_or_else(|| VaultError::KeyNotFound(name.to_string()))
    }

    async fn create_key(&self, request: KeyRequest) -> Result<VaultKey, VaultError> {
        validate_name(&request.name)?;
        if !request.key_type.is_symmetric() {
            return Err(VaultError::UnsupportedKeyType(request.key_type));
        }
        if request.key_size != SYMMETRIC_KEY_BITS {
            return Err(VaultError::Validation(format!(
                "symmetric keys must be {SYMMETRIC_KEY_BITS} bits, got {}",
                request.key_size
            )));
        }

        let mut state = self.state.write().await;
        if state.keys.contains_key(&request.name) {
            return Err(VaultError::KeyExists(request.name));
        }
        let key = VaultKey {
            name: request.name.clone(),
            key_type: request.key_type,
            key_size: request.key_size,
            key_material: crypto::generate_key(),
            key_operations: SYMMETRIC_KEY_OPERATIONS.iter().map(|s| s.to_string()).collect(),
            version: new_id().simple().to_string(),
            enabled: true,
            created_at: Utc::now(),
            expires_at: request.expires_at,
        };
        let mut next = state.keys.clone();
        next.insert(key.name.clone(), vec![key.clone()]);
        self.save_keys(&next).await?;
        state.keys = next;
        info!(name = %key.name, "created symmetric key");
        Ok(key)
    }

    async fn delete_key(&self, name: &str) -> Result<(), VaultError> {
        let mut state = self.state.write().await;
        if !state.keys.contains_key(name) {
            return Err(VaultError::KeyNotFound(name.to_string()));
        }
        let mut next = state.keys.clone();
        next.remove(name);
        self.save_keys(&next).await?;
        state.keys = next;
        Ok(())
    }

    async fn validate_configuration(&self) -> Result<(), VaultError> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            VaultError::Configuration(format!(
                "storage root {} is not creatable: {e}",
                self.root.display()
            ))
        })?;

        let probe = self.root.join(".probe");
        tokio::fs::write(&probe, b"ok").await.map_err(|e| {
            VaultError::Configuration(format!(
                "storage root {} is not writable: {e}",
                self.root.display()
            ))
        })?;
        let _ = tokio::fs::remove_file(&probe).await;

        let _: SecretMap = load_store(&self.root.join(SECRETS_FILE), &self.encryption)?;
        let _: KeyMap = load_store(&self.root.join(KEYS_FILE), &self.encryption)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::vault::KeyType;

    fn provider(dir: &Path) -> LocalProvider {
        let enc = EncryptionService::new(&crypto::generate_key()).unwrap();
        LocalProvider::open(dir, enc).unwrap()
    }

    #[tokio::test]
    async fn versions_accumulate_and_newest_wins() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        p.set_secret(SecretRequest::new("db", "one")).await.unwrap();
        p.set_secret(SecretRequest::new("db", "two")).await.unwrap();
        assert_eq!(p.get_secret("db").await.unwrap().value, "two");
        assert_eq!(p.get_versions("db").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn disabled_newest_falls_back_to_previous() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        p.set_secret(SecretRequest::new("db", "one")).await.unwrap();
        let mut req = SecretRequest::new("db", "two");
        req.enabled = false;
        p.set_secret(req).await.unwrap();
        assert_eq!(p.get_secret("db").await.unwrap().value, "one");
    }

    #[tokio::test]
    async fn expired_only_version_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        let past = Utc::now() - chrono::Duration::minutes(1);
        p.set_secret(SecretRequest::new("db", "one").with_expiry(past))
            .await
            .unwrap();
        assert!(matches!(
            p.get_secret("db").await,
            Err(VaultError::SecretNotFound(_))
        ));
    }

    #[tokio::test]
    async fn store_survives_reopen_and_is_encrypted() {
        let dir = tempfile::tempdir().unwrap();
        let key = crypto::generate_key();
        {
            let p = LocalProvider::open(dir.path(), EncryptionService::new(&key).unwrap()).unwrap();
            p.set_secret(SecretRequest::new("api", "plain-value-123"))
                .await
                .unwrap();
        }
        let raw = std::fs::read_to_string(dir.path().join(SECRETS_FILE)).unwrap();
        assert!(!raw.contains("plain-value-123"));

        let p = LocalProvider::open(dir.path(), EncryptionService::new(&key).unwrap()).unwrap();
        assert_eq!(p.get_secret("api").await.unwrap().value, "plain-value-123");
    }

    #[tokio::test]
    async fn wrong_key_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        p.set_secret(SecretRequest::new("api", "v")).await.unwrap();
        let other = EncryptionService::new(&crypto::generate_key()).unwrap();
        assert!(matches!(
            LocalProvider::open(dir.path(), other),
            Err(VaultError::Crypto(_))
        ));
    }

    #[tokio::test]
    async fn rotate_keeps_tags_and_requires_existing() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        assert!(p.rotate_secret("missing", "x").await.is_err());
        p.set_secret(SecretRequest::new("api", "v1").with_tag("team", "core"))
            .await
            .unwrap();
        let rotated = p.rotate_secret("api", "v2").await.unwrap();
        assert_eq!(rotated.tags.get("team").map(String::as_str), Some("core"));
        assert_eq!(p.get_secret("api").await.unwrap().value, "v2");
    }

    #[tokio::test]
    async fn rotate_never_resurrects_a_concurrent_delete() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        p.set_secret(SecretRequest::new("api", "v1")).await.unwrap();

        // The first write holds the lock while rotate and delete queue up.
        let (_, rotated, deleted) = tokio::join!(
            p.set_secret(SecretRequest::new("other", "x")),
            p.rotate_secret("api", "v2"),
            p.delete_secret("api"),
        );
        deleted.unwrap();
        assert!(rotated.is_ok());
        assert!(matches!(
            p.get_secret("api").await,
            Err(VaultError::SecretNotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_all_versions() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        p.set_secret(SecretRequest::new("api", "v1")).await.unwrap();
        p.set_secret(SecretRequest::new("api", "v2")).await.unwrap();
        p.delete_secret("api").await.unwrap();
        assert!(p.get_versions("api").await.is_err());
        assert!(p.list_secrets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keys_are_symmetric_and_unique() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(dir.path());
        let key = p.create_key(KeyRequest::symmetric("wrap")).await.unwrap();
        assert_eq!(key.key_operations.len(), 4);
        assert!(key.key_operations.contains(&"unwrapKey".to_string()));
        assert!(matches!(
            p.create_key(KeyRequest::symmetric("wrap")).await,
            Err(VaultError::KeyExists(_))
        ));

        let mut rsa = KeyRequest::symmetric("rsa");
        rsa.key_type = KeyType::Rsa2048;
        rsa.key_size = 2048;
        assert!(matches!(
            p.create_key(rsa).await,
            Err(VaultError::UnsupportedKeyType(KeyType::Rsa2048))
        ));
        assert_eq!(p.get_key("wrap").await.unwrap().key_material, key.key_material);
    }

    #[tokio::test]
    async fn validation_checks_writability_and_decryption() {
        let dir = tempfile::tempdir().unwrap();
        let p = provider(&dir.path().join("nested"));
        p.validate_configuration().await.unwrap();
        assert!(dir.path().join("nested").is_dir());
    }
}
