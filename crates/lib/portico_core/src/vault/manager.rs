//! Vault front end: provider routing, read-through cache and
//! encrypt-then-store helpers.

use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::cache::SecretCache;
use super::provider::{DefaultProviderFactory, ProviderFactory, SecretProvider};
use super::{ENCRYPTED_CONTENT_TYPE, ENCRYPTED_TAG, VaultError};
use crate::config::VaultConfig;
use crate::crypto::{CryptoError, EncryptedBlob, EncryptionService};
use crate::models::vault::{
    BulkImportResult, KeyRequest, ProviderType, Secret, SecretImport, SecretRequest, SecretVersion,
    VaultKey,
};

pub struct VaultManager {
    provider: RwLock<Arc<dyn SecretProvider>>,
    factory: Arc<dyn ProviderFactory>,
    cache: RwLock<SecretCache>,
    encryption: EncryptionService,
}

impl std::fmt::Debug for VaultManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultManager").finish_non_exhaustive()
    }
}

impl VaultManager {
    pub fn new(
        provider: Arc<dyn SecretProvider>,
        factory: Arc<dyn ProviderFactory>,
        encryption: EncryptionService,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            provider: RwLock::new(provider),
            factory,
            cache: RwLock::new(SecretCache::new(cache_ttl)),
            encryption,
        }
    }

    /// Build the configured provider through the default factory.
    pub fn from_config(config: &VaultConfig) -> Result<Self, VaultError> {
        let master_key = config.master_key.as_deref().ok_or_else(|| {
            VaultError::Configuration("a master key is required (PORTICO_MASTER_KEY)".into())
        })?;
        let encryption = EncryptionService::new(master_key)?;
        let factory = Arc::new(DefaultProviderFactory::new(
            config.storage_dir.clone(),
            encryption.clone(),
        ));
        let provider = factory.create(config.provider)?;
        info!(
            provider = %config.provider,
            dir = %config.storage_dir.display(),
            "vault initialised"
        );
        Ok(Self::new(
            provider,
            factory,
            encryption,
            Duration::seconds(config.cache_ttl_secs),
        ))
    }

    async fn active(&self) -> Arc<dyn SecretProvider> {
        Arc::clone(&*self.provider.read().await)
    }

    pub async fn provider_type(&self) -> ProviderType {
        self.active().await.provider_type()
    }

    // -------------------------------------------------------------------------
    // Secrets
    // -------------------------------------------------------------------------

    /// Newest usable version, served from cache inside the TTL.
    pub async fn get_secret(&self, name: &str) -> Result<Secret, VaultError> {
        let now = Utc::now();
        let generation = {
            let cache = self.cache.read().await;
            if let Some(hit) = cache.get(name, now) {
                debug!(name = %name, "vault cache hit");
                return Ok(hit);
            }
            cache.generation()
        };

        let secret = self.active().await.get_secret(name).await?;
        self.cache
            .write()
            .await
            .insert_if_current(secret.clone(), generation, Utc::now());
        Ok(secret)
    }

    /// A specific version; bypasses the cache.
    pub async fn get_secret_version(&self, name: &str, version: &str) -> Result<Secret, VaultError> {
        self.active().await.get_secret_version(name, version).await
    }

    pub async fn set_secret(&self, request: SecretRequest) -> Result<Secret, VaultError> {
        let name = request.name.clone();
        let result = self.active().await.set_secret(request).await;
        self.cache.write().await.invalidate(&name);
        result
    }

    pub async fn delete_secret(&self, name: &str) -> Result<(), VaultError> {
        let result = self.active().await.delete_secret(name).await;
        self.cache.write().await.invalidate(name);
        result
    }

    pub async fn list_secrets(&self) -> Result<Vec<String>, VaultError> {
        self.active().await.list_secrets().await
    }

    pub async fn get_secret_versions(&self, name: &str) -> Result<Vec<SecretVersion>, VaultError> {
        self.active().await.get_versions(name).await
    }

    pub async fn rotate_secret(&self, name: &str, new_value: &str) -> Result<Secret, VaultError> {
        let result = self.active().await.rotate_secret(name, new_value).await;
        self.cache.write().await.invalidate(name);
        if result.is_ok() {
            info!(name = %name, "rotated secret");
        }
        result
    }

    // -------------------------------------------------------------------------
    // Keys
    // -------------------------------------------------------------------------

    pub async fn get_key(&self, name: &str) -> Result<VaultKey, VaultError> {
        self.active().await.get_key(name).await
    }

    pub async fn create_key(&self, request: KeyRequest) -> Result<VaultKey, VaultError> {
        self.active().await.create_key(request).await
    }

    pub async fn delete_key(&self, name: &str) -> Result<(), VaultError> {
        self.active().await.delete_key(name).await
    }

    // -------------------------------------------------------------------------
    // Encrypted application secrets
    // -------------------------------------------------------------------------

    /// Encrypt `plaintext` under the master key and store the blob, tagged
    /// so retrieval can tell it apart from plain secrets.
    pub async fn store_encrypted_secret(&self, name: &str, plaintext: &str) -> Result<Secret, VaultError> {
        let blob = self.encryption.encrypt_str(plaintext)?;
        let request = SecretRequest::new(name, serde_json::to_string(&blob)?)
            .with_content_type(ENCRYPTED_CONTENT_TYPE)
            .with_tag(ENCRYPTED_TAG, "true");
        self.set_secret(request).await
    }

    /// Fetch and decrypt a secret written by
    /// [`store_encrypted_secret`](Self::store_encrypted_secret).
    pub async fn get_decrypted_secret(&self, name: &str) -> Result<String, VaultError> {
        let secret = self.get_secret(name).await?;
        if secret.tags.get(ENCRYPTED_TAG).map(String::as_str) != Some("true") {
            return Err(VaultError::NotEncrypted(name.to_string()));
        }
        let blob: EncryptedBlob = serde_json::from_str(&secret.value)
            .map_err(|e| CryptoError::Malformed(format!("encrypted secret envelope: {e}")))?;
        Ok(self.encryption.decrypt_str(&blob)?)
    }

    // -------------------------------------------------------------------------
    // Provider management
    // -------------------------------------------------------------------------

    pub async fn validate_configuration(&self) -> Result<(), VaultError> {
        self.active().await.validate_configuration().await
    }

    /// Swap to a freshly built provider of `provider_type`.
    ///
    /// The candidate is validated before it goes live; on failure the
    /// current provider stays active and the error is returned. On success
    /// the cache is cleared.
    pub async fn switch_provider(&self, provider_type: ProviderType) -> Result<(), VaultError> {
        let candidate = self.factory.create(provider_type)?;
        if let Err(e) = candidate.validate_configuration().await {
            let current = self.provider_type().await;
            warn!(
                requested = %provider_type,
                current = %current,
                "vault provider switch rolled back: {e}"
            );
            return Err(e);
        }

        let mut active = self.provider.write().await;
        let previous = active.provider_type();
        *active = candidate;
        self.cache.write().await.clear();
        info!(from = %previous, to = %provider_type, "vault provider switched");
        Ok(())
    }

    /// Store every item independently; one failure never aborts the rest.
    pub async fn bulk_import(&self, secrets: Vec<SecretImport>) -> Vec<BulkImportResult> {
        let writes = secrets.into_iter().map(|item| async move {
            let name = item.name.clone();
            let mut request = SecretRequest::new(item.name, item.value);
            request.content_type = item.content_type;
            request.tags = item.tags;
            match self.set_secret(request).await {
                Ok(_) => BulkImportResult {
                    name,
                    success: true,
                    error: None,
                },
                Err(e) => {
                    warn!(name = %name, "bulk import item failed: {e}");
                    BulkImportResult {
                        name,
                        success: false,
                        error: Some(crate::error::ClassifiedError::public_message(&e)),
                    }
                }
            }
        });
        let results = join_all(writes).await;
        let ok = results.iter().filter(|r| r.success).count();
        info!(total = results.len(), succeeded = ok, "bulk secret import finished");
        results
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::crypto;
    use crate::vault::LocalProvider;

    struct Fixture {
        _dir: tempfile::TempDir,
        manager: VaultManager,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let enc = EncryptionService::new(&crypto::generate_key()).unwrap();
        let factory = Arc::new(DefaultProviderFactory::new(dir.path(), enc.clone()));
        let provider = Arc::new(LocalProvider::open(dir.path(), enc.clone()).unwrap());
        Fixture {
            manager: VaultManager::new(provider, factory, enc, Duration::seconds(300)),
            _dir: dir,
        }
    }

    /// Local provider wrapper that counts reads.
    struct Counting {
        inner: LocalProvider,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl SecretProvider for Counting {
        fn provider_type(&self) -> ProviderType {
            ProviderType::Local
        }
        async fn get_secret(&self, name: &str) -> Result<Secret, VaultError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get_secret(name).await
        }
        async fn get_secret_version(&self, n: &str, v: &str) -> Result<Secret, VaultError> {
            self.inner.get_secret_version(n, v).await
        }
        async fn set_secret(&self, r: SecretRequest) -> Result<Secret, VaultError> {
            self.inner.set_secret(r).await
        }
        async fn delete_secret(&self, n: &str) -> Result<(), VaultError> {
            self.inner.delete_secret(n).await
        }
        async fn list_secrets(&self) -> Result<Vec<String>, VaultError> {
            self.inner.list_secrets().await
        }
        async fn get_versions(&self, n: &str) -> Result<Vec<SecretVersion>, VaultError> {
            self.inner.get_versions(n).await
        }
        async fn rotate_secret(&self, n: &str, v: &str) -> Result<Secret, VaultError> {
            self.inner.rotate_secret(n, v).await
        }
        async fn get_key(&self, n: &str) -> Result<VaultKey, VaultError> {
            self.inner.get_key(n).await
        }
        async fn create_key(&self, r: KeyRequest) -> Result<VaultKey, VaultError> {
            self.inner.create_key(r).await
        }
        async fn delete_key(&self, n: &str) -> Result<(), VaultError> {
            self.inner.delete_key(n).await
        }
        async fn validate_configuration(&self) -> Result<(), VaultError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn cached_reads_hit_provider_once() {
        let dir = tempfile::tempdir().unwrap();
        let enc = EncryptionService::new(&crypto::generate_key()).unwrap();
        let counting = Arc::new(Counting {
            inner: LocalProvider::open(dir.path(), enc.clone()).unwrap(),
            reads: AtomicUsize::new(0),
        });
        let factory = Arc::new(DefaultProviderFactory::new(dir.path(), enc.clone()));
        let manager = VaultManager::new(counting.clone(), factory, enc, Duration::seconds(300));

        manager.set_secret(SecretRequest::new("db", "pw")).await.unwrap();
        let a = manager.get_secret("db").await.unwrap();
        let b = manager.get_secret("db").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(counting.reads.load(Ordering::SeqCst), 1);

        manager.rotate_secret("db", "pw2").await.unwrap();
        assert_eq!(manager.get_secret("db").await.unwrap().value, "pw2");
        assert_eq!(counting.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn encrypted_round_trip_and_untagged_rejection() {
        let f = fixture();
        f.manager
            .store_encrypted_secret("oauth", "client-secret")
            .await
            .unwrap();
        let stored = f.manager.get_secret("oauth").await.unwrap();
        assert!(!stored.value.contains("client-secret"));
        assert_eq!(stored.content_type.as_deref(), Some(ENCRYPTED_CONTENT_TYPE));
        assert_eq!(
            f.manager.get_decrypted_secret("oauth").await.unwrap(),
            "client-secret"
        );

        f.manager
            .set_secret(SecretRequest::new("plain", "value"))
            .await
            .unwrap();
        assert!(matches!(
            f.manager.get_decrypted_secret("plain").await,
            Err(VaultError::NotEncrypted(_))
        ));
    }

    #[tokio::test]
    async fn tampered_envelope_fails_closed() {
        let f = fixture();
        let request = SecretRequest::new("bad", "{not json")
            .with_tag(ENCRYPTED_TAG, "true");
        f.manager.set_secret(request).await.unwrap();
        assert!(matches!(
            f.manager.get_decrypted_secret("bad").await,
            Err(VaultError::Crypto(_))
        ));
    }

    #[tokio::test]
    async fn failed_switch_keeps_previous_provider() {
        let f = fixture();
        f.manager
            .set_secret(SecretRequest::new("db", "pw"))
            .await
            .unwrap();
        let err = f
            .manager
            .switch_provider(ProviderType::HashiCorpVault)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::ProviderNotImplemented(_)));
        assert_eq!(f.manager.provider_type().await, ProviderType::Local);
        assert_eq!(f.manager.get_secret("db").await.unwrap().value, "pw");
    }

    #[tokio::test]
    async fn switch_to_local_reloads_from_disk() {
        let f = fixture();
        f.manager
            .set_secret(SecretRequest::new("db", "pw"))
            .await
            .unwrap();
        f.manager.switch_provider(ProviderType::Local).await.unwrap();
        assert_eq!(f.manager.get_secret("db").await.unwrap().value, "pw");
    }

    #[tokio::test]
    async fn bulk_import_reports_per_item() {
        let f = fixture();
        let items = vec![
            SecretImport {
                name: "a".into(),
                value: "1".into(),
                content_type: None,
                tags: Default::default(),
            },
            SecretImport {
                name: " ".into(),
                value: "2".into(),
                content_type: None,
                tags: Default::default(),
            },
            SecretImport {
                name: "c".into(),
                value: "3".into(),
                content_type: None,
                tags: Default::default(),
            },
        ];
        let results = f.manager.bulk_import(items).await;
        let outcomes: Vec<bool> = results.iter().map(|r| r.success).collect();
        assert_eq!(outcomes, vec![true, false, true]);
        assert!(results[1].error.is_some());
        assert_eq!(f.manager.list_secrets().await.unwrap(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn from_config_requires_master_key() {
        let dir = tempfile::tempdir().unwrap();
        let config = VaultConfig {
            storage_dir: dir.path().to_path_buf(),
            ..VaultConfig::default()
        };
        assert!(matches!(
            VaultManager::from_config(&config),
            Err(VaultError::Configuration(_))
        ));
    }
}
