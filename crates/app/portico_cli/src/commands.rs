//! Subcommand implementations.

use std::path::PathBuf;

use log::{debug, info};
use portico_core::auth::{password, totp};
use portico_core::config::{PasswordPolicy, VaultConfig};
use portico_core::crypto;
use portico_core::mcp::{McpClient, McpRequest, RmcpClient};
use portico_core::models::mcp::{ConnectionInfo, ServerCredentials};
use portico_core::models::vault::{KeyRequest, SecretImport, SecretRequest};
use portico_core::vault::VaultManager;

use crate::cli::VaultCommand;
use crate::{Error, Result};

/// Vault settings with command-line overrides applied.
pub fn vault_config(dir: Option<PathBuf>, master_key: Option<String>) -> VaultConfig {
    let mut config = VaultConfig::default();
    if let Some(dir) = dir {
        config.storage_dir = dir;
    }
    config.master_key = master_key.filter(|k| !k.is_empty());
    config
}

pub async fn vault(config: &VaultConfig, command: VaultCommand) -> Result<()> {
    let vault = VaultManager::from_config(config)?;
    debug!("vault at {}", config.storage_dir.display());

    match command {
        VaultCommand::Set {
            name,
            value,
            content_type,
            tags,
            encrypt,
        } => {
            let secret = if encrypt {
                vault.store_encrypted_secret(&name, &value).await?
            } else {
                let mut request = SecretRequest::new(&name, value);
                request.content_type = content_type;
                request.tags = tags.into_iter().collect();
                vault.set_secret(request).await?
            };
            println!("{}", secret.version);
        }
        VaultCommand::Get {
            name,
            version,
            decrypt,
        } => {
            let value = match (version, decrypt) {
                (_, true) => vault.get_decrypted_secret(&name).await?,
                (Some(version), false) => vault.get_secret_version(&name, &version).await?.value,
                (None, false) => vault.get_secret(&name).await?.value,
            };
            println!("{value}");
        }
        VaultCommand::List => {
            let mut names = vault.list_secrets().await?;
            names.sort();
            for name in names {
                println!("{name}");
            }
        }
        VaultCommand::Versions { name } => {
            let versions = vault.get_secret_versions(&name).await?;
            println!("{}", serde_json::to_string_pretty(&versions)?);
        }
        VaultCommand::Delete { name } => {
            vault.delete_secret(&name).await?;
            info!("deleted {name}");
        }
        VaultCommand::Rotate { name, value } => {
            let secret = vault.rotate_secret(&name, &value).await?;
            println!("{}", secret.version);
        }
        VaultCommand::Import { file } => {
            let raw = tokio::fs::read_to_string(&file).await?;
            let items: Vec<SecretImport> = serde_json::from_str(&raw)?;
            let results = vault.bulk_import(items).await;
            println!("{}", serde_json::to_string_pretty(&results)?);
            let failed = results.iter().filter(|r| !r.success).count();
            if failed > 0 {
                return Err(Error::Custom(format!("{failed} of {} secrets failed to import", results.len())));
            }
        }
        VaultCommand::CreateKey { name, size } => {
            let request = KeyRequest {
                key_size: size,
                ..KeyRequest::symmetric(name)
            };
            let key = vault.create_key(request).await?;
            println!(
                "{}",
                serde_json::json!({
                    "name": key.name,
                    "version": key.version,
                    "keySize": key.key_size,
                    "keyOperations": key.key_operations,
                })
            );
        }
    }
    Ok(())
}

pub fn keygen() {
    println!("{}", crypto::generate_key());
}

pub fn derive_key(password: &str, salt: &str) {
    println!("{}", crypto::derive_key(password, salt));
}

pub fn hash_password(plain: &str) -> Result<()> {
    PasswordPolicy::default().check(plain)?;
    println!("{}", password::hash_password(plain)?);
    Ok(())
}

pub fn totp_secret(account: &str, issuer: &str) -> Result<()> {
    let secret = totp::generate_secret();
    let uri = totp::otpauth_uri(&secret, account, issuer)?;
    println!("{}", serde_json::json!({ "secret": secret, "otpauthUri": uri }));
    Ok(())
}

pub async fn probe(url: String, bearer: Option<String>, api_key: Option<String>, timeout: u64) -> Result<()> {
    let mut connection = ConnectionInfo::new(url);
    let credentials = match (bearer, api_key) {
        (Some(token), _) => Some(ServerCredentials::bearer(token)),
        (None, Some(key)) => Some(ServerCredentials::api_key(key)),
        (None, None) => None,
    };

    connection.timeout_secs = timeout.max(1);
    let response = RmcpClient::new()
        .send(&connection, credentials.as_ref(), McpRequest::ListTools)
        .await?;

    if !response.success {
        return Err(Error::Custom(
            response.error.unwrap_or_else(|| "server reported a failure".into()),
        ));
    }
    let tools = response.tools()?;
    info!("{} tool(s) in {} ms", tools.len(), response.execution_time_ms);
    println!("{}", serde_json::to_string_pretty(&tools)?);
    Ok(())
}
