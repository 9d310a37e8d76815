//! Server credentials kept in the vault, never on the server record.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use super::McpError;
use crate::models::mcp::ServerCredentials;
use crate::vault::{VaultError, VaultManager};

/// Vault name of the server-wide credentials.
pub fn server_secret_name(server_id: Uuid) -> String {
    format!("mcp-server-{server_id}")
}

/// Vault name of one user's credentials for a server.
pub fn user_secret_name(server_id: Uuid, user_id: Uuid) -> String {
    format!("mcp-server-{server_id}-user-{user_id}")
}

/// Encrypt-then-store access to server credentials.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    vault: Arc<VaultManager>,
}

impl CredentialStore {
    pub fn new(vault: Arc<VaultManager>) -> Self {
        Self { vault }
    }

    /// Store credentials server-wide, or for one user when `user_id` is set.
    pub async fn save(
        &self,
        server_id: Uuid,
        user_id: Option<Uuid>,
        credentials: &ServerCredentials,
    ) -> Result<(), McpError> {
        let name = match user_id {
            Some(user_id) => user_secret_name(server_id, user_id),
            None => server_secret_name(server_id),
        };
        let payload = serde_json::to_string(credentials).map_err(VaultError::from)?;
        self.vault.store_encrypted_secret(&name, &payload).await?;
        debug!(%server_id, per_user = user_id.is_some(), "stored server credentials");
        Ok(())
    }

    /// The user's own credentials if present, else the server-wide ones.
    pub async fn load(&self, server_id: Uuid, user_id: Option<Uuid>) -> Result<Option<ServerCredentials>, McpError> {
        if let Some(user_id) = user_id
            && let Some(creds) = self.read(&user_secret_name(server_id, user_id)).await?
        {
            return Ok(Some(creds));
        }
        self.read(&server_secret_name(server_id)).await
    }

    async fn read(&self, name: &str) -> Result<Option<ServerCredentials>, McpError> {
        match self.vault.get_decrypted_secret(name).await {
            Ok(json) => {
                let creds = serde_json::from_str(&json).map_err(VaultError::from)?;
                Ok(Some(creds))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the server-wide and every per-user entry for a server.
    /// Missing entries are not an error.
    pub async fn delete(&self, server_id: Uuid) -> Result<(), McpError> {
        let user_prefix = format!("{}-user-", server_secret_name(server_id));
        let mut names: Vec<String> = self
            .vault
            .list_secrets()
            .await?
            .into_iter()
            .filter(|name| name.starts_with(&user_prefix))
            .collect();
        names.push(server_secret_name(server_id));
        for name in names {
            match self.vault.delete_secret(&name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
