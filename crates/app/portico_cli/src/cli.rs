use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Local administration for a Portico deployment.
#[derive(Parser, Debug)]
#[command(name = "portico", about = "Portico access broker tooling")]
pub struct Cli {
    /// Directory of the local vault store.
    #[arg(long, global = true, env = "PORTICO_VAULT_DIR")]
    pub vault_dir: Option<PathBuf>,

    /// Base64 256-bit master key protecting the local vault.
    #[arg(long, global = true, env = "PORTICO_MASTER_KEY", hide_env_values = true)]
    pub master_key: Option<String>,

    /// Debug-level logging on stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage secrets and keys in the local vault.
    #[command(subcommand)]
    Vault(VaultCommand),

    /// Print a fresh random master key.
    Keygen,

    /// Derive a master key from a passphrase and salt.
    DeriveKey { password: String, salt: String },

    /// Print the bcrypt hash of a password that meets the default policy.
    HashPassword { password: String },

    /// Print a new TOTP secret and its provisioning URI.
    TotpSecret {
        account: String,
        #[arg(long, default_value = "Portico")]
        issuer: String,
    },

    /// Connect to an MCP server and list its tools.
    Probe {
        url: String,
        #[arg(long, conflicts_with = "api_key")]
        bearer: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        /// Seconds before the attempt is abandoned.
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },

    Version,
}

#[derive(Subcommand, Debug)]
pub enum VaultCommand {
    /// Write a new version of a secret.
    Set {
        name: String,
        value: String,
        #[arg(long)]
        content_type: Option<String>,
        /// `KEY=VALUE`, repeatable.
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,
        /// Encrypt the value with the master key before storing it.
        #[arg(long)]
        encrypt: bool,
    },

    /// Print a secret's value.
    Get {
        name: String,
        #[arg(long, conflicts_with = "decrypt")]
        version: Option<String>,
        #[arg(long)]
        decrypt: bool,
    },

    List,

    /// List a secret's versions as JSON.
    Versions { name: String },

    Delete { name: String },

    /// Append a version with a new value.
    Rotate { name: String, value: String },

    /// Import secrets from a JSON array of `{name, value, contentType?, tags?}`.
    Import { file: PathBuf },

    /// Create a symmetric key.
    CreateKey {
        name: String,
        #[arg(long, default_value_t = 256)]
        size: u32,
    },
}

fn parse_tag(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}
