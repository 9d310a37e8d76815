//! `portico`: local administration for the Portico access broker.

pub use self::error::{Error, Result};
mod error;

use clap::Parser;
use cli::{Cli, Commands};

mod cli;
mod commands;
mod logging;

fn main() -> Result<()> {
    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Cli::parse();
    logging::init(args.verbose)?;

    match args.command {
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        }
        Commands::Keygen => commands::keygen(),
        Commands::DeriveKey { password, salt } => commands::derive_key(&password, &salt),
        Commands::HashPassword { password } => commands::hash_password(&password)?,
        Commands::TotpSecret { account, issuer } => commands::totp_secret(&account, &issuer)?,
        Commands::Vault(command) => {
            let config = commands::vault_config(args.vault_dir, args.master_key);
            runtime()?.block_on(commands::vault(&config, command))?;
        }
        Commands::Probe {
            url,
            bearer,
            api_key,
            timeout,
        } => runtime()?.block_on(commands::probe(url, bearer, api_key, timeout))?,
    }

    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread().enable_all().build()?)
}
