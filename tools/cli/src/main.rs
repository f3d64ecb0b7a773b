//! SessionVault CLI - operator tool for the encrypted session store.
//!
//! Logs in against the authentication service and keeps the session in the
//! file-backed vault under the data directory.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use url::Url;
use zeroize::Zeroizing;

use sessionvault_auth::{AuthService, HttpAuthenticator, DEFAULT_BASE_URL};
use sessionvault_crypto::{DatabaseKey, KdfParams, KeyProvisioner};
use sessionvault_storage::{HeadlessDevice, LocalBackend, VaultBackend};
use sessionvault_vault::{SessionVault, SessionVaultConfig, UnlockMode};

/// Environment variable holding the device secret.
const SECRET_ENV: &str = "SESSIONVAULT_SECRET";

/// Wrapped database key file inside the data directory.
const KEY_FILENAME: &str = "database.key";

#[derive(Parser)]
#[command(name = "sessionvault")]
#[command(about = "SessionVault - Encrypted session storage")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Directory holding the vault and the wrapped database key.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the authentication service.
    #[arg(long, global = true, default_value = DEFAULT_BASE_URL)]
    api_url: Url,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show vault state, unlock mode and session owner.
    Status,

    /// Log in and store the session.
    Login {
        /// Account email.
        #[arg(short, long)]
        email: String,
    },

    /// Show the stored user.
    Show,

    /// Log out and clear the vault.
    Logout,

    /// Change the unlock mode.
    Mode {
        /// Device, SystemPIN, SessionPIN, ForceLogin or NeverLock.
        mode: UnlockMode,
    },

    /// Lock the vault now.
    Lock,

    /// Create the wrapped database key, or check the device secret against it.
    ProvisionKey,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Failed to initialize logging: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `--verbose`.
fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => dirs::data_dir()
            .context("No data directory on this platform, pass --data-dir")?
            .join("sessionvault"),
    };
    let config = match &cli.config {
        Some(path) => SessionVaultConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SessionVaultConfig::default(),
    };

    let api_url = cli.api_url;
    match cli.command {
        Commands::ProvisionKey => cmd_provision_key(&data_dir),
        Commands::Status => cmd_status(&open_vault(&data_dir, config).await?).await,
        Commands::Login { email } => {
            cmd_login(open_vault(&data_dir, config).await?, api_url, &email).await
        }
        Commands::Show => cmd_show(&open_vault(&data_dir, config).await?).await,
        Commands::Logout => cmd_logout(open_vault(&data_dir, config).await?, api_url).await,
        Commands::Mode { mode } => cmd_mode(&open_vault(&data_dir, config).await?, mode).await,
        Commands::Lock => cmd_lock(&open_vault(&data_dir, config).await?).await,
    }
}

/// Read the device secret from the environment or the terminal.
fn device_secret() -> Result<Zeroizing<Vec<u8>>> {
    if let Ok(secret) = std::env::var(SECRET_ENV) {
        return Ok(Zeroizing::new(secret.into_bytes()));
    }

    let secret = rpassword::prompt_password("Device secret: ")
        .context("Failed to read device secret")?;
    Ok(Zeroizing::new(secret.into_bytes()))
}

fn key_provisioner(data_dir: &Path) -> KeyProvisioner {
    KeyProvisioner::new(data_dir.join(KEY_FILENAME), KdfParams::default())
}

fn database_key(provisioner: &KeyProvisioner) -> Result<DatabaseKey> {
    let secret = device_secret()?;
    provisioner
        .provision(&secret)
        .context("Failed to provision database key")
}

async fn open_vault(data_dir: &Path, config: SessionVaultConfig) -> Result<SessionVault> {
    let key = database_key(&key_provisioner(data_dir))?;

    let backend = Arc::new(LocalBackend::new(data_dir, config.vault.clone()));
    backend
        .create(Some(&key))
        .await
        .context("Failed to open vault")?;

    let navigator = || info!("Session ended, log in again");
    Ok(SessionVault::new(
        backend,
        Arc::new(HeadlessDevice),
        Arc::new(navigator),
        config,
    ))
}

fn cmd_provision_key(data_dir: &Path) -> Result<()> {
    let provisioner = key_provisioner(data_dir);
    let existed = provisioner.exists();
    database_key(&provisioner)?;

    let path = provisioner.path().display();
    if existed {
        println!("Device secret unlocks the database key at {}", path);
    } else {
        println!("Database key created at {}", path);
    }
    Ok(())
}

async fn cmd_status(vault: &SessionVault) -> Result<()> {
    let session = vault.get_session().await.context("Failed to read session")?;
    let storage_class = vault.vault_storage_class().await?;

    println!("State:        {}", vault.state());
    println!("Unlock mode:  {}", vault.unlock_mode().await);
    match storage_class {
        Some(class) => println!("Storage:      {}", class),
        None => println!("Storage:      empty"),
    }
    println!("Can lock:     {}", vault.can_use_locking());
    println!("Can unlock:   {}", vault.can_unlock().await?);
    match session {
        Some(session) => println!("Signed in as: {}", session.user.email),
        None => println!("Signed in as: nobody"),
    }
    Ok(())
}

async fn cmd_login(vault: SessionVault, api_url: Url, email: &str) -> Result<()> {
    let password = Zeroizing::new(
        rpassword::prompt_password("Password: ").context("Failed to read password")?,
    );

    let authenticator = HttpAuthenticator::new(api_url)?;
    let service = AuthService::new(vault, Arc::new(authenticator));

    if service.login(email, &password).await.context("Login failed")? {
        println!("Logged in as {}", email);
        println!("Unlock mode: {}", service.vault().unlock_mode().await);
    } else {
        anyhow::bail!("Invalid email or password");
    }
    Ok(())
}

async fn cmd_show(vault: &SessionVault) -> Result<()> {
    match vault.get_session().await.context("Failed to read session")? {
        Some(session) => {
            println!("User ID: {}", session.user.id);
            println!("Name:    {} {}", session.user.first_name, session.user.last_name);
            println!("Email:   {}", session.user.email);
        }
        None => println!("No session stored"),
    }
    Ok(())
}

async fn cmd_logout(vault: SessionVault, api_url: Url) -> Result<()> {
    let authenticator = HttpAuthenticator::new(api_url)?;
    let service = AuthService::new(vault, Arc::new(authenticator));

    service.logout().await.context("Logout failed")?;
    println!("Logged out");
    Ok(())
}

async fn cmd_mode(vault: &SessionVault, mode: UnlockMode) -> Result<()> {
    vault
        .set_unlock_mode(mode)
        .await
        .with_context(|| format!("Failed to switch to {}", mode))?;
    println!("Unlock mode: {}", mode);
    Ok(())
}

async fn cmd_lock(vault: &SessionVault) -> Result<()> {
    vault.lock().await.context("Failed to lock vault")?;
    println!("State: {}", vault.state());
    Ok(())
}
