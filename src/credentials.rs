use anyhow::{anyhow, Context, Result};
use chatbook::models::TokenPair;
use log::info;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub server: String,
    pub username: String,
    pub tokens: TokenPair,
}

impl Credentials {
    pub fn new(server: &str, username: &str, tokens: TokenPair) -> Self {
        Credentials {
            server: server.to_string(),
            username: username.to_string(),
            tokens,
        }
    }
}

static CONFIG_DIR_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

/// Use `dir` instead of the platform config directory. Only the first call
/// has effect.
pub fn set_config_dir_override(dir: PathBuf) {
    let _ = CONFIG_DIR_OVERRIDE.set(dir);
}

pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = match CONFIG_DIR_OVERRIDE.get() {
        Some(dir) => dir.clone(),
        None => dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?
            .join("chatbook"),
    };

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("creating {}", config_dir.display()))?;
    }

    Ok(config_dir)
}

fn get_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("credentials.json"))
}

pub fn save_credentials(credentials: &Credentials) -> Result<()> {
    let file = File::create(get_config_path()?)?;
    serde_json::to_writer_pretty(file, credentials)?;

    info!("Credentials saved for {}", credentials.username);
    Ok(())
}

/// Stored credentials for `server`, if any. Credentials saved for another
/// server are ignored.
pub fn load_credentials(server: &str) -> Result<Option<Credentials>> {
    let config_path = get_config_path()?;
    if !config_path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(&config_path)?;
    let credentials: Credentials = serde_json::from_str(&contents)
        .with_context(|| format!("parsing {}", config_path.display()))?;
    if credentials.server != server {
        info!(
            "Ignoring stored credentials for {} (server {} != {})",
            credentials.username, credentials.server, server
        );
        return Ok(None);
    }

    info!(
        "Loaded credentials for {} from {}",
        credentials.username,
        config_path.display()
    );
    Ok(Some(credentials))
}

pub fn clear_credentials() -> Result<()> {
    let config_path = get_config_path()?;
    if config_path.exists() {
        fs::remove_file(&config_path)?;
        info!("Removed stored credentials");
    }
    Ok(())
}
