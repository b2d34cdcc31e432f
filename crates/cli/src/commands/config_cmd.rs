//! `cairn config` — Configuration management commands.

use cairn_config::AppConfig;

use crate::bootstrap::BoxError;

/// Print the effective configuration. The API key is redacted.
pub async fn show() -> Result<(), BoxError> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{config:#?}");
    Ok(())
}

pub async fn path() -> Result<(), BoxError> {
    println!("{}", config_file().display());
    Ok(())
}

/// Write a default config file unless one exists.
pub async fn init() -> Result<(), BoxError> {
    let path = config_file();
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

fn config_file() -> std::path::PathBuf {
    AppConfig::config_dir().join("config.toml")
}
