use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::core::config::Config;

/// Get the user data directory for hotswap
/// - macOS: ~/.hotswap/
/// - Windows: %APPDATA%\hotswap\
/// - Linux: ~/.config/hotswap/
pub fn get_user_data_dir() -> Result<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Failed to get home directory"))?;
        Ok(home.join(".hotswap"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Failed to get AppData directory"))?;
        Ok(appdata.join("hotswap"))
    }

    #[cfg(target_os = "linux")]
    {
        let config = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))?;
        Ok(config.join("hotswap"))
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
    {
        Err(anyhow::anyhow!("Unsupported platform"))
    }
}

/// Get the config file path in the user data directory
pub fn get_user_config_path() -> Result<PathBuf> {
    Ok(get_user_data_dir()?.join("config.json"))
}

/// Config path used when the user data directory is unavailable
pub fn get_user_config_path_or_temp() -> PathBuf {
    get_user_config_path()
        .unwrap_or_else(|_| std::env::temp_dir().join("hotswap").join("config.json"))
}

/// Write the embedded default config to `path` unless a file is already there
pub fn ensure_default_config_at(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    let default_config = crate::assets::get_default_config()
        .ok_or_else(|| anyhow::anyhow!("Failed to get embedded default config"))?;

    std::fs::write(path, default_config)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("Created default config file at: {:?}", path);
    Ok(())
}

/// Initialize user config directory and config file
/// If config file doesn't exist, create it from the embedded default config
pub fn initialize_user_config() -> Result<PathBuf> {
    let config_path = get_user_config_path()?;

    if config_path.exists() {
        log::info!("Using existing config file: {:?}", config_path);
    } else {
        log::info!(
            "Config file not found, creating from embedded default: {:?}",
            config_path
        );
        ensure_default_config_at(&config_path)?;
    }

    Ok(config_path)
}

/// Load and parse the config at `path`
pub fn load_config(path: &Path) -> Result<Config> {
    let config_content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = serde_json::from_str(&config_content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}

/// Load config from user data directory
pub fn load_user_config() -> Result<Config> {
    let config_path = initialize_user_config()?;
    load_config(&config_path)
}

/// Parse the embedded default config
pub fn load_default_config() -> Result<Config> {
    let raw = crate::assets::get_default_config()
        .ok_or_else(|| anyhow::anyhow!("embedded default config missing"))?;
    let config = serde_json::from_str(&raw).context("invalid embedded default config")?;
    Ok(config)
}

/// Base directory for update state and bundles
/// - `data_dir` from config when set
/// - Debug mode: target/
/// - Release mode: <user_data_dir>/
fn get_update_root(config: &Config) -> PathBuf {
    if let Some(dir) = &config.data_dir {
        return dir.clone();
    }
    if cfg!(debug_assertions) {
        PathBuf::from("target")
    } else {
        get_user_data_dir().unwrap_or_else(|_| PathBuf::from("."))
    }
}

/// Get the update store file path (last applied bundle + pending marker)
pub fn get_state_file_path(config: &Config) -> PathBuf {
    get_update_root(config).join("update-store.json")
}

/// Get the directory holding staged and installed bundles
pub fn get_bundles_dir(config: &Config) -> PathBuf {
    get_update_root(config).join("bundles")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_default_config_writes_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.json");

        ensure_default_config_at(&path).unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.update.settle_delay_ms, 500);

        std::fs::write(&path, r#"{"update": {"settle_delay_ms": 50}}"#).unwrap();
        ensure_default_config_at(&path).unwrap();
        assert_eq!(load_config(&path).unwrap().update.settle_delay_ms, 50);
    }

    #[test]
    fn test_load_config_reports_parse_errors() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_data_dir_override() {
        let config = Config {
            data_dir: Some(PathBuf::from("/var/lib/app")),
            ..Config::default()
        };

        assert_eq!(
            get_state_file_path(&config),
            PathBuf::from("/var/lib/app/update-store.json")
        );
        assert_eq!(get_bundles_dir(&config), PathBuf::from("/var/lib/app/bundles"));
    }

    #[test]
    fn test_load_default_config() {
        assert!(load_default_config().is_ok());
    }
}
