//! Tiered path resolution shared by the core service's configuration
//! loader: CLI argument, then environment variable, then TOML config
//! file, then an OS-dependent compiled default.

use crate::{Error, Result};
use std::path::PathBuf;

/// Resolve a filesystem path (e.g. the SQLite database file) by priority:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file, read for `config_file_key`
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_path(
    cli_arg: Option<&str>,
    env_var_name: &str,
    config_file_key: Option<&str>,
    default: impl FnOnce() -> PathBuf,
) -> Result<PathBuf> {
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    if let Ok(path) = std::env::var(env_var_name) {
        return Ok(PathBuf::from(path));
    }

    if let Some(key) = config_file_key {
        if let Ok(config_path) = find_config_file() {
            if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
                if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                    if let Some(value) = config.get(key).and_then(|v| v.as_str()) {
                        return Ok(PathBuf::from(value));
                    }
                }
            }
        }
    }

    Ok(default())
}

/// Locate the platform config file (`~/.config/affirm-core/config.toml`,
/// falling back to `/etc/affirm-core/config.toml` on Linux).
pub fn find_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("affirm-core").join("config.toml"));
    if let Some(path) = &user_config {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/affirm-core/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("no config file found".to_string()))
}

/// OS-dependent default data directory, used as the parent of the
/// default SQLite database path when nothing more specific is set.
pub fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("affirm-core"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/affirm-core"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("affirm-core"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/affirm-core"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("affirm-core"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\affirm-core"))
    } else {
        PathBuf::from("./affirm_core_data")
    }
}
