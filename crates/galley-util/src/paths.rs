//! Default paths for galley components
//!
//! Used by the config defaults, `validate-config` and the service. The
//! `GALLEY_*` environment overrides are applied on the service's command
//! line, not here. Paths are user-writable by default (no root required):
//! - Socket: `$XDG_RUNTIME_DIR/galleyd/galleyd.sock` or `/tmp/galleyd-$USER/galleyd.sock`
//! - Data: `$XDG_DATA_HOME/galleyd` or `~/.local/share/galleyd`, holding `galley.db`
//! - Config: `$XDG_CONFIG_HOME/galley/config.toml` or `~/.config/galley/config.toml`

use std::path::{Path, PathBuf};

/// Socket filename within the socket directory
const SOCKET_FILENAME: &str = "galleyd.sock";

/// SQLite database filename within the data directory
const DATABASE_FILENAME: &str = "galley.db";

/// Service subdirectory for runtime and data files
const APP_DIR: &str = "galleyd";

/// Config lives under the project name, not the daemon's
const CONFIG_DIR: &str = "galley";

/// Get the default socket path.
///
/// Order of precedence:
/// 1. `$XDG_RUNTIME_DIR/galleyd/galleyd.sock` (if XDG_RUNTIME_DIR is set)
/// 2. `/tmp/galleyd-$USER/galleyd.sock` (fallback)
///
/// `GALLEY_SOCKET` is handled by the service's command line.
pub fn default_socket_path() -> PathBuf {
    // Usually /run/user/<uid>, cleared on logout
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    // One directory per user under /tmp
    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$XDG_DATA_HOME/galleyd` (if XDG_DATA_HOME is set)
/// 2. `~/.local/share/galleyd` (fallback)
///
/// `GALLEY_DATA_DIR` is handled by the service's command line.
pub fn default_data_dir() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    // Last resort
    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// The order and audit database inside `data_dir`
pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DATABASE_FILENAME)
}

/// Get the default configuration file path.
///
/// Order of precedence:
/// 1. `$XDG_CONFIG_HOME/galley/config.toml` (if XDG_CONFIG_HOME is set)
/// 2. `~/.config/galley/config.toml`
/// 3. `/etc/galley/config.toml` (no home directory, e.g. a system service)
///
/// `GALLEY_CONFIG` is handled by the service's command line.
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(CONFIG_DIR).join("config.toml");
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR)
            .join("config.toml");
    }

    PathBuf::from("/etc").join(CONFIG_DIR).join("config.toml")
}
