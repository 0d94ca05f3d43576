//! Default locations for config, state database and logs
//!
//! Everything lives under the user's own directories so the service runs
//! without root. `CURFEW_CONFIG` and `CURFEW_DATA_DIR` are read by the daemon
//! CLI and override these defaults.

use std::path::PathBuf;

/// Environment variable for overriding the config file path
pub const CURFEW_CONFIG_ENV: &str = "CURFEW_CONFIG";

/// Per-user subdirectory for data and logs
const APP_DIR: &str = "curfewd";

/// Per-user subdirectory for configuration
const CONFIG_DIR: &str = "curfew";

fn fallback(kind: &str) -> PathBuf {
    std::env::temp_dir().join(APP_DIR).join(kind)
}

/// `$CURFEW_CONFIG`, else `<config dir>/curfew/config.toml`, else
/// `/etc/curfew/config.toml`
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CURFEW_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/etc"))
        .join(CONFIG_DIR)
        .join("config.toml")
}

/// Where the SQLite state database lives unless configured otherwise
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| fallback("data"))
}

/// Where JSON log files are written unless configured otherwise
pub fn default_log_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::cache_dir)
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| fallback("logs"))
}
