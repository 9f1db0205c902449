// Configuration load/save

use crate::backends::capture::CaptureConfig;
use crate::backends::socket::procfs::DEFAULT_PROC_ROOT;
use crate::process::SortMethod;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR: &str = ".config/stortop";
const CONFIG_FILE: &str = "config.json";

/// Shortest tick the dashboard accepts
const MIN_TICK_INTERVAL_MS: u64 = 100;

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Processes whose name starts with this are listed
    pub process_prefix: String,

    /// List every process instead of only prefixed ones
    pub show_all: bool,

    pub tick_interval_ms: u64,

    pub sort: SortMethod,

    /// Join capture threads on exit. A capture blocked without a read
    /// timeout only returns on the next packet.
    pub wait_for_capture_on_exit: bool,

    pub proc_root: PathBuf,

    pub capture: CaptureConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            process_prefix: "sam-".to_string(),
            show_all: false,
            tick_interval_ms: 1000,
            sort: SortMethod::Cpu,
            wait_for_capture_on_exit: false,
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
            capture: CaptureConfig::default(),
        }
    }
}

impl Config {
    /// Default config file path (`~/.config/stortop/config.json`)
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        Ok(home.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load configuration from `path`, falling back to defaults if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Config file {:?} not found, using defaults", path);
            return Ok(Config::default());
        }

        let contents =
            fs::read_to_string(path).context(format!("Failed to read config file: {:?}", path))?;

        let config: Config = serde_json::from_str(&contents)
            .context(format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to `path`, creating its directory if needed
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .context(format!("Failed to create config directory: {:?}", dir))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents).context(format!("Failed to write config file: {:?}", path))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(MIN_TICK_INTERVAL_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_serialization() {
        let mut config = Config::default();
        config.process_prefix = "tape-".to_string();
        config.sort = SortMethod::Mem;
        config.capture.read_timeout_ms = Some(250);
        config.capture.ignored_interfaces.push("docker0".to_string());

        let json = serde_json::to_string_pretty(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "show_all": true, "capture": { "promiscuous": true } }"#)
                .unwrap();

        assert!(config.show_all);
        assert_eq!(config.process_prefix, "sam-");
        assert_eq!(config.tick_interval_ms, 1000);
        assert!(config.capture.promiscuous);
        assert_eq!(config.capture.snapshot_len, 1024);
        assert_eq!(config.capture.ignored_interfaces, vec!["lo".to_string()]);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.wait_for_capture_on_exit = true;
        config.proc_root = PathBuf::from("/host/proc");
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_tick_interval_has_a_floor() {
        let mut config = Config::default();
        assert_eq!(config.tick_interval(), Duration::from_secs(1));

        config.tick_interval_ms = 0;
        assert_eq!(config.tick_interval(), Duration::from_millis(MIN_TICK_INTERVAL_MS));
    }
}
