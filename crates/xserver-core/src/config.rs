use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Deserialize;

use crate::error::ConfigError;

/// Resolved configuration, always complete: every field in [`PartialConfig`]
/// that was absent from the file falls back to the default named here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub minimum_display_number: u32,
    pub run_directory: PathBuf,
    pub log_directory: PathBuf,
    pub backup_logs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            minimum_display_number: 0,
            run_directory: PathBuf::from("/run/lightdm"),
            log_directory: PathBuf::from("/var/log/lightdm"),
            backup_logs: true,
        }
    }
}

/// Mirrors the `[LightDM]` table of the configuration file; every field is
/// optional so a file that sets only one key still deserialises.
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    #[serde(rename = "LightDM", default)]
    lightdm: LightDmTable,
}

#[derive(Debug, Default, Deserialize)]
struct LightDmTable {
    #[serde(rename = "minimum-display-number")]
    minimum_display_number: Option<u32>,
    #[serde(rename = "run-directory")]
    run_directory: Option<PathBuf>,
    #[serde(rename = "log-directory")]
    log_directory: Option<PathBuf>,
    #[serde(rename = "backup-logs")]
    backup_logs: Option<bool>,
}

impl Config {
    /// Load from `path`, merging onto [`Config::default`]. Read or parse
    /// failures are returned to the caller; callers that want
    /// fall-back-and-log behaviour should use [`Config::load_or_default`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        let partial: PartialConfig = toml::from_str(&contents).map_err(ConfigError::Parse)?;
        Ok(Config::default().merge_in_partial(partial))
    }

    /// Load from `path`; on any failure, log a warning and fall back to
    /// defaults rather than aborting -- matching the teacher's CLI, which
    /// treats a broken configuration file as non-fatal.
    pub fn load_or_default(path: &Path) -> Self {
        info!("loading configuration from '{}'", path.display());
        match Config::from_file(path) {
            Ok(config) => config,
            Err(err) => {
                warn!("using default configuration: {err}");
                Config::default()
            }
        }
    }

    fn merge_in_partial(mut self, partial: PartialConfig) -> Self {
        let table = partial.lightdm;
        if let Some(value) = table.minimum_display_number {
            self.minimum_display_number = value;
        }
        if let Some(value) = table.run_directory {
            self.run_directory = value;
        }
        if let Some(value) = table.log_directory {
            self.log_directory = value;
        }
        if let Some(value) = table.backup_logs {
            self.backup_logs = value;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("xserver-core-config-test-{}-{name}", std::process::id()))
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let path = unique_temp_path("partial");
        std::fs::write(&path, "[LightDM]\nminimum-display-number = 5\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.minimum_display_number, 5);
        assert_eq!(config.log_directory, Config::default().log_directory);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn every_key_overrides_its_default() {
        let path = unique_temp_path("full");
        std::fs::write(
            &path,
            r#"
            [LightDM]
            minimum-display-number = 10
            run-directory = "/tmp/run"
            log-directory = "/tmp/log"
            backup-logs = false
            "#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(
            config,
            Config {
                minimum_display_number: 10,
                run_directory: PathBuf::from("/tmp/run"),
                log_directory: PathBuf::from("/tmp/log"),
                backup_logs: false,
            }
        );

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn load_or_default_survives_a_missing_file() {
        let config = Config::load_or_default(&unique_temp_path("does-not-exist"));
        assert_eq!(config, Config::default());
    }
}
