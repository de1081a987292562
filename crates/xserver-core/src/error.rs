use std::error::Error;
use std::fmt;
use std::io;

/// Everything that can keep a [`crate::local_x_server::LocalXServer`] from
/// reaching the waiting-for-ready state. Every variant here corresponds to a
/// path that must still flow through `stopped` for cleanup -- see
/// `LocalXServer::start`.
#[derive(Debug)]
pub enum StartError {
    /// `start()` called with no command configured.
    ConfigurationMissing,
    /// The configured command could not be resolved to an absolute path
    /// against `PATH`.
    BinaryNotFound(String),
    /// `std::process::Command::spawn` failed.
    SpawnFailed(io::Error),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::ConfigurationMissing => {
                write!(f, "no command configured for this X server")
            }
            StartError::BinaryNotFound(command) => {
                write!(f, "could not resolve '{command}' against PATH")
            }
            StartError::SpawnFailed(err) => write!(f, "failed to spawn X server: {err}"),
        }
    }
}

impl Error for StartError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StartError::SpawnFailed(err) => Some(err),
            _ => None,
        }
    }
}

/// Errors from loading a TOML configuration file. Never fatal to the process
/// that calls it -- see `Config::load`, which logs and falls back to
/// defaults.
#[derive(Debug)]
pub enum ConfigError {
    Read(io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(err) => write!(f, "failed to read configuration file: {err}"),
            ConfigError::Parse(err) => write!(f, "failed to parse configuration file: {err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Read(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
        }
    }
}
