//! Configuration file support for the keyer.
//!
//! Loads settings from `~/.config/cwkeyer/config.toml` on Linux
//! (or platform-appropriate location on other OSes).

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::keyer::{DEFAULT_RIGCTL_ARGS, DEFAULT_RIGCTL_PROGRAM, DEFAULT_UNIT_DELAY};
use crate::listener::DEFAULT_PORT;

/// Which keying driver to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum KeyerMode {
    /// Write Morse units to a serial keyer device
    Serial,
    /// Send whole messages through hamlib's rigctl
    Rigctl,
}

/// Settings for the rig-control keyer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RigctlConfig {
    /// Program to run for each message.
    pub program: String,

    /// Arguments placed before the message text.
    pub args: Vec<String>,
}

impl Default for RigctlConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_RIGCTL_PROGRAM.to_string(),
            args: DEFAULT_RIGCTL_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Keying driver.
    pub mode: KeyerMode,

    /// Address to listen on.
    pub bind: IpAddr,

    /// UDP port to listen on.
    pub port: u16,

    /// Serial keyer device, required in serial mode.
    pub device: Option<PathBuf>,

    /// Delay after each unit written to the serial keyer, in milliseconds.
    pub unit_delay_ms: u64,

    /// Also read messages from standard input.
    pub local_input: bool,

    /// Log statistics every N seconds (0 = never).
    pub stats_interval: u64,

    /// Enable Prometheus metrics HTTP endpoint.
    pub metrics_enabled: bool,

    /// Port for Prometheus metrics HTTP endpoint.
    pub metrics_port: u16,

    /// Rig-control settings.
    pub rigctl: RigctlConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: KeyerMode::Serial,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            device: None,
            unit_delay_ms: DEFAULT_UNIT_DELAY.as_millis() as u64,
            local_input: false,
            stats_interval: 0,
            metrics_enabled: false,
            metrics_port: 9090,
            rigctl: RigctlConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file location.
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but is malformed.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Config::default()),
        }
    }

    /// Load configuration from a specific file, which must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in config file: {}", path.display()))
    }

    /// Returns the path to the config file.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cwkeyer/config.toml"))
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn unit_delay(&self) -> Duration {
        Duration::from_millis(self.unit_delay_ms)
    }

    /// Validate all configuration settings.
    pub fn validate(&self) -> Result<()> {
        match self.mode {
            KeyerMode::Serial => {
                if self.device.is_none() {
                    bail!("Serial mode needs a keyer device (e.g. /dev/ttyACM0)");
                }
                if self.unit_delay_ms == 0 {
                    bail!("unit_delay_ms must be greater than zero");
                }
            }
            KeyerMode::Rigctl => {
                if self.rigctl.program.trim().is_empty() {
                    bail!("rigctl.program must not be empty");
                }
            }
        }
        Ok(())
    }
}
