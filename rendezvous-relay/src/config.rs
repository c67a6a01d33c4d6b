//! Relay settings, merged from the command line, the environment, a TOML
//! file and built-in defaults, in that order of precedence.
//!
//! The file lives at `<config_dir>/rendezvous-relay/config.toml` unless
//! `--config` names another one:
//!
//! ```toml
//! [server]
//! bind_addr = "127.0.0.1:8000"
//! max_message_size = 65536
//! ```

use std::path::{Path, PathBuf};

use crate::relay::RelayState;

/// Port the relay listens on when nothing else is configured.
pub const DEFAULT_PORT: u16 = 8000;

/// Largest inbound frame accepted when nothing else is configured.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Why the relay could not work out its settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Bad TOML, a wrong value type, or a key the relay does not know.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A zero limit would reject every frame, including the smallest offer.
    #[error("max_message_size must be greater than zero")]
    ZeroMessageSize,
}

/// On-disk layout. Unknown keys are errors so a misspelt limit is not
/// silently replaced by the default.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    server: ServerSection,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerSection {
    bind_addr: Option<String>,
    max_message_size: Option<usize>,
}

/// Command-line flags for `rendezvous-relay`.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Rendezvous relay for peer-to-peer negotiation")]
pub struct RelayCliArgs {
    /// Listen address, `host:port`.
    #[arg(short, long, env = "RENDEZVOUS_ADDR")]
    pub bind: Option<String>,

    /// Config file to use instead of the per-user default. Must exist.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Largest inbound WebSocket frame, in bytes.
    #[arg(long)]
    pub max_message_size: Option<usize>,

    /// Tracing filter directive, e.g. `info` or `rendezvous_relay=debug`.
    #[arg(long, default_value = "info", env = "RENDEZVOUS_LOG")]
    pub log_level: String,
}

/// Settings the relay runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub bind_addr: String,
    /// Frames larger than this close the sender's connection.
    pub max_message_size: usize,
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Reads the config file (if any) and layers the CLI on top of it.
    ///
    /// A missing file at the default location is fine; a missing file
    /// passed with `--config` is not.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or if
    /// the resulting message size limit is zero.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = match cli.config.as_deref() {
            Some(path) => read_file(path)?,
            None => read_default_file()?,
        };
        Self::merge(cli, file)
    }

    fn merge(cli: &RelayCliArgs, file: ConfigFile) -> Result<Self, ConfigError> {
        let ServerSection {
            bind_addr,
            max_message_size,
        } = file.server;
        let defaults = Self::default();

        let config = Self {
            bind_addr: cli.bind.clone().or(bind_addr).unwrap_or(defaults.bind_addr),
            max_message_size: cli
                .max_message_size
                .or(max_message_size)
                .unwrap_or(defaults.max_message_size),
            log_level: cli.log_level.clone(),
        };
        if config.max_message_size == 0 {
            return Err(ConfigError::ZeroMessageSize);
        }
        Ok(config)
    }

    /// Fresh relay state carrying these limits.
    #[must_use]
    pub fn relay_state(&self) -> RelayState {
        RelayState::with_config(self.max_message_size)
    }
}

fn read_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}

fn read_default_file() -> Result<ConfigFile, ConfigError> {
    let Some(dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = dir.join("rendezvous-relay").join("config.toml");
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    read_file(&path)
}
