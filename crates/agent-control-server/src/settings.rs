use std::{collections::HashMap, net::SocketAddr, path::PathBuf, time::Duration};

use agent_control_core::{CommandCatalog, StatusThresholds};
use agent_control_session::{ControlConfig, TimeoutPolicy};
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl ServerSettings {
    pub fn addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandSettings {
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    #[serde(default)]
    pub required_args: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusSettings {
    pub active_secs: i64,
    pub idle_secs: i64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    File,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationSettings {
    pub history_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub commands: CommandSettings,
    pub status: StatusSettings,
    pub storage: StorageSettings,
    pub notifications: NotificationSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Load `<config_dir>/default.toml`, the optional `<config_dir>/<env>.toml`
    /// overlay and `AGENT_CONTROL_<SECTION>__<KEY>` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("AGENT_CONTROL_ENV").unwrap_or_else(|_| "local".into());
        let config_dir =
            std::env::var("AGENT_CONTROL_CONFIG_DIR").unwrap_or_else(|_| "config".into());
        Self::load_from(&config_dir, &env)
    }

    pub fn load_from(config_dir: &str, env: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 5000_i64)?
            .set_default("commands.default_timeout_secs", 30_i64)?
            .set_default("commands.max_timeout_secs", 600_i64)?
            .set_default("status.active_secs", 60_i64)?
            .set_default("status.idle_secs", 300_i64)?
            .set_default("status.sweep_interval_secs", 15_i64)?
            .set_default("storage.backend", "file")?
            .set_default("storage.data_dir", "data_received")?
            .set_default("notifications.history_limit", 256_i64)?
            .set_default("log.level", "info")?
            .add_source(
                File::new(&format!("{config_dir}/default"), FileFormat::Toml).required(false),
            )
            .add_source(
                File::new(&format!("{config_dir}/{env}"), FileFormat::Toml).required(false),
            )
            .add_source(
                config::Environment::with_prefix("AGENT_CONTROL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings = config.try_deserialize::<Self>()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.status.active_secs > self.status.idle_secs {
            return Err(ConfigError::Message(format!(
                "status.active_secs ({}) must not exceed status.idle_secs ({})",
                self.status.active_secs, self.status.idle_secs
            )));
        }
        if self.commands.default_timeout_secs == 0 || self.commands.max_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "command timeouts must be at least one second".into(),
            ));
        }
        Ok(())
    }

    pub fn control_config(&self) -> ControlConfig {
        let catalog = self
            .commands
            .required_args
            .iter()
            .fold(CommandCatalog::new(), |catalog, (command, keys)| {
                catalog.require(command.clone(), keys.iter().cloned())
            });

        ControlConfig {
            timeouts: TimeoutPolicy {
                default_secs: self.commands.default_timeout_secs,
                max_secs: self.commands.max_timeout_secs,
            },
            thresholds: StatusThresholds {
                active_secs: self.status.active_secs,
                idle_secs: self.status.idle_secs,
            },
            history_limit: self.notifications.history_limit,
            catalog,
        }
    }

    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.status.sweep_interval_secs)
    }
}
