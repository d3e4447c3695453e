use std::env;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/chat.json";
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5000";
pub const DEFAULT_DATABASE_PATH: &str = "data/chat.db";

/// Overrides the port of `listen_addr`.
pub const PORT_ENV: &str = "PORT";
/// Overrides `database_path`.
pub const DATABASE_ENV: &str = "CHAT_DATABASE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub listen_addr: String,
    pub database_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            database_path: DEFAULT_DATABASE_PATH.to_string(),
        }
    }
}

impl AppConfig {
    /// Apply `PORT` / `CHAT_DATABASE` from the environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(env::var(PORT_ENV).ok(), env::var(DATABASE_ENV).ok())
    }

    fn with_overrides(mut self, port: Option<String>, database: Option<String>) -> Self {
        if let Some(port) = port {
            match port.trim().parse::<u16>() {
                Ok(port) => {
                    let host = self
                        .listen_addr
                        .rsplit_once(':')
                        .map_or(self.listen_addr.as_str(), |(host, _)| host);
                    self.listen_addr = format!("{host}:{port}");
                }
                Err(err) => log::warn!("Ignoring invalid {PORT_ENV} `{port}`: {err}"),
            }
        }
        if let Some(database) = database.filter(|d| !d.trim().is_empty()) {
            self.database_path = database;
        }
        self
    }

    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.listen_addr.parse()
    }
}

/// Read the JSON config at `path`.
///
/// A missing file is normal and means defaults. A file that cannot be read
/// or parsed is logged and also yields defaults, so the server still starts.
pub fn load_config(path: impl AsRef<Path>) -> AppConfig {
    let path = path.as_ref();
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            log::info!("No config at {}; using defaults", path.display());
            return AppConfig::default();
        }
        Err(err) => {
            log::warn!("Cannot read config {}: {err}; using defaults", path.display());
            return AppConfig::default();
        }
    };

    AppConfig::from_json(&content).unwrap_or_else(|err| {
        log::warn!("Ignoring malformed config {}: {err}", path.display());
        AppConfig::default()
    })
}
