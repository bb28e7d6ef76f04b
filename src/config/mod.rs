//! Configuration Management
//!
//! This module resolves the deployment configuration: which engine to talk to, where it lives,
//! page size limits, value encoding and capabilities. Credentials are never part of it.
//!
//! # Configuration Locations
//! - Local: `.quarry/config.json` (team-shareable, per-project)
//! - Global: `<config dir>/quarry/config.json` (per-user)
//!
//! # Resolution Precedence
//! 1. Explicit CLI flags (highest priority)
//! 2. Environment (`QUARRY_ENGINE`, `QUARRY_HOST`, `QUARRY_PORT`, `QUARRY_SQLITE_DIR`, `QUARRY_READONLY`)
//! 3. Local config file
//! 4. Global config file
//! 5. Built-in defaults
//!
//! Each source is a [`ConfigLayer`] of optional fields; later layers override earlier ones
//! field by field.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capability::Capabilities;
use crate::engine::{AnyConnector, DatabaseType};
use crate::error::{QuarryError, Result};
use crate::marshal::BinaryEncoding;
use crate::orchestrator::Settings;
use crate::pagination::DEFAULT_PAGE_LIMIT;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 3306;
const DEFAULT_MAX_PAGE_LIMIT: u64 = 1000;

/// One configuration source; every field optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<DatabaseType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Directory whose `<name>.db` files are the `SQLite` databases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_dir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_page_limit: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_page_limit: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_encoding: Option<BinaryEncoding>,

    /// Connect and statement timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readonly: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_ddl: Option<bool>,
}

impl ConfigLayer {
    /// Overlay `higher` on top of `self`
    #[must_use]
    pub fn merge(self, higher: Self) -> Self {
        Self {
            engine: higher.engine.or(self.engine),
            host: higher.host.or(self.host),
            port: higher.port.or(self.port),
            sqlite_dir: higher.sqlite_dir.or(self.sqlite_dir),
            default_page_limit: higher.default_page_limit.or(self.default_page_limit),
            max_page_limit: higher.max_page_limit.or(self.max_page_limit),
            binary_encoding: higher.binary_encoding.or(self.binary_encoding),
            timeout_ms: higher.timeout_ms.or(self.timeout_ms),
            readonly: higher.readonly.or(self.readonly),
            allow_ddl: higher.allow_ddl.or(self.allow_ddl),
        }
    }

    /// Layer from `QUARRY_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Layer from an environment lookup function
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let engine = var("QUARRY_ENGINE").map(|v| v.parse::<DatabaseType>()).transpose()?;
        let port = var("QUARRY_PORT")
            .map(|v| {
                v.parse::<u16>()
                    .map_err(|_| QuarryError::config(format!("QUARRY_PORT must be a port number, got '{v}'")))
            })
            .transpose()?;
        let readonly = var("QUARRY_READONLY").map(|v| parse_flag("QUARRY_READONLY", &v)).transpose()?;

        Ok(Self {
            engine,
            host: var("QUARRY_HOST"),
            port,
            sqlite_dir: var("QUARRY_SQLITE_DIR").map(PathBuf::from),
            readonly,
            ..Self::default()
        })
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(QuarryError::config(format!("{name} must be true or false, got '{value}'"))),
    }
}

/// Fully resolved deployment configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarryConfig {
    pub engine: DatabaseType,
    pub host: String,
    pub port: u16,
    pub sqlite_dir: PathBuf,
    pub default_page_limit: u64,
    pub max_page_limit: u64,
    pub binary_encoding: BinaryEncoding,
    pub timeout: Option<Duration>,
    pub capabilities: Capabilities,
}

impl Default for QuarryConfig {
    fn default() -> Self {
        Self {
            engine: DatabaseType::MySQL,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            sqlite_dir: PathBuf::from("."),
            default_page_limit: DEFAULT_PAGE_LIMIT,
            max_page_limit: DEFAULT_MAX_PAGE_LIMIT,
            binary_encoding: BinaryEncoding::Reject,
            timeout: None,
            capabilities: Capabilities::default(),
        }
    }
}

impl QuarryConfig {
    /// Apply a merged layer over the defaults and validate the result
    pub fn from_layer(layer: ConfigLayer) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            engine: layer.engine.unwrap_or(defaults.engine),
            host: layer.host.unwrap_or(defaults.host),
            port: layer.port.unwrap_or(defaults.port),
            sqlite_dir: layer.sqlite_dir.unwrap_or(defaults.sqlite_dir),
            default_page_limit: layer.default_page_limit.unwrap_or(defaults.default_page_limit),
            max_page_limit: layer.max_page_limit.unwrap_or(defaults.max_page_limit),
            binary_encoding: layer.binary_encoding.unwrap_or(defaults.binary_encoding),
            timeout: layer.timeout_ms.map(Duration::from_millis),
            capabilities: Capabilities {
                readonly: layer.readonly.unwrap_or(defaults.capabilities.readonly),
                allow_ddl: layer.allow_ddl.unwrap_or(defaults.capabilities.allow_ddl),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(QuarryError::config("port must not be 0"));
        }
        if self.max_page_limit == 0 {
            return Err(QuarryError::config("max_page_limit must be at least 1"));
        }
        if self.default_page_limit == 0 || self.default_page_limit > self.max_page_limit {
            return Err(QuarryError::config(format!(
                "default_page_limit must be between 1 and max_page_limit ({})",
                self.max_page_limit
            )));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(QuarryError::config("timeout_ms must be positive"));
        }
        Ok(())
    }

    /// Orchestrator settings for this deployment
    #[must_use]
    pub const fn settings(&self) -> Settings {
        Settings {
            default_page_limit: self.default_page_limit,
            max_page_limit: self.max_page_limit,
            binary_encoding: self.binary_encoding,
            capabilities: self.capabilities,
        }
    }

    /// Connector for the configured engine
    pub fn connector(&self) -> Result<AnyConnector> {
        match self.engine {
            #[cfg(feature = "mysql")]
            DatabaseType::MySQL => Ok(AnyConnector::MySql(
                crate::engine::mysql::MySqlConnector::new(self.host.clone(), self.port)
                    .with_timeout(self.timeout),
            )),
            #[cfg(feature = "sqlite")]
            DatabaseType::SQLite => Ok(AnyConnector::Sqlite(
                crate::engine::sqlite::SqliteConnector::new(self.sqlite_dir.clone())
                    .with_busy_timeout(self.timeout),
            )),
            #[allow(unreachable_patterns)]
            other => Err(QuarryError::config(format!(
                "engine '{other}' is not compiled into this build"
            ))),
        }
    }
}

/// Configuration file location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLocation {
    /// Local config: `.quarry/config.json` (team-shareable)
    Local,
    /// Global config: `<config dir>/quarry/config.json` (per-user)
    Global,
}

/// Get path to local config file (`.quarry/config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        QuarryError::config(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".quarry").join("config.json"))
}

/// Get path to global config file
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| QuarryError::config("Could not determine user config directory"))?;

    Ok(config_dir.join("quarry").join("config.json"))
}

/// Load one config file; a missing file is an empty layer
pub fn load_layer(path: &Path) -> Result<ConfigLayer> {
    if !path.exists() {
        return Ok(ConfigLayer::default());
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| QuarryError::config(format!("Could not read config file {}: {e}", path.display())))?;

    serde_json::from_str(&contents).map_err(|e| {
        QuarryError::config(format!("Invalid config file {}: {e}", path.display()))
    })
}

/// Write a config layer, creating parent directories
pub fn save_layer(path: &Path, layer: &ConfigLayer) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            QuarryError::config(format!("Could not create config directory: {e}"))
        })?;
    }

    let contents = serde_json::to_string_pretty(layer)
        .map_err(|e| QuarryError::config(format!("Could not serialize config: {e}")))?;

    fs::write(path, contents)
        .map_err(|e| QuarryError::config(format!("Could not write config file: {e}")))
}

/// Merge `layer` into the config file at `location`; returns the file written
pub fn save_config(layer: ConfigLayer, location: ConfigLocation) -> Result<PathBuf> {
    let path = match location {
        ConfigLocation::Local => local_config_path()?,
        ConfigLocation::Global => global_config_path()?,
    };

    let merged = load_layer(&path)?.merge(layer);
    save_layer(&path, &merged)?;
    Ok(path)
}

/// Resolve the deployment configuration from every source
///
/// `cli` holds explicitly passed flags and wins over everything else.
pub fn load_with_precedence(cli: ConfigLayer) -> Result<QuarryConfig> {
    let global = match global_config_path() {
        Ok(path) => load_layer(&path)?,
        // No home directory (containers, CI): skip the global file
        Err(_) => ConfigLayer::default(),
    };
    let local = load_layer(&local_config_path()?)?;
    let env = ConfigLayer::from_env()?;

    QuarryConfig::from_layer(global.merge(local).merge(env).merge(cli))
}
