//! Configuration for the compiler.
//!
//! TOML with two sections, both optional:
//!
//! ```toml
//! [render]
//! dialect = "postgres"
//! stage_comments = false
//! indent = 4
//!
//! [cache]
//! enabled = true
//! max_entries = 256
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dialect::DialectKind;
use crate::error::{MetriqlError, Result};
use crate::query_builder::SqlBuilder;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MetriqlConfig {
    pub render: RenderConfig,
    pub cache: CacheConfig,
}

/// SQL rendering options.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Target dialect (default: duckdb).
    pub dialect: DialectKind,
    /// Emit `-- ` comments naming each stage (default: true).
    pub stage_comments: bool,
    /// Spaces per nesting level (default: 2).
    pub indent: usize,
}

/// Compiled query cache.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Oldest entries are evicted past this size (default: 1024).
    pub max_entries: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            dialect: DialectKind::default(),
            stage_comments: true,
            indent: 2,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1024,
        }
    }
}

impl RenderConfig {
    pub fn builder(&self) -> SqlBuilder {
        SqlBuilder::default()
            .with_comments(self.stage_comments)
            .with_indent(self.indent)
    }
}

impl MetriqlConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MetriqlError::Config(format!("failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| MetriqlError::Config(format!("failed to parse config: {e}")))
    }

    /// Load from default locations.
    ///
    /// Search order:
    /// 1. `METRIQL_CONFIG` environment variable
    /// 2. `./metriql.toml`
    /// 3. `<user config dir>/metriql/config.toml`
    /// 4. Built-in defaults
    pub fn load_default() -> Self {
        if let Ok(path) = std::env::var("METRIQL_CONFIG") {
            match Self::from_file(&path) {
                Ok(cfg) => {
                    tracing::info!(path = %path, "loaded config from METRIQL_CONFIG");
                    return cfg;
                }
                Err(err) => tracing::warn!(path = %path, error = %err, "ignoring METRIQL_CONFIG"),
            }
        }

        if let Ok(cfg) = Self::from_file("metriql.toml") {
            tracing::info!("loaded config from ./metriql.toml");
            return cfg;
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("metriql").join("config.toml");
            if let Ok(cfg) = Self::from_file(&user_config) {
                tracing::info!(path = %user_config.display(), "loaded config from user config dir");
                return cfg;
            }
        }

        tracing::debug!("no config file found, using defaults");
        Self::default()
    }
}
