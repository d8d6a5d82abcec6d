use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Overrides the config file location.
pub const CONFIG_ENV_VAR: &str = "PANODB_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub malette: MaletteConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    #[default]
    Sqlite,
    Postgresql,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseType,

    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,

    /// e.g. "host=localhost user=panodb dbname=panodb"
    #[serde(default)]
    pub postgresql_url: Option<String>,

    #[serde(default)]
    pub pool_size: Option<u32>,
}

fn default_sqlite_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("panodb")
        .join("panodb.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseType::default(),
            sqlite_path: default_sqlite_path(),
            postgresql_url: None,
            pool_size: None,
        }
    }
}

/// First match wins: `id`, `id_file`, `env_var`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaletteConfig {
    #[serde(default)]
    pub id: Option<i64>,

    /// File holding the id; read again for every new record.
    #[serde(default)]
    pub id_file: Option<PathBuf>,

    /// Defaults to `PANODB_MALETTE_ID`.
    #[serde(default)]
    pub env_var: Option<String>,
}

impl Config {
    /// Load from `PANODB_CONFIG` or the default location, writing the defaults
    /// there when no file exists yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            tracing::info!(path = %path.display(), "Wrote default configuration");
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("panodb")
    }

    pub fn config_path() -> PathBuf {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => Self::config_dir().join("config.toml"),
        }
    }
}
