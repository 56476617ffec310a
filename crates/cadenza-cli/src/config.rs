use anyhow::{Context, Result};
use cadenza_core::DispatcherConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CadenzaConfig {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

fn default_database() -> String {
    "~/.cadenza/cadenza.db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub default_customer_id: Option<i64>,
    /// Rows shown by `cadenza sessions`
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_customer_id: None,
            list_limit: default_list_limit(),
        }
    }
}

fn default_list_limit() -> usize {
    20
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cadenza")
}

impl CadenzaConfig {
    /// Load from `custom_path`, or `~/.cadenza/config.toml`.
    ///
    /// A missing default config falls back to built-in defaults; a missing
    /// custom path is an error.
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = match custom_path {
            Some(path) => path.clone(),
            None => {
                let path = config_dir().join("config.toml");
                if !path.exists() {
                    debug!("No config at {}, using defaults", path.display());
                    return Ok(Self::default());
                }
                path
            }
        };
        Self::from_file(&path)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `cadenza init` first.",
                path.display()
            )
        })?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: CadenzaConfig = toml::from_str(&expanded)?;
        if config.dispatcher.max_route_steps == 0 {
            anyhow::bail!("dispatcher.max_route_steps must be at least 1");
        }
        if config.dispatcher.tool_timeout_secs == 0 {
            anyhow::bail!("dispatcher.tool_timeout_secs must be at least 1");
        }
        Ok(config)
    }

    /// Database path with `~/` expanded
    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.storage.database)
    }
}

const ALLOWED_ENV_VARS: &[&str] = &["HOME", "USER", "CADENZA_HOME", "CADENZA_DB"];

fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            pos = abs_start + end + 1;
            continue;
        }

        let value = std::env::var(&var_name).unwrap_or_default();
        let value_len = value.len();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value_len;
    }
    result
}

pub fn expand_home(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(s)
}
