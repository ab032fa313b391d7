//! Configuration loader and validator for the paygate service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub charge: Charge,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Pricing tree file, relative paths resolve under `data_dir`.
    pub pricing_file: String,
}

/// Charge-server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Charge {
    pub base_url: String,
    pub api_token: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Absolute-or-joined path of the pricing tree file.
    pub fn pricing_path(&self) -> PathBuf {
        let p = Path::new(&self.app.pricing_file);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            Path::new(&self.app.data_dir).join(p)
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.pricing_file.trim().is_empty() {
        return Err(ConfigError::Invalid("app.pricing_file must be non-empty"));
    }

    if cfg.charge.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("charge.base_url must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.charge.base_url).is_err() {
        return Err(ConfigError::Invalid("charge.base_url must be a valid URL"));
    }
    if cfg.charge.api_token.trim().is_empty() {
        return Err(ConfigError::Invalid("charge.api_token must be non-empty"));
    }

    Ok(())
}

/// Example YAML configuration, also used by `paygate example-config`.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  pricing_file: "pricing.yaml"

charge:
  base_url: "http://localhost:9112/"
  api_token: "YOUR_CHARGE_API_TOKEN"
"#
}
