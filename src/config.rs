//! TOML configuration with built-in defaults.
//!
//! A user file only needs the keys it wants to change: it is merged table by
//! table over [`Config::default`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::backends::BackendOptions;
use crate::error::PipelineError;

pub const DEFAULT_CONFIG_FILE: &str = "cutout.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub processing: ProcessingConfig,
    pub models: BTreeMap<String, BackendConfig>,
    pub monitoring: MonitoringConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessingConfig {
    pub input_folder: PathBuf,
    pub output_folder: PathBuf,
    pub processed_folder: PathBuf,
    /// Backend id used for processing
    pub model: String,
    pub device: String,
    /// Worker count; 1 processes files sequentially
    pub batch_size: usize,
    pub file_extensions: Vec<String>,
    /// Seconds a file's size must stay unchanged before it is processed
    pub file_stability_timeout: f64,
    pub preserve_original: bool,
    pub overwrite_existing: bool,
}

/// Per-backend settings, keyed by backend id under `[models]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct BackendConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    /// Sub-model name (rembg variants such as "u2net")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub recursive: bool,
    pub debounce_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    pub max_size: String,
    pub backup_count: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            input_folder: PathBuf::from("./input"),
            output_folder: PathBuf::from("./output"),
            processed_folder: PathBuf::from("./processed"),
            model: "flood".to_string(),
            device: "auto".to_string(),
            batch_size: 1,
            file_extensions: [".jpg", ".jpeg", ".png", ".bmp", ".tiff"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            file_stability_timeout: 2.0,
            preserve_original: true,
            overwrite_existing: false,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recursive: false,
            debounce_seconds: 1.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some(PathBuf::from("cutout.log")),
            max_size: "10MB".to_string(),
            backup_count: 5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        models.insert(
            "flood".to_string(),
            BackendConfig {
                enabled: true,
                quality: Some("high".to_string()),
                ..Default::default()
            },
        );
        models.insert(
            "rembg".to_string(),
            BackendConfig {
                enabled: true,
                model_name: Some("u2net".to_string()),
                ..Default::default()
            },
        );

        Self {
            processing: ProcessingConfig::default(),
            models,
            monitoring: MonitoringConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// Without an explicit path, `./cutout.toml` is used if present, then
    /// `~/.cutout/config.toml`. A missing file yields the defaults, which are
    /// written to that location for the user to edit.
    pub fn load(path: Option<&Path>) -> Result<(Self, PathBuf)> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path(),
        };

        if !path.exists() {
            tracing::info!("Config file not found at {}, using defaults", path.display());
            let config = Config::default();
            if let Err(e) = config.save(&path) {
                tracing::warn!("Could not write default configuration: {:#}", e);
            }
            return Ok((config, path));
        }

        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = Self::from_toml_str(&text)
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        tracing::info!("Configuration loaded from {}", path.display());

        Ok((config, path))
    }

    /// Parse a (possibly partial) TOML document and merge it over the defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let user: toml::Value = toml::from_str(text)?;
        let mut merged = toml::Value::try_from(Config::default())?;
        deep_merge(&mut merged, user);
        Ok(merged.try_into()?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!("Configuration saved to {}", path.display());
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Set a value by dotted key, e.g. `processing.batch_size`.
    ///
    /// `true`/`false` become booleans, integers and decimals become numbers,
    /// anything else is stored as a string.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut root = toml::Value::try_from(&*self)?;
        let parts: Vec<&str> = key.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            bail!("invalid configuration key '{}'", key);
        }

        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| anyhow!("empty configuration key"))?;

        let mut target = &mut root;
        for part in parents {
            let table = target
                .as_table_mut()
                .ok_or_else(|| anyhow!("'{}' is not a table", part))?;
            target = table
                .entry(part.to_string())
                .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
        }
        let table = target
            .as_table_mut()
            .ok_or_else(|| anyhow!("cannot set '{}': parent is not a table", key))?;
        table.insert(last.to_string(), parse_scalar(value));

        *self = root
            .try_into()
            .with_context(|| format!("invalid value '{}' for '{}'", value, key))?;
        Ok(())
    }

    pub fn backend(&self, name: &str) -> Option<&BackendConfig> {
        self.models.get(name)
    }

    /// Quality label of a backend, "default" when unset
    pub fn quality_of(&self, name: &str) -> String {
        self.backend(name)
            .and_then(|b| b.quality.clone())
            .unwrap_or_else(|| "default".to_string())
    }

    /// Construction options for a backend; fails if it is not enabled
    pub fn backend_options(&self, name: &str) -> Result<BackendOptions, PipelineError> {
        let backend = self
            .backend(name)
            .filter(|b| b.enabled)
            .ok_or_else(|| {
                PipelineError::Config(format!("model '{}' is not enabled in configuration", name))
            })?;

        Ok(BackendOptions {
            device: backend
                .device
                .clone()
                .unwrap_or_else(|| self.processing.device.clone()),
            quality: backend.quality.clone(),
            variant: backend.model_name.clone(),
            mode: backend.mode.clone(),
            options: backend.options.clone(),
        })
    }

    pub fn stability_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.processing.file_stability_timeout.max(0.0))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_secs_f64(self.monitoring.debounce_seconds.max(0.0))
    }
}

fn default_config_path() -> PathBuf {
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }
    match dirs::home_dir() {
        Some(home) => {
            let home_config = home.join(".cutout").join("config.toml");
            if home_config.exists() { home_config } else { local }
        }
        None => local,
    }
}

fn deep_merge(base: &mut toml::Value, update: toml::Value) {
    match (base, update) {
        (toml::Value::Table(base), toml::Value::Table(update)) => {
            for (key, value) in update {
                match base.get_mut(&key) {
                    Some(existing) if existing.is_table() && value.is_table() => {
                        deep_merge(existing, value)
                    }
                    _ => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, update) => *base = update,
    }
}

fn parse_scalar(value: &str) -> toml::Value {
    match value.to_ascii_lowercase().as_str() {
        "true" => return toml::Value::Boolean(true),
        "false" => return toml::Value::Boolean(false),
        _ => {}
    }
    if let Ok(i) = value.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    if value.contains('.') {
        if let Ok(f) = value.parse::<f64>() {
            return toml::Value::Float(f);
        }
    }
    toml::Value::String(value.to_string())
}
