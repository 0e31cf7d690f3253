use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{API_KEY_VARS, DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::error::{CanonError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "table_canon.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub generation: GenerationConfig,
    pub orchestrator: OrchestratorConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
    /// External prompt template; a short built-in instruction is used when absent
    pub prompt_path: Option<PathBuf>,
    /// Never read from the file, only from the environment
    #[serde(skip)]
    pub api_keys: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.1,
            max_output_tokens: 4096,
            timeout_secs: 60,
            prompt_path: None,
            api_keys: Vec::new(),
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub rate_limit_backoff_ms: u64,
    /// Tables normalized at once
    pub concurrency: usize,
    pub fallback_on_exhaustion: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
            rate_limit_backoff_ms: 5_000,
            concurrency: 4,
            fallback_on_exhaustion: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub csv_path: PathBuf,
    pub report_path: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from("outputs/consolidated.csv"),
            report_path: PathBuf::from("outputs/validation_report.json"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl Config {
    /// Loads `path` (a missing file means defaults), then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let mut config = if config_path.exists() {
            let content = fs::read_to_string(config_path).map_err(|e| {
                CanonError::Config(format!(
                    "Failed to read config file '{}': {}",
                    config_path.display(),
                    e
                ))
            })?;
            Self::from_toml(&content)?
        } else if path.is_some() {
            return Err(CanonError::Config(format!(
                "Config file '{}' not found",
                config_path.display()
            )));
        } else {
            Config::default()
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Environment overrides; `lookup` is injected so tests stay hermetic
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let generation = &mut self.generation;
        if let Some(v) = lookup("GENERATION_ENDPOINT") {
            generation.endpoint = v;
        }
        if let Some(v) = lookup("GENERATION_MODEL") {
            generation.model = v;
        }
        if let Some(v) = lookup("GENERATION_TEMPERATURE") {
            generation.temperature = v.parse().map_err(|_| {
                CanonError::Config(format!("GENERATION_TEMPERATURE is not a number: {}", v))
            })?;
        }
        if let Some(v) = lookup("GENERATION_MAX_OUTPUT_TOKENS") {
            generation.max_output_tokens = v.parse().map_err(|_| {
                CanonError::Config(format!(
                    "GENERATION_MAX_OUTPUT_TOKENS is not an integer: {}",
                    v
                ))
            })?;
        }
        generation.api_keys = API_KEY_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.max_attempts == 0 {
            return Err(CanonError::Config("orchestrator.max_attempts must be at least 1".into()));
        }
        if self.orchestrator.concurrency == 0 {
            return Err(CanonError::Config("orchestrator.concurrency must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(CanonError::Config(format!(
                "generation.temperature {} is outside 0..=2",
                self.generation.temperature
            )));
        }
        Ok(())
    }
}
