//! Configuration
//!
//! Settings come from a config file, then `ASYNC_TEST_*` environment
//! variables, then command-line flags, each overriding the previous.

pub mod env;
pub mod file;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::framework::ContextSettings;
use crate::output::OutputFormat;
use crate::utils::logger::LogLevel;

pub use env::EnvConfig;
pub use file::{expand_path, is_yaml_file, CONFIG_LOCATIONS};

/// Application configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Number of rounds per suite
    pub rounds: u32,

    /// Per-run timeout in seconds, 0 disables it
    pub timeout_secs: u64,

    /// Run suites concurrently
    pub parallel: bool,

    /// Maximum suites in flight when parallel
    pub max_concurrent: usize,

    /// Engine diagnostic level passed to test contexts
    pub debug_level: u8,

    pub log_level: String,

    /// Output format (table, json, json-pretty, summary)
    pub format: String,

    /// Suites to run when none are named on the command line
    pub suites: Vec<String>,

    /// Parameter filters keyed by parameter name
    pub filters: BTreeMap<String, String>,

    /// Only run tests tagged with one of these categories
    pub categories: Vec<String>,

    /// Never run tests tagged with any of these categories
    pub exclude_categories: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rounds: 1,
            timeout_secs: 0,
            parallel: false,
            max_concurrent: 4,
            debug_level: 0,
            log_level: "info".to_string(),
            format: "table".to_string(),
            suites: Vec::new(),
            filters: BTreeMap::new(),
            categories: Vec::new(),
            exclude_categories: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON or YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load from the first standard location, or defaults
    pub fn load_default() -> Result<Self> {
        match file::find() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.rounds == 0 {
            anyhow::bail!("rounds must be at least 1");
        }
        if self.max_concurrent == 0 {
            anyhow::bail!("max_concurrent must be at least 1");
        }
        self.output_format()?;
        self.log_level()?;
        Ok(())
    }

    /// Configuration written by `config init`
    pub fn example() -> Self {
        Self {
            rounds: 3,
            timeout_secs: 30,
            parallel: true,
            max_concurrent: 4,
            debug_level: 1,
            log_level: "info".to_string(),
            format: "table".to_string(),
            suites: vec!["parameters".to_string(), "fixtures".to_string()],
            filters: BTreeMap::from([("encoding".to_string(), "identity,chunked".to_string())]),
            categories: Vec::new(),
            exclude_categories: vec!["stress".to_string()],
        }
    }

    pub fn output_format(&self) -> Result<OutputFormat> {
        self.format.parse()
    }

    pub fn log_level(&self) -> Result<LogLevel> {
        self.log_level.parse()
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Settings for every test context of a run
    pub fn context_settings(&self) -> ContextSettings {
        let settings = self.filters.iter().fold(
            ContextSettings::default().with_debug_level(self.debug_level),
            |settings, (parameter, filter)| settings.with_filter(parameter, filter),
        );
        let settings = self
            .categories
            .iter()
            .fold(settings, |settings, category| settings.include_category(category));
        self.exclude_categories
            .iter()
            .fold(settings, |settings, category| settings.exclude_category(category))
    }
}
