//! Environment variable overrides

use std::env;

use super::AppConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "ASYNC_TEST";

/// Overrides read from `ASYNC_TEST_*` variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    pub rounds: Option<u32>,
    pub timeout: Option<u64>,
    pub parallel: Option<bool>,
    pub max_concurrent: Option<usize>,
    pub debug_level: Option<u8>,
    pub log_level: Option<String>,
    pub format: Option<String>,
    /// Comma-separated suite names
    pub suites: Option<Vec<String>>,
    pub categories: Option<Vec<String>>,
    pub exclude_categories: Option<Vec<String>>,
    /// Config file path
    pub config_file: Option<String>,
}

impl EnvConfig {
    pub fn load() -> Self {
        Self {
            rounds: get_env_parse("ROUNDS"),
            timeout: get_env_parse("TIMEOUT"),
            parallel: get_env_bool("PARALLEL"),
            max_concurrent: get_env_parse("MAX_CONCURRENT"),
            debug_level: get_env_parse("DEBUG_LEVEL"),
            log_level: get_env("LOG_LEVEL"),
            format: get_env("FORMAT"),
            suites: get_env_list("SUITES"),
            categories: get_env_list("CATEGORIES"),
            exclude_categories: get_env_list("EXCLUDE_CATEGORIES"),
            config_file: get_env("CONFIG"),
        }
    }

    pub fn has_any(&self) -> bool {
        self.rounds.is_some()
            || self.timeout.is_some()
            || self.parallel.is_some()
            || self.max_concurrent.is_some()
            || self.debug_level.is_some()
            || self.log_level.is_some()
            || self.format.is_some()
            || self.suites.is_some()
            || self.categories.is_some()
            || self.exclude_categories.is_some()
            || self.config_file.is_some()
    }

    /// Overlay every variable that is set onto `config`
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(rounds) = self.rounds {
            config.rounds = rounds;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(parallel) = self.parallel {
            config.parallel = parallel;
        }
        if let Some(max_concurrent) = self.max_concurrent {
            config.max_concurrent = max_concurrent;
        }
        if let Some(debug_level) = self.debug_level {
            config.debug_level = debug_level;
        }
        if let Some(log_level) = &self.log_level {
            config.log_level = log_level.clone();
        }
        if let Some(format) = &self.format {
            config.format = format.clone();
        }
        if let Some(suites) = &self.suites {
            config.suites = suites.clone();
        }
        if let Some(categories) = &self.categories {
            config.categories = categories.clone();
        }
        if let Some(categories) = &self.exclude_categories {
            config.exclude_categories = categories.clone();
        }
    }

    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {ENV_PREFIX}_ROUNDS:          {:?}", self.rounds);
        println!("  {ENV_PREFIX}_TIMEOUT:         {:?}", self.timeout);
        println!("  {ENV_PREFIX}_PARALLEL:        {:?}", self.parallel);
        println!("  {ENV_PREFIX}_MAX_CONCURRENT:  {:?}", self.max_concurrent);
        println!("  {ENV_PREFIX}_DEBUG_LEVEL:     {:?}", self.debug_level);
        println!("  {ENV_PREFIX}_LOG_LEVEL:       {:?}", self.log_level);
        println!("  {ENV_PREFIX}_FORMAT:          {:?}", self.format);
        println!("  {ENV_PREFIX}_SUITES:          {:?}", self.suites);
        println!("  {ENV_PREFIX}_CATEGORIES:      {:?}", self.categories);
        println!("  {ENV_PREFIX}_EXCLUDE_CATEGORIES: {:?}", self.exclude_categories);
        println!("  {ENV_PREFIX}_CONFIG:          {:?}", self.config_file);
    }
}

fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.trim().parse().ok())
}

/// Comma-separated list, empty entries dropped
fn get_env_list(name: &str) -> Option<Vec<String>> {
    get_env(name).map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
}

fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Sets `ASYNC_TEST_*` variables, mainly for tests
#[derive(Default)]
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn var(mut self, name: &str, value: impl ToString) -> Self {
        self.vars
            .push((format!("{ENV_PREFIX}_{name}"), value.to_string()));
        self
    }

    pub fn rounds(self, rounds: u32) -> Self {
        self.var("ROUNDS", rounds)
    }

    pub fn timeout(self, timeout: u64) -> Self {
        self.var("TIMEOUT", timeout)
    }

    pub fn parallel(self, parallel: bool) -> Self {
        self.var("PARALLEL", parallel)
    }

    pub fn suites(self, suites: &str) -> Self {
        self.var("SUITES", suites)
    }

    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return a guard that restores the previous values on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_ROUNDS          Number of rounds per suite");
    println!("  {ENV_PREFIX}_TIMEOUT         Per-run timeout in seconds (0 disables)");
    println!("  {ENV_PREFIX}_PARALLEL        Run suites concurrently (true/false)");
    println!("  {ENV_PREFIX}_MAX_CONCURRENT  Maximum suites in flight");
    println!("  {ENV_PREFIX}_DEBUG_LEVEL     Engine diagnostic level");
    println!("  {ENV_PREFIX}_LOG_LEVEL       Log level (trace, debug, info, warn, error)");
    println!("  {ENV_PREFIX}_FORMAT          Output format (table, json, json-pretty, summary)");
    println!("  {ENV_PREFIX}_SUITES          Comma-separated suites to run");
    println!("  {ENV_PREFIX}_CATEGORIES      Comma-separated categories to run");
    println!("  {ENV_PREFIX}_EXCLUDE_CATEGORIES  Comma-separated categories to skip");
    println!("  {ENV_PREFIX}_CONFIG          Path to configuration file");
    println!("  RUST_LOG                   Overrides the log filter entirely");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_ROUNDS=5");
    println!("  export {ENV_PREFIX}_SUITES=parameters,fixtures");
    println!("  async-test run");
}
