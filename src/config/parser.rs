//! Declaration loading.
//!
//! This module handles loading the topology declaration from YAML files and
//! environment variables, with proper precedence and error handling.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::TopologyConfig;
use crate::error::{ConfigError, Result, SchemaError, TopoplanError};

/// Overrides `project.name`.
pub const ENV_PROJECT_NAME: &str = "TOPOPLAN_PROJECT_NAME";
/// Overrides `project.environment`.
pub const ENV_PROJECT_ENVIRONMENT: &str = "TOPOPLAN_PROJECT_ENVIRONMENT";
/// Overrides `state.path`.
pub const ENV_STATE_PATH: &str = "TOPOPLAN_STATE_PATH";
/// Overrides `execution.max_parallel`.
pub const ENV_MAX_PARALLEL: &str = "TOPOPLAN_MAX_PARALLEL";

/// Parser for topology declarations.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a declaration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<TopologyConfig> {
        let path = path.as_ref();
        info!("Loading declaration from: {}", path.display());

        if !path.exists() {
            return Err(TopoplanError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            TopoplanError::Config(ConfigError::Unreadable {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a declaration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns a schema error if the YAML is invalid or does not match the
    /// declaration shape.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<TopologyConfig> {
        debug!("Parsing YAML declaration");

        let config: TopologyConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = e
                .location()
                .map(|l| format!("line {}, column {}", l.line(), l.column()))
                .or_else(|| source.map(|p| p.display().to_string()));
            TopoplanError::Schema(SchemaError::Parse {
                message: e.to_string(),
                location,
            })
        })?;

        debug!("Parsed declaration for project: {}", config.project.name);
        Ok(config)
    }

    /// Loads a declaration and applies process environment overrides.
    ///
    /// Variables use the format `TOPOPLAN_<SECTION>_<KEY>`, e.g.
    /// `TOPOPLAN_PROJECT_NAME`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// carries an unusable value.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<TopologyConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if `TOPOPLAN_MAX_PARALLEL` is not a positive integer.
    pub fn apply_env_overrides<F>(config: &mut TopologyConfig, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup(ENV_PROJECT_NAME) {
            debug!("Overriding project.name from environment");
            config.project.name = name;
        }

        if let Some(env) = lookup(ENV_PROJECT_ENVIRONMENT) {
            debug!("Overriding project.environment from environment");
            config.project.environment = env;
        }

        if let Some(path) = lookup(ENV_STATE_PATH) {
            debug!("Overriding state.path from environment");
            config.state.path = Some(path);
        }

        if let Some(value) = lookup(ENV_MAX_PARALLEL) {
            debug!("Overriding execution.max_parallel from environment");
            config.execution.max_parallel = value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    TopoplanError::Config(ConfigError::InvalidEnvVar {
                        name: ENV_MAX_PARALLEL.to_string(),
                        value: value.clone(),
                    })
                })?;
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                TopoplanError::Config(ConfigError::Unreadable {
                    path: env_path.clone(),
                    message: e.to_string(),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Default declaration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["topoplan.yaml", "topoplan.yml"];

/// Finds the declaration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no declaration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found declaration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(TopoplanError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
