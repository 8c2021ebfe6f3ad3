//! Layered configuration: JSON file, then environment, then command line.

use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::runtime::Runtime;
use crate::tool::{DEFAULT_TIMEOUT, ToolStrategy, WORKER_SUBCOMMAND};

pub const ENV_CONFIG: &str = "VERIMPORT_CONFIG";
pub const ENV_INSTALL_DIR: &str = "VERIMPORT_INSTALL_DIR";
pub const ENV_IMPORT_DIR: &str = "VERIMPORT_IMPORT_DIR";
pub const ENV_INSTALL_DEPS: &str = "VERIMPORT_INSTALL_DEPS";
pub const ENV_RESET_MODULES: &str = "VERIMPORT_RESET_MODULES";
pub const ENV_TOOL_STRATEGY: &str = "VERIMPORT_TOOL_STRATEGY";

const APP_DIR: &str = "verimport";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the per-alias install directories.
    pub install_dir: Option<PathBuf>,
    /// Directory scanned when importing by bare name.
    pub import_dir: Option<PathBuf>,
    /// Let the packed-distribution tool install declared dependencies.
    pub install_dependencies: bool,
    /// Purge side-effect cache entries after every load.
    pub reset_modules: bool,
    #[serde(flatten)]
    pub tool: ToolConfig,
}

/// How the packed-distribution tool is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    #[serde(rename = "external_tool_strategy")]
    pub strategy: ToolStrategy,
    pub timeout_secs: u64,
    /// Explicit tool executable for `located_binary`.
    pub binary: Option<PathBuf>,
    /// Names searched on `PATH` for `located_binary`.
    pub binary_names: Vec<String>,
    /// Arguments placed before the install arguments for `located_binary`.
    pub binary_args: Vec<String>,
    /// Version prefix the located binary must report.
    pub required_version: Option<String>,
    /// Worker executable for `spawned_process`; defaults to this program.
    pub worker_program: Option<PathBuf>,
    pub worker_args: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            strategy: ToolStrategy::default(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            binary: None,
            binary_names: vec![APP_DIR.to_string()],
            binary_args: vec!["tool".to_string()],
            required_version: None,
            worker_program: None,
            worker_args: vec![WORKER_SUBCOMMAND.to_string()],
        }
    }
}

impl ToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow!("{} must be a boolean, got '{}'", key, other)),
    }
}

impl Config {
    /// Read the config file (explicit path, else `VERIMPORT_CONFIG`), then
    /// apply environment overrides.
    #[tracing::instrument(skip(runtime))]
    pub fn load(runtime: &dyn Runtime, path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| runtime.env_var(ENV_CONFIG).ok().map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                debug!("Reading config from {:?}", path);
                let content = runtime.read_to_string(&path)?;
                serde_json::from_str(&content)
                    .with_context(|| format!("Invalid config file {:?}", path))?
            }
            None => Config::default(),
        };
        config.apply_env(runtime)?;
        Ok(config)
    }

    pub fn apply_env(&mut self, runtime: &dyn Runtime) -> Result<()> {
        if let Ok(dir) = runtime.env_var(ENV_INSTALL_DIR) {
            self.install_dir = Some(PathBuf::from(dir));
        }
        if let Ok(dir) = runtime.env_var(ENV_IMPORT_DIR) {
            self.import_dir = Some(PathBuf::from(dir));
        }
        if let Ok(value) = runtime.env_var(ENV_INSTALL_DEPS) {
            self.install_dependencies = parse_bool(ENV_INSTALL_DEPS, &value)?;
        }
        if let Ok(value) = runtime.env_var(ENV_RESET_MODULES) {
            self.reset_modules = parse_bool(ENV_RESET_MODULES, &value)?;
        }
        if let Ok(value) = runtime.env_var(ENV_TOOL_STRATEGY) {
            self.tool.strategy = value
                .parse()
                .map_err(|e: String| anyhow!("{}: {}", ENV_TOOL_STRATEGY, e))?;
        }
        Ok(())
    }

    /// Effective install root.
    pub fn install_dir(&self, runtime: &dyn Runtime) -> PathBuf {
        let dir = match &self.install_dir {
            Some(dir) => dir.clone(),
            None => runtime
                .data_dir()
                .unwrap_or_else(|| runtime.temp_dir())
                .join(APP_DIR),
        };
        info!("Using install dir: {}", dir.display());
        dir
    }

    /// Effective import directory; the current directory when unset.
    pub fn import_dir(&self) -> PathBuf {
        self.import_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}
