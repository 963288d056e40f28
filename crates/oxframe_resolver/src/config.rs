use anyhow::{Context, Result, bail};
use clap::Parser;
use log::debug;
use oxframe_core::find_project_root;
use serde_json::{Map, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{error::json_kind, frameworks::Framework};

pub const DEFAULT_PHASE: &str = "phase-production-build";
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Parser)]
pub struct Config {
    /// Root directory of the project (defaults to the nearest package.json, then git root)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Framework whose field table to use (inferred from the file name when omitted)
    #[arg(long, value_enum)]
    pub framework: Option<Framework>,

    /// Phase token passed to function-shaped configs
    #[arg(long, default_value = DEFAULT_PHASE)]
    pub phase: String,

    /// How long to wait for an async config to settle
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,

    /// JSON file passed to config functions as `defaultConfig`
    #[arg(long)]
    pub base_config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,

    #[clap(skip)]
    pub default_config: Map<String, Value>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            root: None,
            framework: None,
            phase: DEFAULT_PHASE.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            base_config: None,
            json: false,
            default_config: Map::new(),
        }
    }
}

impl Config {
    /// Load `--base-config` and settle on a project root, falling back to the current directory.
    pub fn initialize(&mut self) -> Result<()> {
        if let Some(path) = &self.base_config {
            self.default_config = load_base_config(path)?;
            debug!(
                "Loaded base config with {} keys from {}",
                self.default_config.len(),
                path.display()
            );
        }
        if self.root.is_none() {
            let cwd = env::current_dir().context("Failed to read current directory")?;
            let root = find_project_root(&cwd).unwrap_or_else(|err| {
                debug!("{}, using current directory", err);
                cwd
            });
            self.root = Some(root);
        }
        debug!("Using project root: {:?}", self.root);
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Read a JSON object from `path`.
pub fn load_base_config(path: &Path) -> Result<Map<String, Value>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read base config {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse base config {}", path.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => bail!(
            "Base config {} must be a JSON object, found {}",
            path.display(),
            json_kind(&other)
        ),
    }
}
