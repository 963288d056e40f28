use std::{
    path::{self, Path, PathBuf},
    time::Duration,
};

use log::{debug, trace};
use oxframe_core::EvalError;
use serde_json::{Map, Value};

use crate::{
    config::{Config, DEFAULT_TIMEOUT_MS},
    error::{ResolutionError, Result, json_kind},
    evaluate::{Evaluation, evaluate},
    extract::extract,
    frameworks::Framework,
    settle::{settle, settle_blocking},
    types::{NormalizedBuildInfo, Resolution},
};

/// Inputs shared by every resolution in a run.
#[derive(Debug, Clone)]
pub struct ResolveOptions<'o> {
    /// Field table to use; inferred from the file name when `None`.
    pub framework: Option<Framework>,
    pub phase: &'o str,
    pub base_config: &'o Map<String, Value>,
    pub timeout: Duration,
}

impl<'o> ResolveOptions<'o> {
    pub fn from_config(cfg: &'o Config) -> Self {
        ResolveOptions {
            framework: cfg.framework,
            phase: &cfg.phase,
            base_config: &cfg.default_config,
            timeout: cfg.timeout(),
        }
    }
}

/// Resolve the config at `path` to its build metadata, blocking while an async export settles.
///
/// A `null` base config is treated as `{}`. `timeout` defaults to 5 seconds.
pub fn resolve_framework_config(
    path: &Path,
    phase: &str,
    base_config: &Value,
    timeout: Option<Duration>,
) -> Result<NormalizedBuildInfo> {
    let base_config = base_object(path, base_config)?;
    let opts = ResolveOptions {
        framework: None,
        phase,
        base_config: &base_config,
        timeout: timeout.unwrap_or(Duration::from_millis(DEFAULT_TIMEOUT_MS)),
    };
    resolve(path, &opts).map(|resolution| resolution.info)
}

/// Async form of [`resolve_framework_config`]. Dropping the future abandons the resolution.
pub async fn resolve_framework_config_async(
    path: &Path,
    phase: &str,
    base_config: &Value,
    timeout: Option<Duration>,
) -> Result<NormalizedBuildInfo> {
    let base_config = base_object(path, base_config)?;
    let opts = ResolveOptions {
        framework: None,
        phase,
        base_config: &base_config,
        timeout: timeout.unwrap_or(Duration::from_millis(DEFAULT_TIMEOUT_MS)),
    };
    resolve_async(path, &opts).await.map(|resolution| resolution.info)
}

pub fn resolve(path: &Path, opts: &ResolveOptions<'_>) -> Result<Resolution> {
    let (path, framework) = prepare(path, opts)?;
    let Evaluation { kind, shape, state } =
        evaluate(&path, framework, opts.phase, opts.base_config)?;
    let config = settle_blocking(&path, state, opts.timeout)?;
    let info = extract(&path, framework, &config)?;
    debug!("Resolved {} ({}): outputDir={}", path.display(), shape.label(), info.output_dir);
    Ok(Resolution { info, shape, module_kind: kind })
}

pub async fn resolve_async(path: &Path, opts: &ResolveOptions<'_>) -> Result<Resolution> {
    let (path, framework) = prepare(path, opts)?;
    let Evaluation { kind, shape, state } =
        evaluate(&path, framework, opts.phase, opts.base_config)?;
    let config = settle(&path, state, opts.timeout).await?;
    let info = extract(&path, framework, &config)?;
    debug!("Resolved {} ({}): outputDir={}", path.display(), shape.label(), info.output_dir);
    Ok(Resolution { info, shape, module_kind: kind })
}

fn prepare(path: &Path, opts: &ResolveOptions<'_>) -> Result<(PathBuf, Framework)> {
    let path = path::absolute(path).map_err(|source| ResolutionError::ModuleLoadError {
        path: path.to_path_buf(),
        source: EvalError::Io { path: path.to_path_buf(), source },
    })?;
    let framework = match opts.framework.or_else(|| Framework::from_config_path(&path)) {
        Some(framework) => framework,
        None => return Err(ResolutionError::UnrecognizedConfigFile { path }),
    };
    trace!("Resolving {} as {}", path.display(), framework);
    Ok((path, framework))
}

fn base_object(path: &Path, base_config: &Value) -> Result<Map<String, Value>> {
    match base_config {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        other => Err(ResolutionError::InvalidBaseConfig {
            path: path.to_path_buf(),
            found: json_kind(other).to_string(),
        }),
    }
}
