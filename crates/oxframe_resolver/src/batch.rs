use anyhow::Result;
use log::{debug, info, warn};
use oxframe_core::{CollectorConfig, collect_files};
use rayon::prelude::*;
use std::{
    path::{Path, PathBuf},
    thread,
};

use crate::{
    config::Config,
    error::ResolutionError,
    frameworks::Framework,
    resolver::{ResolveOptions, resolve},
    types::Resolution,
};

#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: std::result::Result<Resolution, ResolutionError>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// One outcome per input file, in input order.
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    pub fn resolved(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.resolved()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}

/// Resolve every file in parallel. A failing file is recorded and never stops the others.
pub fn resolve_batch(files: &[PathBuf], cfg: &Config) -> BatchReport {
    let jobs: Vec<(PathBuf, Option<Framework>)> =
        files.iter().map(|path| (path.clone(), cfg.framework)).collect();
    run_batch(&jobs, cfg)
}

/// Each job names its framework, or leaves it to be inferred from the file name.
fn run_batch(jobs: &[(PathBuf, Option<Framework>)], cfg: &Config) -> BatchReport {
    info!("Resolving {} config files in parallel", jobs.len());
    let opts = ResolveOptions::from_config(cfg);

    let outcomes: Vec<FileOutcome> = jobs
        .par_iter()
        .map(|(path, framework)| {
            debug!("Thread {:?} resolving: {}", thread::current().id(), path.display());
            let opts = ResolveOptions { framework: *framework, ..opts.clone() };
            let result = resolve(path, &opts);
            if let Err(err) = &result {
                warn!("{}", err);
            }
            FileOutcome { path: path.clone(), result }
        })
        .collect();

    let report = BatchReport { outcomes };
    info!("Resolved {} of {} config files", report.resolved(), report.outcomes.len());
    report
}

/// Find config files for `frameworks` under `root`, each paired with the first of `frameworks`
/// whose file names it matches.
pub fn collect_config_files(
    root: &Path,
    frameworks: &[Framework],
) -> Result<Vec<(PathBuf, Framework)>> {
    let file_names = frameworks
        .iter()
        .flat_map(|fw| fw.profile().config_files.iter().map(|name| name.to_string()))
        .collect();
    let files = collect_files(&CollectorConfig { root: root.to_path_buf(), file_names })?;

    Ok(files
        .into_iter()
        .filter_map(|path| {
            let framework = frameworks.iter().copied().find(|fw| fw.matches(&path))?;
            Some((path, framework))
        })
        .collect())
}

/// Collect and resolve every config file under the configured root.
pub fn scan_project(cfg: &Config) -> Result<BatchReport> {
    let root = match &cfg.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    let frameworks: Vec<Framework> = match cfg.framework {
        Some(fw) => vec![fw],
        None => Framework::ALL.to_vec(),
    };
    let jobs: Vec<(PathBuf, Option<Framework>)> = collect_config_files(&root, &frameworks)?
        .into_iter()
        .map(|(path, framework)| (path, Some(framework)))
        .collect();
    if jobs.is_empty() {
        info!("No framework config files found under {}", root.display());
    }
    Ok(run_batch(&jobs, cfg))
}
