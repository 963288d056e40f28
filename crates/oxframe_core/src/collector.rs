use anyhow::Result;
use ignore::WalkBuilder;
use log::{debug, trace};
use std::path::{Path, PathBuf};

use crate::constants::{CONFIG_EXTENSIONS, SKIPPED_DIRS};

pub struct CollectorConfig {
    pub root: PathBuf,
    /// Trailing path components to match, e.g. `next.config.mjs` or `.vitepress/config.ts`.
    pub file_names: Vec<String>,
}

/// Walk `cfg.root` and return every file whose path ends with one of `cfg.file_names`.
pub fn collect_files(cfg: &CollectorConfig) -> Result<Vec<PathBuf>> {
    let root = &cfg.root;
    debug!("Collecting config files under {}", root.display());
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .ignore(true)
        .git_ignore(true)
        .require_git(false)
        .filter_entry(|dent| !is_skipped_dir(dent.path()))
        .build();

    let mut files: Vec<PathBuf> = Vec::new();
    for res in walker {
        let dent = res?;
        let p = dent.path();
        if !p.is_file() {
            continue;
        }

        let has_config_ext = p
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| CONFIG_EXTENSIONS.contains(&ext));
        if has_config_ext && cfg.file_names.iter().any(|name| p.ends_with(name)) {
            trace!("Found config file: {}", p.display());
            files.push(p.to_path_buf());
        }
    }

    files.sort();
    debug!("Collected {} config files", files.len());
    Ok(files)
}

fn is_skipped_dir(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()).is_some_and(|name| SKIPPED_DIRS.contains(&name))
}
