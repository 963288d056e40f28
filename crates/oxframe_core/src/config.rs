use anyhow::{Result, anyhow};
use log::{debug, trace};
use std::path::{Path, PathBuf};

/// Walk up from `start` to the first directory containing `.git`.
pub fn find_git_root(start: &Path) -> Result<PathBuf> {
    debug!("Searching for git root from {}", start.display());
    find_ancestor_with(start, ".git")
        .ok_or_else(|| anyhow!("Could not find .git directory in any parent folder"))
}

/// The nearest ancestor of `start` with a `package.json`, falling back to the git root.
pub fn find_project_root(start: &Path) -> Result<PathBuf> {
    if let Some(root) = find_ancestor_with(start, "package.json") {
        debug!("Found project root at: {:?}", root);
        return Ok(root);
    }
    trace!("No package.json above {}, trying git root", start.display());
    find_git_root(start)
}

fn find_ancestor_with(start: &Path, marker: &str) -> Option<PathBuf> {
    start.ancestors().find_map(|dir| {
        let candidate = dir.join(marker);
        trace!("Checking for {} at: {:?}", marker, candidate);
        candidate.exists().then(|| dir.to_path_buf())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_find_git_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join(".git")).unwrap();
        let subdir = root.join("src").join("components");
        fs::create_dir_all(&subdir).unwrap();

        let git_root = find_git_root(&subdir).unwrap();
        assert_eq!(git_root.canonicalize().unwrap(), root.canonicalize().unwrap());
    }

    #[test]
    fn test_find_git_root_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let subdir = temp_dir.path().join("nested").join("deep");
        fs::create_dir_all(&subdir).unwrap();

        // A .git further up (e.g. the checkout running the tests) would be found, so only
        // assert when the temp dir is not inside a repository.
        if find_ancestor_with(temp_dir.path(), ".git").is_none() {
            assert!(find_git_root(&subdir).is_err());
        }
    }

    #[test]
    fn test_project_root_prefers_package_json() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join(".git")).unwrap();
        let app = root.join("apps").join("web");
        fs::create_dir_all(app.join("src")).unwrap();
        fs::write(app.join("package.json"), "{}").unwrap();

        assert_eq!(find_project_root(&app.join("src")).unwrap(), app);
    }

    #[test]
    fn test_project_root_falls_back_to_git() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join(".git")).unwrap();
        let nested = root.join("site");
        fs::create_dir_all(&nested).unwrap();

        if find_ancestor_with(root, "package.json").is_none() {
            assert_eq!(find_project_root(&nested).unwrap(), root);
        }
    }
}
