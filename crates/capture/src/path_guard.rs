//! Output path validation
//!
//! Capture output must land inside one of the configured data roots.

use std::path::{Component, Path, PathBuf};

use crate::CaptureError;

/// Set of directories captures may write under
#[derive(Debug, Clone)]
pub struct AllowedPaths {
    roots: Vec<PathBuf>,
}

impl AllowedPaths {
    pub fn new<S: AsRef<str>>(roots: &[S]) -> Self {
        Self {
            roots: roots
                .iter()
                .map(|r| resolve(&expand_tilde(r.as_ref())))
                .collect(),
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Resolve `path` and check it falls under an allowed root
    ///
    /// Returns the resolved absolute path.
    pub fn validate(&self, path: &str) -> Result<PathBuf, CaptureError> {
        let expanded = expand_tilde(path);
        if expanded.components().any(|c| c == Component::ParentDir) {
            return Err(CaptureError::PathTraversal);
        }
        let resolved = resolve(&expanded);
        if self.roots.iter().any(|root| is_within(&resolved, root)) {
            Ok(resolved)
        } else {
            Err(CaptureError::PathNotAllowed {
                path: path.to_string(),
                allowed: self
                    .roots
                    .iter()
                    .map(|r| r.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
        }
    }
}

/// Absolute form of `path` with symlinks resolved on the longest existing prefix
fn resolve(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };

    let mut existing = absolute.as_path();
    let mut rest: Vec<&std::ffi::OsStr> = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return rest.iter().rev().fold(canonical, |acc, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name);
                existing = parent;
            }
            _ => return absolute,
        }
    }
}

/// Component-wise prefix check
fn is_within(path: &Path, root: &Path) -> bool {
    let path: Vec<_> = path.components().collect();
    let root: Vec<_> = root.components().collect();
    path.len() >= root.len() && path.iter().zip(&root).all(|(a, b)| a == b)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_within() {
        let root = Path::new("/data");
        assert!(is_within(Path::new("/data/weather"), root));
        assert!(is_within(Path::new("/data"), root));
        assert!(!is_within(Path::new("/database"), root));
        assert!(!is_within(Path::new("/etc/passwd"), root));
    }

    #[test]
    fn test_validate_accepts_new_dirs_under_root() {
        let dir = TempDir::new().unwrap();
        let allowed = AllowedPaths::new(&[dir.path().to_str().unwrap()]);

        let target = dir.path().join("weather").join("today");
        let resolved = allowed.validate(target.to_str().unwrap()).unwrap();
        assert_eq!(resolved, dir.path().canonicalize().unwrap().join("weather/today"));
    }

    #[test]
    fn test_validate_rejects_outside_and_traversal() {
        let dir = TempDir::new().unwrap();
        let allowed = AllowedPaths::new(&[dir.path().to_str().unwrap()]);

        assert!(matches!(
            allowed.validate("/etc/nodewarden"),
            Err(CaptureError::PathNotAllowed { .. })
        ));
        let sneaky = format!("{}/../escape", dir.path().display());
        assert!(matches!(allowed.validate(&sneaky), Err(CaptureError::PathTraversal)));
    }
}
