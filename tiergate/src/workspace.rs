//! Workspace profile: one gitignore-aware walk per run
//!
//! Applicability predicates never touch the filesystem themselves; they read
//! the profile built here.

use ignore::WalkBuilder;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::{GateError, GateResult};

/// Directories never considered part of the analyzed sources
pub(crate) const VENDORED_DIRS: &[&str] = &[
    "node_modules",
    "venv",
    "__pycache__",
    "site-packages",
    "target",
];

/// What a workspace contains, as far as check selection is concerned
#[derive(Debug, Clone, Default)]
pub struct WorkspaceProfile {
    root: PathBuf,
    /// Lowercased extension → file count
    extensions: BTreeMap<String, usize>,
    /// Relative paths (forward slashes) of every file and directory seen
    paths: BTreeSet<String>,
}

impl WorkspaceProfile {
    /// Walk `root`, respecting .gitignore and skipping hidden and vendored
    /// directories. Anything under `exclude` (e.g. the artifact directory) is
    /// left out.
    pub fn scan(root: impl AsRef<Path>, exclude: &[PathBuf]) -> GateResult<Self> {
        let root = validate_workspace(root.as_ref())?;
        let excluded: Vec<PathBuf> = exclude
            .iter()
            .filter_map(|p| std::fs::canonicalize(p).ok())
            .collect();

        let mut profile = Self {
            root: root.clone(),
            ..Default::default()
        };

        let walker = WalkBuilder::new(&root)
            .hidden(true)
            .git_ignore(true)
            .require_git(false)
            .filter_entry(move |entry| {
                let name = entry.file_name().to_string_lossy();
                if VENDORED_DIRS.iter().any(|dir| name == *dir) {
                    return false;
                }
                !excluded.iter().any(|ex| entry.path().starts_with(ex))
            })
            .build();

        for entry in walker.flatten() {
            let path = entry.path();
            let Ok(rel) = path.strip_prefix(&root) else {
                continue;
            };
            if rel.as_os_str().is_empty() {
                continue;
            }
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if path.is_file() {
                if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                    *profile
                        .extensions
                        .entry(ext.to_ascii_lowercase())
                        .or_insert(0) += 1;
                }
            }
            profile.paths.insert(rel);
        }

        tracing::debug!(
            root = %profile.root.display(),
            paths = profile.paths.len(),
            extensions = profile.extensions.len(),
            "Workspace profile"
        );
        Ok(profile)
    }

    /// Canonical workspace root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of files with any of the given extensions
    pub fn count_sources(&self, exts: &[&str]) -> usize {
        exts.iter()
            .filter_map(|e| self.extensions.get(&e.to_ascii_lowercase()))
            .sum()
    }

    pub fn has_sources(&self, exts: &[&str]) -> bool {
        self.count_sources(exts) > 0
    }

    /// Whether a relative file or directory exists (e.g. "pom.xml", "tests/integration")
    pub fn has_path(&self, rel: &str) -> bool {
        self.paths.contains(rel.trim_end_matches('/'))
    }

    /// Whether nothing at all was found
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Check that the workspace exists and is a directory; returns its canonical path
pub fn validate_workspace(path: &Path) -> GateResult<PathBuf> {
    let canonical = std::fs::canonicalize(path)
        .map_err(|e| GateError::invalid_workspace(path, e.to_string()))?;
    if !canonical.is_dir() {
        return Err(GateError::invalid_workspace(path, "not a directory"));
    }
    Ok(canonical)
}

/// Locate an executable on PATH
pub fn find_in_path(binary: &str) -> Option<PathBuf> {
    let candidate = Path::new(binary);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    for segment in std::env::split_paths(&path_var) {
        let candidate = segment.join(binary);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    None
}
