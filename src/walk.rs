//! File discovery under root paths.
//!
//! Walks each root with `walkdir`, applying the default excludes
//! (`.git/`, `target/`, `node_modules/`), the configured include and exclude
//! globs (matched against the path relative to its root), and the hidden-file
//! rule. A root may also name a single file, which is always included.
//! Directories that cannot be listed are returned alongside the files so the
//! caller can tell "gone" from "not visible this time".

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Outcome of walking a set of roots.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Candidate files, sorted and deduplicated.
    pub files: Vec<PathBuf>,
    /// Paths the walk could not descend into, with the error.
    pub unreadable: Vec<(PathBuf, String)>,
}

pub struct Walker {
    include: GlobSet,
    exclude: GlobSet,
    include_hidden: bool,
    follow_symlinks: bool,
}

impl Walker {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(config.exclude_globs.iter().cloned());
        Ok(Self {
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
            include_hidden: config.include_hidden,
            follow_symlinks: config.follow_symlinks,
        })
    }

    /// Canonicalize `roots`; a root that does not exist is a configuration error.
    pub fn resolve_roots(roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
        roots
            .iter()
            .map(|root| {
                root.canonicalize().map_err(|e| {
                    IndexError::Configuration(format!(
                        "root path does not exist or is unreadable: {} ({})",
                        root.display(),
                        e
                    ))
                })
            })
            .collect()
    }

    /// Every candidate file under the (canonical) roots.
    pub fn discover(&self, roots: &[PathBuf]) -> Discovery {
        let mut found = Discovery::default();
        for root in roots {
            if root.is_file() {
                found.files.push(root.clone());
                continue;
            }
            self.walk_root(root, &mut found);
        }
        found.files.sort();
        found.files.dedup();
        found
    }

    fn walk_root(&self, root: &Path, out: &mut Discovery) {
        let walker = WalkDir::new(root)
            .follow_links(self.follow_symlinks)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || self.include_hidden || !is_hidden(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let at = e.path().unwrap_or(root).to_path_buf();
                    warn!(path = %at.display(), error = %e, "skipping unreadable entry");
                    out.unreadable.push((at, e.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);

            if self.exclude.is_match(relative) {
                continue;
            }
            if !self.include.is_match(relative) {
                continue;
            }
            out.files.push(path.to_path_buf());
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            IndexError::Configuration(format!("invalid glob '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| IndexError::Configuration(format!("invalid glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("docs/nested")).unwrap();
        fs::create_dir_all(root.join(".secret")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("docs/a.md"), "a").unwrap();
        fs::write(root.join("docs/nested/b.txt"), "b").unwrap();
        fs::write(root.join("docs/.hidden.txt"), "h").unwrap();
        fs::write(root.join(".secret/key.txt"), "k").unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        tmp
    }

    fn names(root: &Path, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn skips_hidden_and_default_excludes() {
        let tmp = tree();
        let roots = Walker::resolve_roots(&[tmp.path().to_path_buf()]).unwrap();
        let walker = Walker::new(&IndexConfig::default()).unwrap();
        let found = walker.discover(&roots);
        assert_eq!(names(&roots[0], &found.files), vec!["docs/a.md", "docs/nested/b.txt"]);
        assert!(found.unreadable.is_empty());
    }

    #[test]
    fn include_hidden_and_globs() {
        let tmp = tree();
        let roots = Walker::resolve_roots(&[tmp.path().to_path_buf()]).unwrap();
        let config = IndexConfig {
            include_hidden: true,
            include_globs: vec!["**/*.txt".into()],
            exclude_globs: vec!["docs/nested/**".into()],
            ..IndexConfig::default()
        };
        let files = Walker::new(&config).unwrap().discover(&roots).files;
        assert_eq!(names(&roots[0], &files), vec![".secret/key.txt", "docs/.hidden.txt"]);
    }

    #[test]
    fn single_file_root_and_dedup() {
        let tmp = tree();
        let file = tmp.path().join("docs/a.md");
        let roots = Walker::resolve_roots(&[file.clone(), tmp.path().join("docs")]).unwrap();
        let files = Walker::new(&IndexConfig::default()).unwrap().discover(&roots).files;
        assert_eq!(files.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn unlistable_directory_is_reported() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tree();
        let roots = Walker::resolve_roots(&[tmp.path().to_path_buf()]).unwrap();
        let locked = roots[0].join("docs/nested");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        // Privileged users can list it anyway.
        let bypassed = fs::read_dir(&locked).is_ok();
        let found = Walker::new(&IndexConfig::default()).unwrap().discover(&roots);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        if bypassed {
            return;
        }

        assert_eq!(names(&roots[0], &found.files), vec!["docs/a.md"]);
        assert_eq!(found.unreadable.len(), 1);
        assert_eq!(found.unreadable[0].0, locked);
    }

    #[test]
    fn missing_root_is_configuration_error() {
        let tmp = TempDir::new().unwrap();
        let err = Walker::resolve_roots(&[tmp.path().join("nope")]).unwrap_err();
        assert!(matches!(err, IndexError::Configuration(_)));
    }
}
