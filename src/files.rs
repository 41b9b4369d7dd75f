//! Glob expansion for file-set indexing and repository tree filtering.
//!
//! Patterns are matched with `globset` using literal separators, so `*`
//! stays within one path component and `**` crosses directories. Each
//! pattern is walked from its longest literal directory prefix, which
//! keeps `docs/**/*.md` from scanning the whole working directory.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::warn;
use walkdir::WalkDir;

/// Directories never descended into.
pub const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules"];

pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .with_context(|| format!("Invalid glob pattern: {}", pattern))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// Include/exclude filter over `/`-separated relative paths.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl PathFilter {
    /// An empty `include` list admits everything not excluded. The
    /// default excludes are always applied.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let include = if include.is_empty() {
            None
        } else {
            Some(build_globset(include)?)
        };
        let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(exclude.iter().cloned());
        Ok(Self {
            include,
            exclude: build_globset(&excludes)?,
        })
    }

    pub fn is_match(&self, path: &str) -> bool {
        if self.exclude.is_match(path) {
            return false;
        }
        match self.include {
            Some(ref set) => set.is_match(path),
            None => true,
        }
    }
}

fn has_glob_meta(component: &str) -> bool {
    component.contains(['*', '?', '[', '{'])
}

/// Directory to start walking from: every leading component free of glob
/// metacharacters.
fn literal_base(pattern: &str) -> PathBuf {
    let mut base = PathBuf::new();
    let components: Vec<&str> = pattern.split('/').collect();
    for (i, component) in components.iter().enumerate() {
        if has_glob_meta(component) || i == components.len() - 1 {
            break;
        }
        if component.is_empty() && i == 0 {
            base.push("/");
        } else {
            base.push(component);
        }
    }
    base
}

fn normalized(path: &Path) -> String {
    let s = path.to_string_lossy().replace('\\', "/");
    s.strip_prefix("./").map(str::to_string).unwrap_or(s)
}

/// Files matched by a pattern set, plus the entries that could not be
/// walked.
#[derive(Debug, Default)]
pub struct Expansion {
    pub files: Vec<PathBuf>,
    pub errors: Vec<String>,
}

/// Expand `patterns` into a sorted, de-duplicated list of files.
///
/// A pattern without metacharacters naming an existing file is taken
/// verbatim. Files under `.git`, `target`, and `node_modules` are never
/// returned. Symlinks are followed. An entry that cannot be read is
/// recorded in [`Expansion::errors`] and the walk continues; only an
/// invalid pattern fails the whole expansion.
pub fn expand_globs(patterns: &[String]) -> Result<Expansion> {
    let excludes = build_globset(
        &DEFAULT_EXCLUDES
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>(),
    )?;
    let mut found = BTreeSet::new();
    let mut errors = Vec::new();

    for pattern in patterns {
        let pattern = pattern.strip_prefix("./").unwrap_or(pattern);
        if !has_glob_meta(pattern) {
            let path = PathBuf::from(pattern);
            if path.is_file() {
                found.insert(path);
            }
            continue;
        }

        let matcher = build_globset(&[pattern.to_string()])?;
        let base = literal_base(pattern);
        let root = if base.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            base
        };
        if !root.is_dir() {
            continue;
        }

        let walker = WalkDir::new(&root).follow_links(true).into_iter().filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !SKIPPED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref())
        });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable entry");
                    errors.push(err.to_string());
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = normalized(entry.path());
            if matcher.is_match(&rel) && !excludes.is_match(&rel) {
                found.insert(PathBuf::from(rel));
            }
        }
    }

    Ok(Expansion {
        files: found.into_iter().collect(),
        errors,
    })
}
