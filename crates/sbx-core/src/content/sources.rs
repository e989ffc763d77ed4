use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use glob::{MatchOptions, Pattern};
use walkdir::WalkDir;

use crate::error::BuildError;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// How a selected entry is read. Symlinks are never followed; they are
/// fingerprinted and archived by their target text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EntryKind {
    File,
    Symlink { target: PathBuf },
}

/// A regular file or symlink selected from the build context.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedFile {
    /// Path relative to the context root with `/` separators.
    pub relative: String,
    pub absolute: PathBuf,
    pub kind: EntryKind,
}

/// Expands copy-step source globs into the files they select. The
/// fingerprinter and the archive builder both go through here so they always
/// agree on the file set.
#[derive(Clone, Debug)]
pub struct SourceResolver {
    root: PathBuf,
    ignore: Vec<Pattern>,
}

impl SourceResolver {
    pub fn new(root: &Path, ignore_patterns: &[String]) -> Result<Self, BuildError> {
        let root = root.canonicalize().map_err(|err| BuildError::ContentUnreadable {
            path: root.display().to_string(),
            reason: format!("build context root is not accessible: {err}"),
        })?;
        let ignore = ignore_patterns
            .iter()
            .map(|raw| {
                Pattern::new(raw.trim_end_matches('/')).map_err(|err| {
                    BuildError::ContentUnreadable {
                        path: raw.clone(),
                        reason: format!("invalid ignore pattern: {err}"),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { root, ignore })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Files selected by `sources`, sorted by relative path and free of
    /// duplicates. Directories expand to every file below them; hidden
    /// entries are included. Every source has to select at least one file.
    pub fn resolve(&self, sources: &[String]) -> Result<Vec<ResolvedFile>, BuildError> {
        let mut selected: BTreeMap<String, (PathBuf, EntryKind)> = BTreeMap::new();
        for source in sources {
            let before = selected.len();
            for matched in self.expand(source)? {
                self.collect(&matched, &mut selected)?;
            }
            if selected.len() == before && !self.already_covered(source, &selected) {
                return Err(BuildError::ContentUnreadable {
                    path: source.clone(),
                    reason: "no files in the build context match this source".into(),
                });
            }
        }
        Ok(selected
            .into_iter()
            .map(|(relative, (absolute, kind))| ResolvedFile {
                relative,
                absolute,
                kind,
            })
            .collect())
    }

    fn expand(&self, source: &str) -> Result<Vec<PathBuf>, BuildError> {
        let trimmed = source.trim().trim_start_matches("./");
        if trimmed.is_empty() || trimmed == "." {
            return Ok(vec![self.root.clone()]);
        }
        let escapes = Path::new(trimmed).components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(BuildError::ContentUnreadable {
                path: source.to_string(),
                reason: "source escapes the build context".into(),
            });
        }
        let base = Pattern::escape(&self.root.to_string_lossy());
        let pattern = format!("{base}/{trimmed}");
        let paths = glob::glob_with(&pattern, MATCH_OPTIONS).map_err(|err| {
            BuildError::ContentUnreadable {
                path: source.to_string(),
                reason: format!("invalid source pattern: {err}"),
            }
        })?;
        paths
            .map(|entry| {
                entry.map_err(|err| BuildError::ContentUnreadable {
                    path: err.path().display().to_string(),
                    reason: err.error().to_string(),
                })
            })
            .collect()
    }

    fn collect(
        &self,
        matched: &Path,
        selected: &mut BTreeMap<String, (PathBuf, EntryKind)>,
    ) -> Result<(), BuildError> {
        let walk = WalkDir::new(matched)
            .follow_links(false)
            .follow_root_links(false)
            .sort_by_file_name();
        for entry in walk {
            let entry = entry.map_err(|err| BuildError::ContentUnreadable {
                path: err
                    .path()
                    .unwrap_or(matched)
                    .display()
                    .to_string(),
                reason: err.to_string(),
            })?;
            let file_type = entry.file_type();
            if !file_type.is_file() && !file_type.is_symlink() {
                continue;
            }
            let Some(relative) = self.relative(entry.path()) else {
                continue;
            };
            if self.is_ignored(&relative) || selected.contains_key(&relative) {
                continue;
            }
            let kind = if file_type.is_symlink() {
                let target =
                    fs::read_link(entry.path()).map_err(|err| BuildError::ContentUnreadable {
                        path: relative.clone(),
                        reason: format!("failed to read symlink target: {err}"),
                    })?;
                EntryKind::Symlink { target }
            } else {
                EntryKind::File
            };
            selected.insert(relative, (entry.path().to_path_buf(), kind));
        }
        Ok(())
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let stripped = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = stripped
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        (!parts.is_empty()).then(|| parts.join("/"))
    }

    /// A path is ignored when a pattern matches it or any of its parent
    /// directories.
    fn is_ignored(&self, relative: &str) -> bool {
        if self.ignore.is_empty() {
            return false;
        }
        let mut prefix = String::with_capacity(relative.len());
        for (idx, part) in relative.split('/').enumerate() {
            if idx > 0 {
                prefix.push('/');
            }
            prefix.push_str(part);
            let hit = self.ignore.iter().any(|pattern| {
                pattern.matches_with(&prefix, MATCH_OPTIONS)
                    || pattern.matches_with(part, MATCH_OPTIONS)
            });
            if hit {
                return true;
            }
        }
        false
    }

    /// Overlapping sources may select only files an earlier source already
    /// selected; that still counts as a match.
    fn already_covered(
        &self,
        source: &str,
        selected: &BTreeMap<String, (PathBuf, EntryKind)>,
    ) -> bool {
        let trimmed = source.trim().trim_start_matches("./").trim_end_matches('/');
        let Ok(pattern) = Pattern::new(trimmed) else {
            return false;
        };
        selected.keys().any(|relative| {
            pattern.matches_with(relative, MATCH_OPTIONS)
                || relative.starts_with(&format!("{trimmed}/"))
        })
    }
}
