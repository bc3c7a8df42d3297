//! Corpus traversal.
//!
//! Walks a root directory and yields the files whose extension is on an
//! allow-list. Order is stable between runs on an unchanged tree (entries are
//! sorted by file name within each directory) but carries no other meaning.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::error::{RagError, Result};
use crate::types::relative_path;

/// Case-insensitive set of file extensions.
///
/// `".md"`, `"md"` and `"MD"` all normalize to `md`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionSet {
    extensions: BTreeSet<String>,
}

impl ExtensionSet {
    /// Build a set from user-supplied extensions, ignoring blanks.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .filter_map(|e| {
                let e = e.as_ref().trim().trim_start_matches('.').to_ascii_lowercase();
                (!e.is_empty()).then_some(e)
            })
            .collect();
        Self { extensions }
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Whether `path` has one of the allowed extensions.
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext.to_ascii_lowercase()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }
}

/// Traversal options.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Include dot-files and dot-directories.
    pub include_hidden: bool,
    /// Honor `.gitignore`, `.ignore` and git exclude files.
    pub respect_gitignore: bool,
    /// Follow symbolic links.
    pub follow_links: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            include_hidden: true,
            respect_gitignore: false,
            follow_links: false,
        }
    }
}

/// A file selected for indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    /// Location on disk.
    pub absolute: PathBuf,
    /// Path relative to the scan root, `/`-separated.
    pub relative: String,
}

/// Enumerates eligible files under a root.
#[derive(Debug, Clone, Default)]
pub struct CorpusScanner {
    config: ScannerConfig,
}

impl CorpusScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// List every regular file under `root` matching `extensions`.
    ///
    /// A missing or unreadable root is an error; unreadable entries below it
    /// are logged and skipped.
    pub fn scan(&self, root: &Path, extensions: &ExtensionSet) -> Result<Vec<ScannedFile>> {
        let metadata = std::fs::metadata(root).map_err(|source| RagError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(RagError::InvalidRequest(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let respect = self.config.respect_gitignore;
        let walker = WalkBuilder::new(root)
            .hidden(!self.config.include_hidden)
            .git_ignore(respect)
            .git_global(respect)
            .git_exclude(respect)
            .ignore(respect)
            .parents(respect)
            .require_git(false)
            .follow_links(self.config.follow_links)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(root = %root.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let path = entry.path();
            if !extensions.matches(path) {
                continue;
            }

            files.push(ScannedFile {
                relative: relative_path(root, path)?,
                absolute: path.to_path_buf(),
            });
        }

        tracing::debug!(
            root = %root.display(),
            files = files.len(),
            "Corpus scan complete"
        );
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, content: &str) {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn relatives(files: &[ScannedFile]) -> Vec<&str> {
        files.iter().map(|f| f.relative.as_str()).collect()
    }

    #[test]
    fn test_extension_set_normalizes() {
        let set = ExtensionSet::new([".md", "CS", " ", "."]);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["cs", "md"]);
        assert!(set.matches(Path::new("docs/README.MD")));
        assert!(set.matches(Path::new("src/a.cs")));
        assert!(!set.matches(Path::new("src/a.rs")));
        assert!(!set.matches(Path::new("Makefile")));
    }

    #[test]
    fn test_scan_filters_and_orders() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "b.cs", "class B {}");
        write(dir.path(), "a.md", "hello");
        write(dir.path(), "src/Handlers/Create.cs", "class C {}");
        write(dir.path(), "notes.txt", "skip me");

        let scanner = CorpusScanner::default();
        let files = scanner
            .scan(dir.path(), &ExtensionSet::new([".md", ".cs"]))
            .unwrap();

        assert_eq!(
            relatives(&files),
            vec!["a.md", "b.cs", "src/Handlers/Create.cs"]
        );
        assert_eq!(files[0].absolute, dir.path().join("a.md"));

        // Stable across runs
        let again = scanner
            .scan(dir.path(), &ExtensionSet::new([".md", ".cs"]))
            .unwrap();
        assert_eq!(files, again);
    }

    #[test]
    fn test_hidden_and_gitignore_options() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), ".github/guide.md", "hidden");
        write(dir.path(), "visible.md", "visible");
        write(dir.path(), "build/out.md", "ignored");
        write(dir.path(), ".gitignore", "build/\n");

        let extensions = ExtensionSet::new(["md"]);

        let all = CorpusScanner::default()
            .scan(dir.path(), &extensions)
            .unwrap();
        assert_eq!(
            relatives(&all),
            vec![".github/guide.md", "build/out.md", "visible.md"]
        );

        let filtered = CorpusScanner::new(ScannerConfig {
            include_hidden: false,
            respect_gitignore: true,
            follow_links: false,
        })
        .scan(dir.path(), &extensions)
        .unwrap();
        assert_eq!(relatives(&filtered), vec!["visible.md"]);
    }

    #[test]
    fn test_missing_root_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = CorpusScanner::default()
            .scan(&dir.path().join("nope"), &ExtensionSet::new(["md"]))
            .unwrap_err();
        assert!(matches!(err, RagError::Io { .. }));
    }

    #[test]
    fn test_empty_extension_set_matches_nothing() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.md", "hello");
        let files = CorpusScanner::default()
            .scan(dir.path(), &ExtensionSet::default())
            .unwrap();
        assert!(files.is_empty());
    }
}
