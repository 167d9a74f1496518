// Repository source file collection

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::config::IndexingConfig;
use crate::error::{Error, Result};
use crate::indexer::registry::ParserRegistry;

/// Files larger than this are skipped
pub const MAX_FILE_SIZE: u64 = 512 * 1024;

/// Directories never descended into
pub const DENY_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    ".hg",
    ".svn",
    "target",
    "build",
    "dist",
    "out",
    "vendor",
    "__pycache__",
    ".venv",
    "venv",
    ".idea",
    ".gradle",
    ".dart_tool",
    "coverage",
];

/// Walks a checkout and returns the parseable files in it
#[derive(Debug, Clone)]
pub struct SourceCollector {
    extensions: HashSet<String>,
    exclude: Vec<String>,
    max_file_size: u64,
}

impl SourceCollector {
    pub fn new<'a>(extensions: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            extensions: extensions.into_iter().map(|e| e.to_ascii_lowercase()).collect(),
            exclude: Vec::new(),
            max_file_size: MAX_FILE_SIZE,
        }
    }

    pub fn from_config(registry: &ParserRegistry, config: &IndexingConfig) -> Self {
        Self::new(registry.parseable_extensions())
            .with_excludes(config.exclude.clone())
            .with_max_file_size(config.max_file_size)
    }

    pub fn with_excludes(mut self, patterns: Vec<String>) -> Self {
        self.exclude = patterns;
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// Sorted repository-relative paths using `/` separators
    pub fn collect(&self, root: &Path) -> Result<Vec<String>> {
        if !root.is_dir() {
            return Err(Error::Collection {
                path: root.display().to_string(),
                message: "not a directory".to_string(),
            });
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.is_denied_dir(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(relative) = relative_path(root, entry.path()) else { continue };
            if !self.has_parseable_extension(&relative) || self.is_excluded(&relative) {
                continue;
            }

            match entry.metadata() {
                Ok(meta) if meta.len() > self.max_file_size => {
                    debug!("Skipping {} ({} bytes over limit)", relative, meta.len());
                }
                Ok(_) => files.push(relative),
                Err(e) => debug!("Skipping {}: {}", relative, e),
            }
        }

        files.sort();
        info!("Collected {} source files under {}", files.len(), root.display());
        Ok(files)
    }

    fn is_denied_dir(&self, entry: &DirEntry) -> bool {
        entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .map(|name| DENY_DIRS.contains(&name))
                .unwrap_or(false)
    }

    fn has_parseable_extension(&self, path: &str) -> bool {
        Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    pub fn is_excluded(&self, relative_path: &str) -> bool {
        self.exclude.iter().any(|p| matches_pattern(relative_path, p))
    }

    /// Whether a walk would have picked this path, size limit aside
    pub fn accepts(&self, relative_path: &str) -> bool {
        let in_denied_dir = relative_path
            .split('/')
            .rev()
            .skip(1)
            .any(|part| DENY_DIRS.contains(&part));
        !in_denied_dir && self.has_parseable_extension(relative_path) && !self.is_excluded(relative_path)
    }
}

pub(crate) fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative.components().map(|c| c.as_os_str().to_string_lossy()).collect();
    Some(parts.join("/"))
}

/// Glob-ish matching: `dir/`, `*.ext`, `**/name/**`, otherwise substring
pub fn matches_pattern(file_path: &str, pattern: &str) -> bool {
    if let Some(dir) = pattern.strip_suffix('/') {
        file_path.starts_with(pattern) || file_path.contains(&format!("/{}/", dir))
    } else if let Some(rest) = pattern.strip_prefix('*').filter(|r| r.starts_with('.')) {
        file_path.contains(rest.trim_end_matches('*'))
    } else if pattern.contains("**") {
        let name = pattern.trim_start_matches("**/").trim_end_matches("/**");
        file_path.starts_with(&format!("{}/", name)) || file_path.contains(&format!("/{}/", name))
    } else {
        file_path.contains(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn collector() -> SourceCollector {
        SourceCollector::new(["java", "ts", "js", "py", "go", "rs"])
    }

    #[test]
    fn test_collects_sorted_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/b.ts", "export const b = 1;");
        write(dir.path(), "src/a/A.java", "class A {}");
        write(dir.path(), "main.py", "print(1)");
        write(dir.path(), "README.md", "# readme");

        let files = collector().collect(dir.path()).unwrap();
        assert_eq!(files, vec!["main.py", "src/a/A.java", "src/b.ts"]);
    }

    #[test]
    fn test_deny_list_directories_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "node_modules/pkg/index.js", "module.exports = 1;");
        write(dir.path(), "target/debug/build.rs", "fn main() {}");
        write(dir.path(), ".git/hooks/pre-commit.py", "");
        write(dir.path(), "src/__pycache__/x.py", "");
        write(dir.path(), "src/lib.rs", "pub fn a() {}");

        let files = collector().collect(dir.path()).unwrap();
        assert_eq!(files, vec!["src/lib.rs"]);
    }

    #[test]
    fn test_oversized_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "big.py", &"x = 1\n".repeat(200));
        write(dir.path(), "small.py", "x = 1\n");

        let files = collector().with_max_file_size(100).collect(dir.path()).unwrap();
        assert_eq!(files, vec!["small.py"]);
    }

    #[test]
    fn test_exclude_patterns() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "web/app.min.js", "");
        write(dir.path(), "web/app.js", "");
        write(dir.path(), "src/__generated__/types.ts", "");
        write(dir.path(), "fixtures/data.py", "");

        let files = collector()
            .with_excludes(vec!["*.min.js".into(), "**/__generated__/**".into(), "fixtures/".into()])
            .collect(dir.path())
            .unwrap();
        assert_eq!(files, vec!["web/app.js"]);
    }

    #[test]
    fn test_missing_root_is_collection_error() {
        let err = collector().collect(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, Error::Collection { .. }));
    }

    #[test]
    fn test_accepts_mirrors_the_walk() {
        let c = collector().with_excludes(vec!["*.min.js".into()]);
        assert!(c.accepts("src/lib.rs"));
        assert!(!c.accepts("README.md"));
        assert!(!c.accepts("node_modules/pkg/index.js"));
        assert!(!c.accepts("web/app.min.js"));
        assert!(c.accepts("target.py"));
    }

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern("src/a.test.ts", "*.test.*"));
        assert!(matches_pattern("lib/gen/x.rs", "gen/"));
        assert!(matches_pattern("gen/x.rs", "gen/"));
        assert!(!matches_pattern("generated/x.rs", "gen/"));
        assert!(matches_pattern("a/__tests__/b.py", "**/__tests__/**"));
        assert!(matches_pattern("src/secret_keys.py", "secret"));
    }
}
