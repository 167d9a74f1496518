// Import source → repository file resolution

use std::collections::{BTreeMap, BTreeSet};

use crate::index::ImportInfo;

const TS_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "mts", "cts"];

/// Repository file set with the lookups each language's import style needs
#[derive(Debug, Clone, Default)]
pub struct FileIndex {
    files: BTreeSet<String>,
    by_dir: BTreeMap<String, Vec<String>>,
}

impl FileIndex {
    pub fn new<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut index = Self::default();
        for file in files {
            index.insert(file.into());
        }
        index
    }

    pub fn insert(&mut self, file: String) {
        if self.files.insert(file.clone()) {
            self.by_dir.entry(parent_dir(&file).to_string()).or_default().push(file);
        }
    }

    pub fn contains(&self, file: &str) -> bool {
        self.files.contains(file)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Repository files an import refers to. External packages resolve to nothing.
    pub fn resolve(&self, from_file: &str, language: &str, import: &ImportInfo) -> Vec<String> {
        let mut targets = match language {
            "typescript" | "javascript" => self.resolve_script(from_file, &import.source).into_iter().collect(),
            "python" => self.resolve_python(from_file, import),
            "java" => self.resolve_java(import),
            "go" => self.resolve_go(&import.source),
            "rust" => self.resolve_rust(from_file, import),
            _ => Vec::new(),
        };
        targets.retain(|t| t != from_file);
        targets.sort();
        targets.dedup();
        targets
    }

    fn first_existing<'a>(&self, candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
        candidates.into_iter().find(|c| self.contains(c)).map(str::to_string)
    }

    /// Unique file whose path ends with `suffix` at a `/` boundary
    fn unique_suffix(&self, suffix: &str) -> Option<String> {
        if self.contains(suffix) {
            return Some(suffix.to_string());
        }
        let needle = format!("/{}", suffix);
        let mut matches = self.files.iter().filter(|f| f.ends_with(&needle));
        let first = matches.next()?;
        if matches.next().is_some() {
            return None;
        }
        Some(first.clone())
    }

    fn resolve_script(&self, from_file: &str, source: &str) -> Option<String> {
        let base = if source.starts_with('.') {
            normalize(&join(parent_dir(from_file), source))?
        } else if let Some(rest) = source.strip_prefix("@/").or_else(|| source.strip_prefix("~/")) {
            return self.script_candidates(rest).iter().find_map(|c| self.unique_suffix(c));
        } else if let Some(rest) = source.strip_prefix('/') {
            rest.to_string()
        } else {
            return None;
        };
        self.first_existing(self.script_candidates(&base).iter().map(String::as_str))
    }

    fn script_candidates(&self, base: &str) -> Vec<String> {
        let mut candidates = vec![base.to_string()];
        // ESM TypeScript writes `./x.js` for `./x.ts`
        let stem = match base.rsplit_once('.') {
            Some((stem, ext)) if TS_EXTENSIONS.contains(&ext) && !stem.ends_with('/') => Some(stem),
            _ => None,
        };
        for root in std::iter::once(base).chain(stem) {
            for ext in TS_EXTENSIONS {
                candidates.push(format!("{}.{}", root, ext));
            }
        }
        for ext in TS_EXTENSIONS {
            candidates.push(format!("{}/index.{}", base, ext));
        }
        candidates
    }

    fn resolve_python(&self, from_file: &str, import: &ImportInfo) -> Vec<String> {
        let source = import.source.as_str();
        let dots = source.chars().take_while(|c| *c == '.').count();
        let module = source[dots..].replace('.', "/");

        let module_path = if dots > 0 {
            let mut dir = parent_dir(from_file).to_string();
            for _ in 1..dots {
                dir = parent_dir(&dir).to_string();
            }
            Some(join(&dir, &module))
        } else {
            None
        };

        let find = |path: &str| -> Option<String> {
            let path = path.trim_matches('/');
            let candidates = [format!("{}.py", path), format!("{}/__init__.py", path)];
            match &module_path {
                Some(_) => self.first_existing(candidates.iter().map(String::as_str)),
                None => candidates.iter().find_map(|c| self.unique_suffix(c)),
            }
        };

        let base = module_path.clone().unwrap_or(module);
        // `from pkg import submodule` names files, not symbols
        let submodules: Vec<String> = import
            .specifiers
            .iter()
            .filter(|s| s.name != "*")
            .filter_map(|s| find(&join(&base, &s.name)))
            .collect();
        if !submodules.is_empty() {
            return submodules;
        }
        if base.is_empty() {
            return Vec::new();
        }
        find(&base).into_iter().collect()
    }

    fn resolve_java(&self, import: &ImportInfo) -> Vec<String> {
        let path = import.source.replace('.', "/");
        let wildcard = import.specifiers.iter().any(|s| s.name == "*");
        if wildcard {
            return self.files_in_dir_suffix(&path, "java");
        }
        if let Some(file) = self.unique_suffix(&format!("{}.java", path)) {
            return vec![file];
        }
        // static member import: drop the member name
        match path.rsplit_once('/') {
            Some((class_path, _)) => self.unique_suffix(&format!("{}.java", class_path)).into_iter().collect(),
            None => Vec::new(),
        }
    }

    fn resolve_go(&self, source: &str) -> Vec<String> {
        // most specific directory whose path is a suffix of the import path
        let dir = self
            .by_dir
            .keys()
            .filter(|d| !d.is_empty())
            .filter(|d| source == d.as_str() || source.ends_with(&format!("/{}", d)))
            .max_by_key(|d| d.len());
        match dir {
            Some(dir) => self
                .by_dir
                .get(dir)
                .map(|files| {
                    files
                        .iter()
                        .filter(|f| f.ends_with(".go") && !f.ends_with("_test.go"))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    fn files_in_dir_suffix(&self, dir_suffix: &str, ext: &str) -> Vec<String> {
        let ext = format!(".{}", ext);
        let needle = format!("/{}", dir_suffix);
        self.by_dir
            .iter()
            .filter(|(dir, _)| dir.as_str() == dir_suffix || dir.ends_with(&needle))
            .flat_map(|(_, files)| files.iter().filter(|f| f.ends_with(&ext)).cloned())
            .collect()
    }

    fn resolve_rust(&self, from_file: &str, import: &ImportInfo) -> Vec<String> {
        let mut segments: Vec<&str> = import.source.split("::").filter(|s| !s.is_empty()).collect();
        let Some(first) = segments.first().copied() else { return Vec::new() };

        let mut dir = match first {
            "crate" => crate_root(from_file),
            "self" => module_dir(from_file),
            "super" => module_dir(from_file),
            _ => return Vec::new(),
        };
        segments.remove(0);
        if first == "super" {
            dir = parent_dir(&dir).to_string();
        }
        while segments.first() == Some(&"super") {
            dir = parent_dir(&dir).to_string();
            segments.remove(0);
        }

        let submodules: Vec<String> = import
            .specifiers
            .iter()
            .filter(|s| s.name != "*" && s.name != "self")
            .filter_map(|s| {
                let mut path = segments.clone();
                path.push(s.name.as_str());
                self.rust_module_file(&dir, &path)
            })
            .collect();
        let own = self.rust_module_file(&dir, &segments);
        let mut targets = submodules;
        if let Some(own) = own {
            targets.push(own);
        }
        targets
    }

    /// Longest module-path prefix that maps to a file under `dir`
    fn rust_module_file(&self, dir: &str, segments: &[&str]) -> Option<String> {
        for len in (0..=segments.len()).rev() {
            let path = join(dir, &segments[..len].join("/"));
            let candidates = if len == 0 {
                vec![join(dir, "mod.rs"), join(dir, "lib.rs"), join(dir, "main.rs"), format!("{}.rs", dir)]
            } else {
                vec![format!("{}.rs", path), format!("{}/mod.rs", path)]
            };
            if let Some(found) = self.first_existing(candidates.iter().map(String::as_str)) {
                return Some(found);
            }
        }
        None
    }
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn join(dir: &str, rest: &str) -> String {
    match (dir.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (_, true) => dir.to_string(),
        _ => format!("{}/{}", dir, rest),
    }
}

/// Collapse `.` and `..` segments; `None` when the path escapes the root
fn normalize(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

fn crate_root(from_file: &str) -> String {
    match from_file.rfind("src/") {
        Some(idx) if idx == 0 || from_file[..idx].ends_with('/') => from_file[..idx + 3].to_string(),
        _ => parent_dir(from_file).to_string(),
    }
}

/// Directory holding the children of the module defined by `file`
fn module_dir(file: &str) -> String {
    let name = file.rsplit('/').next().unwrap_or(file);
    match name {
        "mod.rs" | "lib.rs" | "main.rs" => parent_dir(file).to_string(),
        _ => file.trim_end_matches(".rs").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ImportSpecifier;

    fn import(source: &str, names: &[&str]) -> ImportInfo {
        ImportInfo {
            source: source.to_string(),
            specifiers: names
                .iter()
                .map(|n| if *n == "*" { ImportSpecifier::wildcard(None) } else { ImportSpecifier::named(*n) })
                .collect(),
            line: 1,
        }
    }

    #[test]
    fn test_typescript_relative_imports() {
        let index = FileIndex::new(["src/app.ts", "src/lib/user.ts", "src/lib/index.ts", "src/util.js"]);
        assert_eq!(index.resolve("src/app.ts", "typescript", &import("./lib/user", &["User"])), vec!["src/lib/user.ts"]);
        assert_eq!(index.resolve("src/app.ts", "typescript", &import("./lib", &[])), vec!["src/lib/index.ts"]);
        assert_eq!(index.resolve("src/lib/user.ts", "typescript", &import("../util", &[])), vec!["src/util.js"]);
        assert_eq!(index.resolve("src/app.ts", "typescript", &import("./lib/user.js", &[])), vec!["src/lib/user.ts"]);
        assert!(index.resolve("src/app.ts", "typescript", &import("react", &["useState"])).is_empty());
        assert!(index.resolve("src/app.ts", "typescript", &import("../../../x", &[])).is_empty());
    }

    #[test]
    fn test_python_imports() {
        let index = FileIndex::new(["app/__init__.py", "app/models.py", "app/services/users.py", "app/main.py"]);
        assert_eq!(index.resolve("app/main.py", "python", &import("app.models", &["User"])), vec!["app/models.py"]);
        assert_eq!(index.resolve("app/main.py", "python", &import(".models", &["User"])), vec!["app/models.py"]);
        assert_eq!(index.resolve("app/main.py", "python", &import(".", &["models"])), vec!["app/models.py"]);
        assert_eq!(
            index.resolve("app/services/users.py", "python", &import("..models", &["User"])),
            vec!["app/models.py"]
        );
        assert_eq!(index.resolve("app/models.py", "python", &import("app", &[])), vec!["app/__init__.py"]);
        assert!(index.resolve("app/main.py", "python", &import("os.path", &["join"])).is_empty());
    }

    #[test]
    fn test_java_imports() {
        let index = FileIndex::new([
            "src/main/java/com/acme/Order.java",
            "src/main/java/com/acme/Customer.java",
            "src/main/java/com/acme/web/Api.java",
        ]);
        let from = "src/main/java/com/acme/web/Api.java";
        assert_eq!(
            index.resolve(from, "java", &import("com.acme.Order", &["Order"])),
            vec!["src/main/java/com/acme/Order.java"]
        );
        assert_eq!(
            index.resolve(from, "java", &import("com.acme", &["*"])),
            vec!["src/main/java/com/acme/Customer.java", "src/main/java/com/acme/Order.java"]
        );
        assert_eq!(
            index.resolve(from, "java", &import("com.acme.Order.create", &["create"])),
            vec!["src/main/java/com/acme/Order.java"]
        );
        assert!(index.resolve(from, "java", &import("java.util.List", &["List"])).is_empty());
    }

    #[test]
    fn test_go_package_imports() {
        let index = FileIndex::new(["main.go", "store/store.go", "store/cache.go", "store/store_test.go"]);
        assert_eq!(
            index.resolve("main.go", "go", &import("github.com/acme/kit/store", &["store"])),
            vec!["store/cache.go", "store/store.go"]
        );
        assert!(index.resolve("main.go", "go", &import("fmt", &["fmt"])).is_empty());
    }

    #[test]
    fn test_rust_module_imports() {
        let index = FileIndex::new([
            "src/lib.rs",
            "src/graph/mod.rs",
            "src/graph/resolve.rs",
            "src/index/mod.rs",
            "src/error.rs",
        ]);
        assert_eq!(
            index.resolve("src/graph/resolve.rs", "rust", &import("crate::index", &["ImportInfo"])),
            vec!["src/index/mod.rs"]
        );
        assert_eq!(
            index.resolve("src/graph/mod.rs", "rust", &import("crate::error", &["Result"])),
            vec!["src/error.rs"]
        );
        assert_eq!(index.resolve("src/graph/resolve.rs", "rust", &import("super", &["*"])), vec!["src/graph/mod.rs"]);
        assert_eq!(index.resolve("src/graph/mod.rs", "rust", &import("self", &["resolve"])), vec!["src/graph/resolve.rs"]);
        assert!(index.resolve("src/lib.rs", "rust", &import("std::collections", &["HashMap"])).is_empty());
    }

    #[test]
    fn test_ambiguous_suffix_is_dropped() {
        let index = FileIndex::new(["a/com/x/Util.java", "b/com/x/Util.java"]);
        assert!(index.resolve("Main.java", "java", &import("com.x.Util", &["Util"])).is_empty());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("src/./a/../b.ts").as_deref(), Some("src/b.ts"));
        assert_eq!(normalize("../x"), None);
    }
}
