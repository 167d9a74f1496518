// Python parser: tree-sitter-python with an indentation-based regex fallback

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::Node;

use super::ast::{collapse_whitespace, end_line, field_text, has_child_kind, named_children, node_text, params_text, start_line};
use super::{find_indent_block_end, indent_of, last_path_segment, parse_tree, parse_with_fallback, slice_lines, Grammar, Strategy};
use crate::error::Result;
use crate::index::{
    ClassInfo, ExportInfo, FunctionInfo, ImportInfo, ImportSpecifier, LanguageParser, ParsedFile,
    PropertyInfo,
};

const LANGUAGE: &str = "python";

static IMPORT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*import\s+(.+?)\s*$").expect("valid regex"));

static FROM_IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*from\s+(\S+)\s+import\s+(.+?)\s*$").expect("valid regex"));

static DEF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(async\s+)?def\s+([A-Za-z_]\w*)\s*\(([^)]*(?:\([^)]*\)[^)]*)*)\)\s*(?:->\s*([^:]+?))?\s*:",
    )
    .expect("valid regex")
});

static CLASS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*class\s+([A-Za-z_]\w*)\s*(?:\(([^)]*)\))?\s*:").expect("valid regex"));

static ASSIGN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-Za-z_]\w*)\s*(?::\s*([^=]+?))?\s*=[^=]").expect("valid regex"));

static ANNOTATED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*([A-Za-z_]\w*)\s*:\s*([^=]+?)\s*$").expect("valid regex"));

static ALL_NAMES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"['"]([A-Za-z_]\w*)['"]"#).expect("valid regex"));

/// Python parser (`.py`, `.pyi`)
pub struct PythonParser {
    strategy: Strategy,
}

impl PythonParser {
    pub fn new() -> Self {
        Self::with_strategy(Strategy::detect(Grammar::Python))
    }

    pub fn with_strategy(strategy: Strategy) -> Self {
        Self { strategy }
    }

    fn parse_native(&self, content: &str, file_path: &str) -> Result<ParsedFile> {
        let tree = parse_tree(Grammar::Python, content, file_path)?;
        let mut parsed = ParsedFile::empty(file_path, LANGUAGE);
        let mut dunder_all = None;

        for node in named_children(tree.root_node()) {
            let node = match node.kind() {
                "decorated_definition" => match node.child_by_field_name("definition") {
                    Some(def) => def,
                    None => continue,
                },
                _ => node,
            };
            match node.kind() {
                "import_statement" | "import_from_statement" | "future_import_statement" => {
                    parsed.imports.extend(parse_import(node_text(node, content), start_line(node)));
                }
                "function_definition" => {
                    if let Some(function) = native_function(node, content) {
                        parsed.functions.push(function);
                    }
                }
                "class_definition" => {
                    if let Some(class) = native_class(node, content) {
                        parsed.classes.push(class);
                    }
                }
                "expression_statement" => {
                    let text = node_text(node, content);
                    if text.trim_start().starts_with("__all__") {
                        dunder_all = Some(all_names(text));
                    }
                }
                _ => {}
            }
        }

        apply_exports(&mut parsed, dunder_all);
        Ok(parsed)
    }

    fn parse_regex(&self, content: &str, file_path: &str) -> ParsedFile {
        let lines: Vec<&str> = content.lines().collect();
        let mut parsed = ParsedFile::empty(file_path, LANGUAGE);
        let mut dunder_all = None;

        let mut idx = 0;
        while idx < lines.len() {
            let line = lines[idx];
            if line.trim().is_empty() || indent_of(line) != 0 {
                idx += 1;
                continue;
            }

            if line.starts_with("import ") || line.starts_with("from ") {
                let (statement, last) = gather_statement(&lines, idx, '(', ')');
                parsed.imports.extend(parse_import(&statement, idx + 1));
                idx = last + 1;
                continue;
            }

            if line.starts_with("__all__") {
                let (statement, last) = gather_statement(&lines, idx, '[', ']');
                dunder_all = Some(all_names(&statement));
                idx = last + 1;
                continue;
            }

            if let Some(caps) = CLASS_RE.captures(line) {
                let class = regex_class(&lines, idx, caps[1].to_string(), caps.get(2).map_or("", |m| m.as_str()));
                idx = class.end_line.max(idx + 1);
                parsed.classes.push(class);
                continue;
            }

            if line.starts_with("def ") || line.starts_with("async ") {
                if let Some(function) = regex_function(&lines, idx) {
                    idx = function.end_line.max(idx + 1);
                    parsed.functions.push(function);
                    continue;
                }
            }

            idx += 1;
        }

        apply_exports(&mut parsed, dunder_all);
        parsed
    }
}

impl Default for PythonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageParser for PythonParser {
    fn language(&self) -> &'static str {
        LANGUAGE
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["py", "pyi"]
    }

    fn parse(&self, code: &str, file_path: &str) -> ParsedFile {
        parse_with_fallback(
            LANGUAGE,
            file_path,
            self.strategy,
            || self.parse_native(code, file_path),
            || self.parse_regex(code, file_path),
        )
    }
}

fn is_public(name: &str) -> bool {
    !name.starts_with('_')
}

/// `__all__` wins over the underscore convention when present
fn apply_exports(parsed: &mut ParsedFile, dunder_all: Option<HashSet<String>>) {
    let exported = |name: &str| match &dunder_all {
        Some(names) => names.contains(name),
        None => is_public(name),
    };

    let mut exports = Vec::new();
    for f in parsed.functions.iter_mut() {
        f.is_exported = exported(&f.name);
        if f.is_exported {
            exports.push(ExportInfo { name: f.name.clone(), is_default: false, line: f.start_line });
        }
    }
    for c in parsed.classes.iter_mut() {
        c.is_exported = exported(&c.name);
        if c.is_exported {
            exports.push(ExportInfo { name: c.name.clone(), is_default: false, line: c.start_line });
        }
    }
    exports.sort_by_key(|e| e.line);
    parsed.exports = exports;
}

fn all_names(text: &str) -> HashSet<String> {
    ALL_NAMES_RE.captures_iter(text).map(|c| c[1].to_string()).collect()
}

/// `import a.b as c, d` or `from pkg import (x, y as z)`; one ImportInfo per module
fn parse_import(text: &str, line: usize) -> Vec<ImportInfo> {
    let text = collapse_whitespace(&text.replace('\\', " "));

    if let Some(caps) = FROM_IMPORT_RE.captures(&text) {
        let names = caps[2].replace(['(', ')'], " ");
        let specifiers = names
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(|n| match n.split_once(" as ") {
                _ if n == "*" => ImportSpecifier::wildcard(None),
                Some((name, alias)) => ImportSpecifier {
                    name: name.trim().to_string(),
                    alias: Some(alias.trim().to_string()),
                    is_default: false,
                },
                None => ImportSpecifier::named(n),
            })
            .collect();
        return vec![ImportInfo {
            source: caps[1].to_string(),
            specifiers,
            line,
        }];
    }

    let Some(caps) = IMPORT_RE.captures(&text) else {
        return Vec::new();
    };
    caps[1]
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(|module| {
            // an aliased module binds the whole namespace under the alias
            let (source, specifier) = match module.split_once(" as ") {
                Some((source, alias)) => (source.trim(), ImportSpecifier::wildcard(Some(alias.trim().to_string()))),
                None => (module, ImportSpecifier::default_import(last_path_segment(module, &['.']))),
            };
            ImportInfo {
                source: source.to_string(),
                specifiers: vec![specifier],
                line,
            }
        })
        .collect()
}

/// Join continuation lines of a bracketed statement
fn gather_statement(lines: &[&str], idx: usize, open: char, close: char) -> (String, usize) {
    let mut statement = String::new();
    let mut depth: i64 = 0;
    for (offset, line) in lines.iter().enumerate().skip(idx).take(50) {
        statement.push_str(line.trim_end_matches('\\'));
        statement.push(' ');
        depth += line.chars().filter(|c| *c == open).count() as i64;
        depth -= line.chars().filter(|c| *c == close).count() as i64;
        if depth <= 0 && !line.trim_end().ends_with('\\') {
            return (statement, offset);
        }
    }
    (statement, idx)
}

fn native_function(node: Node, content: &str) -> Option<FunctionInfo> {
    Some(FunctionInfo {
        name: field_text(node, "name", content)?,
        params: params_text(node.child_by_field_name("parameters"), content),
        return_type: field_text(node, "return_type", content),
        body: node_text(node, content).to_string(),
        start_line: start_line(node),
        end_line: end_line(node),
        is_exported: false,
        is_async: has_child_kind(node, "async"),
    })
}

fn native_class(node: Node, content: &str) -> Option<ClassInfo> {
    let name = field_text(node, "name", content)?;
    let mut bases = Vec::new();
    if let Some(superclasses) = node.child_by_field_name("superclasses") {
        for base in named_children(superclasses) {
            if matches!(base.kind(), "identifier" | "attribute" | "subscript") {
                bases.push(node_text(base, content).to_string());
            }
        }
    }
    let (extends, implements) = split_bases(bases);

    let mut class = ClassInfo {
        name,
        start_line: start_line(node),
        end_line: end_line(node),
        extends,
        implements,
        ..Default::default()
    };

    if let Some(body) = node.child_by_field_name("body") {
        for member in named_children(body) {
            let member = match member.kind() {
                "decorated_definition" => match member.child_by_field_name("definition") {
                    Some(def) => def,
                    None => continue,
                },
                _ => member,
            };
            match member.kind() {
                "function_definition" => {
                    if let Some(mut method) = native_function(member, content) {
                        method.is_exported = is_public(&method.name);
                        class.methods.push(method);
                    }
                }
                "expression_statement" => {
                    for assignment in named_children(member) {
                        if assignment.kind() != "assignment" {
                            continue;
                        }
                        let Some(left) = assignment.child_by_field_name("left") else { continue };
                        if left.kind() == "identifier" {
                            class.properties.push(PropertyInfo {
                                name: node_text(left, content).to_string(),
                                type_: field_text(assignment, "type", content),
                            });
                        }
                    }
                }
                _ => {}
            }
        }
    }

    Some(class)
}

/// First base is the parent; further bases are mixins
fn split_bases(bases: Vec<String>) -> (Option<String>, Vec<String>) {
    let mut bases = bases.into_iter().filter(|b| b != "object");
    let extends = bases.next();
    (extends, bases.collect())
}

fn regex_function(lines: &[&str], idx: usize) -> Option<FunctionInfo> {
    let (header, _) = gather_statement(lines, idx, '(', ')');
    let header = collapse_whitespace(&header);
    let caps = DEF_RE.captures(&header)?;
    let end_idx = find_indent_block_end(lines, idx);

    Some(FunctionInfo {
        name: caps[2].to_string(),
        params: collapse_whitespace(caps.get(3).map_or("", |m| m.as_str())),
        return_type: caps.get(4).map(|m| m.as_str().trim().to_string()),
        body: slice_lines(lines, idx, end_idx),
        start_line: idx + 1,
        end_line: end_idx + 1,
        is_exported: false,
        is_async: caps.get(1).is_some(),
    })
}

fn regex_class(lines: &[&str], idx: usize, name: String, bases: &str) -> ClassInfo {
    let end_idx = find_indent_block_end(lines, idx);
    let bases = bases
        .split(',')
        .map(str::trim)
        .filter(|b| !b.is_empty() && !b.contains('='))
        .map(str::to_string)
        .collect();
    let (extends, implements) = split_bases(bases);

    let mut class = ClassInfo {
        name,
        start_line: idx + 1,
        end_line: end_idx + 1,
        extends,
        implements,
        ..Default::default()
    };

    let member_indent = lines
        .iter()
        .take(end_idx + 1)
        .skip(idx + 1)
        .find(|l| !l.trim().is_empty())
        .map(|l| indent_of(l));
    let Some(member_indent) = member_indent else {
        return class;
    };

    let mut i = idx + 1;
    while i <= end_idx {
        let line = lines[i];
        if line.trim().is_empty() || indent_of(line) != member_indent {
            i += 1;
            continue;
        }
        let trimmed = line.trim_start();
        if trimmed.starts_with("def ") || trimmed.starts_with("async def") {
            if let Some(mut method) = regex_function(lines, i) {
                method.is_exported = is_public(&method.name);
                i = method.end_line.max(i + 1);
                class.methods.push(method);
                continue;
            }
        } else if let Some(caps) = ASSIGN_RE.captures(line).or_else(|| ANNOTATED_RE.captures(line)) {
            class.properties.push(PropertyInfo {
                name: caps[1].to_string(),
                type_: caps.get(2).map(|m| m.as_str().trim().to_string()),
            });
        }
        i += 1;
    }

    class
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"import os
import numpy as np
from .models import User, Account as Acct
from typing import *

__all__ = ["UserRepo", "load_users"]


class UserRepo(BaseRepo, CacheMixin):
    table = "users"
    limit: int = 10

    def __init__(self, db):
        self.db = db

    async def find(self, user_id: int) -> User:
        return await self.db.get(user_id)

    def _evict(self, key):
        pass


@cached
def load_users(path: str) -> list:
    with open(path) as fh:
        return [User(line) for line in fh]


def helper():
    return 1
"#;

    fn both() -> Vec<PythonParser> {
        vec![
            PythonParser::with_strategy(Strategy::Native),
            PythonParser::with_strategy(Strategy::Regex),
        ]
    }

    #[test]
    fn test_imports() {
        for parser in both() {
            let parsed = parser.parse(SAMPLE, "app/repo.py");
            assert_eq!(parsed.imports.len(), 4);
            assert_eq!(parsed.imports[0].specifiers[0], ImportSpecifier::default_import("os"));
            assert_eq!(parsed.imports[1].source, "numpy");
            assert_eq!(parsed.imports[1].specifiers[0], ImportSpecifier::wildcard(Some("np".to_string())));

            let models = &parsed.imports[2];
            assert_eq!(models.source, ".models");
            assert_eq!(models.specifiers[0], ImportSpecifier::named("User"));
            assert_eq!(models.specifiers[1].alias.as_deref(), Some("Acct"));
            assert_eq!(parsed.imports[3].specifiers[0].name, "*");
        }
    }

    #[test]
    fn test_module_alias_is_a_wildcard() {
        let code = "import numpy as np\nimport os.path as osp, sys\nfrom pkg import a as b\n";
        for parser in both() {
            let parsed = parser.parse(code, "m.py");
            let sources: Vec<_> = parsed.imports.iter().map(|i| i.source.as_str()).collect();
            assert_eq!(sources, vec!["numpy", "os.path", "sys", "pkg"]);
            assert_eq!(parsed.imports[0].specifiers, vec![ImportSpecifier::wildcard(Some("np".to_string()))]);
            assert_eq!(parsed.imports[1].specifiers, vec![ImportSpecifier::wildcard(Some("osp".to_string()))]);
            assert_eq!(parsed.imports[2].specifiers, vec![ImportSpecifier::default_import("sys")]);

            let named = &parsed.imports[3].specifiers[0];
            assert_eq!(named.name, "a");
            assert_eq!(named.alias.as_deref(), Some("b"));
        }
    }

    #[test]
    fn test_class_structure() {
        for parser in both() {
            let parsed = parser.parse(SAMPLE, "app/repo.py");
            assert_eq!(parsed.classes.len(), 1);
            let repo = &parsed.classes[0];
            assert_eq!(repo.name, "UserRepo");
            assert_eq!((repo.start_line, repo.end_line), (9, 20));
            assert_eq!(repo.extends.as_deref(), Some("BaseRepo"));
            assert_eq!(repo.implements, vec!["CacheMixin"]);
            assert!(repo.is_exported);

            let names: Vec<_> = repo.methods.iter().map(|m| m.name.as_str()).collect();
            assert_eq!(names, vec!["__init__", "find", "_evict"]);
            let find = &repo.methods[1];
            assert!(find.is_async);
            assert_eq!(find.params, "self, user_id: int");
            assert_eq!(find.return_type.as_deref(), Some("User"));
            assert!(find.is_exported);
            assert!(!repo.methods[2].is_exported);

            assert_eq!(repo.properties.len(), 2);
            assert_eq!(repo.properties[1].name, "limit");
            assert_eq!(repo.properties[1].type_.as_deref(), Some("int"));
        }
    }

    #[test]
    fn test_dunder_all_controls_exports() {
        for parser in both() {
            let parsed = parser.parse(SAMPLE, "app/repo.py");
            let names: Vec<_> = parsed.functions.iter().map(|f| (f.name.as_str(), f.is_exported)).collect();
            assert_eq!(names, vec![("load_users", true), ("helper", false)]);
            assert_eq!((parsed.functions[0].start_line, parsed.functions[0].end_line), (24, 26));

            let exports: Vec<_> = parsed.exports.iter().map(|e| e.name.as_str()).collect();
            assert_eq!(exports, vec!["UserRepo", "load_users"]);
        }
    }

    #[test]
    fn test_underscore_convention_without_dunder_all() {
        for parser in both() {
            let parsed = parser.parse("def public():\n    pass\n\ndef _private():\n    pass\n", "m.py");
            assert!(parsed.functions[0].is_exported);
            assert!(!parsed.functions[1].is_exported);
        }
    }

    #[test]
    fn test_parenthesized_from_import_in_regex_mode() {
        let parser = PythonParser::with_strategy(Strategy::Regex);
        let parsed = parser.parse("from pkg.sub import (\n    alpha,\n    beta as b,\n)\n", "m.py");
        assert_eq!(parsed.imports.len(), 1);
        assert_eq!(parsed.imports[0].source, "pkg.sub");
        assert_eq!(parsed.imports[0].specifiers.len(), 2);
    }

    #[test]
    fn test_syntax_error_falls_back() {
        let parser = PythonParser::with_strategy(Strategy::Native);
        let parsed = parser.parse("def ok():\n    return 1\n\ndef broken(:\n", "m.py");
        assert!(parsed.functions.iter().any(|f| f.name == "ok"));
    }

    #[test]
    fn test_garbage_input_never_fails() {
        for parser in both() {
            for input in ["", "def", "class :", "    \t\n\u{0}", "from import", "__all__ = ["] {
                let parsed = parser.parse(input, "bad.py");
                assert_eq!(parsed.language, "python");
                assert_eq!(parsed.file_path, "bad.py");
            }
        }
    }
}
