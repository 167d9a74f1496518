// Rust parser: tree-sitter-rust with a line-based regex fallback

use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::Node;

use super::ast::{
    child_of_kind, clean_params, collapse_whitespace, end_line, field_text, has_child_kind, named_children,
    node_text, params_text, start_line,
};
use super::{body_members, find_block_end, line_depths, parse_tree, parse_with_fallback, slice_lines, strip_generics, Grammar, Strategy};
use crate::error::Result;
use crate::index::{
    ClassInfo, ExportInfo, FunctionInfo, ImportInfo, ImportSpecifier, LanguageParser, ParsedFile,
    PropertyInfo,
};

const LANGUAGE: &str = "rust";

static USE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+(.+?)\s*;?\s*$").expect("valid regex"));

static FN_START_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:(?:const|async|unsafe|extern\s+"[^"]*")\s+)*fn\s"#).expect("valid regex")
});

static FN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^\s*(pub(?:\([^)]*\))?\s+)?((?:(?:const|async|unsafe|extern\s+"[^"]*")\s+)*)fn\s+([A-Za-z_]\w*)\s*(?:<[^(]*>)?\s*\(([^)]*)\)\s*(?:->\s*([^{;]+?))?\s*(?:\bwhere\b[^{;]*)?(?:\{|;|$)"#,
    )
    .expect("valid regex")
});

static TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(pub(?:\([^)]*\))?\s+)?(struct|enum|trait|union)\s+([A-Za-z_]\w*)").expect("valid regex")
});

static IMPL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:unsafe\s+)?impl(?:<[^{]*?>)?\s+(?:([\w:]+)(?:<[^{]*?>)?\s+for\s+)?([\w:]+)").expect("valid regex")
});

static FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:pub(?:\([^)]*\))?\s+)?([A-Za-z_]\w*)\s*:\s*(.+?),?$").expect("valid regex")
});

/// Rust parser (`.rs`). Structs, enums and traits become classes; `impl`
/// blocks attach their functions to the implementing type.
pub struct RustParser {
    strategy: Strategy,
}

/// Functions of one `impl` block waiting for their type
struct ImplBlock {
    type_name: String,
    trait_name: Option<String>,
    methods: Vec<FunctionInfo>,
}

impl RustParser {
    pub fn new() -> Self {
        Self::with_strategy(Strategy::detect(Grammar::Rust))
    }

    pub fn with_strategy(strategy: Strategy) -> Self {
        Self { strategy }
    }

    fn parse_native(&self, content: &str, file_path: &str) -> Result<ParsedFile> {
        let tree = parse_tree(Grammar::Rust, content, file_path)?;
        let mut parsed = ParsedFile::empty(file_path, LANGUAGE);
        let mut impls = Vec::new();

        for node in named_children(tree.root_node()) {
            match node.kind() {
                "use_declaration" => {
                    parsed.imports.extend(parse_use(node_text(node, content), start_line(node)));
                }
                "function_item" => {
                    if let Some(function) = native_function(node, content) {
                        parsed.functions.push(function);
                    }
                }
                "struct_item" | "enum_item" | "union_item" | "trait_item" => {
                    if let Some(class) = native_type(node, content) {
                        parsed.classes.push(class);
                    }
                }
                "impl_item" => {
                    let Some(type_name) = field_text(node, "type", content) else { continue };
                    let methods = node
                        .child_by_field_name("body")
                        .map(named_children)
                        .unwrap_or_default()
                        .into_iter()
                        .filter(|item| item.kind() == "function_item")
                        .filter_map(|item| native_function(item, content))
                        .collect();
                    impls.push(ImplBlock {
                        type_name: type_name_of(&type_name),
                        trait_name: field_text(node, "trait", content).map(|t| type_name_of(&t)),
                        methods,
                    });
                }
                _ => {}
            }
        }

        attach_impls(&mut parsed, impls);
        parsed.exports = exports_for(&parsed);
        Ok(parsed)
    }

    fn parse_regex(&self, content: &str, file_path: &str) -> ParsedFile {
        let original: Vec<&str> = content.lines().collect();
        let cleaned: Vec<&str> = original.iter().map(|l| strip_comment_line(l)).collect();
        let depths = line_depths(&cleaned);
        let mut parsed = ParsedFile::empty(file_path, LANGUAGE);
        let mut impls = Vec::new();

        let mut idx = 0;
        while idx < cleaned.len() {
            let line = cleaned[idx];
            if depths[idx] != 0 || line.trim().is_empty() {
                idx += 1;
                continue;
            }

            if USE_RE.is_match(line) {
                let (statement, last) = gather_until(&cleaned, idx, |l| l.contains(';'));
                parsed.imports.extend(parse_use(&statement, idx + 1));
                idx = last + 1;
                continue;
            }

            if let Some(caps) = TYPE_RE.captures(line) {
                let class = regex_type(&cleaned, &original, idx, &caps);
                idx = class.end_line.max(idx + 1);
                parsed.classes.push(class);
                continue;
            }

            if let Some(caps) = IMPL_RE.captures(line) {
                let end_idx = find_block_end(&cleaned, idx);
                let methods = body_members(&cleaned, idx, end_idx, false)
                    .into_iter()
                    .filter_map(|m| regex_function(&cleaned, &original, m.line, &m.text, m.opens_block))
                    .collect();
                impls.push(ImplBlock {
                    type_name: type_name_of(&caps[2]),
                    trait_name: caps.get(1).map(|t| type_name_of(t.as_str())),
                    methods,
                });
                idx = end_idx + 1;
                continue;
            }

            if FN_START_RE.is_match(line) {
                let (header, last) = gather_until(&cleaned, idx, |l| l.contains('{') || l.contains(';'));
                let opens_block = header.contains('{');
                if let Some(function) = regex_function(&cleaned, &original, idx, &header, opens_block) {
                    idx = function.end_line.max(last + 1);
                    parsed.functions.push(function);
                    continue;
                }
            }

            idx += 1;
        }

        attach_impls(&mut parsed, impls);
        parsed.exports = exports_for(&parsed);
        parsed
    }
}

impl Default for RustParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageParser for RustParser {
    fn language(&self) -> &'static str {
        LANGUAGE
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["rs"]
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

fn strip_comment_line(line: &str) -> &str {
    if line.trim_start().starts_with("//") {
        ""
    } else {
        line
    }
}

fn gather_until(lines: &[&str], idx: usize, done: impl Fn(&str) -> bool) -> (String, usize) {
    let mut statement = String::new();
    for (offset, line) in lines.iter().enumerate().skip(idx).take(30) {
        statement.push_str(line);
        statement.push(' ');
        if done(line) {
            return (statement, offset);
        }
    }
    (statement, idx)
}

/// `crate::model::Store<T>` → `Store`
fn type_name_of(text: &str) -> String {
    let text = strip_generics(text);
    let text = text.trim().trim_start_matches('&').trim();
    text.rsplit("::").next().unwrap_or(text).trim().to_string()
}

/// Trait impls expose their functions as the type does; inherent impls use `pub`
fn attach_impls(parsed: &mut ParsedFile, impls: Vec<ImplBlock>) {
    for block in impls {
        match parsed.classes.iter_mut().find(|c| c.name == block.type_name) {
            Some(class) => {
                if let Some(trait_name) = block.trait_name.clone() {
                    if !class.implements.contains(&trait_name) {
                        class.implements.push(trait_name);
                    }
                }
                for mut method in block.methods {
                    if block.trait_name.is_some() {
                        method.is_exported = class.is_exported;
                    }
                    class.methods.push(method);
                }
            }
            None => {
                for mut method in block.methods {
                    method.name = format!("{}.{}", block.type_name, method.name);
                    parsed.functions.push(method);
                }
            }
        }
    }
    for class in parsed.classes.iter_mut() {
        class.methods.sort_by_key(|m| m.start_line);
    }
}

fn exports_for(parsed: &ParsedFile) -> Vec<ExportInfo> {
    let mut exports: Vec<ExportInfo> = parsed
        .classes
        .iter()
        .filter(|c| c.is_exported)
        .map(|c| ExportInfo { name: c.name.clone(), is_default: false, line: c.start_line })
        .chain(
            parsed
                .functions
                .iter()
                .filter(|f| f.is_exported && !f.name.contains('.'))
                .map(|f| ExportInfo { name: f.name.clone(), is_default: false, line: f.start_line }),
        )
        .collect();
    exports.sort_by_key(|e| e.line);
    exports
}

/// Expand a `use` tree into one ImportInfo per module path
fn parse_use(text: &str, line: usize) -> Vec<ImportInfo> {
    let collapsed = collapse_whitespace(text);
    let Some(caps) = USE_RE.captures(&collapsed) else {
        return Vec::new();
    };
    let tree = caps[1].trim_end_matches(';').trim().to_string();
    let mut leaves = Vec::new();
    expand_use_tree("", &tree, &mut leaves);

    let mut imports: Vec<ImportInfo> = Vec::new();
    for (source, specifier) in leaves {
        match imports.iter_mut().find(|i| i.source == source) {
            Some(existing) => existing.specifiers.push(specifier),
            None => imports.push(ImportInfo { source, specifiers: vec![specifier], line }),
        }
    }
    imports
}

fn join_path(prefix: &str, path: &str) -> String {
    match (prefix.is_empty(), path.is_empty()) {
        (true, _) => path.to_string(),
        (_, true) => prefix.to_string(),
        _ => format!("{}::{}", prefix, path),
    }
}

fn expand_use_tree(prefix: &str, tree: &str, out: &mut Vec<(String, ImportSpecifier)>) {
    let tree = tree.trim();
    if tree.is_empty() {
        return;
    }

    if let (Some(open), true) = (tree.find('{'), tree.ends_with('}')) {
        let head = tree[..open].trim().trim_end_matches("::");
        let inner = &tree[open + 1..tree.len() - 1];
        let prefix = join_path(prefix, head);
        for part in split_top_level(inner) {
            expand_use_tree(&prefix, part, out);
        }
        return;
    }

    let (path, alias) = match tree.split_once(" as ") {
        Some((path, alias)) => (path.trim(), Some(alias.trim().to_string())),
        None => (tree, None),
    };
    let full = join_path(prefix, path);
    let (module, leaf) = match full.rsplit_once("::") {
        Some((module, leaf)) => (module.to_string(), leaf.to_string()),
        None => (String::new(), full.clone()),
    };

    let entry = match leaf.as_str() {
        "*" => (module, ImportSpecifier::wildcard(alias)),
        "self" => {
            let name = module.rsplit("::").next().unwrap_or(&module).to_string();
            (module, ImportSpecifier { name, alias, is_default: true })
        }
        _ if module.is_empty() => (leaf.clone(), ImportSpecifier { name: leaf, alias, is_default: true }),
        _ => (module, ImportSpecifier { name: leaf, alias, is_default: false }),
    };
    out.push(entry);
}

/// Split on commas that are not nested inside braces
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, ch) in text.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn is_pub(node: Node) -> bool {
    has_child_kind(node, "visibility_modifier")
}

fn native_function(node: Node, content: &str) -> Option<FunctionInfo> {
    let is_async = child_of_kind(node, "function_modifiers")
        .map(|m| has_child_kind(m, "async"))
        .unwrap_or(false);
    let has_body = node.child_by_field_name("body").is_some();
    Some(FunctionInfo {
        name: field_text(node, "name", content)?,
        params: params_text(node.child_by_field_name("parameters"), content),
        return_type: field_text(node, "return_type", content).map(|r| collapse_whitespace(&r)),
        body: if has_body { node_text(node, content).to_string() } else { String::new() },
        start_line: start_line(node),
        end_line: end_line(node),
        is_exported: is_pub(node),
        is_async,
    })
}

fn native_type(node: Node, content: &str) -> Option<ClassInfo> {
    let mut class = ClassInfo {
        name: field_text(node, "name", content)?,
        start_line: start_line(node),
        end_line: end_line(node),
        is_exported: is_pub(node),
        ..Default::default()
    };

    let body = node.child_by_field_name("body");
    match node.kind() {
        "struct_item" | "union_item" => {
            for field in body.map(named_children).unwrap_or_default() {
                if field.kind() != "field_declaration" {
                    continue;
                }
                if let Some(name) = field_text(field, "name", content) {
                    class.properties.push(PropertyInfo {
                        name,
                        type_: field_text(field, "type", content).map(|t| collapse_whitespace(&t)),
                    });
                }
            }
        }
        "trait_item" => {
            if let Some(bounds) = field_text(node, "bounds", content) {
                class.implements = supertraits(&bounds);
            }
            for item in body.map(named_children).unwrap_or_default() {
                if matches!(item.kind(), "function_item" | "function_signature_item") {
                    if let Some(mut method) = native_function(item, content) {
                        method.is_exported = class.is_exported;
                        class.methods.push(method);
                    }
                }
            }
        }
        _ => {}
    }

    Some(class)
}

/// `: Send + Sync + 'static` → [Send, Sync]
fn supertraits(bounds: &str) -> Vec<String> {
    strip_generics(bounds.trim().trim_start_matches(':'))
        .split('+')
        .map(str::trim)
        .filter(|b| !b.is_empty() && !b.starts_with('\'') && !b.starts_with('?'))
        .map(str::to_string)
        .collect()
}

/// `cleaned` drives structure, `original` supplies body text
fn regex_function(cleaned: &[&str], original: &[&str], idx: usize, header: &str, opens_block: bool) -> Option<FunctionInfo> {
    let header = collapse_whitespace(header);
    let header = strip_attributes(&header);
    let caps = FN_RE.captures(header)?;

    let (end_idx, body) = if opens_block {
        let end_idx = find_block_end(cleaned, idx);
        (end_idx, slice_lines(original, idx, end_idx))
    } else {
        (idx, String::new())
    };

    Some(FunctionInfo {
        name: caps[3].to_string(),
        params: clean_params(&caps[4]),
        return_type: caps.get(5).map(|m| m.as_str().trim().to_string()),
        body,
        start_line: idx + 1,
        end_line: end_idx + 1,
        is_exported: caps.get(1).is_some(),
        is_async: caps.get(2).map(|m| m.as_str().contains("async")).unwrap_or(false),
    })
}

/// Drop leading `#[...]` attributes merged into a member statement
fn strip_attributes(text: &str) -> &str {
    let mut text = text.trim_start();
    while text.starts_with("#[") {
        let mut depth = 0;
        let mut cut = text.len();
        for (i, ch) in text.char_indices() {
            match ch {
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        cut = i + 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        text = text[cut..].trim_start();
    }
    text
}

fn regex_type(cleaned: &[&str], original: &[&str], idx: usize, caps: &regex::Captures) -> ClassInfo {
    let line = cleaned[idx];
    let kind = &caps[2];
    let header = line.find('{').map_or(line, |pos| &line[..pos]);
    let end_idx = if line.contains('{') || !header.trim_end().ends_with(';') {
        find_block_end(cleaned, idx)
    } else {
        idx
    };

    let mut class = ClassInfo {
        name: caps[3].to_string(),
        start_line: idx + 1,
        end_line: end_idx + 1,
        is_exported: caps.get(1).is_some(),
        ..Default::default()
    };

    match kind {
        "struct" | "union" => {
            for member in body_members(cleaned, idx, end_idx, true) {
                let text = strip_attributes(&member.text);
                if let Some(caps) = FIELD_RE.captures(text) {
                    class.properties.push(PropertyInfo {
                        name: caps[1].to_string(),
                        type_: Some(caps[2].trim().to_string()),
                    });
                }
            }
        }
        "trait" => {
            let after_name = &header[caps.get(3).map_or(0, |m| m.end())..];
            let bounds = after_name.split("where").next().unwrap_or("");
            if bounds.trim_start().starts_with(':') {
                class.implements = supertraits(bounds);
            }
            for member in body_members(cleaned, idx, end_idx, false) {
                if let Some(mut method) = regex_function(cleaned, original, member.line, &member.text, member.opens_block) {
                    method.is_exported = class.is_exported;
                    class.methods.push(method);
                }
            }
        }
        _ => {}
    }

    class
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"use std::collections::{HashMap, HashSet as Set};
use crate::error::Result;
use super::*;

/// A user record
#[derive(Debug, Clone)]
pub struct User {
    pub id: u64,
    name: String,
}

pub trait Repository: Send + Sync {
    fn find(&self, id: u64) -> Option<User>;

    fn count(&self) -> usize {
        0
    }
}

impl User {
    pub fn new(id: u64, name: String) -> Self {
        Self { id, name }
    }

    fn secret(&self) -> &str {
        &self.name
    }
}

impl Repository for User {
    fn find(&self, id: u64) -> Option<User> {
        None
    }
}

pub async fn load(
    id: u64,
) -> Result<User> {
    Ok(User::new(id, String::new()))
}

fn helper() {}
"#;

    fn both() -> Vec<RustParser> {
        vec![RustParser::with_strategy(Strategy::Native), RustParser::with_strategy(Strategy::Regex)]
    }

    #[test]
    fn test_use_trees() {
        for parser in both() {
            let parsed = parser.parse(SAMPLE, "src/user.rs");
            assert_eq!(parsed.imports.len(), 3);

            let collections = &parsed.imports[0];
            assert_eq!(collections.source, "std::collections");
            assert_eq!(collections.specifiers[0], ImportSpecifier::named("HashMap"));
            assert_eq!(collections.specifiers[1].alias.as_deref(), Some("Set"));

            assert_eq!(parsed.imports[1].source, "crate::error");
            assert_eq!(parsed.imports[2].source, "super");
            assert_eq!(parsed.imports[2].specifiers[0].name, "*");
        }
    }

    #[test]
    fn test_nested_use_tree() {
        let imports = parse_use("use a::{b::{c, d as e}, f, self};", 4);
        let summary: Vec<_> = imports
            .iter()
            .map(|i| (i.source.as_str(), i.specifiers.iter().map(|s| s.name.as_str()).collect::<Vec<_>>()))
            .collect();
        assert_eq!(summary, vec![("a::b", vec!["c", "d"]), ("a", vec!["f", "a"])]);
        assert!(imports.iter().all(|i| i.line == 4));
    }

    #[test]
    fn test_structs_traits_and_impls() {
        for parser in both() {
            let parsed = parser.parse(SAMPLE, "src/user.rs");
            assert_eq!(parsed.classes.len(), 2);

            let user = &parsed.classes[0];
            assert_eq!(user.name, "User");
            assert_eq!((user.start_line, user.end_line), (7, 10));
            assert!(user.is_exported);
            assert_eq!(user.implements, vec!["Repository"]);
            let props: Vec<_> = user.properties.iter().map(|p| (p.name.as_str(), p.type_.as_deref())).collect();
            assert_eq!(props, vec![("id", Some("u64")), ("name", Some("String"))]);

            let methods: Vec<_> = user.methods.iter().map(|m| (m.name.as_str(), m.is_exported)).collect();
            assert_eq!(methods, vec![("new", true), ("secret", false), ("find", true)]);
            assert_eq!(user.methods[1].return_type.as_deref(), Some("&str"));

            let repo = &parsed.classes[1];
            assert_eq!(repo.implements, vec!["Send", "Sync"]);
            let trait_methods: Vec<_> = repo.methods.iter().map(|m| (m.name.as_str(), m.start_line, m.end_line)).collect();
            assert_eq!(trait_methods, vec![("find", 13, 13), ("count", 15, 17)]);
        }
    }

    #[test]
    fn test_functions() {
        for parser in both() {
            let parsed = parser.parse(SAMPLE, "src/user.rs");
            let functions: Vec<_> = parsed.functions.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(functions, vec!["load", "helper"]);

            let load = &parsed.functions[0];
            assert!(load.is_async);
            assert!(load.is_exported);
            assert_eq!(load.params, "id: u64");
            assert_eq!(load.return_type.as_deref(), Some("Result<User>"));
            assert_eq!((load.start_line, load.end_line), (36, 40));
            assert!(!parsed.functions[1].is_exported);

            let exports: Vec<_> = parsed.exports.iter().map(|e| e.name.as_str()).collect();
            assert_eq!(exports, vec!["User", "Repository", "load"]);
        }
    }

    #[test]
    fn test_impl_for_foreign_type() {
        for parser in both() {
            let parsed = parser.parse("impl Display for Config {\n    fn fmt(&self) {}\n}\n", "src/fmt.rs");
            assert!(parsed.classes.is_empty());
            assert_eq!(parsed.functions[0].name, "Config.fmt");
        }
    }

    #[test]
    fn test_garbage_input_never_fails() {
        for parser in both() {
            for input in ["", "fn", "impl {", "use ::{", "struct", "}}} {{{"] {
                let parsed = parser.parse(input, "bad.rs");
                assert_eq!(parsed.language, "rust");
            }
        }
    }
}
