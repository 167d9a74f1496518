// TypeScript parser, also used for JavaScript sources

use std::collections::HashSet;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::Node;

use super::ast::{
    child_of_kind, collapse_whitespace, end_line, field_text, has_child_kind, named_children, node_text,
    params_text, start_line,
};
use super::{
    body_members, find_block_end, last_path_segment, line_depths, parse_tree, parse_with_fallback,
    slice_lines, split_type_list, strip_generics, Grammar, Member, Strategy,
};
use crate::error::Result;
use crate::index::{
    ClassInfo, ExportInfo, FunctionInfo, ImportInfo, ImportSpecifier, LanguageParser, ParsedFile,
    PropertyInfo,
};

const LANGUAGE: &str = "typescript";

static IMPORT_FROM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*import\s+(?:type\s+)?(.+?)\s+from\s+['"]([^'"]+)['"]"#).expect("valid regex"));

static IMPORT_SIDE_EFFECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*import\s+['"]([^'"]+)['"]"#).expect("valid regex"));

static REQUIRE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*(?:export\s+)?(?:const|let|var)\s+(\{[^}]*\}|[A-Za-z_$][\w$]*)\s*=\s*require\(\s*['"]([^'"]+)['"]\s*\)"#)
        .expect("valid regex")
});

static EXPORT_LIST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*export\s+(?:type\s+)?\{([^}]*)\}\s*(?:from\s+['"]([^'"]+)['"])?"#).expect("valid regex")
});

static EXPORT_STAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*export\s+\*\s+(?:as\s+([A-Za-z_$][\w$]*)\s+)?from\s+['"]([^'"]+)['"]"#).expect("valid regex")
});

static EXPORT_DEFAULT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*export\s+default\s+([A-Za-z_$][\w$]*)\s*;?\s*$").expect("valid regex"));

static FUNCTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(export\s+)?(default\s+)?(?:declare\s+)?(async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)\s*(?:<[^(]*>)?\s*\(([^)]*)\)\s*(?::\s*([^{;]+?))?\s*(?:\{|;|$)",
    )
    .expect("valid regex")
});

static ARROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(async\s+)?(?:function\s*\*?\s*[\w$]*\s*\(([^)]*)\)|\(([^)]*)\)\s*(?::\s*([^=]+?))?\s*=>|([A-Za-z_$][\w$]*)\s*=>)",
    )
    .expect("valid regex")
});

static CLASS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(export\s+)?(default\s+)?(?:declare\s+)?(?:abstract\s+)?(class|interface)\s+([A-Za-z_$][\w$]*)")
        .expect("valid regex")
});

static EXTENDS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bextends\s+([\w$.,\s]+?)\s*(?:\bimplements\b|\{|$)").expect("valid regex"));

static IMPLEMENTS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bimplements\s+([\w$.,\s]+?)\s*(?:\{|$)").expect("valid regex"));

static METHOD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^((?:(?:public|private|protected|static|readonly|abstract|override|async|get|set)\s+)*)\*?\s*(#?[A-Za-z_$][\w$]*)\s*\??\s*(?:<[^(]*>)?\s*\(([^)]*)\)\s*(?::\s*(.+?))?\s*$",
    )
    .expect("valid regex")
});

static ARROW_PROPERTY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^((?:(?:public|private|protected|static|readonly|override)\s+)*)(#?[A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(async\s+)?\(([^)]*)\)\s*(?::\s*(.+?))?\s*=>$",
    )
    .expect("valid regex")
});

static PROPERTY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^((?:(?:public|private|protected|static|readonly|declare|override|abstract)\s+)*)(#?[A-Za-z_$][\w$]*)\s*[?!]?\s*(?::\s*([^=]+?))?\s*(?:=.*)?,?$",
    )
    .expect("valid regex")
});

const NOT_METHOD_NAMES: &[&str] = &["if", "for", "while", "switch", "catch", "function", "return", "else"];

/// TypeScript parser (`.ts`, `.tsx`, `.mts`, `.cts`).
///
/// The registry routes JavaScript files here as well; the regex fallback
/// tolerates missing type annotations.
pub struct TypeScriptParser {
    strategy: Strategy,
    tsx_strategy: Strategy,
}

impl TypeScriptParser {
    pub fn new() -> Self {
        Self {
            strategy: Strategy::detect(Grammar::TypeScript),
            tsx_strategy: Strategy::detect(Grammar::Tsx),
        }
    }

    pub fn with_strategy(strategy: Strategy) -> Self {
        Self {
            strategy,
            tsx_strategy: strategy,
        }
    }

    /// JSX-capable grammar for .tsx and every JavaScript flavour
    fn grammar_for(file_path: &str) -> Grammar {
        let ext = Path::new(file_path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "tsx" | "js" | "jsx" | "mjs" | "cjs" => Grammar::Tsx,
            _ => Grammar::TypeScript,
        }
    }

    fn parse_native(&self, content: &str, file_path: &str) -> Result<ParsedFile> {
        let tree = parse_tree(Self::grammar_for(file_path), content, file_path)?;
        let root = tree.root_node();
        let mut parsed = ParsedFile::empty(file_path, LANGUAGE);
        let mut exported_names = HashSet::new();

        for node in named_children(root) {
            match node.kind() {
                "import_statement" => {
                    if let Some(import) = parse_import(node_text(node, content), start_line(node)) {
                        parsed.imports.push(import);
                    }
                }
                "export_statement" => {
                    let is_default = has_child_kind(node, "default");
                    if let Some(decl) = node.child_by_field_name("declaration") {
                        let before = (parsed.functions.len(), parsed.classes.len());
                        extract_declaration(decl, content, true, &mut parsed);
                        record_exports(&mut parsed, before, is_default);
                    } else if let Some(clause) = child_of_kind(node, "export_clause") {
                        for spec in named_children(clause) {
                            let Some(name) = field_text(spec, "name", content) else { continue };
                            let exported = field_text(spec, "alias", content).unwrap_or_else(|| name.clone());
                            parsed.exports.push(ExportInfo {
                                is_default: exported == "default",
                                name: exported,
                                line: start_line(spec),
                            });
                            exported_names.insert(name);
                        }
                        if let Some(import) = reexport_import(node, content) {
                            parsed.imports.push(import);
                        }
                    } else if let Some(import) = reexport_import(node, content) {
                        parsed.imports.push(import);
                    } else if let Some(value) = node.child_by_field_name("value") {
                        let before = (parsed.functions.len(), parsed.classes.len());
                        match value.kind() {
                            "identifier" => {
                                let name = node_text(value, content).to_string();
                                parsed.exports.push(ExportInfo {
                                    name: name.clone(),
                                    is_default: true,
                                    line: start_line(node),
                                });
                                exported_names.insert(name);
                            }
                            _ => {
                                extract_declaration(value, content, true, &mut parsed);
                                record_exports(&mut parsed, before, true);
                            }
                        }
                    }
                }
                _ => extract_declaration(node, content, false, &mut parsed),
            }
        }

        mark_exported(&mut parsed, &exported_names);
        Ok(parsed)
    }

    fn parse_regex(&self, content: &str, file_path: &str) -> ParsedFile {
        let lines: Vec<&str> = content.lines().collect();
        let depths = line_depths(&lines);
        let mut parsed = ParsedFile::empty(file_path, LANGUAGE);
        let mut exported_names = HashSet::new();

        let mut idx = 0;
        while idx < lines.len() {
            if depths[idx] != 0 {
                idx += 1;
                continue;
            }
            let line = lines[idx];
            let trimmed = line.trim_start();

            if is_import_line(trimmed) {
                let (statement, last) = gather_import(&lines, idx);
                if let Some(import) = parse_import(&statement, idx + 1) {
                    parsed.imports.push(import);
                }
                idx = last + 1;
                continue;
            }

            if let Some(caps) = EXPORT_STAR_RE.captures(line) {
                parsed.imports.push(ImportInfo {
                    source: caps[2].to_string(),
                    specifiers: vec![ImportSpecifier::wildcard(caps.get(1).map(|m| m.as_str().to_string()))],
                    line: idx + 1,
                });
                idx += 1;
                continue;
            }

            if let Some(caps) = EXPORT_LIST_RE.captures(line) {
                for (name, alias) in split_specifiers(&caps[1]) {
                    let exported = alias.clone().unwrap_or_else(|| name.clone());
                    parsed.exports.push(ExportInfo {
                        is_default: exported == "default",
                        name: exported,
                        line: idx + 1,
                    });
                    exported_names.insert(name);
                }
                if let Some(source) = caps.get(2) {
                    parsed.imports.push(ImportInfo {
                        source: source.as_str().to_string(),
                        specifiers: split_specifiers(&caps[1])
                            .into_iter()
                            .map(|(name, alias)| ImportSpecifier { name, alias, is_default: false })
                            .collect(),
                        line: idx + 1,
                    });
                }
                idx += 1;
                continue;
            }

            if let Some(caps) = EXPORT_DEFAULT_ID_RE.captures(line) {
                let name = caps[1].to_string();
                parsed.exports.push(ExportInfo { name: name.clone(), is_default: true, line: idx + 1 });
                exported_names.insert(name);
                idx += 1;
                continue;
            }

            if let Some(import) = parse_require(line, idx + 1) {
                parsed.imports.push(import);
                idx += 1;
                continue;
            }

            if let Some(caps) = CLASS_RE.captures(line) {
                let exported = caps.get(1).is_some();
                let class = regex_class(&lines, idx, &caps[3] == "interface", caps[4].to_string(), exported);
                if exported {
                    parsed.exports.push(ExportInfo {
                        name: class.name.clone(),
                        is_default: caps.get(2).is_some(),
                        line: idx + 1,
                    });
                }
                idx = class.end_line.max(idx + 1);
                parsed.classes.push(class);
                continue;
            }

            if let Some(caps) = FUNCTION_RE.captures(line) {
                let exported = caps.get(1).is_some();
                let end_idx = if line.trim_end().ends_with(';') { idx } else { find_block_end(&lines, idx) };
                let function = FunctionInfo {
                    name: caps[4].to_string(),
                    params: caps.get(5).map_or("", |m| m.as_str()).trim().to_string(),
                    return_type: caps.get(6).map(|m| m.as_str().trim().to_string()),
                    body: slice_lines(&lines, idx, end_idx),
                    start_line: idx + 1,
                    end_line: end_idx + 1,
                    is_exported: exported,
                    is_async: caps.get(3).is_some(),
                };
                if exported {
                    parsed.exports.push(ExportInfo {
                        name: function.name.clone(),
                        is_default: caps.get(2).is_some(),
                        line: idx + 1,
                    });
                }
                parsed.functions.push(function);
                idx = end_idx + 1;
                continue;
            }

            if let Some(caps) = ARROW_RE.captures(line) {
                let exported = caps.get(1).is_some();
                let end_idx = if line.contains('{') { find_block_end(&lines, idx) } else { idx };
                let params = caps
                    .get(4)
                    .or_else(|| caps.get(5))
                    .or_else(|| caps.get(7))
                    .map_or("", |m| m.as_str())
                    .trim()
                    .to_string();
                let function = FunctionInfo {
                    name: caps[2].to_string(),
                    params,
                    return_type: caps.get(6).map(|m| m.as_str().trim().to_string()),
                    body: slice_lines(&lines, idx, end_idx),
                    start_line: idx + 1,
                    end_line: end_idx + 1,
                    is_exported: exported,
                    is_async: caps.get(3).is_some(),
                };
                if exported {
                    parsed.exports.push(ExportInfo { name: function.name.clone(), is_default: false, line: idx + 1 });
                }
                parsed.functions.push(function);
                idx = end_idx + 1;
                continue;
            }

            idx += 1;
        }

        mark_exported(&mut parsed, &exported_names);
        parsed
    }
}

impl Default for TypeScriptParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageParser for TypeScriptParser {
    fn language(&self) -> &'static str {
        LANGUAGE
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["ts", "tsx", "mts", "cts"]
    }

    fn parse(&self, code: &str, file_path: &str) -> ParsedFile {
        let strategy = match Self::grammar_for(file_path) {
            Grammar::Tsx => self.tsx_strategy,
            _ => self.strategy,
        };
        parse_with_fallback(
            LANGUAGE,
            file_path,
            strategy,
            || self.parse_native(code, file_path),
            || self.parse_regex(code, file_path),
        )
    }
}

/// Parse an import statement or a CommonJS `require` binding
fn parse_import(text: &str, line: usize) -> Option<ImportInfo> {
    let text = collapse_whitespace(text);

    if let Some(caps) = IMPORT_FROM_RE.captures(&text) {
        return Some(ImportInfo {
            source: caps[2].to_string(),
            specifiers: parse_import_clause(&caps[1]),
            line,
        });
    }
    if let Some(caps) = IMPORT_SIDE_EFFECT_RE.captures(&text) {
        let source = caps[1].to_string();
        return Some(ImportInfo {
            specifiers: vec![ImportSpecifier::default_import(last_path_segment(&source, &['/']))],
            source,
            line,
        });
    }
    parse_require(&text, line)
}

fn parse_require(text: &str, line: usize) -> Option<ImportInfo> {
    let caps = REQUIRE_RE.captures(text)?;
    let binding = caps[1].trim();
    let specifiers = if binding.starts_with('{') {
        binding
            .trim_start_matches('{')
            .trim_end_matches('}')
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once(':') {
                Some((name, alias)) => ImportSpecifier {
                    name: name.trim().to_string(),
                    alias: Some(alias.trim().to_string()),
                    is_default: false,
                },
                None => ImportSpecifier::named(p),
            })
            .collect()
    } else {
        vec![ImportSpecifier::default_import(binding)]
    };
    Some(ImportInfo {
        source: caps[2].to_string(),
        specifiers,
        line,
    })
}

/// `Default`, `* as ns`, `{ a, b as c }` and their combinations
fn parse_import_clause(clause: &str) -> Vec<ImportSpecifier> {
    let clause = clause.trim();
    let clause = clause.strip_prefix("type ").unwrap_or(clause);
    let (head, braces) = match clause.find('{') {
        Some(open) => {
            let close = clause.rfind('}').filter(|c| *c > open).unwrap_or(clause.len());
            (&clause[..open], Some(&clause[open + 1..close]))
        }
        None => (clause, None),
    };

    let mut specifiers = Vec::new();
    for part in head.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if let Some(rest) = part.strip_prefix('*') {
            let alias = rest.trim().strip_prefix("as").map(|a| a.trim().to_string());
            specifiers.push(ImportSpecifier::wildcard(alias));
        } else {
            specifiers.push(ImportSpecifier::default_import(part));
        }
    }
    if let Some(inner) = braces {
        for (name, alias) in split_specifiers(inner) {
            specifiers.push(ImportSpecifier { name, alias, is_default: false });
        }
    }
    specifiers
}

/// `a, b as c, type d` → [(a, None), (b, Some(c)), (d, None)]
fn split_specifiers(list: &str) -> Vec<(String, Option<String>)> {
    list.split(',')
        .map(|p| p.trim())
        .map(|p| p.strip_prefix("type ").unwrap_or(p).trim())
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once(" as ") {
            Some((name, alias)) => (name.trim().to_string(), Some(alias.trim().to_string())),
            None => (p.to_string(), None),
        })
        .collect()
}

fn is_import_line(trimmed: &str) -> bool {
    match trimmed.strip_prefix("import") {
        Some(rest) => rest.starts_with(|c: char| c.is_whitespace() || matches!(c, '{' | '*' | '\'' | '"')),
        None => false,
    }
}

/// Multi-line import statements end at the line naming the module
fn gather_import(lines: &[&str], idx: usize) -> (String, usize) {
    let mut statement = String::new();
    for (offset, line) in lines.iter().enumerate().skip(idx).take(30) {
        statement.push_str(line);
        statement.push(' ');
        let done = line.contains('\'') || line.contains('"') || line.trim_end().ends_with(';');
        if done {
            return (statement, offset);
        }
    }
    (statement, idx)
}

/// `export ... from './x'` re-exports create a module dependency
fn reexport_import(node: Node, content: &str) -> Option<ImportInfo> {
    let source_node = node.child_by_field_name("source")?;
    let source = node_text(source_node, content).trim_matches(|c| c == '\'' || c == '"').to_string();
    let text = collapse_whitespace(node_text(node, content));

    let specifiers = if let Some(caps) = EXPORT_STAR_RE.captures(&text) {
        vec![ImportSpecifier::wildcard(caps.get(1).map(|m| m.as_str().to_string()))]
    } else if let Some(caps) = EXPORT_LIST_RE.captures(&text) {
        split_specifiers(&caps[1])
            .into_iter()
            .map(|(name, alias)| ImportSpecifier { name, alias, is_default: false })
            .collect()
    } else {
        Vec::new()
    };

    Some(ImportInfo {
        source,
        specifiers,
        line: start_line(node),
    })
}

/// Record exports for the declarations pushed since `before`
fn record_exports(parsed: &mut ParsedFile, before: (usize, usize), is_default: bool) {
    let mut exports = Vec::new();
    for f in &parsed.functions[before.0..] {
        exports.push(ExportInfo { name: f.name.clone(), is_default, line: f.start_line });
    }
    for c in &parsed.classes[before.1..] {
        exports.push(ExportInfo { name: c.name.clone(), is_default, line: c.start_line });
    }
    parsed.exports.extend(exports);
}

fn mark_exported(parsed: &mut ParsedFile, names: &HashSet<String>) {
    if names.is_empty() {
        return;
    }
    for f in parsed.functions.iter_mut().filter(|f| names.contains(&f.name)) {
        f.is_exported = true;
    }
    for c in parsed.classes.iter_mut().filter(|c| names.contains(&c.name)) {
        c.is_exported = true;
    }
}

fn extract_declaration(node: Node, content: &str, exported: bool, parsed: &mut ParsedFile) {
    match node.kind() {
        "function_declaration" | "generator_function_declaration" | "function_signature" => {
            if let Some(name) = field_text(node, "name", content) {
                parsed.functions.push(function_info(node, node, name, content, exported));
            }
        }
        "class_declaration" | "abstract_class_declaration" | "class" => {
            if let Some(class) = extract_class(node, content, exported) {
                parsed.classes.push(class);
            }
        }
        "interface_declaration" => {
            if let Some(class) = extract_interface(node, content, exported) {
                parsed.classes.push(class);
            }
        }
        "lexical_declaration" | "variable_declaration" => {
            if let Some(import) = parse_require(node_text(node, content), start_line(node)) {
                parsed.imports.push(import);
                return;
            }
            for declarator in named_children(node) {
                if declarator.kind() != "variable_declarator" {
                    continue;
                }
                let (Some(name), Some(value)) = (field_text(declarator, "name", content), declarator.child_by_field_name("value")) else {
                    continue;
                };
                if matches!(value.kind(), "arrow_function" | "function_expression" | "function" | "generator_function") {
                    parsed.functions.push(function_info(node, value, name, content, exported));
                }
            }
        }
        _ => {}
    }
}

/// `span` provides lines and body text, `func` the signature fields
fn function_info(span: Node, func: Node, name: String, content: &str, exported: bool) -> FunctionInfo {
    let params = match func.child_by_field_name("parameters") {
        Some(p) => params_text(Some(p), content),
        None => field_text(func, "parameter", content).unwrap_or_default(),
    };
    let has_body = func.child_by_field_name("body").is_some();

    FunctionInfo {
        name,
        params,
        return_type: type_annotation(func, "return_type", content),
        body: if has_body { node_text(span, content).to_string() } else { String::new() },
        start_line: start_line(span),
        end_line: end_line(span),
        is_exported: exported,
        is_async: has_child_kind(func, "async"),
    }
}

fn type_annotation(node: Node, field: &str, content: &str) -> Option<String> {
    field_text(node, field, content)
        .map(|t| t.trim().trim_start_matches(':').trim().to_string())
        .filter(|t| !t.is_empty())
}

fn extract_class(node: Node, content: &str, exported: bool) -> Option<ClassInfo> {
    let name = field_text(node, "name", content)?;
    let mut class = ClassInfo {
        name,
        start_line: start_line(node),
        end_line: end_line(node),
        is_exported: exported,
        ..Default::default()
    };

    if let Some(heritage) = child_of_kind(node, "class_heritage") {
        for clause in named_children(heritage) {
            let text = node_text(clause, content).trim();
            match clause.kind() {
                "extends_clause" => {
                    class.extends = split_type_list(text.trim_start_matches("extends")).into_iter().next();
                }
                "implements_clause" => {
                    class.implements = split_type_list(text.trim_start_matches("implements"));
                }
                _ => {}
            }
        }
    }

    if let Some(body) = node.child_by_field_name("body") {
        for member in named_children(body) {
            match member.kind() {
                "method_definition" | "method_signature" | "abstract_method_signature" => {
                    let Some(name) = field_text(member, "name", content) else { continue };
                    let exported = member_visible(member, &name, content);
                    class.methods.push(function_info(member, member, name, content, exported));
                }
                "public_field_definition" | "field_definition" => {
                    let name = field_text(member, "name", content)
                        .or_else(|| field_text(member, "property", content));
                    let Some(name) = name else { continue };
                    let value = member.child_by_field_name("value");
                    match value {
                        Some(v) if matches!(v.kind(), "arrow_function" | "function_expression") => {
                            let exported = member_visible(member, &name, content);
                            class.methods.push(function_info(member, v, name, content, exported));
                        }
                        _ => class.properties.push(PropertyInfo {
                            name,
                            type_: type_annotation(member, "type", content),
                        }),
                    }
                }
                _ => {}
            }
        }
    }

    Some(class)
}

fn extract_interface(node: Node, content: &str, exported: bool) -> Option<ClassInfo> {
    let name = field_text(node, "name", content)?;
    let mut class = ClassInfo {
        name,
        start_line: start_line(node),
        end_line: end_line(node),
        is_exported: exported,
        ..Default::default()
    };

    if let Some(parents) = child_of_kind(node, "extends_type_clause") {
        class.implements = split_type_list(node_text(parents, content).trim().trim_start_matches("extends"));
    }

    if let Some(body) = node.child_by_field_name("body") {
        for member in named_children(body) {
            let Some(name) = field_text(member, "name", content) else { continue };
            match member.kind() {
                "method_signature" => class.methods.push(function_info(member, member, name, content, true)),
                "property_signature" => class.properties.push(PropertyInfo {
                    name,
                    type_: type_annotation(member, "type", content),
                }),
                _ => {}
            }
        }
    }

    Some(class)
}

fn member_visible(member: Node, name: &str, content: &str) -> bool {
    let private = child_of_kind(member, "accessibility_modifier")
        .map(|m| node_text(m, content) == "private")
        .unwrap_or(false);
    !private && !name.starts_with('#')
}

fn regex_class(lines: &[&str], idx: usize, is_interface: bool, name: String, exported: bool) -> ClassInfo {
    let end_idx = find_block_end(lines, idx);
    let header = {
        let line = lines[idx];
        let head = line.find('{').map_or(line, |pos| &line[..pos]);
        strip_generics(head)
    };

    let mut class = ClassInfo {
        name,
        start_line: idx + 1,
        end_line: end_idx + 1,
        is_exported: exported,
        ..Default::default()
    };

    let parents = EXTENDS_RE.captures(&header).map(|c| split_type_list(&c[1])).unwrap_or_default();
    if is_interface {
        class.implements = parents;
    } else {
        class.extends = parents.into_iter().next();
        class.implements = IMPLEMENTS_RE.captures(&header).map(|c| split_type_list(&c[1])).unwrap_or_default();
    }

    for member in body_members(lines, idx, end_idx, true) {
        if let Some(method) = regex_member_function(&member, lines, is_interface) {
            class.methods.push(method);
        } else if !member.opens_block {
            if let Some(caps) = PROPERTY_RE.captures(&member.text) {
                class.properties.push(PropertyInfo {
                    name: caps[2].to_string(),
                    type_: caps.get(3).map(|m| m.as_str().trim().to_string()),
                });
            }
        }
    }

    class
}

fn regex_member_function(member: &Member, lines: &[&str], is_interface: bool) -> Option<FunctionInfo> {
    let (modifiers, name, params, return_type, is_async) = if let Some(caps) = METHOD_RE.captures(&member.text) {
        let modifiers = caps.get(1).map_or("", |m| m.as_str()).to_string();
        let is_async = modifiers.split_whitespace().any(|m| m == "async");
        (
            modifiers,
            caps[2].to_string(),
            caps.get(3).map_or("", |m| m.as_str()).trim().to_string(),
            caps.get(4).map(|m| m.as_str().trim().to_string()),
            is_async,
        )
    } else if let Some(caps) = ARROW_PROPERTY_RE.captures(&member.text) {
        (
            caps.get(1).map_or("", |m| m.as_str()).to_string(),
            caps[2].to_string(),
            caps.get(4).map_or("", |m| m.as_str()).trim().to_string(),
            caps.get(5).map(|m| m.as_str().trim().to_string()),
            caps.get(3).is_some(),
        )
    } else {
        return None;
    };

    if NOT_METHOD_NAMES.contains(&name.as_str()) {
        return None;
    }

    let (end_idx, body) = if member.opens_block {
        let end_idx = find_block_end(lines, member.line);
        (end_idx, slice_lines(lines, member.line, end_idx))
    } else {
        (member.line, String::new())
    };

    let private = modifiers.split_whitespace().any(|m| m == "private");
    Some(FunctionInfo {
        is_exported: is_interface || (!private && !name.starts_with('#')),
        name,
        params,
        return_type,
        body,
        start_line: member.line + 1,
        end_line: end_idx + 1,
        is_async,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"import React, { useState as useLocalState, type FC } from 'react';
import * as path from "node:path";
import './styles.css';

export interface Repository extends Named, Countable {
  name: string;
  count(): number;
}

export class UserService extends BaseService implements Repository {
  private cache: Map<string, User> = new Map();
  name = "users";

  constructor(private readonly api: Api) {
    super();
  }

  async load(id: string): Promise<User> {
    return this.api.get(id);
  }

  private evict(id: string) {
    this.cache.delete(id);
  }

  count(): number {
    return this.cache.size;
  }
}

export async function fetchAll(ids: string[]): Promise<User[]> {
  return Promise.all(ids.map(load));
}

const format = (user: User): string => {
  return user.name;
};

function internal() {
  return 1;
}

export { format as formatUser };
export default UserService;
"#;

    fn both() -> Vec<TypeScriptParser> {
        vec![
            TypeScriptParser::with_strategy(Strategy::Native),
            TypeScriptParser::with_strategy(Strategy::Regex),
        ]
    }

    #[test]
    fn test_imports() {
        for parser in both() {
            let parsed = parser.parse(SAMPLE, "src/user.ts");
            assert_eq!(parsed.imports.len(), 3);

            let react = &parsed.imports[0];
            assert_eq!(react.source, "react");
            assert_eq!(react.specifiers[0], ImportSpecifier::default_import("React"));
            assert_eq!(react.specifiers[1].name, "useState");
            assert_eq!(react.specifiers[1].alias.as_deref(), Some("useLocalState"));
            assert_eq!(react.specifiers[2].name, "FC");

            let ns = &parsed.imports[1];
            assert_eq!(ns.specifiers[0].name, "*");
            assert_eq!(ns.specifiers[0].alias.as_deref(), Some("path"));

            let side_effect = &parsed.imports[2];
            assert_eq!(side_effect.source, "./styles.css");
            assert_eq!(side_effect.specifiers[0], ImportSpecifier::default_import("styles"));
        }
    }

    #[test]
    fn test_classes_and_interfaces() {
        for parser in both() {
            let parsed = parser.parse(SAMPLE, "src/user.ts");
            assert_eq!(parsed.classes.len(), 2);

            let repo = &parsed.classes[0];
            assert_eq!(repo.name, "Repository");
            assert_eq!(repo.implements, vec!["Named", "Countable"]);
            assert_eq!(repo.methods.len(), 1);
            assert_eq!(repo.properties.len(), 1);

            let service = &parsed.classes[1];
            assert_eq!(service.name, "UserService");
            assert!(service.is_exported);
            assert_eq!(service.extends.as_deref(), Some("BaseService"));
            assert_eq!(service.implements, vec!["Repository"]);
            assert_eq!((service.start_line, service.end_line), (10, 29));

            let names: Vec<_> = service.methods.iter().map(|m| m.name.as_str()).collect();
            assert_eq!(names, vec!["constructor", "load", "evict", "count"]);
            let load = &service.methods[1];
            assert!(load.is_async);
            assert_eq!(load.return_type.as_deref(), Some("Promise<User>"));
            assert_eq!(load.params, "id: string");
            assert!(!service.methods[2].is_exported);

            let props: Vec<_> = service.properties.iter().map(|p| p.name.as_str()).collect();
            assert_eq!(props, vec!["cache", "name"]);
        }
    }

    #[test]
    fn test_functions_and_exports() {
        for parser in both() {
            let parsed = parser.parse(SAMPLE, "src/user.ts");
            let names: Vec<_> = parsed.functions.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, vec!["fetchAll", "format", "internal"]);

            let fetch_all = &parsed.functions[0];
            assert!(fetch_all.is_exported);
            assert!(fetch_all.is_async);
            assert_eq!(fetch_all.return_type.as_deref(), Some("Promise<User[]>"));

            // exported through the export clause
            assert!(parsed.functions[1].is_exported);
            assert!(!parsed.functions[2].is_exported);

            assert!(parsed.exports.iter().any(|e| e.name == "formatUser" && !e.is_default));
            assert!(parsed.exports.iter().any(|e| e.name == "UserService" && e.is_default));
            assert!(parsed.exports.iter().any(|e| e.name == "fetchAll"));
        }
    }

    #[test]
    fn test_javascript_require_and_untyped_code() {
        let source = "const fs = require('fs');\nconst { join, resolve: r } = require('path');\n\nfunction read(file) {\n  return fs.readFileSync(join(file));\n}\n\nmodule.exports = { read };\n";
        for parser in both() {
            let parsed = parser.parse(source, "lib/read.js");
            assert_eq!(parsed.imports.len(), 2);
            assert_eq!(parsed.imports[0].specifiers[0], ImportSpecifier::default_import("fs"));
            assert_eq!(parsed.imports[1].source, "path");
            assert_eq!(parsed.imports[1].specifiers[1].name, "resolve");
            assert_eq!(parsed.imports[1].specifiers[1].alias.as_deref(), Some("r"));
            assert_eq!(parsed.functions.len(), 1);
            assert_eq!(parsed.functions[0].name, "read");
            assert_eq!((parsed.functions[0].start_line, parsed.functions[0].end_line), (4, 6));
        }
    }

    #[test]
    fn test_multiline_import_in_regex_mode() {
        let parser = TypeScriptParser::with_strategy(Strategy::Regex);
        let parsed = parser.parse("import {\n  a,\n  b as c,\n} from './mod';\nexport function f() {}\n", "x.ts");
        assert_eq!(parsed.imports.len(), 1);
        assert_eq!(parsed.imports[0].source, "./mod");
        assert_eq!(parsed.imports[0].specifiers.len(), 2);
        assert_eq!(parsed.functions.len(), 1);
    }

    #[test]
    fn test_garbage_input_never_fails() {
        for parser in both() {
            for input in ["", "export {", "class {", "=> => =>", "import from", "function ("] {
                let parsed = parser.parse(input, "bad.ts");
                assert_eq!(parsed.file_path, "bad.ts");
                assert_eq!(parsed.language, "typescript");
            }
        }
    }
}
