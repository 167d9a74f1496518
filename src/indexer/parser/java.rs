// Java parser: tree-sitter-java with a line-based regex fallback

use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::Node;

use super::ast::{child_of_kind, end_line, field_text, named_children, node_text, params_text, start_line};
use super::{
    body_members, find_block_end, last_path_segment, line_depths, parse_tree, parse_with_fallback,
    slice_lines, split_type_list, strip_generics, Grammar, Member, Strategy,
};
use crate::error::Result;
use crate::index::{
    ClassInfo, ExportInfo, FunctionInfo, ImportInfo, ImportSpecifier, LanguageParser, ParsedFile,
    PropertyInfo,
};

const LANGUAGE: &str = "java";

static IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*import\s+(static\s+)?([\w.$]+?)(\.\*)?\s*;").expect("valid regex"));

static TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:@\w+(?:\([^)]*\))?\s+)*((?:(?:public|protected|private|abstract|final|static|sealed|non-sealed|strictfp)\s+)*)(class|interface|enum|record)\s+([A-Za-z_$][\w$]*)",
    )
    .expect("valid regex")
});

static EXTENDS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bextends\s+([\w$.,\s]+?)\s*(?:\bimplements\b|\bpermits\b|\{|$)").expect("valid regex"));

static IMPLEMENTS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bimplements\s+([\w$.,\s]+?)\s*(?:\bpermits\b|\{|$)").expect("valid regex"));

static METHOD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:@\w+(?:\([^)]*\))?\s+)*((?:(?:public|protected|private|static|final|abstract|synchronized|native|default|strictfp)\s+)*)(?:<[^>]*>\s+)?(?:([\w$.\[\]<>?,\s]+?)\s+)?([A-Za-z_$][\w$]*)\s*\(([^)]*)\)",
    )
    .expect("valid regex")
});

static FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:@\w+(?:\([^)]*\))?\s+)*(?:(?:public|protected|private|static|final|transient|volatile)\s+)*([\w$.\[\]<>?,\s]+?)\s+([A-Za-z_$][\w$]*)\s*(?:=.*)?$",
    )
    .expect("valid regex")
});

const NOT_METHOD_NAMES: &[&str] = &["if", "for", "while", "switch", "catch", "synchronized", "return", "new", "else", "try"];

/// Java parser (`.java`)
pub struct JavaParser {
    strategy: Strategy,
}

impl JavaParser {
    pub fn new() -> Self {
        Self::with_strategy(Strategy::detect(Grammar::Java))
    }

    pub fn with_strategy(strategy: Strategy) -> Self {
        Self { strategy }
    }

    fn parse_native(&self, content: &str, file_path: &str) -> Result<ParsedFile> {
        let tree = parse_tree(Grammar::Java, content, file_path)?;
        let root = tree.root_node();
        let mut parsed = ParsedFile::empty(file_path, LANGUAGE);
        let mut top_level = Vec::new();

        for node in named_children(root) {
            match node.kind() {
                "import_declaration" => {
                    if let Some(import) = parse_import(node_text(node, content), start_line(node)) {
                        parsed.imports.push(import);
                    }
                }
                "class_declaration" | "interface_declaration" | "enum_declaration" | "record_declaration" => {
                    let mut classes = Vec::new();
                    extract_type(node, content, &mut classes);
                    if let Some(first) = classes.first() {
                        top_level.push((first.name.clone(), first.is_exported, first.start_line));
                    }
                    parsed.classes.extend(classes);
                }
                _ => {}
            }
        }

        parsed.exports = exports_for(&top_level);
        Ok(parsed)
    }

    fn parse_regex(&self, content: &str, file_path: &str) -> ParsedFile {
        let lines: Vec<&str> = content.lines().collect();
        let depths = line_depths(&lines);
        let mut parsed = ParsedFile::empty(file_path, LANGUAGE);
        let mut top_level = Vec::new();

        let mut idx = 0;
        while idx < lines.len() {
            if depths[idx] == 0 {
                if let Some(import) = parse_import(lines[idx], idx + 1) {
                    parsed.imports.push(import);
                    idx += 1;
                    continue;
                }
                let classes = regex_type(&lines, idx);
                if let Some(first) = classes.first() {
                    top_level.push((first.name.clone(), first.is_exported, first.start_line));
                    let next = first.end_line.max(idx + 1);
                    parsed.classes.extend(classes);
                    idx = next;
                    continue;
                }
            }
            idx += 1;
        }

        parsed.exports = exports_for(&top_level);
        parsed
    }
}

impl Default for JavaParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageParser for JavaParser {
    fn language(&self) -> &'static str {
        LANGUAGE
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["java"]
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

/// `import a.b.C;`, `import a.b.*;` and static imports
fn parse_import(text: &str, line: usize) -> Option<ImportInfo> {
    let caps = IMPORT_RE.captures(text)?;
    let path = caps.get(2)?.as_str().to_string();

    let specifier = if caps.get(3).is_some() {
        ImportSpecifier::wildcard(None)
    } else {
        ImportSpecifier::named(last_path_segment(&path, &['.']))
    };

    Some(ImportInfo {
        source: path,
        specifiers: vec![specifier],
        line,
    })
}

fn is_exported(modifiers: &str) -> bool {
    modifiers
        .split_whitespace()
        .any(|m| m == "public" || m == "protected")
}

fn exports_for(top_level: &[(String, bool, usize)]) -> Vec<ExportInfo> {
    top_level
        .iter()
        .filter(|(_, exported, _)| *exported)
        .map(|(name, _, line)| ExportInfo {
            name: name.clone(),
            is_default: false,
            line: *line,
        })
        .collect()
}

fn modifiers_of(node: Node, content: &str) -> String {
    child_of_kind(node, "modifiers")
        .map(|m| node_text(m, content).to_string())
        .unwrap_or_default()
}

/// Push the type declared by `node`, followed by its nested types
fn extract_type(node: Node, content: &str, classes: &mut Vec<ClassInfo>) {
    let Some(name) = field_text(node, "name", content) else {
        return;
    };
    let is_interface = node.kind() == "interface_declaration";

    let mut class = ClassInfo {
        name,
        start_line: start_line(node),
        end_line: end_line(node),
        is_exported: is_exported(&modifiers_of(node, content)),
        ..Default::default()
    };

    if let Some(superclass) = node.child_by_field_name("superclass") {
        let text = node_text(superclass, content).trim().trim_start_matches("extends");
        class.extends = split_type_list(text).into_iter().next();
    }
    if let Some(interfaces) = node.child_by_field_name("interfaces") {
        let text = node_text(interfaces, content).trim().trim_start_matches("implements");
        class.implements = split_type_list(text);
    }
    if is_interface {
        if let Some(parents) = child_of_kind(node, "extends_interfaces") {
            let text = node_text(parents, content).trim().trim_start_matches("extends");
            class.implements = split_type_list(text);
        }
    }
    if node.kind() == "record_declaration" {
        if let Some(params) = node.child_by_field_name("parameters") {
            for param in named_children(params) {
                if param.kind() == "formal_parameter" {
                    if let Some(name) = field_text(param, "name", content) {
                        class.properties.push(PropertyInfo {
                            name,
                            type_: field_text(param, "type", content),
                        });
                    }
                }
            }
        }
    }

    let mut nested = Vec::new();
    if let Some(body) = node.child_by_field_name("body") {
        extract_members(body, content, is_interface, &mut class, &mut nested);
    }

    classes.push(class);
    classes.extend(nested);
}

fn extract_members(body: Node, content: &str, is_interface: bool, class: &mut ClassInfo, nested: &mut Vec<ClassInfo>) {
    for member in named_children(body) {
        match member.kind() {
            "enum_body_declarations" => extract_members(member, content, is_interface, class, nested),
            "method_declaration" | "constructor_declaration" => {
                let Some(name) = field_text(member, "name", content) else {
                    continue;
                };
                let modifiers = modifiers_of(member, content);
                let exported = if is_interface {
                    !modifiers.split_whitespace().any(|m| m == "private")
                } else {
                    is_exported(&modifiers)
                };
                let has_body = member.child_by_field_name("body").is_some();

                class.methods.push(FunctionInfo {
                    name,
                    params: params_text(member.child_by_field_name("parameters"), content),
                    return_type: field_text(member, "type", content),
                    body: if has_body { node_text(member, content).to_string() } else { String::new() },
                    start_line: start_line(member),
                    end_line: end_line(member),
                    is_exported: exported,
                    is_async: false,
                });
            }
            "field_declaration" | "constant_declaration" => {
                let type_ = field_text(member, "type", content);
                for declarator in named_children(member) {
                    if declarator.kind() == "variable_declarator" {
                        if let Some(name) = field_text(declarator, "name", content) {
                            class.properties.push(PropertyInfo {
                                name,
                                type_: type_.clone(),
                            });
                        }
                    }
                }
            }
            "class_declaration" | "interface_declaration" | "enum_declaration" | "record_declaration" => {
                extract_type(member, content, nested);
            }
            _ => {}
        }
    }
}

/// Header text from `idx` up to the line holding the opening brace
fn header_text(lines: &[&str], idx: usize) -> String {
    let mut header = String::new();
    for line in lines.iter().skip(idx).take(5) {
        header.push_str(line);
        header.push(' ');
        if line.contains('{') {
            break;
        }
    }
    match header.find('{') {
        Some(pos) => header[..pos].to_string(),
        None => header,
    }
}

/// Type declared on line `idx` plus its nested types; empty when the line
/// holds no type header
fn regex_type(lines: &[&str], idx: usize) -> Vec<ClassInfo> {
    let Some(caps) = TYPE_RE.captures(lines[idx]) else {
        return Vec::new();
    };
    let modifiers = caps.get(1).map_or("", |m| m.as_str());
    let kind = caps.get(2).map_or("class", |m| m.as_str());
    let name = caps.get(3).map_or("", |m| m.as_str()).to_string();

    let header = strip_generics(&header_text(lines, idx));
    let end_idx = find_block_end(lines, idx);
    let is_interface = kind == "interface";

    let mut class = ClassInfo {
        name,
        start_line: idx + 1,
        end_line: end_idx + 1,
        is_exported: is_exported(modifiers),
        ..Default::default()
    };

    let parents = EXTENDS_RE
        .captures(&header)
        .map(|c| split_type_list(&c[1]))
        .unwrap_or_default();
    if is_interface {
        class.implements = parents;
    } else {
        class.extends = parents.into_iter().next();
        class.implements = IMPLEMENTS_RE
            .captures(&header)
            .map(|c| split_type_list(&c[1]))
            .unwrap_or_default();
    }

    let mut nested = Vec::new();
    let mut skip_constants = kind == "enum";
    for member in body_members(lines, idx, end_idx, false) {
        if member.opens_block {
            skip_constants = false;
            if TYPE_RE.is_match(&member.text) {
                if member.line > idx {
                    nested.extend(regex_type(lines, member.line));
                }
                continue;
            }
            if let Some(method) = regex_method(&member, lines, &class.name, is_interface, true) {
                class.methods.push(method);
            }
            continue;
        }

        if skip_constants {
            skip_constants = false;
            continue;
        }
        if member.text.contains('(') {
            if let Some(method) = regex_method(&member, lines, &class.name, is_interface, false) {
                class.methods.push(method);
            }
        } else if let Some(caps) = FIELD_RE.captures(&member.text) {
            class.properties.push(PropertyInfo {
                name: caps[2].to_string(),
                type_: Some(caps[1].trim().to_string()),
            });
        }
    }

    let mut classes = vec![class];
    classes.extend(nested);
    classes
}

fn regex_method(
    member: &Member,
    lines: &[&str],
    class_name: &str,
    is_interface: bool,
    has_body: bool,
) -> Option<FunctionInfo> {
    let caps = METHOD_RE.captures(&member.text)?;
    let modifiers = caps.get(1).map_or("", |m| m.as_str());
    let return_type = caps.get(2).map(|m| m.as_str().trim().to_string());
    let name = caps.get(3)?.as_str().to_string();

    if NOT_METHOD_NAMES.contains(&name.as_str()) {
        return None;
    }
    // Without a return type only a constructor is a declaration
    if return_type.is_none() && name != class_name {
        return None;
    }

    let exported = if is_interface {
        !modifiers.split_whitespace().any(|m| m == "private")
    } else {
        is_exported(modifiers)
    };

    let (end_idx, body) = if has_body {
        let end_idx = find_block_end(lines, member.line);
        (end_idx, slice_lines(lines, member.line, end_idx))
    } else {
        (member.line, String::new())
    };

    Some(FunctionInfo {
        name,
        params: caps.get(4).map_or("", |m| m.as_str()).trim().to_string(),
        return_type,
        body,
        start_line: member.line + 1,
        end_line: end_idx + 1,
        is_exported: exported,
        is_async: false,
    })
}
