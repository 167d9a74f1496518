// Go parser: tree-sitter-go with a line-based regex fallback

use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::Node;

use super::ast::{collapse_whitespace, end_line, field_text, named_children, node_text, params_text, start_line};
use super::{
    body_members, find_block_end, last_path_segment, line_depths, parse_tree, parse_with_fallback, slice_lines,
    Grammar, Strategy,
};
use crate::error::Result;
use crate::index::{
    ClassInfo, ExportInfo, FunctionInfo, ImportInfo, ImportSpecifier, LanguageParser, ParsedFile,
    PropertyInfo,
};

const LANGUAGE: &str = "go";

static IMPORT_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*import\s+(?:([\w.]+)\s+)?"([^"]+)""#).expect("valid regex"));

static IMPORT_SPEC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*(?:([\w.]+)\s+)?"([^"]+)""#).expect("valid regex"));

static FUNC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^func\s+(?:\(\s*(?:\w+\s+)?\*?\s*([A-Za-z_]\w*)(?:\[[^\]]*\])?\s*\)\s*)?([A-Za-z_]\w*)\s*(?:\[[^\]]*\])?\s*\(([^)]*)\)\s*(.*)$",
    )
    .expect("valid regex")
});

static TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^type\s+([A-Za-z_]\w*)(?:\[[^\]]*\])?\s+(struct|interface)\s*\{").expect("valid regex")
});

static FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_]\w*(?:\s*,\s*[A-Za-z_]\w*)*)\s+(.+?)$").expect("valid regex")
});

static EMBEDDED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\*?([A-Za-z_][\w.]*)$").expect("valid regex"));

static METHOD_SIG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_]\w*)\s*\(([^)]*)\)\s*(.*)$").expect("valid regex"));

/// Go parser (`.go`). Structs and interfaces become classes; methods are
/// attached to their receiver type.
pub struct GoParser {
    strategy: Strategy,
}

impl GoParser {
    pub fn new() -> Self {
        Self::with_strategy(Strategy::detect(Grammar::Go))
    }

    pub fn with_strategy(strategy: Strategy) -> Self {
        Self { strategy }
    }

    fn parse_native(&self, content: &str, file_path: &str) -> Result<ParsedFile> {
        let tree = parse_tree(Grammar::Go, content, file_path)?;
        let mut parsed = ParsedFile::empty(file_path, LANGUAGE);
        let mut methods = Vec::new();

        for node in named_children(tree.root_node()) {
            match node.kind() {
                "import_declaration" => {
                    for spec in import_specs(node) {
                        if let Some(import) = parse_import_spec(node_text(spec, content), start_line(spec)) {
                            parsed.imports.push(import);
                        }
                    }
                }
                "function_declaration" => {
                    if let Some(function) = native_function(node, content) {
                        parsed.functions.push(function);
                    }
                }
                "method_declaration" => {
                    let receiver = node
                        .child_by_field_name("receiver")
                        .and_then(|r| named_children(r).into_iter().next())
                        .and_then(|p| field_text(p, "type", content))
                        .map(|t| receiver_type(&t));
                    if let (Some(receiver), Some(method)) = (receiver, native_function(node, content)) {
                        methods.push((receiver, method));
                    }
                }
                "type_declaration" => {
                    for spec in named_children(node) {
                        if spec.kind() == "type_spec" {
                            if let Some(class) = native_type(spec, node, content) {
                                parsed.classes.push(class);
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        attach_methods(&mut parsed, methods);
        parsed.exports = exports_for(&parsed);
        Ok(parsed)
    }

    fn parse_regex(&self, content: &str, file_path: &str) -> ParsedFile {
        let lines: Vec<&str> = content.lines().collect();
        let depths = line_depths(&lines);
        let mut parsed = ParsedFile::empty(file_path, LANGUAGE);
        let mut methods = Vec::new();

        let mut idx = 0;
        while idx < lines.len() {
            let line = lines[idx];
            if depths[idx] != 0 {
                idx += 1;
                continue;
            }

            if line.trim_start().starts_with("import") && line.contains('(') {
                idx += 1;
                while idx < lines.len() && !lines[idx].trim_start().starts_with(')') {
                    if let Some(import) = parse_import_spec(lines[idx], idx + 1) {
                        parsed.imports.push(import);
                    }
                    idx += 1;
                }
                idx += 1;
                continue;
            }

            if let Some(caps) = IMPORT_LINE_RE.captures(line) {
                parsed.imports.push(import_info(caps.get(1).map(|m| m.as_str()), &caps[2], idx + 1));
                idx += 1;
                continue;
            }

            if let Some(caps) = TYPE_RE.captures(line) {
                let class = regex_type(&lines, idx, caps[1].to_string(), &caps[2] == "interface");
                idx = class.end_line.max(idx + 1);
                parsed.classes.push(class);
                continue;
            }

            if let Some(caps) = FUNC_RE.captures(line) {
                let end_idx = find_block_end(&lines, idx);
                let name = caps[2].to_string();
                let function = FunctionInfo {
                    is_exported: is_exported(&name),
                    name,
                    params: collapse_whitespace(&caps[3]),
                    return_type: result_type(&caps[4]),
                    body: slice_lines(&lines, idx, end_idx),
                    start_line: idx + 1,
                    end_line: end_idx + 1,
                    is_async: false,
                };
                match caps.get(1) {
                    Some(receiver) => methods.push((receiver.as_str().to_string(), function)),
                    None => parsed.functions.push(function),
                }
                idx = end_idx + 1;
                continue;
            }

            idx += 1;
        }

        attach_methods(&mut parsed, methods);
        parsed.exports = exports_for(&parsed);
        parsed
    }
}

impl Default for GoParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageParser for GoParser {
    fn language(&self) -> &'static str {
        LANGUAGE
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["go"]
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

/// Capitalised identifiers are visible outside the package
fn is_exported(name: &str) -> bool {
    name.chars().next().map(|c| c.is_uppercase()).unwrap_or(false)
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

/// Receivers declared in another file of the package stay top-level as `Type.Method`
fn attach_methods(parsed: &mut ParsedFile, methods: Vec<(String, FunctionInfo)>) {
    for (receiver, mut method) in methods {
        match parsed.classes.iter_mut().find(|c| c.name == receiver) {
            Some(class) => class.methods.push(method),
            None => {
                method.name = format!("{}.{}", receiver, method.name);
                parsed.functions.push(method);
            }
        }
    }
    for class in parsed.classes.iter_mut() {
        class.methods.sort_by_key(|m| m.start_line);
    }
}

/// `*Store`, `Store[T]` → `Store`
fn receiver_type(text: &str) -> String {
    let text = text.trim().trim_start_matches('*').trim();
    text.split('[').next().unwrap_or(text).trim().to_string()
}

fn result_type(rest: &str) -> Option<String> {
    let result = rest.split('{').next().unwrap_or("").trim();
    (!result.is_empty()).then(|| collapse_whitespace(result))
}

fn parse_import_spec(text: &str, line: usize) -> Option<ImportInfo> {
    let caps = IMPORT_SPEC_RE.captures(text)?;
    Some(import_info(caps.get(1).map(|m| m.as_str()), &caps[2], line))
}

/// Package name is the last path segment; `.` imports everything
fn import_info(alias: Option<&str>, path: &str, line: usize) -> ImportInfo {
    let specifier = match alias {
        Some(".") => ImportSpecifier::wildcard(None),
        Some(alias) => ImportSpecifier::wildcard(Some(alias.to_string())),
        None => ImportSpecifier::default_import(last_path_segment(path, &['/'])),
    };
    ImportInfo {
        source: path.to_string(),
        specifiers: vec![specifier],
        line,
    }
}

fn import_specs(node: Node) -> Vec<Node> {
    let mut specs = Vec::new();
    for child in named_children(node) {
        match child.kind() {
            "import_spec" => specs.push(child),
            "import_spec_list" => specs.extend(named_children(child).into_iter().filter(|c| c.kind() == "import_spec")),
            _ => {}
        }
    }
    specs
}

fn native_function(node: Node, content: &str) -> Option<FunctionInfo> {
    let name = field_text(node, "name", content)?;
    Some(FunctionInfo {
        is_exported: is_exported(&name),
        name,
        params: params_text(node.child_by_field_name("parameters"), content),
        return_type: field_text(node, "result", content).map(|r| collapse_whitespace(&r)),
        body: node_text(node, content).to_string(),
        start_line: start_line(node),
        end_line: end_line(node),
        is_async: false,
    })
}

/// `span` is the enclosing `type` declaration, used for line ranges
fn native_type(spec: Node, span: Node, content: &str) -> Option<ClassInfo> {
    let name = field_text(spec, "name", content)?;
    let ty = spec.child_by_field_name("type")?;
    let range_node = if named_children(span).len() == 1 { span } else { spec };

    let mut class = ClassInfo {
        is_exported: is_exported(&name),
        name,
        start_line: start_line(range_node),
        end_line: end_line(range_node),
        ..Default::default()
    };

    match ty.kind() {
        "struct_type" => {
            let fields = named_children(ty).into_iter().find(|c| c.kind() == "field_declaration_list");
            for field in fields.map(named_children).unwrap_or_default() {
                if field.kind() != "field_declaration" {
                    continue;
                }
                let Some(type_text) = field_text(field, "type", content) else { continue };
                let mut cursor = field.walk();
                let names: Vec<String> = field
                    .children_by_field_name("name", &mut cursor)
                    .map(|n| node_text(n, content).to_string())
                    .collect();
                if names.is_empty() {
                    class.implements.push(type_text.trim_start_matches('*').to_string());
                } else {
                    for name in names {
                        class.properties.push(PropertyInfo { name, type_: Some(type_text.clone()) });
                    }
                }
            }
        }
        "interface_type" => {
            for elem in named_children(ty) {
                match elem.kind() {
                    "method_elem" | "method_spec" => {
                        if let Some(method) = native_function(elem, content) {
                            class.methods.push(FunctionInfo { body: String::new(), ..method });
                        }
                    }
                    "type_elem" | "interface_type_name" | "constraint_elem" | "qualified_type" | "type_identifier" => {
                        class.implements.push(node_text(elem, content).trim().to_string());
                    }
                    _ => {}
                }
            }
        }
        _ => return None,
    }

    Some(class)
}

fn regex_type(lines: &[&str], idx: usize, name: String, is_interface: bool) -> ClassInfo {
    let end_idx = find_block_end(lines, idx);
    let mut class = ClassInfo {
        is_exported: is_exported(&name),
        name,
        start_line: idx + 1,
        end_line: end_idx + 1,
        ..Default::default()
    };

    for member in body_members(lines, idx, end_idx, true) {
        let text = member.text.split("//").next().unwrap_or("").trim();
        if text.is_empty() {
            continue;
        }
        if let Some(caps) = EMBEDDED_RE.captures(text) {
            class.implements.push(caps[1].to_string());
        } else if is_interface {
            if let Some(caps) = METHOD_SIG_RE.captures(text) {
                let name = caps[1].to_string();
                let result = caps[3].trim();
                class.methods.push(FunctionInfo {
                    is_exported: is_exported(&name),
                    name,
                    params: collapse_whitespace(&caps[2]),
                    return_type: (!result.is_empty()).then(|| collapse_whitespace(result)),
                    start_line: member.line + 1,
                    end_line: member.line + 1,
                    ..Default::default()
                });
            }
        } else if let Some(caps) = FIELD_RE.captures(text) {
            let type_text = caps[2].split('`').next().unwrap_or("").trim().to_string();
            for name in caps[1].split(',').map(str::trim).filter(|n| !n.is_empty()) {
                class.properties.push(PropertyInfo {
                    name: name.to_string(),
                    type_: Some(type_text.clone()),
                });
            }
        }
    }

    class
}
