// Parsed files → graph nodes and links, one FileGraph per source file

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::resolve::FileIndex;
use super::{GraphLink, GraphNode, LinkType, NodeKind};
use crate::index::{ClassInfo, FunctionInfo, ParsedFile};

static CALL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Za-z_][A-Za-z0-9_$]*)\s*\(").expect("valid regex"));

/// Identifiers followed by `(` that are never calls
const NOT_CALLS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "function", "fn", "def", "match", "new", "typeof",
    "sizeof", "super", "this", "self", "elif", "with", "assert", "await", "async", "yield", "lambda", "not",
    "and", "or", "in", "else", "do", "try", "throw", "case", "func", "go", "defer", "select", "instanceof",
];

/// Everything one source file contributes to the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileGraph {
    pub file: String,
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
}

pub fn file_id(path: &str) -> String {
    format!("file:{}", path)
}

fn class_id(path: &str, class: &str) -> String {
    format!("class:{}#{}", path, class)
}

fn function_id(path: &str, qualified: &str) -> String {
    format!("fn:{}#{}", path, qualified)
}

/// Node ids of one file's declarations, in declaration order
struct FileIds {
    functions: Vec<String>,
    classes: Vec<(String, Vec<String>)>,
}

fn assign_ids(parsed: &ParsedFile) -> FileIds {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut unique = |base: String| -> String {
        let n = seen.entry(base.clone()).or_insert(0);
        let id = if *n == 0 { base } else { format!("{}~{}", base, n) };
        *n += 1;
        id
    };

    let path = &parsed.file_path;
    let functions = parsed.functions.iter().map(|f| unique(function_id(path, &f.name))).collect();
    let classes = parsed
        .classes
        .iter()
        .map(|c| {
            let id = unique(class_id(path, &c.name));
            let methods = c
                .methods
                .iter()
                .map(|m| unique(function_id(path, &format!("{}.{}", c.name, m.name))))
                .collect();
            (id, methods)
        })
        .collect();
    FileIds { functions, classes }
}

/// `Type.method` names produced for receivers declared elsewhere
fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.rsplit_once('.') {
        Some((owner, simple)) => (Some(owner), simple),
        None => (None, name),
    }
}

#[derive(Debug, Clone)]
struct FunctionSymbol {
    id: String,
    file: String,
    class: Option<String>,
}

#[derive(Debug, Clone)]
struct ClassSymbol {
    id: String,
    file: String,
}

/// Name → declarations across the repository
#[derive(Debug, Default)]
struct SymbolTable {
    functions: HashMap<String, Vec<FunctionSymbol>>,
    classes: HashMap<String, Vec<ClassSymbol>>,
}

impl SymbolTable {
    fn add_parsed(&mut self, parsed: &ParsedFile) {
        let ids = assign_ids(parsed);
        let path = &parsed.file_path;
        for (function, id) in parsed.functions.iter().zip(ids.functions) {
            let (owner, simple) = split_qualified(&function.name);
            self.add_function(simple, id, path, owner.map(str::to_string));
        }
        for (class, (id, method_ids)) in parsed.classes.iter().zip(ids.classes) {
            self.add_class(&class.name, id, path);
            for (method, method_id) in class.methods.iter().zip(method_ids) {
                self.add_function(&method.name, method_id, path, Some(class.name.clone()));
            }
        }
    }

    fn add_node(&mut self, node: &GraphNode) {
        match &node.kind {
            NodeKind::Function { class_name, .. } => {
                self.add_function(&node.name, node.id.clone(), &node.file, class_name.clone())
            }
            NodeKind::Class { .. } => self.add_class(&node.name, node.id.clone(), &node.file),
            NodeKind::File { .. } => {}
        }
    }

    fn add_function(&mut self, name: &str, id: String, file: &str, class: Option<String>) {
        self.functions.entry(name.to_string()).or_default().push(FunctionSymbol {
            id,
            file: file.to_string(),
            class,
        });
    }

    fn add_class(&mut self, name: &str, id: String, file: &str) {
        self.classes.entry(name.to_string()).or_default().push(ClassSymbol {
            id,
            file: file.to_string(),
        });
    }

    /// Same file first, then a unique repository-wide match
    fn resolve_class(&self, reference: &str, from_file: &str) -> Option<&str> {
        let name = simple_type_name(reference);
        let candidates = self.classes.get(name)?;
        if let Some(local) = candidates.iter().find(|c| c.file == from_file) {
            return Some(local.id.as_str());
        }
        match candidates.as_slice() {
            [only] => Some(only.id.as_str()),
            _ => None,
        }
    }

    /// Same class, same file, imported files, then a unique repository-wide match
    fn resolve_call(
        &self,
        name: &str,
        from_file: &str,
        from_class: Option<&str>,
        imported: &HashSet<String>,
    ) -> Option<&str> {
        let candidates = self.functions.get(name)?;

        if let Some(class) = from_class {
            if let Some(sibling) = candidates
                .iter()
                .find(|c| c.file == from_file && c.class.as_deref() == Some(class))
            {
                return Some(sibling.id.as_str());
            }
        }

        let local: Vec<&FunctionSymbol> = candidates.iter().filter(|c| c.file == from_file).collect();
        if let Some(top_level) = local.iter().find(|c| c.class.is_none()) {
            return Some(top_level.id.as_str());
        }
        if let [only] = local.as_slice() {
            return Some(only.id.as_str());
        }

        let via_imports: Vec<&FunctionSymbol> = candidates.iter().filter(|c| imported.contains(&c.file)).collect();
        if let Some(id) = unique_preferring_top_level(&via_imports) {
            return Some(id);
        }
        if !via_imports.is_empty() {
            return None;
        }

        match candidates.as_slice() {
            [only] => Some(only.id.as_str()),
            _ => None,
        }
    }
}

fn unique_preferring_top_level<'a>(candidates: &[&'a FunctionSymbol]) -> Option<&'a str> {
    let top_level: Vec<&'a FunctionSymbol> = candidates.iter().copied().filter(|c| c.class.is_none()).collect();
    match (top_level.as_slice(), candidates) {
        ([only], _) | ([], [only]) => Some(only.id.as_str()),
        _ => None,
    }
}

/// `pkg.Base<T>` / `crate::model::Base` → `Base`
fn simple_type_name(reference: &str) -> &str {
    let without_generics = reference.split(['<', '[', '(']).next().unwrap_or(reference).trim();
    without_generics
        .rsplit(|c| c == '.' || c == ':')
        .next()
        .unwrap_or(without_generics)
}

/// Call sites in a function body as (callee name, 1-based line)
fn call_sites(function: &FunctionInfo, own_name: &str) -> Vec<(String, usize)> {
    let mut sites = Vec::new();
    let declaration_line = function.body.lines().position(|l| l.contains(own_name));
    for (idx, line) in function.body.lines().enumerate() {
        for cap in CALL_RE.captures_iter(line) {
            let name = &cap[1];
            if NOT_CALLS.contains(&name) {
                continue;
            }
            if name == own_name && Some(idx) == declaration_line {
                continue;
            }
            sites.push((name.to_string(), function.start_line + idx));
        }
    }
    sites
}

/// Builds per-file graphs against a repository-wide symbol table.
///
/// For a full build the table covers every parsed file. For an incremental
/// build it is seeded from the stored nodes of the untouched files, so ids of
/// those files are reused exactly as stored.
pub struct GraphAssembler {
    symbols: SymbolTable,
    files: FileIndex,
}

impl GraphAssembler {
    pub fn new(parsed: &[ParsedFile]) -> Self {
        Self::with_existing(&[], parsed)
    }

    /// `existing` must not contain nodes of files in `parsed` or of deleted files
    pub fn with_existing(existing: &[GraphNode], parsed: &[ParsedFile]) -> Self {
        let mut symbols = SymbolTable::default();
        let mut files = FileIndex::default();
        for node in existing {
            if node.is_file() {
                files.insert(node.file.clone());
            } else {
                symbols.add_node(node);
            }
        }
        for file in parsed {
            files.insert(file.file_path.clone());
            symbols.add_parsed(file);
        }
        debug!(
            "Symbol table: {} function names, {} class names over {} files",
            symbols.functions.len(),
            symbols.classes.len(),
            files.len()
        );
        Self { symbols, files }
    }

    pub fn assemble(&self, parsed: &[ParsedFile]) -> Vec<FileGraph> {
        parsed.iter().map(|p| self.assemble_file(p)).collect()
    }

    pub fn assemble_file(&self, parsed: &ParsedFile) -> FileGraph {
        let path = parsed.file_path.as_str();
        let ids = assign_ids(parsed);
        let this_file = file_id(path);
        let mut nodes = vec![GraphNode {
            id: this_file.clone(),
            name: path.to_string(),
            file: path.to_string(),
            start_line: None,
            end_line: None,
            kind: NodeKind::File {
                path: path.to_string(),
                language: parsed.language.clone(),
            },
            connection_count: 0,
        }];
        let mut links = Vec::new();

        for (function, id) in parsed.functions.iter().zip(&ids.functions) {
            let (owner, simple) = split_qualified(&function.name);
            nodes.push(function_node(id, path, simple, owner, function));
            links.push(GraphLink::new(&this_file, id, LinkType::Contains, path));
        }

        for (class, (id, method_ids)) in parsed.classes.iter().zip(&ids.classes) {
            nodes.push(class_node(id, path, class));
            links.push(GraphLink::new(&this_file, id, LinkType::Contains, path));
            for (method, method_id) in class.methods.iter().zip(method_ids) {
                nodes.push(function_node(method_id, path, &method.name, Some(&class.name), method));
                links.push(GraphLink::new(id, method_id, LinkType::HasMethod, path));
            }
            links.extend(self.inheritance_links(id, path, class));
        }

        let (import_links, imported) = self.import_links(parsed);
        links.extend(import_links);
        links.extend(self.call_links(parsed, &ids, &imported));

        FileGraph {
            file: path.to_string(),
            nodes,
            links,
        }
    }

    fn inheritance_links(&self, class_id: &str, path: &str, class: &ClassInfo) -> Vec<GraphLink> {
        let parents = class.extends.iter().map(|p| (p, LinkType::Extends));
        let interfaces = class.implements.iter().map(|i| (i, LinkType::Implements));
        parents
            .chain(interfaces)
            .filter_map(|(reference, link_type)| {
                let target = self.symbols.resolve_class(reference, path)?;
                (target != class_id).then(|| GraphLink::new(class_id, target, link_type, path))
            })
            .collect()
    }

    /// One IMPORTS link per target file, plus the set of imported files
    fn import_links(&self, parsed: &ParsedFile) -> (Vec<GraphLink>, HashSet<String>) {
        let path = parsed.file_path.as_str();
        let mut order: Vec<String> = Vec::new();
        let mut by_target: HashMap<String, (usize, Vec<String>)> = HashMap::new();

        for import in &parsed.imports {
            for target in self.files.resolve(path, &parsed.language, import) {
                let entry = by_target.entry(target.clone()).or_insert_with(|| {
                    order.push(target.clone());
                    (import.line, Vec::new())
                });
                for spec in &import.specifiers {
                    if !entry.1.contains(&spec.name) {
                        entry.1.push(spec.name.clone());
                    }
                }
            }
        }

        let links = order
            .iter()
            .filter_map(|target| {
                let (line, symbols) = by_target.remove(target)?;
                Some(GraphLink {
                    line: Some(line),
                    symbols: (!symbols.is_empty()).then_some(symbols),
                    ..GraphLink::new(file_id(path), file_id(target), LinkType::Imports, path)
                })
            })
            .collect();
        (links, order.into_iter().collect())
    }

    fn call_links(&self, parsed: &ParsedFile, ids: &FileIds, imported: &HashSet<String>) -> Vec<GraphLink> {
        let path = parsed.file_path.as_str();
        let top_level = parsed.functions.iter().zip(&ids.functions).map(|(f, id)| {
            let (owner, simple) = split_qualified(&f.name);
            (f, id, simple, owner)
        });
        let methods = parsed.classes.iter().zip(&ids.classes).flat_map(|(class, (_, method_ids))| {
            class
                .methods
                .iter()
                .zip(method_ids)
                .map(move |(m, id)| (m, id, m.name.as_str(), Some(class.name.as_str())))
        });

        let mut links = Vec::new();
        for (function, caller, simple, owner) in top_level.chain(methods) {
            let mut order: Vec<&str> = Vec::new();
            let mut counts: HashMap<&str, (u32, usize)> = HashMap::new();
            for (name, line) in call_sites(function, simple) {
                let Some(target) = self.symbols.resolve_call(&name, path, owner, imported) else {
                    continue;
                };
                counts
                    .entry(target)
                    .and_modify(|(weight, _)| *weight += 1)
                    .or_insert_with(|| {
                        order.push(target);
                        (1, line)
                    });
            }
            for target in order {
                let (weight, line) = counts[target];
                links.push(GraphLink {
                    weight: Some(weight),
                    line: Some(line),
                    ..GraphLink::new(caller.as_str(), target, LinkType::Calls, path)
                });
            }
        }
        links
    }
}

fn function_node(id: &str, path: &str, name: &str, class_name: Option<&str>, function: &FunctionInfo) -> GraphNode {
    GraphNode {
        id: id.to_string(),
        name: name.to_string(),
        file: path.to_string(),
        start_line: Some(function.start_line),
        end_line: Some(function.end_line.max(function.start_line)),
        kind: NodeKind::Function {
            params: function.params.clone(),
            return_type: function.return_type.clone(),
            is_async: function.is_async,
            is_exported: function.is_exported,
            class_name: class_name.map(str::to_string),
        },
        connection_count: 0,
    }
}

fn class_node(id: &str, path: &str, class: &ClassInfo) -> GraphNode {
    GraphNode {
        id: id.to_string(),
        name: class.name.clone(),
        file: path.to_string(),
        start_line: Some(class.start_line),
        end_line: Some(class.end_line.max(class.start_line)),
        kind: NodeKind::Class {
            extends_name: class.extends.clone(),
            property_count: class.properties.len(),
            method_count: class.methods.len(),
            is_exported: class.is_exported,
        },
        connection_count: 0,
    }
}
