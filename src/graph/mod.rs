// Knowledge graph: node and link model plus the overview/full views

pub mod assembler;
pub mod resolve;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use assembler::{file_id, FileGraph, GraphAssembler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkType {
    Contains,
    Calls,
    Imports,
    HasMethod,
    Extends,
    Implements,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Contains => "CONTAINS",
            LinkType::Calls => "CALLS",
            LinkType::Imports => "IMPORTS",
            LinkType::HasMethod => "HAS_METHOD",
            LinkType::Extends => "EXTENDS",
            LinkType::Implements => "IMPLEMENTS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CONTAINS" => Some(LinkType::Contains),
            "CALLS" => Some(LinkType::Calls),
            "IMPORTS" => Some(LinkType::Imports),
            "HAS_METHOD" => Some(LinkType::HasMethod),
            "EXTENDS" => Some(LinkType::Extends),
            "IMPLEMENTS" => Some(LinkType::Implements),
            _ => None,
        }
    }

    /// Link types that survive aggregation to file granularity
    fn crosses_files(&self) -> bool {
        matches!(self, LinkType::Calls | LinkType::Imports | LinkType::Extends | LinkType::Implements)
    }
}

/// Label-specific node attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "label")]
pub enum NodeKind {
    #[serde(rename_all = "camelCase")]
    File { path: String, language: String },
    #[serde(rename_all = "camelCase")]
    Function {
        params: String,
        return_type: Option<String>,
        is_async: bool,
        is_exported: bool,
        /// Owning class for methods
        class_name: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Class {
        extends_name: Option<String>,
        property_count: usize,
        method_count: usize,
        is_exported: bool,
    },
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::File { .. } => "File",
            NodeKind::Function { .. } => "Function",
            NodeKind::Class { .. } => "Class",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    /// Origin file; the file's own path for File nodes
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<usize>,
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Computed per view
    #[serde(default)]
    pub connection_count: usize,
}

impl GraphNode {
    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphLink {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub link_type: LinkType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<String>>,
    /// File whose parse produced this link
    #[serde(skip)]
    pub origin: String,
}

impl GraphLink {
    pub fn new(source: impl Into<String>, target: impl Into<String>, link_type: LinkType, origin: &str) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            link_type,
            weight: None,
            line: None,
            symbols: None,
            origin: origin.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphView {
    #[default]
    Overview,
    Full,
}

impl FromStr for GraphView {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "overview" => Ok(GraphView::Overview),
            "full" => Ok(GraphView::Full),
            other => Err(crate::error::Error::Validation(format!(
                "unknown graph view '{}', expected overview or full",
                other
            ))),
        }
    }
}

impl fmt::Display for GraphView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphView::Overview => write!(f, "overview"),
            GraphView::Full => write!(f, "full"),
        }
    }
}

/// Nodes and links as returned to clients
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
}

impl GraphData {
    pub fn view(nodes: Vec<GraphNode>, links: Vec<GraphLink>, view: GraphView) -> Self {
        match view {
            GraphView::Full => full_view(nodes, links),
            GraphView::Overview => overview(nodes, links),
        }
    }
}

/// All nodes; links whose endpoints are missing are hidden
pub fn full_view(nodes: Vec<GraphNode>, links: Vec<GraphLink>) -> GraphData {
    let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let links: Vec<GraphLink> = links
        .into_iter()
        .filter(|l| ids.contains(l.source.as_str()) && ids.contains(l.target.as_str()))
        .collect();
    with_connection_counts(nodes, links)
}

/// File nodes only, cross-file links aggregated per (source file, target file, type)
pub fn overview(nodes: Vec<GraphNode>, links: Vec<GraphLink>) -> GraphData {
    let owner: HashMap<&str, &str> = nodes.iter().map(|n| (n.id.as_str(), n.file.as_str())).collect();
    let file_ids: HashMap<&str, &str> = nodes
        .iter()
        .filter(|n| n.is_file())
        .map(|n| (n.file.as_str(), n.id.as_str()))
        .collect();

    let mut aggregated: BTreeMap<(String, String, LinkType), (u32, Option<usize>)> = BTreeMap::new();
    for link in links.iter().filter(|l| l.link_type.crosses_files()) {
        let (Some(src_file), Some(dst_file)) = (owner.get(link.source.as_str()), owner.get(link.target.as_str())) else {
            continue;
        };
        if src_file == dst_file {
            continue;
        }
        let (Some(src), Some(dst)) = (file_ids.get(src_file), file_ids.get(dst_file)) else {
            continue;
        };
        let entry = aggregated
            .entry((src.to_string(), dst.to_string(), link.link_type))
            .or_insert((0, None));
        entry.0 += link.weight.unwrap_or(1);
        if entry.1.is_none() {
            entry.1 = link.line;
        }
    }

    let links = aggregated
        .into_iter()
        .map(|((source, target, link_type), (weight, _))| GraphLink {
            source,
            target,
            link_type,
            weight: Some(weight),
            line: None,
            symbols: None,
            origin: String::new(),
        })
        .collect();
    let nodes = nodes.into_iter().filter(|n| n.is_file()).collect();
    with_connection_counts(nodes, links)
}

fn with_connection_counts(mut nodes: Vec<GraphNode>, links: Vec<GraphLink>) -> GraphData {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for link in &links {
        *counts.entry(link.source.as_str()).or_default() += 1;
        *counts.entry(link.target.as_str()).or_default() += 1;
    }
    for node in nodes.iter_mut() {
        node.connection_count = counts.get(node.id.as_str()).copied().unwrap_or(0);
    }
    GraphData { nodes, links }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str) -> GraphNode {
        GraphNode {
            id: format!("file:{}", path),
            name: path.to_string(),
            file: path.to_string(),
            start_line: None,
            end_line: None,
            kind: NodeKind::File { path: path.to_string(), language: "typescript".into() },
            connection_count: 0,
        }
    }

    fn function(path: &str, name: &str) -> GraphNode {
        GraphNode {
            id: format!("fn:{}#{}", path, name),
            name: name.to_string(),
            file: path.to_string(),
            start_line: Some(1),
            end_line: Some(2),
            kind: NodeKind::Function {
                params: String::new(),
                return_type: None,
                is_async: false,
                is_exported: true,
                class_name: None,
            },
            connection_count: 0,
        }
    }

    fn calls(source: &str, target: &str, weight: u32) -> GraphLink {
        GraphLink { weight: Some(weight), ..GraphLink::new(source, target, LinkType::Calls, "") }
    }

    fn sample() -> (Vec<GraphNode>, Vec<GraphLink>) {
        let nodes = vec![file("a.ts"), file("b.ts"), function("a.ts", "f"), function("a.ts", "g"), function("b.ts", "h")];
        let links = vec![
            GraphLink::new("file:a.ts", "fn:a.ts#f", LinkType::Contains, "a.ts"),
            GraphLink::new("file:a.ts", "fn:a.ts#g", LinkType::Contains, "a.ts"),
            GraphLink::new("file:b.ts", "fn:b.ts#h", LinkType::Contains, "b.ts"),
            calls("fn:a.ts#f", "fn:b.ts#h", 2),
            calls("fn:a.ts#g", "fn:b.ts#h", 1),
            calls("fn:a.ts#f", "fn:a.ts#g", 1),
            calls("fn:a.ts#f", "fn:gone.ts#x", 1),
        ];
        (nodes, links)
    }

    #[test]
    fn test_full_view_hides_dangling_links() {
        let (nodes, links) = sample();
        let data = full_view(nodes, links);
        assert_eq!(data.nodes.len(), 5);
        assert_eq!(data.links.len(), 6);
        let f = data.nodes.iter().find(|n| n.id == "fn:a.ts#f").unwrap();
        assert_eq!(f.connection_count, 3);
    }

    #[test]
    fn test_overview_aggregates_to_files() {
        let (nodes, links) = sample();
        let data = overview(nodes, links);
        assert_eq!(data.nodes.len(), 2);
        assert_eq!(data.links.len(), 1);
        let link = &data.links[0];
        assert_eq!((link.source.as_str(), link.target.as_str()), ("file:a.ts", "file:b.ts"));
        assert_eq!(link.link_type, LinkType::Calls);
        assert_eq!(link.weight, Some(3));
        assert!(data.nodes.iter().all(|n| n.connection_count == 1));
    }

    #[test]
    fn test_node_json_shape() {
        let json = serde_json::to_value(function("a.ts", "f")).unwrap();
        assert_eq!(json["label"], "Function");
        assert_eq!(json["id"], "fn:a.ts#f");
        assert_eq!(json["isAsync"], false);
        assert_eq!(json["connectionCount"], 0);

        let link = serde_json::to_value(calls("x", "y", 4)).unwrap();
        assert_eq!(link["type"], "CALLS");
        assert_eq!(link["weight"], 4);
        assert!(link.get("origin").is_none());
        assert!(link.get("symbols").is_none());
    }

    #[test]
    fn test_graph_view_parsing() {
        assert_eq!("full".parse::<GraphView>().unwrap(), GraphView::Full);
        assert_eq!("Overview".parse::<GraphView>().unwrap(), GraphView::Overview);
        assert!("tree".parse::<GraphView>().is_err());
    }

    #[test]
    fn test_link_type_round_trip_names() {
        for t in [LinkType::Contains, LinkType::Calls, LinkType::Imports, LinkType::HasMethod, LinkType::Extends, LinkType::Implements] {
            assert_eq!(LinkType::parse(t.as_str()), Some(t));
        }
    }
}
