// Small helpers shared by the tree-sitter extractors

use tree_sitter::Node;

pub(crate) fn node_text<'a>(node: Node, content: &'a str) -> &'a str {
    node.utf8_text(content.as_bytes()).unwrap_or("")
}

pub(crate) fn field_text(node: Node, field: &str, content: &str) -> Option<String> {
    node.child_by_field_name(field)
        .map(|n| node_text(n, content).to_string())
        .filter(|s| !s.is_empty())
}

/// 1-based first line of a node
pub(crate) fn start_line(node: Node) -> usize {
    node.start_position().row + 1
}

/// 1-based last line of a node
pub(crate) fn end_line(node: Node) -> usize {
    let end = node.end_position();
    // A node ending at column 0 finished on the previous line
    let row = if end.column == 0 && end.row > node.start_position().row {
        end.row - 1
    } else {
        end.row
    };
    row + 1
}

/// Parameter list text without the surrounding parentheses
pub(crate) fn params_text(node: Option<Node>, content: &str) -> String {
    node.map(|n| {
        let text = node_text(n, content).trim();
        let text = text.strip_prefix('(').unwrap_or(text);
        let text = text.strip_suffix(')').unwrap_or(text);
        clean_params(text)
    })
    .unwrap_or_default()
}

/// Any direct child (named or anonymous) has the given kind
pub(crate) fn has_child_kind(node: Node, kind: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| c.kind() == kind);
    found
}

/// First direct child with the given kind
pub(crate) fn child_of_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).find(|c| c.kind() == kind);
    found
}

pub(crate) fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    let children = node.named_children(&mut cursor).collect();
    children
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapsed parameter text without a trailing comma
pub(crate) fn clean_params(text: &str) -> String {
    collapse_whitespace(text).trim_end_matches(',').trim().to_string()
}
