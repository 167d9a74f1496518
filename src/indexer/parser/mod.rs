// Language parsers: tree-sitter first, line-based regex fallback

mod ast;
pub mod go;
pub mod java;
pub mod python;
pub mod rust;
pub mod typescript;

use std::panic::{catch_unwind, AssertUnwindSafe};

use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};
use tree_sitter::{Language, Parser as TreeParser, Tree};

use crate::error::{Error, Result};
use crate::index::ParsedFile;

pub use go::GoParser;
pub use java::JavaParser;
pub use python::PythonParser;
pub use rust::RustParser;
pub use typescript::TypeScriptParser;

/// Maximum number of lines the block scanners look past a declaration header
pub const MAX_BLOCK_SCAN: usize = 100;

/// Extraction strategy a parser instance is locked into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// tree-sitter AST, falling back to regex per file on failure
    Native,
    /// line-based regex extraction only
    Regex,
}

impl Strategy {
    /// Native when the grammar's backend passed its one-time probe
    pub fn detect(grammar: Grammar) -> Self {
        if native_available(grammar) {
            Strategy::Native
        } else {
            Strategy::Regex
        }
    }
}

/// tree-sitter grammars linked into the binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grammar {
    Java,
    TypeScript,
    Tsx,
    Python,
    Go,
    Rust,
}

static JAVA_PROBE: OnceCell<bool> = OnceCell::new();
static TYPESCRIPT_PROBE: OnceCell<bool> = OnceCell::new();
static TSX_PROBE: OnceCell<bool> = OnceCell::new();
static PYTHON_PROBE: OnceCell<bool> = OnceCell::new();
static GO_PROBE: OnceCell<bool> = OnceCell::new();
static RUST_PROBE: OnceCell<bool> = OnceCell::new();

impl Grammar {
    fn language(self) -> Language {
        match self {
            Grammar::Java => tree_sitter_java::LANGUAGE.into(),
            Grammar::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Grammar::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Grammar::Python => tree_sitter_python::LANGUAGE.into(),
            Grammar::Go => tree_sitter_go::LANGUAGE.into(),
            Grammar::Rust => tree_sitter_rust::LANGUAGE.into(),
        }
    }

    fn probe_cell(self) -> &'static OnceCell<bool> {
        match self {
            Grammar::Java => &JAVA_PROBE,
            Grammar::TypeScript => &TYPESCRIPT_PROBE,
            Grammar::Tsx => &TSX_PROBE,
            Grammar::Python => &PYTHON_PROBE,
            Grammar::Go => &GO_PROBE,
            Grammar::Rust => &RUST_PROBE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Grammar::Java => "java",
            Grammar::TypeScript => "typescript",
            Grammar::Tsx => "tsx",
            Grammar::Python => "python",
            Grammar::Go => "go",
            Grammar::Rust => "rust",
        }
    }
}

/// Whether the tree-sitter backend for `grammar` can be loaded.
///
/// Probed once per process; every later call returns the cached answer.
pub fn native_available(grammar: Grammar) -> bool {
    *grammar.probe_cell().get_or_init(|| {
        let mut parser = TreeParser::new();
        match parser.set_language(&grammar.language()) {
            Ok(()) => {
                info!("Native {} parser available", grammar.name());
                true
            }
            Err(e) => {
                warn!("Native {} parser unavailable, using regex fallback: {}", grammar.name(), e);
                false
            }
        }
    })
}

/// Parse `content` into a tree. Trees containing syntax errors are rejected so
/// the caller drops to the regex strategy.
pub(crate) fn parse_tree(grammar: Grammar, content: &str, file_path: &str) -> Result<Tree> {
    let mut parser = TreeParser::new();
    parser.set_language(&grammar.language()).map_err(|e| Error::Parse {
        file: file_path.to_string(),
        message: e.to_string(),
    })?;

    let tree = parser.parse(content, None).ok_or_else(|| Error::Parse {
        file: file_path.to_string(),
        message: format!("{} parser returned no tree", grammar.name()),
    })?;

    if tree.root_node().has_error() {
        return Err(Error::Parse {
            file: file_path.to_string(),
            message: "syntax errors in tree".to_string(),
        });
    }

    Ok(tree)
}

/// Run the native extractor (when the strategy allows) and fall back to the
/// regex extractor. Never fails: panics and errors end in an empty file.
pub(crate) fn parse_with_fallback<N, R>(
    language: &'static str,
    file_path: &str,
    strategy: Strategy,
    native: N,
    regex: R,
) -> ParsedFile
where
    N: FnOnce() -> Result<ParsedFile>,
    R: FnOnce() -> ParsedFile,
{
    if strategy == Strategy::Native {
        match catch_unwind(AssertUnwindSafe(native)) {
            Ok(Ok(parsed)) => return parsed,
            Ok(Err(e)) => debug!("Native parse failed, using regex fallback: {}", e),
            Err(_) => warn!("Native {} parser panicked on {}", language, file_path),
        }
    }

    match catch_unwind(AssertUnwindSafe(regex)) {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!("Regex {} parser panicked on {}, returning empty result", language, file_path);
            ParsedFile::empty(file_path, language)
        }
    }
}

/// Locate the logical end of a brace-delimited declaration.
///
/// Counts `{` and `}` from `start_idx` and returns the first line where the
/// depth drops back to zero after having gone positive. Gives up after
/// `MAX_BLOCK_SCAN` lines and returns that cap (clamped to the last line).
pub fn find_block_end(lines: &[&str], start_idx: usize) -> usize {
    let cap = start_idx + MAX_BLOCK_SCAN;
    if lines.is_empty() {
        return start_idx;
    }
    let last = lines.len() - 1;

    let mut depth: i64 = 0;
    let mut opened = false;
    for (idx, line) in lines.iter().enumerate().skip(start_idx).take(MAX_BLOCK_SCAN + 1) {
        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
            if opened && depth <= 0 {
                return idx;
            }
        }
    }

    cap.min(last).max(start_idx)
}

/// Indentation-delimited counterpart of `find_block_end`: the last line that
/// is indented deeper than the header (blank lines do not end the block).
pub fn find_indent_block_end(lines: &[&str], start_idx: usize) -> usize {
    let Some(header) = lines.get(start_idx) else {
        return start_idx;
    };
    let base = indent_of(header);
    let cap = start_idx + MAX_BLOCK_SCAN;

    let mut end = start_idx;
    for (idx, line) in lines.iter().enumerate().skip(start_idx + 1) {
        if idx > cap {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        if indent_of(line) <= base {
            break;
        }
        end = idx;
    }
    end
}

pub(crate) fn indent_of(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// Brace depth at the start of every line (plain character count)
pub(crate) fn line_depths(lines: &[&str]) -> Vec<i64> {
    let mut depths = Vec::with_capacity(lines.len());
    let mut depth: i64 = 0;
    for line in lines {
        depths.push(depth);
        for ch in line.chars() {
            match ch {
                '{' => depth += 1,
                '}' => depth = (depth - 1).max(0),
                _ => {}
            }
        }
    }
    depths
}

/// Source text of lines `start..=end`, clamped to the file
pub(crate) fn slice_lines(lines: &[&str], start: usize, end: usize) -> String {
    if lines.is_empty() || start >= lines.len() {
        return String::new();
    }
    let end = end.min(lines.len() - 1).max(start);
    lines[start..=end].join("\n")
}

/// A statement found directly inside a brace-delimited body
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Member {
    /// Index of the line the statement starts on
    pub line: usize,
    pub text: String,
    /// Statement was terminated by `{` (a declaration with a body)
    pub opens_block: bool,
}

/// Split the body of the block opened on `header_idx` into member
/// statements at depth one. Statements end at `;`, `{` or `}`; with
/// `newline_terminates` a line break also ends a statement.
pub(crate) fn body_members(
    lines: &[&str],
    header_idx: usize,
    end_idx: usize,
    newline_terminates: bool,
) -> Vec<Member> {
    let mut members = Vec::new();
    let mut depth: i64 = 0;
    let mut current = String::new();
    let mut current_line: Option<usize> = None;

    let end_idx = end_idx.min(lines.len().saturating_sub(1));
    for idx in header_idx..=end_idx {
        let Some(line) = lines.get(idx) else { break };
        for ch in line.chars() {
            match ch {
                '{' => {
                    if depth == 1 {
                        flush_member(&mut members, &mut current, &mut current_line, true);
                    }
                    depth += 1;
                }
                '}' => {
                    depth -= 1;
                    if depth == 1 {
                        current.clear();
                        current_line = None;
                    }
                    if depth == 0 {
                        flush_member(&mut members, &mut current, &mut current_line, false);
                        return members;
                    }
                }
                ';' if depth == 1 => flush_member(&mut members, &mut current, &mut current_line, false),
                _ if depth == 1 => {
                    if current_line.is_none() && !ch.is_whitespace() {
                        current_line = Some(idx);
                    }
                    current.push(ch);
                }
                _ => {}
            }
        }
        if depth == 1 {
            if newline_terminates {
                flush_member(&mut members, &mut current, &mut current_line, false);
            } else {
                current.push(' ');
            }
        }
    }

    members
}

fn flush_member(
    members: &mut Vec<Member>,
    current: &mut String,
    current_line: &mut Option<usize>,
    opens_block: bool,
) {
    let text = current.trim();
    if let Some(line) = current_line.take() {
        if !text.is_empty() {
            members.push(Member {
                line,
                text: text.to_string(),
                opens_block,
            });
        }
    }
    current.clear();
}

/// Remove `<...>` generic argument lists, including nested ones
pub(crate) fn strip_generics(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for ch in text.chars() {
        match ch {
            '<' => depth += 1,
            '>' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Split a comma separated type list, dropping empties and generics
pub(crate) fn split_type_list(text: &str) -> Vec<String> {
    strip_generics(text)
        .split(',')
        .map(|s| s.trim().trim_end_matches('{').trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Last segment of an import path with any file extension removed
pub(crate) fn last_path_segment(source: &str, separators: &[char]) -> String {
    let trimmed = source.trim_end_matches(|c| separators.contains(&c));
    let segment = trimmed.rsplit(|c| separators.contains(&c)).next().unwrap_or(trimmed);
    match segment.rfind('.') {
        Some(dot) if dot > 0 && !separators.contains(&'.') => segment[..dot].to_string(),
        _ => segment.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_find_block_end_single_line() {
        let lines = vec!["class Foo { void bar() {} }"];
        assert_eq!(find_block_end(&lines, 0), 0);
    }

    #[test]
    fn test_find_block_end_nested() {
        let lines = vec![
            "public class A {",
            "  void f() {",
            "    if (x) { y(); }",
            "  }",
            "}",
            "class B {}",
        ];
        assert_eq!(find_block_end(&lines, 0), 4);
        assert_eq!(find_block_end(&lines, 1), 3);
        assert_eq!(find_block_end(&lines, 5), 5);
    }

    #[test]
    fn test_find_block_end_waits_for_opening_brace() {
        let lines = vec!["void f(int a,", "       int b)", "{", "}"];
        assert_eq!(find_block_end(&lines, 0), 3);
    }

    #[test]
    fn test_find_block_end_unbalanced_is_capped() {
        let mut lines = vec!["class Broken {"];
        lines.extend(std::iter::repeat("  int x;").take(300));
        assert_eq!(find_block_end(&lines, 0), MAX_BLOCK_SCAN);
        assert_eq!(find_block_end(&lines, 10), 10 + MAX_BLOCK_SCAN);
    }

    #[test]
    fn test_find_block_end_clamped_to_file() {
        let lines = vec!["fn open() {", "  loop {"];
        assert_eq!(find_block_end(&lines, 0), 1);
        assert_eq!(find_block_end(&[], 0), 0);
    }

    #[test]
    fn test_find_indent_block_end() {
        let lines = vec![
            "class A:",
            "    def f(self):",
            "        return 1",
            "",
            "    x = 2",
            "def g():",
            "    pass",
        ];
        assert_eq!(find_indent_block_end(&lines, 0), 4);
        assert_eq!(find_indent_block_end(&lines, 1), 2);
        assert_eq!(find_indent_block_end(&lines, 5), 6);
    }

    #[test]
    fn test_body_members_single_line_class() {
        let lines = vec!["class Foo { int x; void bar() {} }"];
        let members = body_members(&lines, 0, 0, false);
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].text, "int x");
        assert!(!members[0].opens_block);
        assert_eq!(members[1].text, "void bar()");
        assert!(members[1].opens_block);
    }

    #[test]
    fn test_body_members_skips_nested_bodies() {
        let lines = vec![
            "class A {",
            "  private int count;",
            "  public void run() {",
            "    int local = 1;",
            "  }",
            "}",
        ];
        let members = body_members(&lines, 0, 5, false);
        let texts: Vec<_> = members.iter().map(|m| (m.line, m.text.as_str())).collect();
        assert_eq!(texts, vec![(1, "private int count"), (2, "public void run()")]);
    }

    #[test]
    fn test_strip_generics_and_type_lists() {
        assert_eq!(strip_generics("Map<String, List<Integer>> x"), "Map x");
        assert_eq!(split_type_list("Comparable<T>, Serializable"), vec!["Comparable", "Serializable"]);
    }

    #[test]
    fn test_last_path_segment() {
        assert_eq!(last_path_segment("./utils/format.js", &['/']), "format");
        assert_eq!(last_path_segment("package:app/models/user.dart", &['/']), "user");
        assert_eq!(last_path_segment("com.acme.Widget", &['.']), "Widget");
        assert_eq!(last_path_segment("github.com/acme/kit/", &['/']), "kit");
    }

    proptest! {
        #[test]
        fn prop_block_end_within_cap(lines in proptest::collection::vec("[{}a ]{0,12}", 0..250), start in 0usize..250) {
            let refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
            let start = if refs.is_empty() { 0 } else { start % refs.len() };
            let end = find_block_end(&refs, start);
            prop_assert!(end >= start);
            prop_assert!(end <= start + MAX_BLOCK_SCAN);
        }
    }
}
