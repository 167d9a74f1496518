// Extension → parser lookup

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::index::{LanguageParser, ParsedFile};
use crate::indexer::parser::{GoParser, JavaParser, PythonParser, RustParser, Strategy, TypeScriptParser};

/// JavaScript sources go through the TypeScript parser
const JAVASCRIPT_EXTENSIONS: &[&str] = &["js", "jsx", "mjs", "cjs"];

/// Static set of language parsers, looked up by lower-cased file extension
#[derive(Clone)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn LanguageParser>>,
}

impl ParserRegistry {
    /// Parsers using the native backend wherever its probe succeeded
    pub fn new() -> Self {
        Self {
            parsers: vec![
                Arc::new(JavaParser::new()),
                Arc::new(TypeScriptParser::new()),
                Arc::new(PythonParser::new()),
                Arc::new(GoParser::new()),
                Arc::new(RustParser::new()),
            ],
        }
    }

    /// Parsers locked to the line-based fallback
    pub fn regex_only() -> Self {
        Self {
            parsers: vec![
                Arc::new(JavaParser::with_strategy(Strategy::Regex)),
                Arc::new(TypeScriptParser::with_strategy(Strategy::Regex)),
                Arc::new(PythonParser::with_strategy(Strategy::Regex)),
                Arc::new(GoParser::with_strategy(Strategy::Regex)),
                Arc::new(RustParser::with_strategy(Strategy::Regex)),
            ],
        }
    }

    pub fn parser_for(&self, file_path: &str) -> Option<Arc<dyn LanguageParser>> {
        let ext = Path::new(file_path).extension()?.to_str()?.to_ascii_lowercase();
        if JAVASCRIPT_EXTENSIONS.contains(&ext.as_str()) {
            return self.by_language("typescript");
        }
        self.parsers
            .iter()
            .find(|p| p.file_extensions().contains(&ext.as_str()))
            .cloned()
    }

    fn by_language(&self, language: &str) -> Option<Arc<dyn LanguageParser>> {
        self.parsers.iter().find(|p| p.language() == language).cloned()
    }

    /// Parse with the matching parser; `None` when no parser claims the file
    pub fn parse(&self, file_path: &str, code: &str) -> Option<ParsedFile> {
        let Some(parser) = self.parser_for(file_path) else {
            debug!("No parser for {}", file_path);
            return None;
        };
        Some(parser.parse(code, file_path))
    }

    pub fn can_parse(&self, file_path: &str) -> bool {
        self.parser_for(file_path).is_some()
    }

    /// Every extension some parser accepts, JavaScript overrides included
    pub fn parseable_extensions(&self) -> Vec<&'static str> {
        let mut extensions: Vec<&'static str> = self
            .parsers
            .iter()
            .flat_map(|p| p.file_extensions().iter().copied())
            .chain(JAVASCRIPT_EXTENSIONS.iter().copied())
            .collect();
        extensions.sort_unstable();
        extensions.dedup();
        extensions
    }

    /// (language, extensions) pairs for display
    pub fn languages(&self) -> Vec<(&'static str, Vec<&'static str>)> {
        self.parsers
            .iter()
            .map(|p| {
                let mut extensions = p.file_extensions().to_vec();
                if p.language() == "typescript" {
                    extensions.extend_from_slice(JAVASCRIPT_EXTENSIONS);
                }
                (p.language(), extensions)
            })
            .collect()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_extension() {
        let registry = ParserRegistry::new();
        assert_eq!(registry.parser_for("src/Main.java").unwrap().language(), "java");
        assert_eq!(registry.parser_for("app/models.py").unwrap().language(), "python");
        assert_eq!(registry.parser_for("cmd/main.go").unwrap().language(), "go");
        assert_eq!(registry.parser_for("src/lib.rs").unwrap().language(), "rust");
        assert_eq!(registry.parser_for("web/App.TSX").unwrap().language(), "typescript");
        assert!(registry.parser_for("README.md").is_none());
        assert!(registry.parser_for("Makefile").is_none());
    }

    #[test]
    fn test_javascript_routes_to_typescript() {
        let registry = ParserRegistry::regex_only();
        for path in ["a.js", "b.jsx", "c.mjs", "d.cjs"] {
            assert_eq!(registry.parser_for(path).unwrap().language(), "typescript");
        }
        let parsed = registry.parse("lib/util.js", "export function add(a, b) {\n  return a + b;\n}\n").unwrap();
        assert_eq!(parsed.functions[0].name, "add");
        assert!(parsed.functions[0].is_exported);
    }

    #[test]
    fn test_parseable_extensions() {
        let extensions = ParserRegistry::new().parseable_extensions();
        for ext in ["java", "ts", "tsx", "js", "py", "go", "rs"] {
            assert!(extensions.contains(&ext), "missing {}", ext);
        }
        let mut sorted = extensions.clone();
        sorted.dedup();
        assert_eq!(sorted, extensions);
    }

    #[test]
    fn test_parse_unknown_file_is_none() {
        assert!(ParserRegistry::new().parse("notes.txt", "hello").is_none());
    }
}
