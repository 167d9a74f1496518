// Structural symbol model and graph storage

pub mod schema;
pub mod db;

use serde::{Deserialize, Serialize};

/// Structural summary of one source file.
///
/// Produced fresh on every parse and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFile {
    pub file_path: String,
    pub language: String,
    pub functions: Vec<FunctionInfo>,
    pub classes: Vec<ClassInfo>,
    pub imports: Vec<ImportInfo>,
    pub exports: Vec<ExportInfo>,
}

impl ParsedFile {
    /// Empty but valid result, used when a parser has to give up on a file
    pub fn empty(file_path: &str, language: &str) -> Self {
        Self {
            file_path: file_path.to_string(),
            language: language.to_string(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
            && self.classes.is_empty()
            && self.imports.is_empty()
            && self.exports.is_empty()
    }

    /// Number of functions including class methods
    pub fn function_count(&self) -> usize {
        self.functions.len() + self.classes.iter().map(|c| c.methods.len()).sum::<usize>()
    }
}

/// A top-level function or a class method
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionInfo {
    pub name: String,
    pub params: String,
    pub return_type: Option<String>,
    pub body: String,
    pub start_line: usize,
    pub end_line: usize,
    pub is_exported: bool,
    pub is_async: bool,
}

impl FunctionInfo {
    /// Declaration line used when no body text was captured
    pub fn signature(&self) -> String {
        let prefix = if self.is_async { "async " } else { "" };
        match &self.return_type {
            Some(ret) => format!("{}{}({}): {}", prefix, self.name, self.params, ret),
            None => format!("{}{}({})", prefix, self.name, self.params),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub name: String,
    pub methods: Vec<FunctionInfo>,
    pub properties: Vec<PropertyInfo>,
    pub start_line: usize,
    pub end_line: usize,
    pub is_exported: bool,
    /// Single parent; multiple inheritance is not modelled
    pub extends: Option<String>,
    /// Interfaces, mixins and traits flattened into one list
    pub implements: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportInfo {
    pub source: String,
    pub specifiers: Vec<ImportSpecifier>,
    pub line: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSpecifier {
    /// Imported name, or "*" for wildcard imports
    pub name: String,
    pub alias: Option<String>,
    pub is_default: bool,
}

impl ImportSpecifier {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            is_default: false,
        }
    }

    pub fn default_import(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            is_default: true,
        }
    }

    pub fn wildcard(alias: Option<String>) -> Self {
        Self {
            name: "*".to_string(),
            alias,
            is_default: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportInfo {
    pub name: String,
    pub is_default: bool,
    pub line: usize,
}

/// Named, line-ranged code excerpt prepared for embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSnippet {
    pub name: String,
    pub code: String,
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
}

/// Parser contract implemented once per language.
///
/// `parse` must never fail: on any internal problem it returns an empty
/// `ParsedFile` for that path.
pub trait LanguageParser: Send + Sync {
    fn language(&self) -> &'static str;
    fn file_extensions(&self) -> &'static [&'static str];
    fn parse(&self, code: &str, file_path: &str) -> ParsedFile;
}
