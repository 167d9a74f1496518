// Source parsing, collection, snippet extraction and file watching

pub mod collector;
pub mod parser;
pub mod registry;
pub mod snippets;
pub mod watcher;

pub use collector::SourceCollector;
pub use registry::ParserRegistry;
pub use snippets::extract_snippets;
pub use watcher::RepoWatcher;
