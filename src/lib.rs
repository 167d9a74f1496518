//! Repository indexing engine.
//!
//! Parses source trees into structural summaries, assembles them into a
//! per-repository knowledge graph stored in SQLite, and runs indexing and
//! review work as cancellable jobs behind retry and circuit breaking.

pub mod config;
pub mod error;
pub mod frameworks;
pub mod graph;
pub mod index;
pub mod indexer;
pub mod jobs;
pub mod remote;
pub mod resilience;
pub mod server;

pub use error::{Error, Result};
