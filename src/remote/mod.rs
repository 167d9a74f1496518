// External collaborators reached over the network or a subprocess

pub mod embeddings;
pub mod source;

pub use embeddings::{Embedder, OllamaEmbedder};
pub use source::{is_remote_url, repo_id_for, Checkout, FetchRequest, GitSource, RepoSource};

/// Breaker names, one per external dependency
pub const VCS: &str = "vcs";
pub const EMBEDDINGS: &str = "embeddings";
pub const LLM: &str = "llm";
