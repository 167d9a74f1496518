// Index pipeline: fetch, collect, parse, assemble, store, embed

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{join_error, with_db, JobHandle, Phase, Services};
use crate::error::{Error, Result};
use crate::frameworks::{self, Framework};
use crate::graph::GraphAssembler;
use crate::index::db::{GraphDatabase, RepoInfo};
use crate::index::ParsedFile;
use crate::indexer::collector::SourceCollector;
use crate::indexer::registry::ParserRegistry;
use crate::indexer::snippets::extract_snippets;
use crate::remote::{self, repo_id_for, Checkout, Embedder, FetchRequest};
use crate::resilience::guarded;

// progress milestones
const FETCHED: u8 = 10;
const COLLECTED: u8 = 20;
const PARSED: u8 = 70;
const STORED: u8 = 80;
const EMBEDDED: u8 = 99;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum IndexMode {
    Full,
    #[serde(rename_all = "camelCase")]
    Incremental { changed_files: Vec<String> },
    /// Discard everything stored for the repository, then index it fully
    Force,
}

#[derive(Debug, Clone)]
pub struct IndexRequest {
    pub fetch: FetchRequest,
    pub framework: Option<String>,
    pub mode: IndexMode,
}

impl IndexRequest {
    pub fn new(repo_url: impl Into<String>, mode: IndexMode) -> Self {
        Self {
            fetch: FetchRequest {
                repo_url: repo_url.into(),
                ..Default::default()
            },
            framework: None,
            mode,
        }
    }

    pub fn repo_id(&self) -> String {
        repo_id_for(&self.fetch.repo_url)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch.repo_url.trim().is_empty() {
            return Err(Error::Validation("repoUrl is required".to_string()));
        }
        if let Some(id) = &self.framework {
            if frameworks::find(id).is_none() {
                return Err(Error::Validation(format!("unknown framework '{}'", id)));
            }
        }
        if let IndexMode::Incremental { changed_files } = &self.mode {
            for file in changed_files {
                let path = normalize_changed(file);
                if path.starts_with('/') || path.split('/').any(|part| part == "..") {
                    return Err(Error::Validation(format!(
                        "changed file '{}' must be relative to the repository root",
                        file
                    )));
                }
            }
        }
        Ok(())
    }
}

/// What a finished index job left in storage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexOutcome {
    pub repo_id: String,
    pub files_parsed: usize,
    pub files_removed: usize,
    pub nodes: usize,
    pub links: usize,
    pub snippets: usize,
    pub embedded: usize,
}

/// Which files to parse and which to drop
#[derive(Debug, Default)]
struct Plan {
    to_parse: Vec<String>,
    removed: Vec<String>,
    incremental: bool,
}

impl Plan {
    fn full(files: Vec<String>) -> Self {
        Self {
            to_parse: files,
            ..Default::default()
        }
    }

    fn is_noop(&self) -> bool {
        self.incremental && self.to_parse.is_empty() && self.removed.is_empty()
    }
}

fn normalize_changed(path: &str) -> String {
    let path = path.trim().replace('\\', "/");
    path.trim_start_matches("./").to_string()
}

pub async fn run(services: &Services, job: &JobHandle, request: &IndexRequest) -> Result<IndexOutcome> {
    let repo_id = request.repo_id();
    info!("Indexing {} ({:?}) as {}", request.fetch.repo_url, request.mode, repo_id);

    job.enter(Phase::Fetching)?;
    let checkout = fetch(services, job, &request.fetch).await?;
    job.progress(FETCHED, |_| {});

    job.enter(Phase::BuildingContext)?;
    let framework = match request.framework.as_deref() {
        Some(id) => frameworks::find(id),
        None => frameworks::detect(&checkout.root),
    };
    let collector = collector_for(services, framework);
    let root = checkout.root.clone();
    let files = tokio::task::spawn_blocking(move || collector.collect(&root))
        .await
        .map_err(join_error)??;

    let lookup = repo_id.clone();
    let previous = with_db(&services.db, move |db| db.get_repo(&lookup)).await?;
    let plan = plan(&request.mode, previous.is_some(), files);
    if plan.is_noop() {
        info!("No changed files for {}, nothing to do", repo_id);
        let lookup = repo_id.clone();
        let (nodes, links, snippets) = with_db(&services.db, move |db| db.repo_counts(&lookup)).await?;
        return Ok(IndexOutcome {
            repo_id,
            nodes,
            links,
            snippets,
            ..Default::default()
        });
    }
    let total = plan.to_parse.len();
    job.progress(COLLECTED, |s| s.total_files = total);

    job.enter(Phase::Indexing)?;
    let parsed = parse_files(services, job, &checkout.root, &plan.to_parse).await?;
    job.checkpoint()?;

    let store_repo = repo_id.clone();
    let force = request.mode == IndexMode::Force;
    let files_parsed = parsed.len();
    let files_removed = plan.removed.len();
    with_db(&services.db, move |db| store(db, &store_repo, &plan, force, &parsed)).await?;
    job.progress(STORED, |_| {});

    let embedded = match &services.embedder {
        Some(embedder) => embed_pending(services, job, embedder.as_ref(), &repo_id).await?,
        None => 0,
    };

    let info = RepoInfo {
        repo_id: repo_id.clone(),
        repo_url: request.fetch.repo_url.clone(),
        branch: request.fetch.branch.clone(),
        framework: framework.map(|f| f.id.to_string()),
        last_job_id: Some(job.id().to_string()),
        ..Default::default()
    };
    let info = with_db(&services.db, move |db| {
        let info = repo_info(db, info, previous)?;
        db.upsert_repo(&info)?;
        Ok(info)
    })
    .await?;
    info!(
        "Indexed {}: {} files, {} nodes, {} links, {} snippets",
        repo_id, info.file_count, info.node_count, info.link_count, info.snippet_count
    );

    Ok(IndexOutcome {
        repo_id,
        files_parsed,
        files_removed,
        nodes: info.node_count,
        links: info.link_count,
        snippets: info.snippet_count,
        embedded,
    })
}

async fn fetch(services: &Services, job: &JobHandle, request: &FetchRequest) -> Result<Checkout> {
    let breaker = services.breakers.get(remote::VCS);
    let token = job.token();
    tokio::select! {
        checkout = guarded(&breaker, &services.retry, || services.source.fetch(request)) => checkout,
        _ = token.cancelled() => Err(Error::Cancelled),
    }
}

fn collector_for(services: &Services, framework: Option<&Framework>) -> SourceCollector {
    let mut exclude = services.indexing.exclude.clone();
    if let Some(framework) = framework {
        exclude.extend(framework.exclude.iter().map(|p| p.to_string()));
    }
    SourceCollector::new(services.parsers.parseable_extensions())
        .with_excludes(exclude)
        .with_max_file_size(services.indexing.max_file_size)
}

/// Incremental requests for a repository that was never indexed run as full builds
fn plan(mode: &IndexMode, indexed_before: bool, files: Vec<String>) -> Plan {
    let changed_files = match mode {
        IndexMode::Incremental { changed_files } if indexed_before => changed_files,
        IndexMode::Incremental { .. } => {
            info!("No previous index, running a full build");
            return Plan::full(files);
        }
        IndexMode::Full | IndexMode::Force => return Plan::full(files),
    };

    let present: HashSet<&str> = files.iter().map(String::as_str).collect();
    let changed: BTreeSet<String> = changed_files.iter().map(|f| normalize_changed(f)).collect();
    let mut plan = Plan {
        incremental: true,
        ..Default::default()
    };
    for file in changed {
        if present.contains(file.as_str()) {
            plan.to_parse.push(file);
        } else {
            plan.removed.push(file);
        }
    }
    debug!("Incremental plan: {} to parse, {} removed", plan.to_parse.len(), plan.removed.len());
    plan
}

async fn parse_files(services: &Services, job: &JobHandle, root: &Path, paths: &[String]) -> Result<Vec<ParsedFile>> {
    let total = paths.len().max(1);
    let mut results = stream::iter(paths.iter().cloned().map(|path| {
        let parsers = services.parsers.clone();
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || parse_one(&parsers, &root, &path))
    }))
    .buffered(services.indexing.workers.max(1));

    let mut parsed = Vec::with_capacity(paths.len());
    let mut processed = 0;
    while let Some(result) = results.next().await {
        job.checkpoint()?;
        processed += 1;
        let percentage = COLLECTED + ((PARSED - COLLECTED) as usize * processed / total) as u8;
        match result {
            Ok(Some(file)) => {
                let functions = file.function_count();
                parsed.push(file);
                job.progress(percentage, |s| {
                    s.files_processed = processed;
                    s.functions_indexed += functions;
                });
            }
            Ok(None) => job.progress(percentage, |s| s.files_processed = processed),
            Err(e) => warn!("Parse task failed: {}", e),
        }
    }
    Ok(parsed)
}

fn parse_one(parsers: &ParserRegistry, root: &Path, path: &str) -> Option<ParsedFile> {
    let bytes = match std::fs::read(root.join(path)) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!("Skipping {}: {}", path, e);
            return None;
        }
    };
    parsers.parse(path, &String::from_utf8_lossy(&bytes))
}

fn store(db: &GraphDatabase, repo_id: &str, plan: &Plan, force: bool, parsed: &[ParsedFile]) -> Result<()> {
    let snippets = extract_snippets(parsed);

    if !plan.incremental {
        if force {
            db.delete_repo(repo_id)?;
        }
        let graphs = GraphAssembler::new(parsed).assemble(parsed);
        db.replace_graph(repo_id, &graphs)?;
        db.replace_snippets(repo_id, &snippets)?;
        return Ok(());
    }

    let touched: Vec<String> = parsed
        .iter()
        .map(|p| p.file_path.clone())
        .chain(plan.removed.iter().cloned())
        .collect();
    let touched_set: HashSet<&str> = touched.iter().map(String::as_str).collect();
    let existing: Vec<_> = db
        .load_nodes(repo_id)?
        .into_iter()
        .filter(|n| !touched_set.contains(n.file.as_str()))
        .collect();

    let graphs = GraphAssembler::with_existing(&existing, parsed).assemble(parsed);
    db.merge_files(repo_id, &graphs, &plan.removed)?;
    db.merge_snippets(repo_id, &touched, &snippets)?;
    Ok(())
}

async fn embed_pending(services: &Services, job: &JobHandle, embedder: &dyn Embedder, repo_id: &str) -> Result<usize> {
    let breaker = services.breakers.get(remote::EMBEDDINGS);
    let batch_size = services.indexing.embed_batch_size.max(1);
    let lookup = repo_id.to_string();
    let (_, _, total) = with_db(&services.db, move |db| db.repo_counts(&lookup)).await?;
    let mut embedded = 0;

    loop {
        job.checkpoint()?;
        let lookup = repo_id.to_string();
        let pending = with_db(&services.db, move |db| db.snippets_without_embedding(&lookup, batch_size)).await?;
        if pending.is_empty() {
            break;
        }
        let texts: Vec<String> = pending.iter().map(|s| s.snippet.code.clone()).collect();
        let vectors = guarded(&breaker, &services.retry, || embedder.embed_batch(&texts)).await?;
        if vectors.len() != pending.len() {
            return Err(Error::network(
                remote::EMBEDDINGS,
                format!("expected {} vectors from {}, got {}", pending.len(), embedder.name(), vectors.len()),
            ));
        }
        let count = pending.len();
        let ids: Vec<i64> = pending.iter().map(|s| s.id).collect();
        with_db(&services.db, move |db| {
            for (id, vector) in ids.into_iter().zip(&vectors) {
                db.store_embedding(id, vector)?;
            }
            Ok(())
        })
        .await?;
        embedded += count;
        let percentage = STORED + ((EMBEDDED - STORED) as usize * embedded / total.max(1)).min(19) as u8;
        job.progress(percentage, |_| {});
    }

    debug!("Embedded {} snippets for {}", embedded, repo_id);
    Ok(embedded)
}

/// Fill in the stored counts of `info`; branch and framework fall back to the previous run
fn repo_info(db: &GraphDatabase, info: RepoInfo, previous: Option<RepoInfo>) -> Result<RepoInfo> {
    let previous = previous.unwrap_or_default();
    let (node_count, link_count, snippet_count) = db.repo_counts(&info.repo_id)?;

    Ok(RepoInfo {
        branch: info.branch.or(previous.branch),
        framework: info.framework.or(previous.framework),
        file_count: db.repo_files(&info.repo_id)?.len(),
        node_count,
        link_count,
        snippet_count,
        languages: db.repo_languages(&info.repo_id)?,
        indexed_at: Some(Utc::now()),
        ..info
    })
}
