// Review pipeline: pull request context, agent fan-out, de-duplication, posting

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{with_db, JobHandle, Phase, Services};
use crate::error::{Error, Result};
use crate::index::db::{neighbour_files, GraphDatabase};
use crate::index::CodeSnippet;
use crate::remote::{self, repo_id_for};
use crate::resilience::guarded;

const CONTEXT_READY: u8 = 20;
const AGENTS_DONE: u8 = 80;
const SYNTHESIZED: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub file: String,
    pub line: Option<usize>,
    pub message: String,
    pub severity: Severity,
    /// Name of the agent that reported it
    pub agent: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub head_revision: Option<String>,
    pub changed_files: Vec<String>,
    pub diff: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub repo_url: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub pr_number: u64,
}

/// Code host side of a review
#[async_trait]
pub trait PullRequestSource: Send + Sync {
    async fn fetch_pull_request(&self, request: &ReviewRequest) -> Result<PullRequest>;

    async fn post_comments(&self, request: &ReviewRequest, pull_request: &PullRequest, findings: &[Finding]) -> Result<()>;
}

/// What every agent gets to look at
#[derive(Debug, Clone)]
pub struct ReviewContext {
    pub repo_id: String,
    pub pull_request: PullRequest,
    /// Files linked to or from the changed files in the knowledge graph
    pub neighbour_files: Vec<String>,
    /// Snippets of the changed files followed by those of their neighbours
    pub snippets: Vec<CodeSnippet>,
}

/// An external reviewer, typically backed by an LLM
#[async_trait]
pub trait ReviewAgent: Send + Sync {
    fn name(&self) -> &str;

    async fn review(&self, context: &ReviewContext) -> Result<Vec<Finding>>;
}

#[derive(Clone)]
pub struct ReviewServices {
    pub pull_requests: Arc<dyn PullRequestSource>,
    pub agents: Vec<Arc<dyn ReviewAgent>>,
}

pub async fn run(
    services: &Services,
    review: &ReviewServices,
    job: &JobHandle,
    request: &ReviewRequest,
) -> Result<Vec<Finding>> {
    let vcs = services.breakers.get(remote::VCS);
    let token = job.token();

    job.enter(Phase::Fetching)?;
    let pull_request = tokio::select! {
        pr = guarded(&vcs, &services.retry, || review.pull_requests.fetch_pull_request(request)) => pr?,
        _ = token.cancelled() => return Err(Error::Cancelled),
    };
    info!(
        "Reviewing #{} of {} ({} changed files)",
        pull_request.number,
        request.repo_url,
        pull_request.changed_files.len()
    );

    job.enter(Phase::BuildingContext)?;
    let repo_url = request.repo_url.clone();
    let context = with_db(&services.db, move |db| build_context(db, &repo_url, pull_request)).await?;
    let changed = context.pull_request.changed_files.len();
    job.progress(CONTEXT_READY, |s| s.total_files = changed);

    job.enter(Phase::RunningAgents)?;
    let findings = run_agents(services, review, job, &context).await?;

    job.enter(Phase::Synthesizing)?;
    let findings = synthesize(findings);
    job.progress(SYNTHESIZED, |_| {});

    job.enter(Phase::PostingComments)?;
    if findings.is_empty() {
        debug!("Nothing to post for #{}", context.pull_request.number);
    } else {
        guarded(&vcs, &services.retry, || {
            review.pull_requests.post_comments(request, &context.pull_request, &findings)
        })
        .await?;
    }
    Ok(findings)
}

fn build_context(db: &GraphDatabase, repo_url: &str, pull_request: PullRequest) -> Result<ReviewContext> {
    let repo_id = repo_id_for(repo_url);
    let (nodes, links) = db.load_graph(&repo_id)?;
    if nodes.is_empty() {
        warn!("{} has no index, reviewing without graph context", repo_url);
    }
    let neighbours = neighbour_files(&nodes, &links, &pull_request.changed_files);
    let files: Vec<String> = pull_request
        .changed_files
        .iter()
        .chain(neighbours.iter())
        .cloned()
        .collect();
    let snippets = db.snippets_for_files(&repo_id, &files)?;
    debug!(
        "Review context for {}: {} neighbour files, {} snippets",
        repo_id,
        neighbours.len(),
        snippets.len()
    );
    Ok(ReviewContext {
        repo_id,
        pull_request,
        neighbour_files: neighbours,
        snippets,
    })
}

/// One agent failing does not sink the review; all of them failing does
async fn run_agents(
    services: &Services,
    review: &ReviewServices,
    job: &JobHandle,
    context: &ReviewContext,
) -> Result<Vec<Finding>> {
    let llm = services.breakers.get(remote::LLM);
    let total = review.agents.len().max(1);
    let mut findings = Vec::new();
    let mut last_error = None;
    let mut failed = 0;

    for (idx, agent) in review.agents.iter().enumerate() {
        job.checkpoint()?;
        job.agent_started(agent.name());
        match guarded(&llm, &services.retry, || agent.review(context)).await {
            Ok(reported) => {
                for mut finding in reported {
                    if finding.agent.is_empty() {
                        finding.agent = agent.name().to_string();
                    }
                    job.finding(finding.clone());
                    findings.push(finding);
                }
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                warn!("Agent {} failed: {}", agent.name(), e);
                failed += 1;
                last_error = Some(e);
            }
        }
        let percentage = CONTEXT_READY + ((AGENTS_DONE - CONTEXT_READY) as usize * (idx + 1) / total) as u8;
        job.progress(percentage, |_| {});
    }

    match last_error {
        Some(e) if failed == review.agents.len() => Err(e),
        _ => Ok(findings),
    }
}

/// Merge findings reported more than once for the same (file, line, message).
/// The strongest severity wins; output is ordered by file and line.
pub fn synthesize(findings: Vec<Finding>) -> Vec<Finding> {
    let mut merged: Vec<Finding> = Vec::new();
    let mut seen: HashMap<(String, Option<usize>, String), usize> = HashMap::new();

    for finding in findings {
        let key = (finding.file.clone(), finding.line, finding.message.trim().to_string());
        match seen.get(&key) {
            Some(&idx) => {
                let kept = &mut merged[idx];
                kept.severity = kept.severity.max(finding.severity);
            }
            None => {
                seen.insert(key, merged.len());
                merged.push(finding);
            }
        }
    }

    merged.sort_by(|a, b| a.file.cmp(&b.file).then(a.line.cmp(&b.line)));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexingConfig;
    use crate::graph::GraphAssembler;
    use crate::index::{FunctionInfo, ParsedFile};
    use crate::indexer::registry::ParserRegistry;
    use crate::indexer::snippets::extract_snippets;
    use crate::jobs::{EventType, JobKind, JobRegistry};
    use crate::remote::GitSource;
    use crate::resilience::{BreakerConfig, BreakerRegistry, RetryConfig};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const REPO: &str = "https://github.com/acme/shop";

    fn finding(file: &str, line: usize, message: &str, severity: Severity) -> Finding {
        Finding {
            file: file.to_string(),
            line: Some(line),
            message: message.to_string(),
            severity,
            agent: String::new(),
        }
    }

    fn parsed(path: &str, name: &str, body: &str) -> ParsedFile {
        let mut file = ParsedFile::empty(path, "python");
        file.functions.push(FunctionInfo {
            name: name.to_string(),
            body: body.to_string(),
            start_line: 1,
            end_line: 2,
            ..Default::default()
        });
        file
    }

    fn services(dir: &tempfile::TempDir) -> Services {
        let db = GraphDatabase::new(dir.path().join("graph.db")).unwrap();
        let files = vec![
            parsed("a.py", "main", "def main():\n    helper()\n"),
            parsed("b.py", "helper", "def helper():\n    return 1\n"),
            parsed("c.py", "lonely", "def lonely():\n    return 2\n"),
        ];
        let repo_id = repo_id_for(REPO);
        db.replace_graph(&repo_id, &GraphAssembler::new(&files).assemble(&files))
            .unwrap();
        db.replace_snippets(&repo_id, &extract_snippets(&files)).unwrap();

        Services {
            db,
            parsers: ParserRegistry::regex_only(),
            source: Arc::new(GitSource::new(dir.path().join("work"))),
            embedder: None,
            breakers: Arc::new(BreakerRegistry::new(BreakerConfig::default())),
            retry: RetryConfig {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
                jitter: false,
            },
            indexing: IndexingConfig::default(),
        }
    }

    #[derive(Default)]
    struct FakeHost {
        posted: Mutex<Vec<Finding>>,
    }

    #[async_trait]
    impl PullRequestSource for FakeHost {
        async fn fetch_pull_request(&self, request: &ReviewRequest) -> Result<PullRequest> {
            Ok(PullRequest {
                number: request.pr_number,
                title: "Tidy main".to_string(),
                changed_files: vec!["a.py".to_string()],
                ..Default::default()
            })
        }

        async fn post_comments(&self, _request: &ReviewRequest, _pr: &PullRequest, findings: &[Finding]) -> Result<()> {
            self.posted.lock().extend_from_slice(findings);
            Ok(())
        }
    }

    struct ScriptedAgent {
        name: &'static str,
        findings: Vec<Finding>,
        seen_files: Mutex<Vec<String>>,
    }

    impl ScriptedAgent {
        fn new(name: &'static str, findings: Vec<Finding>) -> Arc<Self> {
            Arc::new(Self {
                name,
                findings,
                seen_files: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ReviewAgent for ScriptedAgent {
        fn name(&self) -> &str {
            self.name
        }

        async fn review(&self, context: &ReviewContext) -> Result<Vec<Finding>> {
            let mut files: Vec<String> = context.snippets.iter().map(|s| s.file.clone()).collect();
            files.dedup();
            *self.seen_files.lock() = files;
            Ok(self.findings.clone())
        }
    }

    struct BrokenAgent;

    #[async_trait]
    impl ReviewAgent for BrokenAgent {
        fn name(&self) -> &str {
            "broken"
        }

        async fn review(&self, _context: &ReviewContext) -> Result<Vec<Finding>> {
            Err(Error::network("llm", "model overloaded"))
        }
    }

    fn request() -> ReviewRequest {
        ReviewRequest {
            repo_url: REPO.to_string(),
            token: None,
            pr_number: 7,
        }
    }

    #[test]
    fn test_synthesize_merges_duplicates() {
        let findings = vec![
            finding("b.py", 4, "unused import", Severity::Info),
            finding("a.py", 9, "possible None", Severity::Warning),
            finding("b.py", 4, "unused import ", Severity::Error),
            finding("a.py", 2, "possible None", Severity::Info),
        ];
        let merged = synthesize(findings);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].line, Some(2));
        assert_eq!(merged[1].line, Some(9));
        assert_eq!(merged[2].file, "b.py");
        assert_eq!(merged[2].severity, Severity::Error);
    }

    #[tokio::test]
    async fn test_review_runs_agents_and_posts_deduplicated_findings() {
        let dir = tempfile::tempdir().unwrap();
        let services = services(&dir);
        let host = Arc::new(FakeHost::default());
        let style = ScriptedAgent::new("style", vec![finding("a.py", 2, "rename helper", Severity::Info)]);
        let logic = ScriptedAgent::new(
            "logic",
            vec![
                finding("a.py", 2, "rename helper", Severity::Warning),
                finding("a.py", 1, "missing docstring", Severity::Info),
            ],
        );
        let review = ReviewServices {
            pull_requests: host.clone(),
            agents: vec![
                style.clone() as Arc<dyn ReviewAgent>,
                Arc::new(BrokenAgent),
                logic.clone(),
            ],
        };

        let jobs = JobRegistry::new(10);
        let job = jobs.create(JobKind::Review, None);
        let (_, mut rx) = jobs.subscribe(job.id()).unwrap();
        let findings = run(&services, &review, &job, &request()).await.unwrap();
        let snapshot = job.finish(Ok(()));

        assert_eq!(snapshot.phase, Phase::Complete);
        assert_eq!(snapshot.findings, 3);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[1].severity, Severity::Warning);
        assert_eq!(findings[1].agent, "style");
        assert_eq!(host.posted.lock().len(), 2);

        // changed file first, then its graph neighbour; the unrelated file stays out
        assert_eq!(*style.seen_files.lock(), vec!["a.py".to_string(), "b.py".to_string()]);

        let mut agents = Vec::new();
        let mut finding_events = 0;
        while let Ok(event) = rx.try_recv() {
            match event.event_type {
                EventType::Agent => agents.push(event.agent.unwrap()),
                EventType::Finding => finding_events += 1,
                EventType::Progress => {}
            }
        }
        assert_eq!(agents, vec!["style", "broken", "logic"]);
        assert_eq!(finding_events, 3);
    }

    #[tokio::test]
    async fn test_review_fails_when_every_agent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let services = services(&dir);
        let host = Arc::new(FakeHost::default());
        let review = ReviewServices {
            pull_requests: host.clone(),
            agents: vec![Arc::new(BrokenAgent) as Arc<dyn ReviewAgent>],
        };

        let jobs = JobRegistry::new(10);
        let job = jobs.create(JobKind::Review, None);
        let err = run(&services, &review, &job, &request()).await.unwrap_err();
        assert!(err.to_string().contains("model overloaded"));
        let snapshot = job.finish(Err(err));
        assert_eq!(snapshot.phase, Phase::Failed);
        assert!(host.posted.lock().is_empty());
    }

    /// Cancels its own job mid-review, the way a client would through the API
    struct CancellingAgent {
        jobs: Arc<JobRegistry>,
        job_id: String,
    }

    #[async_trait]
    impl ReviewAgent for CancellingAgent {
        fn name(&self) -> &str {
            "cancelling"
        }

        async fn review(&self, _context: &ReviewContext) -> Result<Vec<Finding>> {
            self.jobs.cancel(&self.job_id)?;
            Ok(vec![finding("a.py", 1, "late finding", Severity::Info)])
        }
    }

    struct CountingAgent {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReviewAgent for CountingAgent {
        fn name(&self) -> &str {
            "counting"
        }

        async fn review(&self, _context: &ReviewContext) -> Result<Vec<Finding>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_cancel_after_first_agent_skips_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let services = services(&dir);
        let host = Arc::new(FakeHost::default());
        let jobs = Arc::new(JobRegistry::new(10));
        let job = jobs.create(JobKind::Review, None);
        let second = Arc::new(CountingAgent {
            calls: AtomicUsize::new(0),
        });
        let review = ReviewServices {
            pull_requests: host.clone(),
            agents: vec![
                Arc::new(CancellingAgent {
                    jobs: jobs.clone(),
                    job_id: job.id().to_string(),
                }) as Arc<dyn ReviewAgent>,
                second.clone(),
            ],
        };

        let result = run(&services, &review, &job, &request()).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(job.finish(Err(Error::Cancelled)).phase, Phase::Cancelled);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
        assert!(host.posted.lock().is_empty());
    }
}
