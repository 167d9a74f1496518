// Spawns index and review jobs over a shared set of services

use std::sync::Arc;

use tracing::{debug, info_span, Instrument};

use super::registry::JobRegistry;
use super::review_job::{ReviewRequest, ReviewServices};
use super::{index_job, review_job, IndexMode, IndexRequest, JobKind, JobSnapshot};
use crate::config::{Config, IndexingConfig};
use crate::error::{Error, Result};
use crate::index::db::GraphDatabase;
use crate::indexer::registry::ParserRegistry;
use crate::remote::{embeddings, Embedder, FetchRequest, GitSource, RepoSource};
use crate::resilience::{BreakerRegistry, RetryConfig};

/// Everything a pipeline needs, shared by all running jobs
pub struct Services {
    pub db: GraphDatabase,
    pub parsers: ParserRegistry,
    pub source: Arc<dyn RepoSource>,
    /// `None` skips the embedding step
    pub embedder: Option<Arc<dyn Embedder>>,
    pub breakers: Arc<BreakerRegistry>,
    pub retry: RetryConfig,
    pub indexing: IndexingConfig,
}

impl Services {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            db: GraphDatabase::new(config.db_path())?,
            parsers: ParserRegistry::new(),
            source: Arc::new(GitSource::new(config.workdir())),
            embedder: embeddings::from_config(&config.embeddings)?.map(Arc::from),
            breakers: Arc::new(BreakerRegistry::new((&config.circuit_breaker).into())),
            retry: (&config.retry).into(),
            indexing: config.indexing.clone(),
        })
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    services: Arc<Services>,
    jobs: Arc<JobRegistry>,
    review: Option<ReviewServices>,
}

impl Orchestrator {
    pub fn new(services: Services, max_retained: usize) -> Self {
        Self {
            services: Arc::new(services),
            jobs: Arc::new(JobRegistry::new(max_retained)),
            review: None,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(Services::from_config(config)?, config.jobs.max_retained))
    }

    /// Enable review jobs
    pub fn with_review(mut self, review: ReviewServices) -> Self {
        self.review = Some(review);
        self
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn db(&self) -> &GraphDatabase {
        &self.services.db
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.services.breakers
    }

    /// Queue an index job and return its first snapshot
    pub fn submit_index(&self, request: IndexRequest) -> Result<JobSnapshot> {
        request.validate()?;
        let handle = self.jobs.create(JobKind::Index, Some(request.repo_id()));
        let snapshot = handle.snapshot();
        let services = self.services.clone();
        let span = info_span!("index_job", id = %handle.id());

        tokio::spawn(
            async move {
                let result = index_job::run(&services, &handle, &request).await;
                handle.finish(result.map(|outcome| debug!("Index outcome: {:?}", outcome)));
            }
            .instrument(span),
        );
        Ok(snapshot)
    }

    /// Re-index a known repository from scratch
    pub fn submit_force(&self, repo_id: &str, token: Option<String>, branch: Option<String>) -> Result<JobSnapshot> {
        let info = self
            .services
            .db
            .get_repo(repo_id)?
            .ok_or_else(|| Error::NotFound(format!("repository {}", repo_id)))?;
        self.submit_index(IndexRequest {
            fetch: FetchRequest {
                repo_url: info.repo_url,
                token,
                branch: branch.or(info.branch),
            },
            framework: info.framework,
            mode: IndexMode::Force,
        })
    }

    pub fn submit_review(&self, request: ReviewRequest) -> Result<JobSnapshot> {
        let review = self
            .review
            .clone()
            .ok_or_else(|| Error::Config("review collaborators are not configured".to_string()))?;
        if request.repo_url.trim().is_empty() {
            return Err(Error::Validation("repoUrl is required".to_string()));
        }
        if review.agents.is_empty() {
            return Err(Error::Config("no review agents configured".to_string()));
        }

        let handle = self.jobs.create(JobKind::Review, Some(crate::remote::repo_id_for(&request.repo_url)));
        let snapshot = handle.snapshot();
        let services = self.services.clone();
        let span = info_span!("review_job", id = %handle.id());

        tokio::spawn(
            async move {
                let result = review_job::run(&services, &review, &handle, &request).await;
                handle.finish(result.map(|findings| debug!("Review produced {} findings", findings.len())));
            }
            .instrument(span),
        );
        Ok(snapshot)
    }

    pub fn cancel(&self, job_id: &str) -> Result<JobSnapshot> {
        self.jobs.cancel(job_id)
    }

    pub async fn wait(&self, job_id: &str) -> Result<JobSnapshot> {
        self.jobs.wait(job_id).await
    }
}

/// Regex parsers, no embedder and no retry delays, storage under `dir`
#[cfg(test)]
pub(crate) fn test_services(dir: &std::path::Path) -> Services {
    use crate::resilience::BreakerConfig;
    use std::time::Duration;

    Services {
        db: GraphDatabase::new(dir.join("graph.db")).expect("test database"),
        parsers: ParserRegistry::regex_only(),
        source: Arc::new(GitSource::new(dir.join("work"))),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{Finding, Phase, PullRequest, PullRequestSource, ReviewAgent, ReviewContext, Severity};
    use crate::remote::repo_id_for;
    use async_trait::async_trait;

    fn orchestrator(dir: &tempfile::TempDir) -> Orchestrator {
        Orchestrator::new(test_services(dir.path()), 10)
    }

    fn sample_repo(dir: &tempfile::TempDir) -> String {
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(repo.join("src")).unwrap();
        std::fs::write(
            repo.join("src/Shop.java"),
            "public class Shop {\n    public void checkout() {\n        total();\n    }\n    private int total() {\n        return 1;\n    }\n}\n",
        )
        .unwrap();
        repo.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_index_job_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(&dir);
        let url = sample_repo(&dir);

        let queued = orchestrator
            .submit_index(IndexRequest::new(url.clone(), IndexMode::Full))
            .unwrap();
        assert_eq!(queued.phase, Phase::Queued);

        let done = orchestrator.wait(&queued.id).await.unwrap();
        assert_eq!(done.phase, Phase::Complete, "error: {:?}", done.error);
        assert_eq!(done.total_files, 1);

        let info = orchestrator.db().get_repo(&repo_id_for(&url)).unwrap().unwrap();
        assert_eq!(info.languages, vec!["java".to_string()]);
        assert_eq!(info.last_job_id.as_deref(), Some(queued.id.as_str()));
    }

    #[tokio::test]
    async fn test_force_requires_a_known_repository() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(&dir);
        assert!(matches!(
            orchestrator.submit_force("0123456789abcdef", None, None),
            Err(Error::NotFound(_))
        ));

        let url = sample_repo(&dir);
        let first = orchestrator
            .submit_index(IndexRequest::new(url.clone(), IndexMode::Full))
            .unwrap();
        orchestrator.wait(&first.id).await.unwrap();
        let before = orchestrator.db().repo_counts(&repo_id_for(&url)).unwrap();

        let forced = orchestrator.submit_force(&repo_id_for(&url), None, None).unwrap();
        assert_eq!(orchestrator.wait(&forced.id).await.unwrap().phase, Phase::Complete);
        assert_eq!(orchestrator.db().repo_counts(&repo_id_for(&url)).unwrap(), before);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(&dir);
        let url = sample_repo(&dir);

        let queued = orchestrator
            .submit_index(IndexRequest::new(url, IndexMode::Full))
            .unwrap();
        assert_eq!(orchestrator.cancel(&queued.id).unwrap().phase, Phase::Cancelling);

        let done = orchestrator.wait(&queued.id).await.unwrap();
        assert_eq!(done.phase, Phase::Cancelled);
        assert!(matches!(orchestrator.cancel(&queued.id), Err(Error::Conflict(_))));
        assert_eq!(orchestrator.jobs().counts().failed, 0);
    }

    #[tokio::test]
    async fn test_invalid_requests_are_rejected_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(&dir);
        assert!(matches!(
            orchestrator.submit_index(IndexRequest::new("", IndexMode::Full)),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            orchestrator.submit_review(ReviewRequest::default()),
            Err(Error::Config(_))
        ));
        assert_eq!(orchestrator.jobs().counts().total, 0);
    }

    struct OneFileHost;

    #[async_trait]
    impl PullRequestSource for OneFileHost {
        async fn fetch_pull_request(&self, request: &ReviewRequest) -> Result<PullRequest> {
            Ok(PullRequest {
                number: request.pr_number,
                changed_files: vec!["src/Shop.java".to_string()],
                ..Default::default()
            })
        }

        async fn post_comments(&self, _: &ReviewRequest, _: &PullRequest, _: &[Finding]) -> Result<()> {
            Ok(())
        }
    }

    struct SnippetCounter;

    #[async_trait]
    impl ReviewAgent for SnippetCounter {
        fn name(&self) -> &str {
            "counter"
        }

        async fn review(&self, context: &ReviewContext) -> Result<Vec<Finding>> {
            Ok(vec![Finding {
                file: "src/Shop.java".to_string(),
                line: Some(1),
                message: format!("{} snippets in context", context.snippets.len()),
                severity: Severity::Info,
                agent: String::new(),
            }])
        }
    }

    #[tokio::test]
    async fn test_review_job_uses_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(&dir).with_review(ReviewServices {
            pull_requests: Arc::new(OneFileHost),
            agents: vec![Arc::new(SnippetCounter) as Arc<dyn ReviewAgent>],
        });
        let url = sample_repo(&dir);
        let indexed = orchestrator
            .submit_index(IndexRequest::new(url.clone(), IndexMode::Full))
            .unwrap();
        orchestrator.wait(&indexed.id).await.unwrap();

        let queued = orchestrator
            .submit_review(ReviewRequest {
                repo_url: url,
                token: None,
                pr_number: 3,
            })
            .unwrap();
        let done = orchestrator.wait(&queued.id).await.unwrap();
        assert_eq!(done.phase, Phase::Complete, "error: {:?}", done.error);
        assert_eq!(done.kind, JobKind::Review);
        assert_eq!(done.findings, 1);
    }
}
