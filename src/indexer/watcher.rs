// File watcher that turns local edits into incremental index jobs

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::indexer::collector::{relative_path, SourceCollector};
use crate::jobs::{IndexMode, IndexRequest, Orchestrator, Phase};

/// Quiet period after the last event before a batch is submitted
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches a local checkout and re-indexes the files that change
pub struct RepoWatcher {
    orchestrator: Orchestrator,
    root: PathBuf,
    framework: Option<String>,
    collector: SourceCollector,
    debounce: Duration,
}

impl RepoWatcher {
    pub fn new(orchestrator: Orchestrator, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().canonicalize()?;
        let services = orchestrator.services();
        let collector = SourceCollector::from_config(&services.parsers, &services.indexing);
        Ok(Self {
            orchestrator,
            root,
            framework: None,
            collector,
            debounce: DEFAULT_DEBOUNCE,
        })
    }

    pub fn with_framework(mut self, framework: Option<String>) -> Self {
        self.framework = framework;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Repository URL the jobs are submitted under
    pub fn repo_url(&self) -> String {
        self.root.to_string_lossy().to_string()
    }

    /// Run until `shutdown` fires or the watcher channel closes
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        // notify calls back on its own thread, outside the runtime
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            Config::default(),
        )
        .map_err(|e| self.watch_error(e))?;
        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| self.watch_error(e))?;

        info!("Watching {} for changes", self.root.display());

        let mut pending = BTreeSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(Ok(event)) => self.record(&event, &mut pending),
                    Some(Err(e)) => warn!("File watch error: {}", e),
                    None => break,
                },
                _ = tokio::time::sleep(self.debounce), if !pending.is_empty() => {
                    self.flush(&mut pending).await;
                }
            }
        }

        info!("File watcher stopped");
        Ok(())
    }

    fn watch_error(&self, e: notify::Error) -> Error {
        Error::Collection {
            path: self.root.display().to_string(),
            message: e.to_string(),
        }
    }

    /// Repository-relative path of an event path the index cares about
    pub fn relevant(&self, path: &Path) -> Option<String> {
        let relative = relative_path(&self.root, path)?;
        (!relative.is_empty() && self.collector.accepts(&relative)).then_some(relative)
    }

    fn record(&self, event: &Event, pending: &mut BTreeSet<String>) {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
            return;
        }
        for path in &event.paths {
            if let Some(relative) = self.relevant(path) {
                debug!("Changed: {}", relative);
                pending.insert(relative);
            }
        }
    }

    /// Submit one incremental job for the batch and wait for it, so jobs
    /// for the same checkout never overlap
    pub async fn flush(&self, pending: &mut BTreeSet<String>) -> Option<Phase> {
        let changed_files: Vec<String> = std::mem::take(pending).into_iter().collect();
        info!("Re-indexing {} changed files", changed_files.len());

        let mut request = IndexRequest::new(self.repo_url(), IndexMode::Incremental { changed_files });
        request.framework = self.framework.clone();

        let submitted = match self.orchestrator.submit_index(request) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Could not submit incremental job: {}", e);
                return None;
            }
        };
        match self.orchestrator.wait(&submitted.id).await {
            Ok(done) => {
                match done.phase {
                    Phase::Complete => info!("Incremental job {} complete", done.id),
                    phase => warn!("Incremental job {} ended {}: {:?}", done.id, phase, done.error),
                }
                Some(done.phase)
            }
            Err(e) => {
                error!("Lost track of job {}: {}", submitted.id, e);
                None
            }
        }
    }
}
