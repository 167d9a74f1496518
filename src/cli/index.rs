use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use repograph::config::Config;
use repograph::indexer::RepoWatcher;
use repograph::jobs::{IndexMode, IndexRequest, JobSnapshot, Orchestrator, Phase};
use repograph::remote::repo_id_for;

pub struct IndexArgs {
    pub path: PathBuf,
    pub incremental: Vec<String>,
    pub force: bool,
    pub framework: Option<String>,
    pub watch: bool,
}

impl IndexArgs {
    fn mode(&self) -> IndexMode {
        if self.force {
            IndexMode::Force
        } else if !self.incremental.is_empty() {
            IndexMode::Incremental {
                changed_files: self.incremental.clone(),
            }
        } else {
            IndexMode::Full
        }
    }
}

pub async fn index_project(config: &Config, args: IndexArgs) -> Result<()> {
    let root = args
        .path
        .canonicalize()
        .with_context(|| format!("cannot open {}", args.path.display()))?;
    let repo_url = root.to_string_lossy().to_string();
    let repo_id = repo_id_for(&repo_url);

    let orchestrator = Orchestrator::from_config(config)?;

    println!("repograph indexer");
    println!("Project: {}", root.display());
    println!("Repository id: {}", repo_id);
    println!("Database: {}", orchestrator.db().path().display());

    let mut request = IndexRequest::new(repo_url, args.mode());
    request.framework = args.framework.clone();
    let done = run_with_progress(&orchestrator, request).await?;

    if done.phase != Phase::Complete {
        bail!(
            "indexing {}: {}",
            done.phase,
            done.error.as_deref().unwrap_or("no error reported")
        );
    }

    let (nodes, links, snippets) = orchestrator.db().repo_counts(&repo_id)?;
    println!("\nIndexing complete!");
    println!("Files parsed: {}", done.files_processed);
    println!("Functions: {}", done.functions_indexed);
    println!("Graph: {} nodes, {} links", nodes, links);
    println!("Snippets: {}", snippets);

    if args.watch {
        println!("\nWatching for file changes. Press Ctrl+C to stop.");
        let watcher = RepoWatcher::new(orchestrator, &root)?.with_framework(args.framework);
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                trigger.cancel();
            }
        });
        watcher.run(shutdown).await?;
    }

    Ok(())
}

/// Submit the job and drive a progress bar from its events. Ctrl-C cancels the job.
async fn run_with_progress(orchestrator: &Orchestrator, request: IndexRequest) -> Result<JobSnapshot> {
    let queued = orchestrator.submit_index(request)?;
    let Some((snapshot, mut events)) = orchestrator.jobs().subscribe(&queued.id) else {
        bail!("job {} disappeared", queued.id);
    };

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(snapshot.phase.to_string());

    let mut phase = snapshot.phase;
    let mut cancel_requested = false;
    while !phase.is_terminal() {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    phase = event.phase;
                    pb.set_position(event.percentage.into());
                    pb.set_message(format!(
                        "{} {}/{} files",
                        event.phase, event.files_processed, event.total_files
                    ));
                }
                Err(RecvError::Lagged(skipped)) => warn!("Progress display skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                info!("Cancelling job {}", queued.id);
                cancel_requested = true;
                if let Err(e) = orchestrator.cancel(&queued.id) {
                    warn!("Cancel failed: {}", e);
                }
            }
        }
    }

    let done = orchestrator.wait(&queued.id).await?;
    pb.set_position(done.percentage.into());
    pb.finish_with_message(done.phase.to_string());
    Ok(done)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> IndexArgs {
        IndexArgs {
            path: PathBuf::from("."),
            incremental: Vec::new(),
            force: false,
            framework: None,
            watch: false,
        }
    }

    #[test]
    fn test_mode_selection() {
        assert!(matches!(args().mode(), IndexMode::Full));

        let incremental = IndexArgs {
            incremental: vec!["src/a.py".to_string()],
            ..args()
        };
        assert!(matches!(incremental.mode(), IndexMode::Incremental { changed_files } if changed_files.len() == 1));

        let force = IndexArgs {
            force: true,
            incremental: vec!["src/a.py".to_string()],
            ..args()
        };
        assert!(matches!(force.mode(), IndexMode::Force));
    }
}
