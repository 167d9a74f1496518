//! Long-running index and review jobs.
//!
//! Every job moves through a fixed sequence of [`Phase`]s. The registry keeps
//! the latest [`JobSnapshot`] of each job and fans out [`JobEvent`]s to
//! subscribers; the [`Orchestrator`] spawns the pipelines as tokio tasks.

pub mod index_job;
pub mod orchestrator;
pub mod registry;
pub mod review_job;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::index::db::GraphDatabase;

pub use index_job::{IndexMode, IndexOutcome, IndexRequest};
pub use orchestrator::{Orchestrator, Services};
pub use registry::{JobCounts, JobHandle, JobRegistry};
pub use review_job::{
    Finding, PullRequest, PullRequestSource, ReviewAgent, ReviewContext, ReviewRequest, ReviewServices, Severity,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Index,
    Review,
}

impl JobKind {
    /// Happy-path phase sequence, terminal phase included
    pub fn phases(self) -> &'static [Phase] {
        match self {
            JobKind::Index => &[
                Phase::Queued,
                Phase::Fetching,
                Phase::BuildingContext,
                Phase::Indexing,
                Phase::Complete,
            ],
            JobKind::Review => &[
                Phase::Queued,
                Phase::Fetching,
                Phase::BuildingContext,
                Phase::RunningAgents,
                Phase::Synthesizing,
                Phase::PostingComments,
                Phase::Complete,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Queued,
    Fetching,
    BuildingContext,
    Indexing,
    RunningAgents,
    Synthesizing,
    PostingComments,
    Complete,
    Failed,
    Cancelling,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed | Phase::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Queued => "queued",
            Phase::Fetching => "fetching",
            Phase::BuildingContext => "building-context",
            Phase::Indexing => "indexing",
            Phase::RunningAgents => "running-agents",
            Phase::Synthesizing => "synthesizing",
            Phase::PostingComments => "posting-comments",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
            Phase::Cancelling => "cancelling",
            Phase::Cancelled => "cancelled",
        }
    }

    /// Forward-only transition rule for a job of `kind`.
    ///
    /// Any live phase may fail or start cancelling; a cancelling job can only
    /// end as cancelled or failed. Otherwise the job moves strictly forward
    /// along its kind's sequence, possibly skipping phases.
    pub fn can_transition(self, next: Phase, kind: JobKind) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Phase::Failed) => true,
            (Phase::Cancelling, next) => next == Phase::Cancelled,
            (_, Phase::Cancelling) => true,
            (_, Phase::Cancelled) => false,
            (current, next) => {
                let sequence = kind.phases();
                let position = |p: Phase| sequence.iter().position(|s| *s == p);
                match (position(current), position(next)) {
                    (Some(from), Some(to)) => to > from,
                    _ => false,
                }
            }
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest state of one job, as returned by polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub kind: JobKind,
    pub phase: Phase,
    pub percentage: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_id: Option<String>,
    pub files_processed: usize,
    pub total_files: usize,
    pub functions_indexed: usize,
    pub findings: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobSnapshot {
    pub fn new(id: impl Into<String>, kind: JobKind, repo_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            phase: Phase::Queued,
            percentage: 0,
            repo_id,
            files_processed: 0,
            total_files: 0,
            functions_indexed: 0,
            findings: 0,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Progress,
    Agent,
    Finding,
}

/// One pushed update. Progress fields mirror the snapshot at the time of the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub phase: Phase,
    pub percentage: u8,
    pub files_processed: usize,
    pub total_files: usize,
    pub functions_indexed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finding: Option<Finding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobEvent {
    pub(crate) fn from_snapshot(event_type: EventType, snapshot: &JobSnapshot) -> Self {
        Self {
            event_type,
            phase: snapshot.phase,
            percentage: snapshot.percentage,
            files_processed: snapshot.files_processed,
            total_files: snapshot.total_files,
            functions_indexed: snapshot.functions_indexed,
            finding: None,
            agent: None,
            error: snapshot.error.clone(),
        }
    }
}

/// Run a storage call on the blocking pool instead of a runtime worker
pub(crate) async fn with_db<T, F>(db: &GraphDatabase, f: F) -> Result<T>
where
    F: FnOnce(&GraphDatabase) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db)).await.map_err(join_error)?
}

pub(crate) fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::other(format!("background task failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_phases_move_forward_only() {
        let kind = JobKind::Index;
        assert!(Phase::Queued.can_transition(Phase::Fetching, kind));
        assert!(Phase::Fetching.can_transition(Phase::BuildingContext, kind));
        assert!(Phase::BuildingContext.can_transition(Phase::Indexing, kind));
        assert!(Phase::Indexing.can_transition(Phase::Complete, kind));
        assert!(Phase::BuildingContext.can_transition(Phase::Complete, kind));

        assert!(!Phase::Indexing.can_transition(Phase::Fetching, kind));
        assert!(!Phase::Indexing.can_transition(Phase::Indexing, kind));
        assert!(!Phase::Indexing.can_transition(Phase::RunningAgents, kind));
        assert!(!Phase::Complete.can_transition(Phase::Failed, kind));
    }

    #[test]
    fn test_review_phases() {
        let kind = JobKind::Review;
        assert!(Phase::BuildingContext.can_transition(Phase::RunningAgents, kind));
        assert!(Phase::RunningAgents.can_transition(Phase::Synthesizing, kind));
        assert!(Phase::Synthesizing.can_transition(Phase::PostingComments, kind));
        assert!(Phase::PostingComments.can_transition(Phase::Complete, kind));
        assert!(!Phase::BuildingContext.can_transition(Phase::Indexing, kind));
    }

    #[test]
    fn test_cancel_and_fail_paths() {
        let kind = JobKind::Index;
        assert!(Phase::Queued.can_transition(Phase::Cancelling, kind));
        assert!(Phase::Indexing.can_transition(Phase::Failed, kind));
        assert!(Phase::Cancelling.can_transition(Phase::Cancelled, kind));
        assert!(Phase::Cancelling.can_transition(Phase::Failed, kind));
        assert!(!Phase::Cancelling.can_transition(Phase::Complete, kind));
        assert!(!Phase::Cancelling.can_transition(Phase::Cancelling, kind));
        assert!(!Phase::Indexing.can_transition(Phase::Cancelled, kind));
        assert!(!Phase::Cancelled.can_transition(Phase::Failed, kind));
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(serde_json::to_value(Phase::BuildingContext).unwrap(), "building-context");
        assert_eq!(Phase::PostingComments.to_string(), "posting-comments");
        let phase: Phase = serde_json::from_str("\"running-agents\"").unwrap();
        assert_eq!(phase, Phase::RunningAgents);
    }

    #[test]
    fn test_event_json_shape() {
        let mut snapshot = JobSnapshot::new("j1", JobKind::Index, None);
        snapshot.phase = Phase::Indexing;
        snapshot.percentage = 40;
        snapshot.total_files = 10;
        let json = serde_json::to_value(JobEvent::from_snapshot(EventType::Progress, &snapshot)).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["phase"], "indexing");
        assert_eq!(json["totalFiles"], 10);
        assert_eq!(json["filesProcessed"], 0);
        assert!(json.get("error").is_none());
    }
}
