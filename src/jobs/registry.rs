// Job snapshots, event fan-out and cancellation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{EventType, Finding, JobEvent, JobKind, JobSnapshot, Phase};
use crate::error::{Error, Result};

const EVENT_CAPACITY: usize = 256;

struct JobState {
    snapshot: JobSnapshot,
    events: broadcast::Sender<JobEvent>,
}

struct JobEntry {
    seq: u64,
    kind: JobKind,
    cancel: CancellationToken,
    state: Mutex<JobState>,
}

impl JobEntry {
    fn snapshot(&self) -> JobSnapshot {
        self.state.lock().snapshot.clone()
    }

    /// Mutate the snapshot and broadcast under the same lock, so a subscriber
    /// sees either the old snapshot plus the event or the new snapshot alone.
    fn publish<F>(&self, event_type: EventType, update: F) -> JobSnapshot
    where
        F: FnOnce(&mut JobSnapshot, &mut Option<Finding>, &mut Option<String>),
    {
        let mut state = self.state.lock();
        let mut finding = None;
        let mut agent = None;
        update(&mut state.snapshot, &mut finding, &mut agent);
        let mut event = JobEvent::from_snapshot(event_type, &state.snapshot);
        event.finding = finding;
        event.agent = agent;
        // no subscribers is fine
        let _ = state.events.send(event);
        state.snapshot.clone()
    }

    fn transition(&self, next: Phase, error: Option<String>) -> Result<JobSnapshot> {
        let mut state = self.state.lock();
        let current = state.snapshot.phase;
        if !current.can_transition(next, self.kind) {
            return Err(Error::Conflict(format!(
                "job {} cannot move from {} to {}",
                state.snapshot.id, current, next
            )));
        }
        let snapshot = &mut state.snapshot;
        snapshot.phase = next;
        if next == Phase::Complete {
            snapshot.percentage = 100;
        }
        if next.is_terminal() {
            snapshot.completed_at = Some(chrono::Utc::now());
        }
        if error.is_some() {
            snapshot.error = error;
        }
        let event = JobEvent::from_snapshot(EventType::Progress, snapshot);
        let snapshot = snapshot.clone();
        let _ = state.events.send(event);
        Ok(snapshot)
    }
}

/// Write side of one job, owned by the task running its pipeline
#[derive(Clone)]
pub struct JobHandle {
    id: String,
    entry: Arc<JobEntry>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn token(&self) -> CancellationToken {
        self.entry.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.entry.cancel.is_cancelled()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.entry.snapshot()
    }

    /// Cancellation point
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Move to the next phase, unless the job has been asked to stop
    pub fn enter(&self, phase: Phase) -> Result<()> {
        self.checkpoint()?;
        debug!("Job {} entering {}", self.id, phase);
        self.entry.transition(phase, None).map(|_| ()).map_err(|e| {
            if self.is_cancelled() {
                Error::Cancelled
            } else {
                e
            }
        })
    }

    /// Update counters; the percentage never goes backwards
    pub fn progress<F>(&self, percentage: u8, update: F)
    where
        F: FnOnce(&mut JobSnapshot),
    {
        self.entry.publish(EventType::Progress, |snapshot, _, _| {
            update(snapshot);
            snapshot.percentage = snapshot.percentage.max(percentage.min(100));
        });
    }

    pub fn agent_started(&self, agent: &str) {
        self.entry.publish(EventType::Agent, |_, _, name| *name = Some(agent.to_string()));
    }

    pub fn finding(&self, finding: Finding) {
        self.entry.publish(EventType::Finding, |snapshot, slot, agent| {
            snapshot.findings += 1;
            *agent = Some(finding.agent.clone());
            *slot = Some(finding);
        });
    }

    /// Terminal transition from the pipeline's result
    pub fn finish(&self, result: Result<()>) -> JobSnapshot {
        let outcome = match result {
            Ok(()) if !self.is_cancelled() => self.entry.transition(Phase::Complete, None),
            Ok(()) | Err(Error::Cancelled) => {
                if self.entry.snapshot().phase != Phase::Cancelling {
                    let _ = self.entry.transition(Phase::Cancelling, None);
                }
                self.entry.transition(Phase::Cancelled, None)
            }
            Err(e) => self.entry.transition(Phase::Failed, Some(e.to_string())),
        };
        match outcome {
            Ok(snapshot) => {
                match snapshot.phase {
                    Phase::Failed => warn!(
                        "Job {} failed: {}",
                        self.id,
                        snapshot.error.as_deref().unwrap_or("unknown error")
                    ),
                    phase => info!("Job {} {}", self.id, phase),
                }
                snapshot
            }
            Err(e) => {
                warn!("Job {} could not finish: {}", self.id, e);
                self.entry.snapshot()
            }
        }
    }
}

/// Counters reported by `/metrics`; cancelled jobs are not failures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounts {
    pub total: usize,
    pub active: usize,
    pub complete: usize,
    pub failed: usize,
    pub cancelled: usize,
}

pub struct JobRegistry {
    jobs: DashMap<String, Arc<JobEntry>>,
    next_seq: AtomicU64,
    max_retained: usize,
}

impl JobRegistry {
    pub fn new(max_retained: usize) -> Self {
        Self {
            jobs: DashMap::new(),
            next_seq: AtomicU64::new(0),
            max_retained,
        }
    }

    pub fn create(&self, kind: JobKind, repo_id: Option<String>) -> JobHandle {
        let id = Uuid::new_v4().to_string();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let entry = Arc::new(JobEntry {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            kind,
            cancel: CancellationToken::new(),
            state: Mutex::new(JobState {
                snapshot: JobSnapshot::new(&id, kind, repo_id),
                events,
            }),
        });
        self.jobs.insert(id.clone(), entry.clone());
        self.prune();
        info!("Queued {:?} job {}", kind, id);
        JobHandle { id, entry }
    }

    fn entry(&self, id: &str) -> Option<Arc<JobEntry>> {
        self.jobs.get(id).map(|e| e.value().clone())
    }

    pub fn get(&self, id: &str) -> Option<JobSnapshot> {
        self.entry(id).map(|e| e.snapshot())
    }

    /// Current snapshot and a receiver for everything published after it
    pub fn subscribe(&self, id: &str) -> Option<(JobSnapshot, broadcast::Receiver<JobEvent>)> {
        let entry = self.entry(id)?;
        let state = entry.state.lock();
        Some((state.snapshot.clone(), state.events.subscribe()))
    }

    /// Request cooperative cancellation. Repeated requests while cancelling are no-ops.
    pub fn cancel(&self, id: &str) -> Result<JobSnapshot> {
        let entry = self.entry(id).ok_or_else(|| Error::NotFound(format!("job {}", id)))?;
        let phase = entry.snapshot().phase;
        if phase.is_terminal() {
            return Err(Error::Conflict(format!("job {} is already {}", id, phase)));
        }
        let snapshot = match entry.transition(Phase::Cancelling, None) {
            Ok(snapshot) => snapshot,
            Err(_) if entry.snapshot().phase == Phase::Cancelling => entry.snapshot(),
            Err(e) => return Err(e),
        };
        entry.cancel.cancel();
        info!("Cancellation requested for job {}", id);
        Ok(snapshot)
    }

    /// Snapshots newest first, plus the total number of retained jobs
    pub fn list(&self, limit: usize, offset: usize) -> (Vec<JobSnapshot>, usize) {
        let mut entries: Vec<Arc<JobEntry>> = self.jobs.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| b.seq.cmp(&a.seq));
        let total = entries.len();
        let page = entries.iter().skip(offset).take(limit).map(|e| e.snapshot()).collect();
        (page, total)
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for entry in self.jobs.iter() {
            counts.total += 1;
            match entry.value().snapshot().phase {
                Phase::Complete => counts.complete += 1,
                Phase::Failed => counts.failed += 1,
                Phase::Cancelled => counts.cancelled += 1,
                _ => counts.active += 1,
            }
        }
        counts
    }

    /// Resolve once the job reaches a terminal phase
    pub async fn wait(&self, id: &str) -> Result<JobSnapshot> {
        let (snapshot, mut events) = self
            .subscribe(id)
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;
        if snapshot.phase.is_terminal() {
            return Ok(snapshot);
        }
        loop {
            match events.recv().await {
                Ok(event) if event.phase.is_terminal() => break,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!("Waiter on {} skipped {} events", id, skipped),
                Err(RecvError::Closed) => break,
            }
        }
        self.get(id).ok_or_else(|| Error::NotFound(format!("job {}", id)))
    }

    /// Drop the oldest finished jobs beyond the retention limit
    fn prune(&self) {
        let mut finished: Vec<(u64, String)> = self
            .jobs
            .iter()
            .filter(|e| e.value().snapshot().phase.is_terminal())
            .map(|e| (e.value().seq, e.key().clone()))
            .collect();
        if finished.len() <= self.max_retained {
            return;
        }
        finished.sort();
        let excess = finished.len() - self.max_retained;
        for (_, id) in finished.into_iter().take(excess) {
            self.jobs.remove(&id);
        }
        debug!("Pruned {} finished jobs", excess);
    }
}
