use std::convert::Infallible;
use std::str::FromStr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use super::error::ApiResult;
use super::AppState;
use crate::error::Error;
use crate::frameworks::{self, Framework};
use crate::graph::{GraphData, GraphView};
use crate::index::db::RepoInfo;
use crate::jobs::{EventType, IndexMode, IndexRequest, JobEvent, JobSnapshot, Orchestrator};
use crate::remote::{is_remote_url, FetchRequest};

const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexBody {
    pub repo_url: String,
    pub token: Option<String>,
    pub branch: Option<String>,
    pub framework: Option<String>,
    /// Only read by the incremental endpoint
    #[serde(default)]
    pub changed_files: Vec<String>,
}

impl IndexBody {
    fn into_request(self, mode: IndexMode) -> IndexRequest {
        IndexRequest {
            fetch: FetchRequest {
                repo_url: self.repo_url,
                token: self.token,
                branch: self.branch,
            },
            framework: self.framework,
            mode,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceBody {
    pub repo_id: String,
    pub token: Option<String>,
    pub branch: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    pub job_id: String,
}

#[derive(Debug, Deserialize)]
pub struct Page {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct JobList {
    pub jobs: Vec<JobSnapshot>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Deserialize)]
pub struct GraphQuery {
    pub view: Option<String>,
}

fn accepted(snapshot: JobSnapshot) -> (StatusCode, Json<Accepted>) {
    (StatusCode::ACCEPTED, Json(Accepted { job_id: snapshot.id }))
}

/// Local directories are only indexed when the server opts in
fn admit(state: &AppState, request: IndexRequest) -> Result<IndexRequest, Error> {
    let url = request.fetch.repo_url.trim();
    if !url.is_empty() && !state.allow_local_paths && !is_remote_url(url) {
        return Err(Error::Validation(format!(
            "repoUrl '{}' is not a remote git URL; local paths are disabled on this server",
            url
        )));
    }
    Ok(request)
}

pub async fn start_index(
    State(state): State<AppState>,
    body: Result<Json<IndexBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Accepted>)> {
    let Json(body) = body?;
    let request = admit(&state, body.into_request(IndexMode::Full))?;
    Ok(accepted(state.orchestrator.submit_index(request)?))
}

pub async fn start_incremental(
    State(state): State<AppState>,
    body: Result<Json<IndexBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Accepted>)> {
    let Json(mut body) = body?;
    let changed_files = std::mem::take(&mut body.changed_files);
    let request = admit(&state, body.into_request(IndexMode::Incremental { changed_files }))?;
    Ok(accepted(state.orchestrator.submit_index(request)?))
}

pub async fn start_force(
    State(app): State<Orchestrator>,
    body: Result<Json<ForceBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Accepted>)> {
    let Json(body) = body?;
    if body.repo_id.trim().is_empty() {
        return Err(Error::Validation("repoId is required".to_string()).into());
    }
    Ok(accepted(app.submit_force(&body.repo_id, body.token, body.branch)?))
}

pub async fn cancel_job(State(app): State<Orchestrator>, Path(id): Path<String>) -> ApiResult<Json<JobSnapshot>> {
    Ok(Json(app.cancel(&id)?))
}

pub async fn job_status(State(app): State<Orchestrator>, Path(id): Path<String>) -> ApiResult<Json<JobSnapshot>> {
    let snapshot = app
        .jobs()
        .get(&id)
        .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;
    Ok(Json(snapshot))
}

fn sse_event(name: &'static str, data: &impl Serialize) -> Event {
    Event::default()
        .event(name)
        .json_data(data)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

fn event_name(event: &JobEvent) -> &'static str {
    match event.event_type {
        EventType::Progress => "progress",
        EventType::Agent => "agent",
        EventType::Finding => "finding",
    }
}

/// Snapshot first, then live events until the job reaches a terminal phase
pub async fn job_events(
    State(app): State<Orchestrator>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let (snapshot, rx) = app
        .jobs()
        .subscribe(&id)
        .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;

    let first = sse_event("snapshot", &snapshot);
    let live = (!snapshot.phase.is_terminal()).then_some(rx);
    let live = stream::unfold(live, |rx| async move {
        let mut rx = rx?;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let next = (!event.phase.is_terminal()).then_some(rx);
                    return Some((Ok::<_, Infallible>(sse_event(event_name(&event), &event)), next));
                }
                Err(RecvError::Lagged(skipped)) => debug!("Event stream lagged by {} events", skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    });

    let stream = stream::once(async move { Ok::<_, Infallible>(first) }).chain(live);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn list_jobs(State(app): State<Orchestrator>, Query(page): Query<Page>) -> Json<JobList> {
    let limit = page.limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE);
    let offset = page.offset.unwrap_or(0);
    let (jobs, total) = app.jobs().list(limit, offset);
    Json(JobList {
        jobs,
        total,
        limit,
        offset,
    })
}

pub async fn list_frameworks() -> Json<&'static [Framework]> {
    Json(frameworks::presets())
}

pub async fn repo_meta(State(app): State<Orchestrator>, Path(repo_id): Path<String>) -> ApiResult<Json<RepoInfo>> {
    let info = app
        .db()
        .get_repo(&repo_id)?
        .ok_or_else(|| Error::NotFound(format!("repository {}", repo_id)))?;
    Ok(Json(info))
}

pub async fn list_repos(State(app): State<Orchestrator>) -> ApiResult<Json<Vec<RepoInfo>>> {
    Ok(Json(app.db().list_repos()?))
}

pub async fn repo_graph(
    State(app): State<Orchestrator>,
    Path(repo_id): Path<String>,
    Query(query): Query<GraphQuery>,
) -> ApiResult<Json<GraphData>> {
    let view = match query.view.as_deref() {
        Some(view) => GraphView::from_str(view)?,
        None => GraphView::default(),
    };
    Ok(Json(app.db().graph_view(&repo_id, view)?))
}

pub async fn metrics(State(app): State<Orchestrator>) -> Json<Value> {
    Json(json!({
        "circuitBreakers": app.breakers().snapshot(),
        "jobs": app.jobs().counts(),
    }))
}
