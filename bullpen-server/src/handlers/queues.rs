//! JSON API over one board's queues.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
};
use bullpen_core::{
    JobCounts, JobPage, JobRecord, JobStatus, Page, QueueAdapter,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::{
    boards::Dashboard,
    infra::errors::{AppError, AppResult},
};

#[derive(Debug, Serialize)]
pub struct BoardSummary {
    pub board: String,
    pub read_only: bool,
    pub queues: Vec<QueueSummary>,
}

#[derive(Debug, Serialize)]
pub struct QueueSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<JobCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    /// Set instead of `counts`/`paused` when the backend could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct JobsQuery {
    pub status: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct PauseState {
    pub queue: String,
    pub paused: bool,
}

fn queue<'a>(
    dashboard: &'a Dashboard,
    name: &str,
) -> AppResult<&'a Arc<dyn QueueAdapter>> {
    dashboard.adapter(name).ok_or_else(|| {
        AppError::not_found(format!(
            "queue {name} is not mounted on {}",
            dashboard.mount_path()
        ))
    })
}

async fn summarize(adapter: &Arc<dyn QueueAdapter>) -> QueueSummary {
    let name = adapter.name().to_string();
    let (counts, paused) = tokio::join!(adapter.counts(), adapter.is_paused());
    match (counts, paused) {
        (Ok(counts), Ok(paused)) => QueueSummary {
            name,
            counts: Some(counts),
            paused: Some(paused),
            error: None,
        },
        (Err(err), _) | (_, Err(err)) => {
            tracing::warn!(queue = %name, error = %err, "could not read queue state");
            QueueSummary {
                name,
                counts: None,
                paused: None,
                error: Some(err.to_string()),
            }
        }
    }
}

pub async fn list_queues(
    State(dashboard): State<Arc<Dashboard>>,
) -> Json<BoardSummary> {
    let queues = join_all(dashboard.adapters().map(summarize)).await;
    Json(BoardSummary {
        board: dashboard.mount_path().to_string(),
        read_only: dashboard.read_only(),
        queues,
    })
}

fn parse_page(query: &JobsQuery) -> AppResult<Page> {
    let number = query.page.unwrap_or(1);
    if number == 0 {
        return Err(AppError::bad_request("page numbers start at 1"));
    }
    let size = query.page_size.unwrap_or(Page::DEFAULT_SIZE);
    if size == 0 || size > Page::MAX_SIZE {
        return Err(AppError::bad_request(format!(
            "page_size must be between 1 and {}",
            Page::MAX_SIZE
        )));
    }
    Ok(Page::new(number, size))
}

pub async fn list_jobs(
    State(dashboard): State<Arc<Dashboard>>,
    Path(name): Path<String>,
    query: Result<Query<JobsQuery>, QueryRejection>,
) -> AppResult<Json<JobPage>> {
    let Query(query) =
        query.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let adapter = queue(&dashboard, &name)?;

    let status = match query.status.as_deref() {
        None | Some("") => JobStatus::Waiting,
        Some(raw) => raw
            .parse::<JobStatus>()
            .map_err(|err| AppError::bad_request(err.to_string()))?,
    };
    let page = parse_page(&query)?;

    Ok(Json(adapter.jobs(status, page).await?))
}

pub async fn get_job(
    State(dashboard): State<Arc<Dashboard>>,
    Path((name, job_id)): Path<(String, String)>,
) -> AppResult<Json<JobRecord>> {
    let adapter = queue(&dashboard, &name)?;
    Ok(Json(adapter.job(&job_id).await?))
}

pub async fn retry_job(
    State(dashboard): State<Arc<Dashboard>>,
    Path((name, job_id)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    let adapter = queue(&dashboard, &name)?;
    adapter.retry_job(&job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_job(
    State(dashboard): State<Arc<Dashboard>>,
    Path((name, job_id)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    let adapter = queue(&dashboard, &name)?;
    adapter.remove_job(&job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn pause_queue(
    State(dashboard): State<Arc<Dashboard>>,
    Path(name): Path<String>,
) -> AppResult<Json<PauseState>> {
    let adapter = queue(&dashboard, &name)?;
    adapter.pause().await?;
    Ok(Json(PauseState {
        queue: name,
        paused: true,
    }))
}

pub async fn resume_queue(
    State(dashboard): State<Arc<Dashboard>>,
    Path(name): Path<String>,
) -> AppResult<Json<PauseState>> {
    let adapter = queue(&dashboard, &name)?;
    adapter.resume().await?;
    Ok(Json(PauseState {
        queue: name,
        paused: false,
    }))
}
