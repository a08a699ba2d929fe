//! HTTP surface for the scheduler daemon.
//!
//! Serves the scheduler snapshot for monitoring tools, accepts session
//! submissions and cancellations on behalf of HTTP clients, and lets
//! operators inject uid and resource policy signals when running against the
//! simulated transcoder.
//!
//! Submissions through this surface are owned by a server-side
//! [`LoggingClientCallback`]; session events show up in the daemon log and in
//! the snapshot rather than being pushed to the HTTP caller.

use crate::client::ClientCallback;
use crate::scheduler::{SchedulerError, SessionScheduler};
use crate::session::{
    ClientId, SessionId, SessionPriority, TranscodingError, TranscodingRequest, TranscodingResult,
    Uid,
};
use crate::snapshot::SchedulerSnapshot;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;

/// Errors that can occur when running the HTTP server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),
}

/// Keeps sessions submitted over HTTP alive and logs their events.
pub struct LoggingClientCallback {
    client_id: ClientId,
}

impl LoggingClientCallback {
    pub fn new(client_id: ClientId) -> Self {
        Self { client_id }
    }
}

impl ClientCallback for LoggingClientCallback {
    fn on_transcoding_started(&self, session_id: SessionId) {
        info!(client_id = self.client_id, session_id, "transcoding started");
    }
    fn on_transcoding_paused(&self, session_id: SessionId) {
        info!(client_id = self.client_id, session_id, "transcoding paused");
    }
    fn on_transcoding_resumed(&self, session_id: SessionId) {
        info!(client_id = self.client_id, session_id, "transcoding resumed");
    }
    fn on_transcoding_finished(&self, session_id: SessionId, _result: TranscodingResult) {
        info!(client_id = self.client_id, session_id, "transcoding finished");
    }
    fn on_transcoding_failed(&self, session_id: SessionId, error: TranscodingError) {
        info!(client_id = self.client_id, session_id, %error, "transcoding failed");
    }
    fn on_progress_update(&self, session_id: SessionId, progress: i32) {
        info!(client_id = self.client_id, session_id, progress, "transcoding progress");
    }
    fn on_await_sessions_changed(&self, session_id: SessionId, old_count: u32, new_count: u32) {
        info!(
            client_id = self.client_id,
            session_id, old_count, new_count, "await count changed"
        );
    }
}

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    scheduler: Arc<SessionScheduler>,
    clients: Arc<Mutex<HashMap<ClientId, Arc<LoggingClientCallback>>>>,
}

impl AppState {
    pub fn new(scheduler: Arc<SessionScheduler>) -> Self {
        Self {
            scheduler,
            clients: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn client_callback(&self, client_id: ClientId) -> Arc<LoggingClientCallback> {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        clients
            .entry(client_id)
            .or_insert_with(|| Arc::new(LoggingClientCallback::new(client_id)))
            .clone()
    }
}

#[derive(Debug, Deserialize)]
struct SubmitBody {
    client_id: ClientId,
    session_id: SessionId,
    uid: Uid,
    source_path: String,
    destination_path: String,
    #[serde(default)]
    priority: SessionPriority,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    client_id: ClientId,
    session_id: SessionId,
}

#[derive(Debug, Deserialize)]
struct CancelBody {
    client_id: ClientId,
    session_id: SessionId,
}

#[derive(Debug, Deserialize)]
struct TopUidsBody {
    uids: Vec<Uid>,
}

fn error_status(error: &SchedulerError) -> StatusCode {
    match error {
        SchedulerError::DuplicateSession(_) => StatusCode::CONFLICT,
        SchedulerError::UnknownSession(_) => StatusCode::NOT_FOUND,
    }
}

/// Handler for GET /sessions: the full scheduler snapshot as JSON.
async fn get_sessions(State(state): State<AppState>) -> Json<SchedulerSnapshot> {
    Json(state.scheduler.snapshot())
}

/// Handler for GET /dump: the snapshot rendered as plain text.
async fn get_dump(State(state): State<AppState>) -> String {
    state.scheduler.snapshot().render_text()
}

/// Handler for GET /sessions/{client_id}/{session_id}: the stored request.
async fn get_session(
    State(state): State<AppState>,
    Path((client_id, session_id)): Path<(ClientId, SessionId)>,
) -> Result<Json<TranscodingRequest>, (StatusCode, String)> {
    state
        .scheduler
        .get_session(client_id, session_id)
        .map(Json)
        .map_err(|error| (error_status(&error), error.to_string()))
}

/// Handler for POST /sessions: submit a new session.
async fn submit_session(
    State(state): State<AppState>,
    Json(body): Json<SubmitBody>,
) -> Result<Json<SubmitResponse>, (StatusCode, String)> {
    let callback = state.client_callback(body.client_id);
    let strong: Arc<dyn ClientCallback> = callback;
    let request = TranscodingRequest {
        source_path: body.source_path,
        destination_path: body.destination_path,
        priority: body.priority,
    };
    state
        .scheduler
        .submit(
            body.client_id,
            body.session_id,
            body.uid,
            request,
            Arc::downgrade(&strong),
        )
        .map(|()| {
            Json(SubmitResponse {
                client_id: body.client_id,
                session_id: body.session_id,
            })
        })
        .map_err(|error| (error_status(&error), error.to_string()))
}

/// Handler for POST /sessions/cancel.
async fn cancel_session(
    State(state): State<AppState>,
    Json(body): Json<CancelBody>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .scheduler
        .cancel(body.client_id, body.session_id)
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|error| (error_status(&error), error.to_string()))
}

/// Handler for POST /policy/top-uids: inject a foreground uid set change.
async fn post_top_uids(State(state): State<AppState>, Json(body): Json<TopUidsBody>) -> StatusCode {
    state.scheduler.on_top_uids_changed(&body.uids);
    StatusCode::NO_CONTENT
}

/// Handler for POST /resource/lost.
async fn post_resource_lost(State(state): State<AppState>) -> StatusCode {
    state.scheduler.on_resource_lost();
    StatusCode::NO_CONTENT
}

/// Handler for POST /resource/available.
async fn post_resource_available(State(state): State<AppState>) -> StatusCode {
    state.scheduler.on_resource_available();
    StatusCode::NO_CONTENT
}

/// Creates the axum Router over the scheduler.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/sessions", get(get_sessions).post(submit_session))
        .route("/sessions/cancel", post(cancel_session))
        .route("/sessions/:client_id/:session_id", get(get_session))
        .route("/dump", get(get_dump))
        .route("/policy/top-uids", post(post_top_uids))
        .route("/resource/lost", post(post_resource_lost))
        .route("/resource/available", post(post_resource_available))
        .with_state(state)
}

/// Runs the HTTP server until it is shut down.
pub async fn run_server(
    scheduler: Arc<SessionScheduler>,
    addr: SocketAddr,
) -> Result<(), ServerError> {
    let app = create_router(AppState::new(scheduler));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "serving scheduler API");
    axum::serve(listener, app).await?;
    Ok(())
}
