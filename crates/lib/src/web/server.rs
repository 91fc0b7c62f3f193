//! HTTP server: chat page, archive page, JSON/SSE API (single port).

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;

use crate::archive::{Archive, ArchiveError, NO_ARCHIVES_NOTICE};
use crate::chat::{ChatEvent, Orchestrator};
use crate::config::{self, Config};
use crate::llm::{install_hint, ChatBackend, ModelDirectory, OllamaClient, NO_MODELS_WARNING};
use crate::session::SessionStore;
use crate::web::pages;
use crate::web::protocol::{
    ApiError, ArchiveList, ArchiveRows, Archived, ChatParams, JsonBody, SessionCreated, TurnList,
};

/// Shared state for the server (config, sessions, chat, models, archive).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    pub orchestrator: Orchestrator,
    pub models: Arc<ModelDirectory>,
    pub archive: Arc<Archive>,
}

impl AppState {
    /// State backed by the Ollama server named in config.
    pub fn from_config(config: Config) -> Self {
        let backend: Arc<dyn ChatBackend> = Arc::new(OllamaClient::new(Some(
            config::resolve_ollama_base_url(&config),
        )));
        Self::with_backend(config, backend)
    }

    pub fn with_backend(config: Config, backend: Arc<dyn ChatBackend>) -> Self {
        let model = config::resolve_model(&config);
        Self {
            archive: Arc::new(Archive::new(config.archive.directory.clone())),
            orchestrator: Orchestrator::new(backend.clone(), model.clone()),
            models: Arc::new(ModelDirectory::new(backend, model)),
            sessions: Arc::new(SessionStore::new()),
            config: Arc::new(config),
        }
    }
}

/// All routes bound to `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(chat_page))
        .route("/archive", get(archive_page))
        .route("/health", get(health_http))
        .route("/api/models", get(list_models))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", delete(discard_session))
        .route("/api/sessions/:id/turns", get(session_turns))
        .route("/api/sessions/:id/chat", post(chat))
        .route("/api/sessions/:id/archive", post(archive_session))
        .route("/api/archives", get(list_archives))
        .route("/api/archives/:file", get(load_archive))
        .with_state(state)
}

/// Run the server until Ctrl+C or SIGTERM.
pub async fn run_server(config: Config) -> Result<()> {
    let bind = config.server.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) {
        log::warn!(
            "binding to non-loopback address {}; the chat API has no authentication",
            bind
        );
    }
    let port = config.server.port;
    let state = AppState::from_config(config);
    log::info!(
        "using model {} (archive directory {})",
        state.orchestrator.model(),
        state.archive.dir().display()
    );

    {
        let models = state.models.clone();
        tokio::spawn(async move {
            models.refresh().await;
        });
    }

    let app = router(state);
    let bind_addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("chat server listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("chat server exited")?;
    log::info!("chat server stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

async fn chat_page() -> Html<&'static str> {
    Html(pages::CHAT_HTML)
}

async fn archive_page() -> Html<&'static str> {
    Html(pages::ARCHIVE_HTML)
}

/// GET /health returns a simple health JSON (for probes).
async fn health_http(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.server.port,
        "model": state.orchestrator.model(),
    }))
}

/// GET /api/models re-queries the inference server.
async fn list_models(State(state): State<AppState>) -> Response {
    let listing = state.models.refresh().await;
    let report = state.models.report(&listing);
    let status = if report.error.is_some() {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::OK
    };
    (status, Json(report)).into_response()
}

async fn create_session(State(state): State<AppState>) -> Json<SessionCreated> {
    let session_id = state.sessions.create().await;
    log::debug!("session {} started", session_id);
    Json(SessionCreated { session_id })
}

async fn discard_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.remove(&id).await {
        log::debug!("session {} discarded", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::new(StatusCode::NOT_FOUND, format!("session not found: {}", id)))
    }
}

async fn session_turns(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TurnList>, ApiError> {
    let session = state
        .sessions
        .get(&id)
        .await
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("session not found: {}", id)))?;
    Ok(Json(TurnList {
        turns: session.turns().to_vec(),
    }))
}

/// POST /api/sessions/{id}/chat streams the reply as SSE events `chunk`, then `done` or `error`.
async fn chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(params): JsonBody<ChatParams>,
) -> Result<Response, ApiError> {
    if state.models.chat_blocked().await {
        return Err(ApiError::new(StatusCode::SERVICE_UNAVAILABLE, NO_MODELS_WARNING)
            .with_hint(install_hint(state.models.selected())));
    }
    let Some(reply) = state
        .orchestrator
        .submit(&state.sessions, &id, &params.prompt)
        .await?
    else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    let events = reply.map(|event| Ok::<_, Infallible>(sse_event(event)));
    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}

fn sse_event(event: ChatEvent) -> Event {
    let encoded = match &event {
        ChatEvent::Chunk(text) => Event::default().event("chunk").json_data(text),
        ChatEvent::Done(turn) => Event::default().event("done").json_data(turn),
        ChatEvent::Error(message) => Event::default().event("error").json_data(message),
    };
    encoded.unwrap_or_else(|e| {
        log::warn!("failed to encode chat event: {}", e);
        Event::default().event("error").data("\"event encoding failed\"")
    })
}

/// Run an archive operation on the blocking pool.
async fn with_archive<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Archive) -> Result<T, ArchiveError> + Send + 'static,
{
    let archive = state.archive.clone();
    let result = tokio::task::spawn_blocking(move || op(archive.as_ref()))
        .await
        .map_err(|e| {
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("archive task failed: {}", e),
            )
        })?;
    result.map_err(|e| {
        log::warn!("archive operation failed: {}", e);
        ApiError::from(e)
    })
}

async fn archive_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Archived>, ApiError> {
    let session = state
        .sessions
        .get(&id)
        .await
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("session not found: {}", id)))?;
    let path = with_archive(&state, move |archive| archive.export(session.turns())).await?;
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Json(Archived {
        file,
        path: path.display().to_string(),
    }))
}

async fn list_archives(State(state): State<AppState>) -> Result<Json<ArchiveList>, ApiError> {
    let files = with_archive(&state, |archive| archive.list()).await?;
    let notice = if files.is_empty() {
        Some(NO_ARCHIVES_NOTICE.to_string())
    } else {
        None
    };
    Ok(Json(ArchiveList { files, notice }))
}

async fn load_archive(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<Json<ArchiveRows>, ApiError> {
    let name = file.clone();
    let rows = with_archive(&state, move |archive| archive.load(&name)).await?;
    Ok(Json(ArchiveRows { file, rows }))
}
