//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::llm::{LlmClient, OpenRouterClient};
use crate::research::{
    JinaFetcher, Orchestrator, ResearchModel, ResearchSession, SerpApiSearcher, SessionHandle,
    SessionStatus, SessionStore, SessionSummary,
};

use super::types::*;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// In-memory research sessions
    pub sessions: SessionStore,
    /// Language model client shared by all runs
    pub llm: Arc<dyn LlmClient>,
}

impl AppState {
    pub fn new(config: Config, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            config,
            sessions: SessionStore::new(),
            llm,
        }
    }

    /// Build the pipeline for one run, with its own HTTP client.
    fn orchestrator(&self) -> Orchestrator {
        let http = reqwest::Client::new();
        let research = &self.config.research;
        let model = ResearchModel::new(
            Arc::clone(&self.llm),
            self.config.default_model.clone(),
            research.max_queries,
            research.page_text_limit,
        );
        Orchestrator::new(
            model,
            Arc::new(SerpApiSearcher::from_config(http.clone(), &self.config.upstream)),
            Arc::new(JinaFetcher::from_config(http, &self.config.upstream)),
            research.max_urls_per_iteration,
        )
    }
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/research", get(list_research).post(create_research))
        .route(
            "/api/research/:id",
            get(get_research).delete(delete_research),
        )
        .route("/api/research/:id/stream", get(stream_research))
        .route("/api/research/:id/cancel", post(cancel_research))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let llm: Arc<dyn LlmClient> = Arc::new(OpenRouterClient::with_retry_policy(
        config.api_key.clone(),
        config.upstream.retry.clone(),
    ));
    let state = Arc::new(AppState::new(config.clone(), llm));
    let app = router(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal(shutdown_state).await;
        })
        .await?;

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then cancel running research.
async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    let cancelled = state.sessions.cancel_all().await;
    tracing::info!(
        "Shutdown signal received, cancelled {} running research sessions",
        cancelled
    );
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: state.config.default_model.clone(),
        sessions: state.sessions.len().await,
    })
}

/// List sessions, newest first.
async fn list_research(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSummary>> {
    Json(state.sessions.list().await)
}

/// Create a session and start its run in the background.
async fn create_research(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateResearchRequest>,
) -> Result<Json<CreateResearchResponse>, (StatusCode, String)> {
    let query = req.query.trim();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query must not be empty".to_string()));
    }
    if req.iteration_limit == Some(0) {
        return Err((
            StatusCode::BAD_REQUEST,
            "iteration_limit must be at least 1".to_string(),
        ));
    }

    let iteration_limit = state
        .config
        .research
        .resolve_iteration_limit(req.iteration_limit);
    let handle = SessionHandle::new(ResearchSession::new(query, iteration_limit));
    let id = handle.id();
    state.sessions.insert(handle.clone()).await;

    tracing::info!(session = %id, "Research requested: {:?} (limit {})", query, iteration_limit);
    spawn_run(&state, handle);

    Ok(Json(CreateResearchResponse {
        id,
        status: SessionStatus::Idle,
        iteration_limit,
    }))
}

/// Run the orchestrator on its own task and record a panic as a failure.
fn spawn_run(state: &AppState, handle: SessionHandle) {
    let orchestrator = state.orchestrator();
    let runner = handle.clone();
    let run = tokio::spawn(async move { orchestrator.run(&runner).await });

    tokio::spawn(async move {
        match run.await {
            Ok(status) => tracing::info!(session = %handle.id(), "Research finished: {:?}", status),
            Err(e) => {
                tracing::error!(session = %handle.id(), "Research task aborted: {}", e);
                handle.fail(format!("research task aborted: {}", e)).await;
            }
        }
    });
}

async fn find(state: &AppState, id: Uuid) -> Result<SessionHandle, (StatusCode, String)> {
    state
        .sessions
        .get(&id)
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Research {} not found", id)))
}

/// Get session status, log and report.
async fn get_research(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResearchResponse>, (StatusCode, String)> {
    let handle = find(&state, id).await?;
    Ok(Json(handle.snapshot().await.into()))
}

/// Cancel a running session.
async fn cancel_research(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let handle = find(&state, id).await?;
    if handle.cancel().await {
        Ok(Json(serde_json::json!({
            "success": true,
            "message": "Research cancellation requested"
        })))
    } else {
        let status = handle.status().await;
        Err((
            StatusCode::BAD_REQUEST,
            format!("Research {} is not running (status: {:?})", id, status),
        ))
    }
}

/// Discard a finished session.
async fn delete_research(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let handle = find(&state, id).await?;
    let status = handle.status().await;
    if !status.is_terminal() {
        return Err((
            StatusCode::CONFLICT,
            format!("Research {} is still {:?}; cancel it first", id, status),
        ));
    }
    state.sessions.remove(&id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Stream session progress via SSE.
async fn stream_research(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, (StatusCode, String)>
{
    let handle = find(&state, id).await?;

    // Poll the session and forward new log lines until it reaches a terminal status.
    let stream = async_stream::stream! {
        let mut sent = 0;

        loop {
            let status = handle.status().await;
            let entries = handle.log_since(sent).await;
            sent += entries.len();

            for entry in entries {
                let payload = serde_json::json!({
                    "timestamp": entry.timestamp,
                    "message": entry.message,
                    "line": entry.to_string(),
                });
                match Event::default().event("log").json_data(payload) {
                    Ok(event) => yield Ok(event),
                    Err(e) => tracing::warn!("Failed to encode log event: {}", e),
                }
            }

            if status.is_terminal() {
                let snapshot = handle.snapshot().await;
                let payload = serde_json::json!({
                    "status": snapshot.status,
                    "report": snapshot.report,
                    "error": snapshot.error,
                });
                match Event::default().event("done").json_data(payload) {
                    Ok(event) => yield Ok(event),
                    Err(e) => tracing::warn!("Failed to encode done event: {}", e),
                }
                break;
            }

            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, ChatResponse};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Every call fails, so runs end at the planner without network access.
    struct OfflineLlm;

    #[async_trait]
    impl LlmClient for OfflineLlm {
        async fn chat_completion(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
        ) -> anyhow::Result<ChatResponse> {
            Err(anyhow::anyhow!("offline"))
        }
    }

    /// Panics on the first call, as a bug inside a run would.
    struct PanickingLlm;

    #[async_trait]
    impl LlmClient for PanickingLlm {
        async fn chat_completion(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
        ) -> anyhow::Result<ChatResponse> {
            panic!("model client bug");
        }
    }

    fn state_with(llm: Arc<dyn LlmClient>) -> Arc<AppState> {
        let config = Config::new("key".into(), "test/model".into());
        Arc::new(AppState::new(config, llm))
    }

    fn state() -> Arc<AppState> {
        state_with(Arc::new(OfflineLlm))
    }

    async fn spawn_server(state: Arc<AppState>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn wait_terminal(handle: &SessionHandle) -> SessionStatus {
        for _ in 0..200 {
            let status = handle.status().await;
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session did not finish");
    }

    fn request(query: &str, iteration_limit: Option<usize>) -> Json<CreateResearchRequest> {
        Json(CreateResearchRequest {
            query: query.to_string(),
            iteration_limit,
        })
    }

    #[test]
    fn test_router_builds() {
        let _ = router(state());
    }

    #[tokio::test]
    async fn test_create_rejects_blank_query() {
        let err = create_research(State(state()), request("   ", None))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_rejects_zero_limit() {
        let err = create_research(State(state()), request("topic", Some(0)))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_clamps_limit_and_runs() {
        let state = state();
        let Json(created) = create_research(State(Arc::clone(&state)), request("topic", Some(99)))
            .await
            .unwrap();
        assert_eq!(created.iteration_limit, state.config.research.max_iteration_limit);

        let handle = state.sessions.get(&created.id).await.unwrap();
        assert_eq!(wait_terminal(&handle).await, SessionStatus::Failed);

        let Json(view) = get_research(State(Arc::clone(&state)), Path(created.id))
            .await
            .unwrap();
        assert!(view.session.report.is_none());
        assert!(view
            .rendered_log
            .contains("No initial queries could be generated"));
    }

    #[tokio::test]
    async fn test_finished_session_cannot_be_cancelled_but_can_be_deleted() {
        let state = state();
        let Json(created) = create_research(State(Arc::clone(&state)), request("topic", None))
            .await
            .unwrap();
        let handle = state.sessions.get(&created.id).await.unwrap();
        wait_terminal(&handle).await;

        let err = cancel_research(State(Arc::clone(&state)), Path(created.id))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);

        let status = delete_research(State(Arc::clone(&state)), Path(created.id))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.sessions.is_empty().await);
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let err = get_research(State(state()), Path(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_running_session_conflicts() {
        let state = state();
        let handle = SessionHandle::new(ResearchSession::new("topic", 1));
        handle.start().await;
        state.sessions.insert(handle.clone()).await;

        let err = delete_research(State(Arc::clone(&state)), Path(handle.id()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_health_reports_model() {
        let Json(health) = health(State(state())).await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.model, "test/model");
        assert_eq!(health.sessions, 0);
    }

    #[tokio::test]
    async fn test_stream_sends_log_lines_then_done() {
        let base = spawn_server(state()).await;
        let client = reqwest::Client::new();

        let created: serde_json::Value = client
            .post(format!("{}/api/research", base))
            .json(&serde_json::json!({"query": "impact of caffeine on sleep"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        // The body ends once the session is terminal.
        let body = tokio::time::timeout(
            Duration::from_secs(5),
            client
                .get(format!("{}/api/research/{}/stream", base, id))
                .send()
                .await
                .unwrap()
                .text(),
        )
        .await
        .expect("stream should close after the done event")
        .unwrap();

        assert!(body.matches("event: log").count() >= 3);
        assert!(body.contains("Starting research process..."));
        assert!(body.contains("No initial queries could be generated"));
        assert_eq!(body.matches("event: done").count(), 1);

        let done = body.split("event: done").nth(1).unwrap();
        assert!(done.contains(r#""status":"failed""#));
        assert!(done.contains(r#""report":null"#));
        let done_at = body.find("event: done").unwrap();
        assert!(body.rfind("event: log").unwrap() < done_at);
    }

    #[tokio::test]
    async fn test_stream_unknown_session_is_404() {
        let base = spawn_server(state()).await;
        let response = reqwest::get(format!("{}/api/research/{}/stream", base, Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_panicking_run_is_marked_failed() {
        let state = state_with(Arc::new(PanickingLlm));
        let Json(created) = create_research(State(Arc::clone(&state)), request("topic", None))
            .await
            .unwrap();
        let handle = state.sessions.get(&created.id).await.unwrap();

        assert_eq!(wait_terminal(&handle).await, SessionStatus::Failed);
        let snap = handle.snapshot().await;
        assert!(snap.report.is_none());
        assert!(snap.error.unwrap().starts_with("research task aborted"));
        assert!(snap
            .log
            .iter()
            .any(|e| e.message.starts_with("Error occurred: research task aborted")));
    }
}
