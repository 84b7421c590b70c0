//! Shared session context and the in-memory session store.
//!
//! A `SessionHandle` is what the orchestrator mutates and what API readers
//! snapshot. Locks are held only for the duration of a single update.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::{LogEntry, Phase, ResearchSession, SessionStatus, SessionSummary};

/// Cloneable handle to one research session.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    inner: Arc<RwLock<ResearchSession>>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn new(session: ResearchSession) -> Self {
        Self {
            id: session.id,
            inner: Arc::new(RwLock::new(session)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Request cancellation. Returns false if the session already finished.
    pub async fn cancel(&self) -> bool {
        if self.status().await.is_terminal() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    pub async fn snapshot(&self) -> ResearchSession {
        self.inner.read().await.clone()
    }

    pub async fn summary(&self) -> SessionSummary {
        self.inner.read().await.summary()
    }

    pub async fn status(&self) -> SessionStatus {
        self.inner.read().await.status
    }

    pub async fn user_query(&self) -> String {
        self.inner.read().await.user_query.clone()
    }

    pub async fn iteration_limit(&self) -> usize {
        self.inner.read().await.iteration_limit
    }

    pub async fn contexts(&self) -> Vec<String> {
        self.inner.read().await.accumulated_contexts.clone()
    }

    /// Log entries after the first `offset`, for incremental readers.
    pub async fn log_since(&self, offset: usize) -> Vec<LogEntry> {
        let session = self.inner.read().await;
        session.log.iter().skip(offset).cloned().collect()
    }

    pub async fn log(&self, message: impl Into<String>) {
        let entry = LogEntry::new(message);
        tracing::info!(session = %self.id, "{}", entry.message);
        self.inner.write().await.log.push(entry);
    }

    pub async fn set_phase(&self, phase: Phase) {
        self.inner.write().await.phase = phase;
    }

    pub async fn start(&self) {
        let mut session = self.inner.write().await;
        session.status = SessionStatus::Running;
        session.phase = Phase::Start;
        session.report = None;
        session.error = None;
    }

    /// Append contexts. Empty strings are dropped; nothing is ever removed.
    pub async fn append_contexts(&self, contexts: Vec<String>) {
        let mut session = self.inner.write().await;
        session
            .accumulated_contexts
            .extend(contexts.into_iter().filter(|c| !c.is_empty()));
    }

    pub async fn complete_iteration(&self) {
        let mut session = self.inner.write().await;
        if session.iterations_completed < session.iteration_limit {
            session.iterations_completed += 1;
        }
    }

    pub async fn finish(&self, report: String) {
        let mut session = self.inner.write().await;
        session.status = SessionStatus::Done;
        session.phase = Phase::Done;
        session.report = Some(report);
    }

    /// End the run without a report. The message is logged as an error line.
    pub async fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        self.log(format!("Error occurred: {}", message)).await;
        self.mark_failed(message).await;
    }

    /// Set the failed state without adding a log line.
    pub async fn mark_failed(&self, message: impl Into<String>) {
        let message = message.into();
        let mut session = self.inner.write().await;
        session.status = SessionStatus::Failed;
        session.phase = Phase::Failed;
        session.report = None;
        session.error = Some(message);
    }

    pub async fn mark_cancelled(&self) {
        self.log("Research cancelled").await;
        let mut session = self.inner.write().await;
        session.status = SessionStatus::Cancelled;
        session.phase = Phase::Cancelled;
        session.report = None;
    }
}

/// In-memory registry of sessions, keyed by id. Nothing survives a restart.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, handle: SessionHandle) {
        self.sessions.write().await.insert(handle.id(), handle);
    }

    pub async fn get(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &Uuid) -> Option<SessionHandle> {
        self.sessions.write().await.remove(id)
    }

    /// Summaries, newest first.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            summaries.push(handle.summary().await);
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Cancel every running session (used on shutdown).
    pub async fn cancel_all(&self) -> usize {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
        let mut cancelled = 0;
        for handle in handles {
            if handle.cancel().await {
                cancelled += 1;
            }
        }
        cancelled
    }
}
