//! Core types for a research run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a research session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, not yet picked up by a runner
    Idle,
    Running,
    /// Report produced
    Done,
    /// Aborted with an error, no report
    Failed,
    /// Stopped through the cancellation token, no report
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

/// Orchestrator state, finer grained than `SessionStatus`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    Planning,
    Iterating,
    Refining,
    Synthesizing,
    Done,
    Failed,
    Cancelled,
}

/// One timestamped progress line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// State of one research submission.
///
/// # Invariants
/// - `accumulated_contexts` only grows and never holds an empty string
/// - `report` is set only when `status == Done`
/// - `iterations_completed <= iteration_limit`
#[derive(Debug, Clone, Serialize)]
pub struct ResearchSession {
    pub id: Uuid,
    pub user_query: String,
    pub iteration_limit: usize,
    pub accumulated_contexts: Vec<String>,
    pub log: Vec<LogEntry>,
    pub status: SessionStatus,
    pub phase: Phase,
    pub iterations_completed: usize,
    pub report: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ResearchSession {
    pub fn new(user_query: impl Into<String>, iteration_limit: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_query: user_query.into(),
            iteration_limit,
            accumulated_contexts: Vec::new(),
            log: Vec::new(),
            status: SessionStatus::Idle,
            phase: Phase::Start,
            iterations_completed: 0,
            report: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// The log rendered as newline-separated `[HH:MM:SS] message` lines.
    pub fn rendered_log(&self) -> String {
        self.log
            .iter()
            .map(|entry| entry.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            user_query: self.user_query.clone(),
            status: self.status,
            phase: self.phase,
            iterations_completed: self.iterations_completed,
            contexts: self.accumulated_contexts.len(),
            created_at: self.created_at,
        }
    }
}

/// Compact listing view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub user_query: String,
    pub status: SessionStatus,
    pub phase: Phase,
    pub iterations_completed: usize,
    pub contexts: usize,
    pub created_at: DateTime<Utc>,
}

/// Outcome of processing one search result URL.
#[derive(Debug, Clone)]
pub struct PageResult {
    pub url: String,
    /// The query whose search produced this URL
    pub search_query: String,
    pub raw_text: String,
    pub is_useful: bool,
    pub extracted_context: Option<String>,
}

impl PageResult {
    pub(crate) fn empty(url: &str, search_query: &str) -> Self {
        Self {
            url: url.to_string(),
            search_query: search_query.to_string(),
            raw_text: String::new(),
            is_useful: false,
            extracted_context: None,
        }
    }
}
