//! API request and response types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::research::{ResearchSession, SessionStatus};

/// Request to start a research run.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateResearchRequest {
    /// Free-text research question
    pub query: String,

    /// Refine-and-repeat cycles before the report is forced (default from config)
    pub iteration_limit: Option<usize>,
}

/// Response after creating a research session.
#[derive(Debug, Clone, Serialize)]
pub struct CreateResearchResponse {
    pub id: Uuid,
    pub status: SessionStatus,
    pub iteration_limit: usize,
}

/// Full session state plus the log pre-rendered as text.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchResponse {
    #[serde(flatten)]
    pub session: ResearchSession,

    /// `[HH:MM:SS] message` lines joined by newlines
    pub rendered_log: String,
}

impl From<ResearchSession> for ResearchResponse {
    fn from(session: ResearchSession) -> Self {
        let rendered_log = session.rendered_log();
        Self {
            session,
            rendered_log,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,

    /// Language model used by every stage
    pub model: String,

    /// Sessions currently held in memory
    pub sessions: usize,
}
