//! HTTP API for the research service.
//!
//! ## Endpoints
//!
//! - `POST /api/research` - Start a research run
//! - `GET /api/research` - List sessions
//! - `GET /api/research/{id}` - Get session status, log and report
//! - `GET /api/research/{id}/stream` - Stream log lines via SSE
//! - `POST /api/research/{id}/cancel` - Cancel a running session
//! - `DELETE /api/research/{id}` - Discard a finished session
//! - `GET /api/health` - Health check

mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
