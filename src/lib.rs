//! # Deep Researcher
//!
//! Iterative web research driven by a language model.
//!
//! Given a question, the service plans search queries, searches the web,
//! fetches result pages as text, keeps the pages the model judges relevant,
//! extracts the passages that matter, asks for follow-up queries, and
//! finally writes a markdown report from everything it gathered.
//!
//! ## Research Flow
//! 1. Receive a question via the API
//! 2. Plan initial queries
//! 3. Search, fetch, filter and extract for each query (bounded per iteration)
//! 4. Refine queries and repeat until done or the iteration limit is hit
//! 5. Synthesize the report; progress streams as log lines
//!
//! ## Modules
//! - `research`: the pipeline, session state and upstream clients
//! - `llm`: chat-completion client (OpenRouter)
//! - `retry`: bounded retry for upstream calls
//! - `api`: HTTP endpoints

pub mod api;
pub mod config;
pub mod llm;
pub mod research;
pub mod retry;
pub mod util;

pub use config::Config;
pub use research::{Orchestrator, ResearchSession, SessionHandle, SessionStatus};
