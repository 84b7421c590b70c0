//! Iterative web research.
//!
//! A run plans search queries from the user's question, then loops: search,
//! fetch each result page, keep the pages the model judges useful, distill
//! them into contexts, and ask for follow-up queries. The loop stops when the
//! model has no more queries or the iteration limit is reached, and the
//! contexts are synthesized into a markdown report.
//!
//! ## Modules
//! - `orchestrator`: the loop and its state transitions
//! - `stages`: the language-model calls (plan, filter, extract, refine, report)
//! - `search` / `fetch`: SerpAPI and Jina Reader clients
//! - `session`: shared session state, cancellation, and the in-memory store
//! - `parse`: strict query-list parsing of model replies

pub mod fetch;
pub mod orchestrator;
pub mod parse;
pub mod prompts;
pub mod search;
pub mod session;
pub mod stages;
pub mod types;

pub use fetch::{JinaFetcher, PageFetcher};
pub use orchestrator::{Orchestrator, ResearchError};
pub use search::{SerpApiSearcher, WebSearcher};
pub use session::{SessionHandle, SessionStore};
pub use stages::ResearchModel;
pub use types::{LogEntry, PageResult, Phase, ResearchSession, SessionStatus, SessionSummary};
