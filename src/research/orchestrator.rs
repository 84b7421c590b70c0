//! The research loop.
//!
//! ```text
//! start ─► planning ─► iterating ─► refining ─┬─► synthesizing ─► done
//!              │           ▲                   │
//!              │           └── new queries ────┘
//!              └─► failed (no initial queries)
//! ```
//!
//! Every outbound call runs one at a time and races the session's
//! cancellation token. Each iteration looks at most `max_urls_per_iteration`
//! URLs across all of its queries, and each URL keeps the query that found it.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::util::preview;

use super::fetch::PageFetcher;
use super::search::WebSearcher;
use super::session::SessionHandle;
use super::stages::ResearchModel;
use super::types::{PageResult, Phase, SessionStatus};

#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("No initial queries could be generated")]
    NoInitialQueries,

    #[error("Research cancelled")]
    Cancelled,

    #[error("Invalid session: {0}")]
    InvalidSession(String),
}

/// Drives one session through the pipeline.
pub struct Orchestrator {
    model: ResearchModel,
    searcher: Arc<dyn WebSearcher>,
    fetcher: Arc<dyn PageFetcher>,
    max_urls_per_iteration: usize,
}

impl Orchestrator {
    pub fn new(
        model: ResearchModel,
        searcher: Arc<dyn WebSearcher>,
        fetcher: Arc<dyn PageFetcher>,
        max_urls_per_iteration: usize,
    ) -> Self {
        Self {
            model,
            searcher,
            fetcher,
            max_urls_per_iteration,
        }
    }

    /// Run the session to a terminal status and return it.
    ///
    /// The outcome (report, error, log) is recorded on the session itself.
    pub async fn run(&self, session: &SessionHandle) -> SessionStatus {
        tracing::info!(session = %session.id(), model = self.model.model(), "Research run starting");
        session.start().await;
        session.log("Starting research process...").await;

        match self.execute(session).await {
            Ok(report) => {
                session.log("Research process completed successfully").await;
                session.finish(report).await;
            }
            Err(ResearchError::Cancelled) => session.mark_cancelled().await,
            Err(err @ ResearchError::NoInitialQueries) => {
                session.log(err.to_string()).await;
                session.mark_failed(err.to_string()).await;
            }
            Err(err) => session.fail(err.to_string()).await,
        }

        session.status().await
    }

    async fn execute(&self, session: &SessionHandle) -> Result<String, ResearchError> {
        let user_query = session.user_query().await;
        let iteration_limit = session.iteration_limit().await;
        if iteration_limit == 0 {
            return Err(ResearchError::InvalidSession(
                "iteration limit must be at least 1".to_string(),
            ));
        }

        session.set_phase(Phase::Planning).await;
        session.log("Generating initial search queries...").await;
        let mut queries = guarded(session, self.model.plan_queries(&user_query)).await?;
        if queries.is_empty() {
            return Err(ResearchError::NoInitialQueries);
        }
        session
            .log(format!(
                "Generated {} initial queries: {}",
                queries.len(),
                queries.join(", ")
            ))
            .await;

        for iteration in 0..iteration_limit {
            session.set_phase(Phase::Iterating).await;
            session
                .log(format!("Starting research iteration {}", iteration + 1))
                .await;

            let links = self.collect_links(session, &queries).await?;
            session
                .log(format!("Found {} links to process", links.len()))
                .await;

            let mut extracted = 0;
            for (search_query, url) in &links {
                session.log(format!("Processing link: {}", url)).await;
                let page = self
                    .process_link(session, &user_query, search_query, url)
                    .await?;
                match page.extracted_context {
                    Some(context) => {
                        session
                            .log("Successfully extracted relevant information")
                            .await;
                        session.append_contexts(vec![context]).await;
                        extracted += 1;
                    }
                    None => session.log("No useful information found in link").await,
                }
            }
            session
                .log(format!("Extracted information from {} sources", extracted))
                .await;
            session.complete_iteration().await;

            session.set_phase(Phase::Refining).await;
            let contexts = session.contexts().await;
            let next = guarded(
                session,
                self.model.refine_queries(&user_query, &queries, &contexts),
            )
            .await?;

            if next.is_empty() {
                session
                    .log("No more queries needed, research complete")
                    .await;
                break;
            }
            if iteration + 1 == iteration_limit {
                session
                    .log(format!(
                        "Iteration limit of {} reached, skipping {} follow-up queries",
                        iteration_limit,
                        next.len()
                    ))
                    .await;
                break;
            }
            session
                .log(format!(
                    "Generated {} new queries for next iteration",
                    next.len()
                ))
                .await;
            queries = next;
        }

        session.set_phase(Phase::Synthesizing).await;
        session.log("Generating final research report...").await;
        let contexts = session.contexts().await;
        let report = guarded(
            session,
            self.model.synthesize_report(&user_query, &contexts),
        )
        .await?;
        Ok(report)
    }

    /// Search each query in order until the per-iteration URL cap is hit.
    ///
    /// Returns `(search_query, url)` pairs. Duplicate URLs are kept.
    async fn collect_links(
        &self,
        session: &SessionHandle,
        queries: &[String],
    ) -> Result<Vec<(String, String)>, ResearchError> {
        let cap = self.max_urls_per_iteration;
        let mut links: Vec<(String, String)> = Vec::new();

        for query in queries {
            if links.len() >= cap {
                break;
            }
            session.log(format!("Searching for: {}", query)).await;
            let results = guarded(session, self.searcher.search(query)).await?;
            let room = cap - links.len();
            links.extend(
                results
                    .into_iter()
                    .take(room)
                    .map(|url| (query.clone(), url)),
            );
        }

        Ok(links)
    }

    /// Fetch → filter → extract for one URL.
    async fn process_link(
        &self,
        session: &SessionHandle,
        user_query: &str,
        search_query: &str,
        url: &str,
    ) -> Result<PageResult, ResearchError> {
        let mut page = PageResult::empty(url, search_query);

        page.raw_text = guarded(session, self.fetcher.fetch(url)).await?;
        if page.raw_text.trim().is_empty() {
            tracing::debug!("No text fetched from {}", url);
            return Ok(page);
        }
        tracing::debug!(
            "Fetched {} chars from {}: {}",
            page.raw_text.chars().count(),
            url,
            preview(&page.raw_text, 80)
        );

        page.is_useful = guarded(session, self.model.is_useful(user_query, &page.raw_text)).await?;
        if !page.is_useful {
            return Ok(page);
        }

        let context = guarded(
            session,
            self.model
                .extract_context(user_query, search_query, &page.raw_text),
        )
        .await?;
        if !context.is_empty() {
            page.extracted_context = Some(context);
        }
        Ok(page)
    }
}

/// Await `fut` unless the session is cancelled first.
async fn guarded<F: Future>(session: &SessionHandle, fut: F) -> Result<F::Output, ResearchError> {
    let token = session.cancel_token();
    if token.is_cancelled() {
        return Err(ResearchError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(ResearchError::Cancelled),
        out = fut => Ok(out),
    }
}
