//! Language-model stages of the research loop.
//!
//! Each stage turns its failure into a sentinel (empty list, `false`, empty
//! string, fallback report) and logs the cause. None of them return errors.

use std::sync::Arc;

use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use crate::util::truncate_chars;

use super::parse::parse_query_list;
use super::prompts;

/// Report text used when synthesis fails.
pub const REPORT_FALLBACK: &str = "Unable to generate report.";

/// The filter only needs a one-word verdict.
const RELEVANCE_MAX_TOKENS: u64 = 8;

/// Whether a relevance reply counts as "useful".
///
/// True only when the reply, trimmed and lowercased, is exactly `yes`.
pub fn verdict_is_yes(response: &str) -> bool {
    response.trim().to_lowercase() == "yes"
}

/// The language-model half of the pipeline, bound to one model.
#[derive(Clone)]
pub struct ResearchModel {
    llm: Arc<dyn LlmClient>,
    model: String,
    max_queries: usize,
    page_text_limit: usize,
}

impl ResearchModel {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        max_queries: usize,
        page_text_limit: usize,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            max_queries,
            page_text_limit,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One completion; `None` on error or an empty reply.
    async fn complete(&self, stage: &str, messages: Vec<ChatMessage>) -> Option<String> {
        self.complete_with(stage, messages, ChatOptions::default())
            .await
    }

    async fn complete_with(
        &self,
        stage: &str,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Option<String> {
        match self
            .llm
            .chat_completion_with_options(&self.model, &messages, options)
            .await
        {
            Ok(response) => {
                tracing::debug!(
                    "{} reply from {} (finish_reason={})",
                    stage,
                    response.model.as_deref().unwrap_or(&self.model),
                    response.finish_reason.as_deref().unwrap_or("unknown")
                );
                if response.finish_reason.as_deref() == Some("length") {
                    tracing::warn!("{} reply was cut at the token limit", stage);
                }
                let content = response.content.filter(|c| !c.trim().is_empty());
                if content.is_none() {
                    tracing::debug!("{} returned an empty reply", stage);
                }
                content
            }
            Err(e) => {
                tracing::warn!("{} model call failed: {}", stage, e);
                None
            }
        }
    }

    /// Initial search queries for a user query. Empty means "cannot proceed".
    pub async fn plan_queries(&self, user_query: &str) -> Vec<String> {
        let messages = prompts::planner(user_query, self.max_queries);
        match self.complete("planner", messages).await {
            Some(reply) => parse_query_list(&reply, self.max_queries),
            None => Vec::new(),
        }
    }

    pub async fn is_useful(&self, user_query: &str, page_text: &str) -> bool {
        let page = truncate_chars(page_text, self.page_text_limit);
        let options = ChatOptions {
            temperature: Some(0.0),
            max_tokens: Some(RELEVANCE_MAX_TOKENS),
        };
        self.complete_with("relevance filter", prompts::relevance(user_query, page), options)
            .await
            .map(|reply| verdict_is_yes(&reply))
            .unwrap_or(false)
    }

    pub async fn extract_context(
        &self,
        user_query: &str,
        search_query: &str,
        page_text: &str,
    ) -> String {
        let page = truncate_chars(page_text, self.page_text_limit);
        self.complete(
            "context extractor",
            prompts::extraction(user_query, search_query, page),
        )
        .await
        .map(|reply| reply.trim().to_string())
        .unwrap_or_default()
    }

    /// Follow-up queries. Empty means "stop iterating".
    pub async fn refine_queries(
        &self,
        user_query: &str,
        previous_queries: &[String],
        contexts: &[String],
    ) -> Vec<String> {
        let messages = prompts::refiner(user_query, previous_queries, contexts, self.max_queries);
        match self.complete("query refiner", messages).await {
            Some(reply) => parse_query_list(&reply, self.max_queries),
            None => Vec::new(),
        }
    }

    pub async fn synthesize_report(&self, user_query: &str, contexts: &[String]) -> String {
        self.complete("report synthesizer", prompts::report(user_query, contexts))
            .await
            .unwrap_or_else(|| REPORT_FALLBACK.to_string())
    }
}
