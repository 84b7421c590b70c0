//! Prompt builders for each language-model stage.

use crate::llm::ChatMessage;

pub const PLANNER_SYSTEM: &str = "You are a helpful and precise research assistant.";
pub const RELEVANCE_SYSTEM: &str = "You are a strict and concise evaluator of research relevance.";
pub const EXTRACTION_SYSTEM: &str = "You are an expert in extracting relevant information.";
pub const REFINER_SYSTEM: &str = "You are a systematic research planner.";
pub const REPORT_SYSTEM: &str = "You are a skilled report writer.";

const LIST_FORMAT: &str = "Respond with a JSON array of plain strings and nothing else, \
     for example: [\"query one\", \"query two\"]. Do not include markdown, code blocks, \
     backticks, or explanations.";

pub fn planner(user_query: &str, max_queries: usize) -> Vec<ChatMessage> {
    let instructions = format!(
        "You are an expert research assistant. Given the user's query, generate up to {} \
         distinct, precise search queries that would help gather complete information on \
         the topic. {}",
        max_queries, LIST_FORMAT
    );
    vec![
        ChatMessage::system(PLANNER_SYSTEM),
        ChatMessage::user(format!("User Query: {}\n\n{}", user_query, instructions)),
    ]
}

pub fn relevance(user_query: &str, page_text: &str) -> Vec<ChatMessage> {
    let instructions = "You are a critical research evaluator. Given the user's query and the \
         content of a webpage, determine if the webpage contains information that is useful \
         for addressing the query. Respond with exactly one word: 'Yes' if the page is \
         useful, or 'No' if it is not.";
    vec![
        ChatMessage::system(RELEVANCE_SYSTEM),
        ChatMessage::user(format!(
            "User Query: {}\n\nWebpage Content:\n{}\n\n{}",
            user_query, page_text, instructions
        )),
    ]
}

pub fn extraction(user_query: &str, search_query: &str, page_text: &str) -> Vec<ChatMessage> {
    let instructions = "Extract all pieces of information that are useful for answering the \
         user's query. Return only the relevant context as plain text.";
    vec![
        ChatMessage::system(EXTRACTION_SYSTEM),
        ChatMessage::user(format!(
            "Query: {}\nSearch Query: {}\n\nContent:\n{}\n\n{}",
            user_query, search_query, page_text, instructions
        )),
    ]
}

pub fn refiner(
    user_query: &str,
    previous_queries: &[String],
    contexts: &[String],
    max_queries: usize,
) -> Vec<ChatMessage> {
    let previous = serde_json::to_string(previous_queries).unwrap_or_else(|_| "[]".to_string());
    let instructions = format!(
        "Based on the findings so far, generate up to {} new search queries if further \
         research is needed. If no more queries are needed, respond with []. {}",
        max_queries, LIST_FORMAT
    );
    vec![
        ChatMessage::system(REFINER_SYSTEM),
        ChatMessage::user(format!(
            "Query: {}\nPrevious: {}\nContexts:\n{}\n\n{}",
            user_query,
            previous,
            contexts.join("\n\n"),
            instructions
        )),
    ]
}

pub fn report(user_query: &str, contexts: &[String]) -> Vec<ChatMessage> {
    let instructions = "Write a complete, well-structured report based on the gathered \
         information in a markdown format. Include all useful insights and conclusions.";
    vec![
        ChatMessage::system(REPORT_SYSTEM),
        ChatMessage::user(format!(
            "Query: {}\nContexts:\n{}\n\n{}",
            user_query,
            contexts.join("\n\n"),
            instructions
        )),
    ]
}
