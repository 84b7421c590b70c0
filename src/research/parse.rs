//! Strict parser for query lists returned by the language model.
//!
//! The planner and refiner prompts ask for a JSON array of strings. Models
//! drift from that, so a few shapes are accepted, tried in order:
//!
//! 1. Surrounding backticks and code fences (with an optional `json` or
//!    `python` tag) are stripped.
//! 2. A JSON array of strings: `["a", "b"]`.
//! 3. A bracketed list of single- or double-quoted strings: `['a', "b"]`,
//!    with `\\`, `\'`, `\"`, `\n` and `\t` escapes.
//! 4. If the text has no brackets at all, one query per bulleted (`-`, `*`,
//!    `•`) or numbered (`1.`, `2)`) line, marker removed. Unmarked lines such
//!    as a preamble or a prose "no more queries" reply are dropped.
//!
//! Anything else yields an empty list. Entries are trimmed, blanks dropped,
//! and the result truncated to `max`. The input is only ever read as text.

use std::sync::OnceLock;

use regex::Regex;

/// Parse a model reply into at most `max` queries.
pub fn parse_query_list(response: &str, max: usize) -> Vec<String> {
    let body = strip_fences(response);
    if body.is_empty() {
        return Vec::new();
    }

    let items = if body.starts_with('[') {
        parse_json_array(body)
            .or_else(|| parse_quoted_list(body))
            .unwrap_or_default()
    } else if body.contains('[') || body.contains(']') {
        Vec::new()
    } else {
        parse_lines(body)
    };

    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .take(max)
        .collect()
}

fn strip_fences(response: &str) -> &str {
    let mut body = response.trim().trim_matches('`').trim();
    for tag in ["json", "python"] {
        if let Some(rest) = body.strip_prefix(tag) {
            let after = rest.trim_start();
            let tagged = rest.starts_with('\n') || rest.starts_with("\r\n");
            if tagged || after.starts_with('[') {
                body = after;
            }
        }
    }
    body
}

fn parse_json_array(body: &str) -> Option<Vec<String>> {
    serde_json::from_str::<Vec<String>>(body).ok()
}

/// Parse `['a', "b", ...]` without evaluating anything.
fn parse_quoted_list(body: &str) -> Option<Vec<String>> {
    let inner = body.strip_prefix('[')?.strip_suffix(']')?;
    let mut items = Vec::new();
    let mut chars = inner.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        let quote = match chars.next() {
            None => break,
            Some(q @ ('\'' | '"')) => q,
            Some(_) => return None,
        };

        let mut item = String::new();
        loop {
            match chars.next()? {
                '\\' => match chars.next()? {
                    'n' => item.push('\n'),
                    't' => item.push('\t'),
                    other @ ('\\' | '\'' | '"') => item.push(other),
                    other => {
                        item.push('\\');
                        item.push(other);
                    }
                },
                c if c == quote => break,
                c => item.push(c),
            }
        }
        items.push(item);

        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            None => break,
            Some(',') => continue,
            Some(_) => return None,
        }
    }

    Some(items)
}

fn list_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s+").expect("list marker pattern is valid")
    })
}

fn parse_lines(body: &str) -> Vec<String> {
    let marker = list_marker();
    body.lines()
        .filter_map(|line| {
            let found = marker.find(line)?;
            Some(&line[found.end()..])
        })
        .map(|line| {
            line.trim()
                .trim_matches(|c| c == '"' || c == '\'')
                .to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_array() {
        let queries = parse_query_list(r#"["caffeine sleep studies", "adenosine receptors"]"#, 4);
        assert_eq!(queries, vec!["caffeine sleep studies", "adenosine receptors"]);
    }

    #[test]
    fn parses_fenced_json() {
        let reply = "```json\n[\"a\", \"b\"]\n```";
        assert_eq!(parse_query_list(reply, 4), vec!["a", "b"]);
    }

    #[test]
    fn parses_single_quoted_literal() {
        let reply = "['query1', 'it\\'s query2', \"query3\"]";
        assert_eq!(
            parse_query_list(reply, 4),
            vec!["query1", "it's query2", "query3"]
        );
    }

    #[test]
    fn parses_bulleted_and_numbered_lines() {
        let reply = "1. first query\n2) second query\n- third query\n\n* fourth query\n• fifth";
        assert_eq!(
            parse_query_list(reply, 10),
            vec!["first query", "second query", "third query", "fourth query", "fifth"]
        );
    }

    #[test]
    fn truncates_to_max_and_drops_blanks() {
        let reply = r#"["a", " ", "b", "c", "d", "e"]"#;
        assert_eq!(parse_query_list(reply, 4), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn empty_list_means_stop() {
        assert!(parse_query_list("[]", 4).is_empty());
        assert!(parse_query_list("```\n[]\n```", 4).is_empty());
        assert!(parse_query_list("", 4).is_empty());
        assert!(parse_query_list("   \n  ", 4).is_empty());
    }

    #[test]
    fn rejects_code_and_malformed_lists() {
        assert!(parse_query_list("[os.system('ls')]", 4).is_empty());
        assert!(parse_query_list("['unterminated", 4).is_empty());
        assert!(parse_query_list("['a' 'b']", 4).is_empty());
        assert!(parse_query_list("Here you go: ['a', 'b']", 4).is_empty());
    }

    #[test]
    fn code_like_text_stays_inert() {
        assert!(parse_query_list("print('x')", 4).is_empty());
        assert_eq!(parse_query_list("- print('x')", 4), vec!["print('x')"]);
        assert_eq!(
            parse_query_list("- json parsing libraries", 4),
            vec!["json parsing libraries"]
        );
    }

    #[test]
    fn prose_reply_means_stop() {
        assert!(parse_query_list("No further queries are needed.", 4).is_empty());
        assert!(parse_query_list("The research is complete.\nNothing to add.", 4).is_empty());
    }

    #[test]
    fn preamble_line_is_dropped() {
        let reply = "Here are some queries:\n1. caffeine half life\n2. adenosine";
        assert_eq!(
            parse_query_list(reply, 4),
            vec!["caffeine half life", "adenosine"]
        );
    }

    #[test]
    fn parses_inline_fence_with_tag() {
        assert_eq!(parse_query_list("```json [\"a\"]```", 4), vec!["a"]);
        assert_eq!(parse_query_list("```python ['a', 'b']```", 4), vec!["a", "b"]);
    }

    #[test]
    fn non_string_json_is_rejected() {
        assert!(parse_query_list("[1, 2, 3]", 4).is_empty());
        assert!(parse_query_list(r#"[{"q": "a"}]"#, 4).is_empty());
    }
}
