//! Pull the SPARQL text out of a model completion.

use std::sync::OnceLock;

use regex::Regex;

const FENCE: &str = "```";

fn fenced_block_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").ok())
        .as_ref()
}

fn query_keyword_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(select|ask|construct|describe|prefix)\b").ok())
        .as_ref()
}

fn looks_like_query(text: &str) -> bool {
    query_keyword_re().is_some_and(|re| re.is_match(text))
}

/// One fence: either the closer after a bare query, or an opener whose closer never
/// arrived (prose, then a fenced query cut off by the token limit).
fn single_fence(text: &str) -> &str {
    let (before, after) = text.split_once(FENCE).unwrap_or((text, ""));
    let tag_len = after
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(after.len());
    let body = after[tag_len..].trim();
    let before = before.trim();

    if body.is_empty() || (tag_len == 0 && looks_like_query(before)) {
        before
    } else {
        body
    }
}

/// Strip code fences from a completion.
///
/// The prompt ends inside an open ```` ```sparql ```` fence, so the usual answer is
/// the bare query followed by a closing fence. Answers that open their own fence are
/// handled too, as are answers that wrap the query in prose.
pub fn extract_query(output: &str) -> String {
    let text = output.trim();

    if let Some(rest) = text.strip_prefix(FENCE) {
        // Drop the language tag on the opening line.
        let body = match rest.find('\n') {
            Some(i) => &rest[i + 1..],
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
        };
        let body = match body.find(FENCE) {
            Some(end) => &body[..end],
            None => body,
        };
        return body.trim().to_string();
    }

    match text.matches(FENCE).count() {
        0 => text.to_string(),
        1 => single_fence(text).to_string(),
        _ => fenced_block_re()
            .and_then(|re| re.captures(text))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| text.replace(FENCE, "").trim().to_string()),
    }
}
