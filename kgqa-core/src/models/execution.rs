use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Non-success HTTP status from the endpoint.
    Http,
    /// Connection, DNS or TLS failure.
    Network,
    /// Response body was not valid SPARQL-results JSON.
    Decode,
    /// Query text could not be parsed.
    Parse,
    /// Query parsed but evaluation failed.
    Query,
    Io,
    /// Query form the flattener cannot represent (CONSTRUCT / DESCRIBE).
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of running one query: flat bound values, or a typed error. Never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionResult {
    Bindings(Vec<String>),
    Error(ErrorDescriptor),
}

impl ExecutionResult {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        ExecutionResult::Error(ErrorDescriptor {
            kind,
            message: message.into(),
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ExecutionResult::Error(_))
    }

    /// Bound values; an error yields an empty slice.
    pub fn values(&self) -> &[String] {
        match self {
            ExecutionResult::Bindings(values) => values,
            ExecutionResult::Error(_) => &[],
        }
    }

    /// Render for prompt feedback, cut at `max_chars` characters.
    pub fn render_truncated(&self, max_chars: usize) -> String {
        let full = self.to_string();
        if full.chars().count() <= max_chars {
            return full;
        }
        let mut cut: String = full.chars().take(max_chars).collect();
        cut.push_str(" …(truncated)");
        cut
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionResult::Bindings(values) => write!(f, "{values:?}"),
            ExecutionResult::Error(e) => write!(f, "error ({:?}): {}", e.kind, e.message),
        }
    }
}
