use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Benchmark identifiers are integers in some datasets and strings in others.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuestionId {
    Int(i64),
    Text(String),
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionId::Int(n) => write!(f, "{n}"),
            QuestionId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for QuestionId {
    fn from(n: i64) -> Self {
        QuestionId::Int(n)
    }
}

impl From<&str> for QuestionId {
    fn from(s: &str) -> Self {
        QuestionId::Text(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    /// Ground-truth query from the benchmark. May be empty or invalid.
    #[serde(default)]
    pub baseline_query: String,
    /// Mention → knowledge-graph identifier (e.g. `"Paris" → "Q90"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<BTreeMap<String, String>>,
    /// Inline shape text; takes precedence over the shape directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
}

impl Question {
    pub fn new(id: impl Into<QuestionId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            baseline_query: String::new(),
            entities: None,
            shape: None,
        }
    }

    pub fn with_baseline(mut self, query: impl Into<String>) -> Self {
        self.baseline_query = query.into();
        self
    }
}
