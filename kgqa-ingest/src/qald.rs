//! QALD-style benchmark files.
//!
//! ```json
//! { "questions": [ { "id": "1",
//!                    "question": [ { "language": "en", "string": "..." } ],
//!                    "query": { "sparql": "SELECT ..." },
//!                    "answers": [ { "head": {...}, "results": { "bindings": [...] } } ] } ] }
//! ```
//!
//! Unknown keys are kept so a cleaned dataset can be written back unchanged.

use std::collections::BTreeSet;
use std::path::Path;

use kgqa_core::models::{Question, QuestionId};
use serde::{Deserialize, Serialize};

use crate::IngestError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaldDataset {
    pub questions: Vec<QaldQuestion>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaldQuestion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<QuestionId>,
    #[serde(default)]
    pub question: Vec<QaldText>,
    #[serde(default)]
    pub query: QaldQuery,
    #[serde(default)]
    pub answers: Vec<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaldText {
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub string: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QaldQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparql: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The gold answer of a question, as stored in the dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedAnswer {
    Values(BTreeSet<String>),
    Boolean(bool),
}

impl QaldDataset {
    pub fn load(path: &Path) -> Result<Self, IngestError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, IngestError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if value.get("questions").map_or(true, |q| !q.is_array()) {
            return Err(IngestError::Format(
                "expected an object with a 'questions' array".into(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Same top-level metadata, different question list.
    pub fn with_questions(&self, questions: Vec<QaldQuestion>) -> Self {
        Self {
            questions,
            extra: self.extra.clone(),
        }
    }
}

impl QaldQuestion {
    /// English question text, falling back to the first language present.
    pub fn english_text(&self) -> Option<&str> {
        self.question
            .iter()
            .find(|q| q.language == "en")
            .or_else(|| self.question.first())
            .map(|q| q.string.trim())
            .filter(|s| !s.is_empty())
    }

    pub fn sparql(&self) -> Option<&str> {
        self.query
            .sparql
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Identifier for logs; position-based when the dataset has none.
    pub fn display_id(&self, index: usize) -> QuestionId {
        self.id
            .clone()
            .unwrap_or_else(|| QuestionId::Text(format!("index_{index}")))
    }

    /// The first gold answer, `None` when it is missing or in an unknown format.
    pub fn expected_answer(&self) -> Option<ExpectedAnswer> {
        let answer = self.answers.first()?;
        if let Some(b) = answer.get("boolean").and_then(|b| b.as_bool()) {
            return Some(ExpectedAnswer::Boolean(b));
        }
        let bindings = answer.get("results")?.get("bindings")?.as_array()?;
        let mut values = BTreeSet::new();
        for row in bindings {
            let Some(row) = row.as_object() else {
                continue;
            };
            for term in row.values() {
                match term.get("value").and_then(|v| v.as_str()) {
                    Some(v) if !v.is_empty() => {
                        values.insert(v.to_string());
                    }
                    _ => tracing::debug!(term = %term, "Skipping gold binding without a value"),
                }
            }
        }
        Some(ExpectedAnswer::Values(values))
    }

    /// Convert to the harness' question model. Questions without text are dropped.
    pub fn to_question(&self, index: usize) -> Option<Question> {
        let text = self.english_text()?;
        Some(
            Question::new(self.display_id(index), text)
                .with_baseline(self.sparql().unwrap_or_default()),
        )
    }
}
