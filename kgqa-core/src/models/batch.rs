//! Persisted batch state: the evaluation audit trail.
//!
//! A batch file is a versioned JSON object. Every stage fills in its own fields on
//! each [`QuestionRecord`] and rewrites the whole file atomically (temp file in the
//! same directory, then rename), so a crash never leaves a half-written file.
//!
//! The older script output (a bare JSON array with `id` / `question_text` /
//! `sparql_query` / `wikidata_entities_resolved` keys) is migrated on load. Any
//! other shape is rejected.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use uuid::Uuid;

use super::attempt::{Attempt, RetryStatus, TransientFailure};
use super::comparison::Comparison;
use super::execution::ExecutionResult;
use super::question::{Question, QuestionId};
use crate::llm::TokenUsage;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("IO error on batch file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed batch JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported batch schema version {found}; this build reads version 1")]
    UnsupportedVersion { found: u64 },

    #[error("Unrecognised batch file shape: {0}")]
    UnknownShape(String),

    #[error("Legacy entry #{index} cannot be migrated: {reason}")]
    Legacy { index: usize, reason: String },

    #[error("Invalid batch: {0}")]
    Invalid(String),
}

/// Per-question audit entry. Fields are only ever added by later stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub question: Question,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<Attempt>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transient_failures: Vec<TransientFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RetryStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_result: Option<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl QuestionRecord {
    pub fn new(question: Question) -> Self {
        Self {
            question,
            attempts: Vec::new(),
            transient_failures: Vec::new(),
            status: None,
            baseline_result: None,
            comparison: None,
            usage: TokenUsage::default(),
        }
    }

    /// The last logical attempt: the query whose result is scored.
    pub fn final_attempt(&self) -> Option<&Attempt> {
        self.attempts.last()
    }

    /// Generation has already run for this question.
    pub fn is_generated(&self) -> bool {
        self.status.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFile {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub questions: Vec<QuestionRecord>,
}

impl BatchFile {
    pub fn new(questions: Vec<Question>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            run_id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: None,
            questions: questions.into_iter().map(QuestionRecord::new).collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, BatchError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, BatchError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;

        let batch = if let Some(version) = value.get("schema_version") {
            let found = version.as_u64().ok_or_else(|| {
                BatchError::UnknownShape("schema_version is not an integer".into())
            })?;
            if found != SCHEMA_VERSION as u64 {
                return Err(BatchError::UnsupportedVersion { found });
            }
            serde_json::from_value::<BatchFile>(value)?
        } else if value.get("questions").is_some() {
            return Err(BatchError::UnknownShape(
                "this looks like a raw QALD dataset; run `kgqa import` first".into(),
            ));
        } else {
            match value {
                serde_json::Value::Array(entries) => migrate_legacy(entries)?,
                _ => {
                    return Err(BatchError::UnknownShape(
                        "expected a versioned batch object or a legacy question array".into(),
                    ))
                }
            }
        };

        batch.validate()?;
        Ok(batch)
    }

    fn validate(&self) -> Result<(), BatchError> {
        let mut seen = HashSet::new();
        for record in &self.questions {
            let q = &record.question;
            if q.text.trim().is_empty() {
                return Err(BatchError::Invalid(format!("question {} has no text", q.id)));
            }
            if !seen.insert(&q.id) {
                return Err(BatchError::Invalid(format!("duplicate question id {}", q.id)));
            }
        }
        Ok(())
    }

    /// Atomically rewrite `path` with the current state. A batch that would not
    /// load again is refused before anything touches the disk.
    pub fn save(&mut self, path: &Path) -> Result<(), BatchError> {
        self.validate()?;
        self.updated_at = Some(Utc::now());

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| BatchError::Io(e.error))?;

        tracing::debug!(path = %path.display(), questions = self.questions.len(), "Batch file saved");
        Ok(())
    }
}

/// The pre-versioned script format. Only the question-defining keys survive;
/// results stored by the old scripts are dropped and recomputed.
#[derive(Debug, Deserialize)]
struct LegacyEntry {
    #[serde(default, alias = "baseline_id")]
    id: Option<serde_json::Value>,
    #[serde(default, alias = "baseline_question_text")]
    question_text: Option<String>,
    #[serde(default, alias = "baseline_sparql_query")]
    sparql_query: Option<String>,
    #[serde(default)]
    wikidata_entities_resolved: Option<serde_json::Value>,
}

fn migrate_legacy(entries: Vec<serde_json::Value>) -> Result<BatchFile, BatchError> {
    let mut questions = Vec::with_capacity(entries.len());

    for (index, entry) in entries.into_iter().enumerate() {
        if !entry.is_object() {
            return Err(BatchError::Legacy {
                index,
                reason: "entry is not an object".into(),
            });
        }
        let legacy: LegacyEntry =
            serde_json::from_value(entry).map_err(|e| BatchError::Legacy {
                index,
                reason: e.to_string(),
            })?;

        let id = match legacy.id {
            Some(serde_json::Value::Number(n)) => n
                .as_i64()
                .map(QuestionId::Int)
                .ok_or_else(|| BatchError::Legacy {
                    index,
                    reason: format!("id {n} is not an integer"),
                })?,
            Some(serde_json::Value::String(s)) => QuestionId::Text(s),
            Some(other) => {
                return Err(BatchError::Legacy {
                    index,
                    reason: format!("unsupported id {other}"),
                })
            }
            None => {
                return Err(BatchError::Legacy {
                    index,
                    reason: "missing id".into(),
                })
            }
        };

        let text = legacy
            .question_text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| BatchError::Legacy {
                index,
                reason: "missing question_text".into(),
            })?;

        // Local-graph runs stored a placeholder sentence here instead of a map.
        let entities = match legacy.wikidata_entities_resolved {
            Some(serde_json::Value::Object(map)) => Some(
                map.into_iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
                    .collect::<BTreeMap<_, _>>(),
            ),
            _ => None,
        };

        questions.push(Question {
            id,
            text,
            baseline_query: legacy.sparql_query.unwrap_or_default(),
            entities,
            shape: None,
        });
    }

    tracing::info!(questions = questions.len(), "Migrated legacy question array to batch schema v1");
    Ok(BatchFile::new(questions))
}
