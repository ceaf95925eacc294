//! Gold-query validation: drop benchmark questions whose stored answers the target
//! graph no longer reproduces.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use kgqa_core::models::{ExecutionResult, QuestionId};
use kgqa_core::sparql::QueryExecutor;
use serde::{Deserialize, Serialize};

use crate::qald::{ExpectedAnswer, QaldDataset, QaldQuestion};
use crate::IngestError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedEntry {
    pub id: QuestionId,
    pub question: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub total: usize,
    pub cleaned: QaldDataset,
    pub removed: Vec<RemovedEntry>,
}

impl ValidationReport {
    pub fn valid(&self) -> usize {
        self.cleaned.questions.len()
    }

    /// Write `<stem>_cleaned.json` and `<stem>_removed_log.json` into `output_dir`.
    pub fn write(&self, dataset_path: &Path, output_dir: &Path) -> Result<(PathBuf, PathBuf), IngestError> {
        let stem = dataset_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset");
        std::fs::create_dir_all(output_dir)?;

        let cleaned_path = output_dir.join(format!("{stem}_cleaned.json"));
        let log_path = output_dir.join(format!("{stem}_removed_log.json"));
        std::fs::write(&cleaned_path, serde_json::to_string_pretty(&self.cleaned)?)?;
        std::fs::write(&log_path, serde_json::to_string_pretty(&self.removed)?)?;
        Ok((cleaned_path, log_path))
    }
}

enum Verdict {
    Keep,
    Remove {
        reason: String,
        expected: Option<Vec<String>>,
        actual: Option<Vec<String>>,
    },
}

impl Verdict {
    fn remove(reason: impl Into<String>) -> Self {
        Verdict::Remove {
            reason: reason.into(),
            expected: None,
            actual: None,
        }
    }
}

async fn check(question: &QaldQuestion, executor: &dyn QueryExecutor) -> Verdict {
    let Some(query) = question.sparql() else {
        return Verdict::remove("Missing query or golden answer");
    };
    if question.answers.is_empty() {
        return Verdict::remove("Missing query or golden answer");
    }
    let Some(expected) = question.expected_answer() else {
        return Verdict::remove("Unknown answer format");
    };

    let actual = match executor.execute(query).await {
        ExecutionResult::Error(e) => return Verdict::remove(format!("Query failed: {}", e.message)),
        ExecutionResult::Bindings(values) => values,
    };

    match expected {
        ExpectedAnswer::Boolean(b) => {
            let got = actual.first().map(|v| v.trim().to_ascii_lowercase());
            if actual.len() == 1 && got.as_deref() == Some(if b { "true" } else { "false" }) {
                Verdict::Keep
            } else {
                Verdict::Remove {
                    reason: "ASK result mismatch".into(),
                    expected: Some(vec![b.to_string()]),
                    actual: Some(actual),
                }
            }
        }
        ExpectedAnswer::Values(expected) => {
            let actual_set: BTreeSet<String> = actual.into_iter().collect();
            if expected.is_subset(&actual_set) {
                Verdict::Keep
            } else {
                Verdict::Remove {
                    reason: "Mismatch or outdated answer".into(),
                    expected: Some(expected.into_iter().collect()),
                    actual: Some(actual_set.into_iter().collect()),
                }
            }
        }
    }
}

/// Run every gold query and keep the questions whose expected answers are a subset
/// of what the target returns now.
pub async fn validate_dataset(dataset: &QaldDataset, executor: &dyn QueryExecutor) -> ValidationReport {
    let mut kept = Vec::new();
    let mut removed = Vec::new();

    for (index, question) in dataset.questions.iter().enumerate() {
        let id = question.display_id(index);
        match check(question, executor).await {
            Verdict::Keep => {
                tracing::info!(question_id = %id, "Gold answer reproduced");
                kept.push(question.clone());
            }
            Verdict::Remove {
                reason,
                expected,
                actual,
            } => {
                tracing::warn!(question_id = %id, reason = %reason, "Removing question");
                removed.push(RemovedEntry {
                    id,
                    question: question.english_text().unwrap_or_default().to_string(),
                    reason,
                    query: question.sparql().map(str::to_string),
                    expected,
                    actual,
                });
            }
        }
    }

    let report = ValidationReport {
        total: dataset.questions.len(),
        cleaned: dataset.with_questions(kept),
        removed,
    };
    tracing::info!(
        total_questions = report.total,
        valid_questions = report.valid(),
        removed_questions = report.removed.len(),
        "Validation finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kgqa_core::models::ErrorKind;

    /// Answers keyed by a marker in the query text.
    struct ScriptedGraph;

    #[async_trait]
    impl QueryExecutor for ScriptedGraph {
        async fn execute(&self, query: &str) -> ExecutionResult {
            if query.contains("#superset") {
                ExecutionResult::Bindings(vec!["a".into(), "b".into(), "c".into()])
            } else if query.contains("#outdated") {
                ExecutionResult::Bindings(vec!["a".into()])
            } else if query.contains("#ask") {
                ExecutionResult::Bindings(vec!["true".into()])
            } else {
                ExecutionResult::error(ErrorKind::Http, "HTTP 400: bad query")
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn select_answer(values: &[&str]) -> serde_json::Value {
        let bindings: Vec<_> = values
            .iter()
            .map(|v| serde_json::json!({ "x": { "type": "literal", "value": v } }))
            .collect();
        serde_json::json!({ "head": { "vars": ["x"] }, "results": { "bindings": bindings } })
    }

    fn dataset() -> QaldDataset {
        let q = |id: i64, sparql: &str, answers: Vec<serde_json::Value>| {
            serde_json::json!({
                "id": id,
                "question": [ { "language": "en", "string": format!("question {id}") } ],
                "query": { "sparql": sparql },
                "answers": answers
            })
        };
        let value = serde_json::json!({ "questions": [
            q(1, "SELECT ?x {} #superset", vec![select_answer(&["a", "b"])]),
            q(2, "SELECT ?x {} #outdated", vec![select_answer(&["a", "b"])]),
            q(3, "ASK {} #ask", vec![serde_json::json!({ "boolean": true })]),
            q(4, "ASK {} #ask", vec![serde_json::json!({ "boolean": false })]),
            q(5, "SELECT ?x {} #broken", vec![select_answer(&["a"])]),
            q(6, "SELECT ?x {} #superset", vec![]),
            q(7, "SELECT ?x {} #superset", vec![serde_json::json!({ "weird": 1 })]),
        ]});
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_subset_rule_and_removal_reasons() {
        let report = validate_dataset(&dataset(), &ScriptedGraph).await;

        assert_eq!(report.total, 7);
        let kept: Vec<String> = report
            .cleaned
            .questions
            .iter()
            .map(|q| q.display_id(0).to_string())
            .collect();
        assert_eq!(kept, vec!["1", "3"]);

        let reasons: Vec<(String, &str)> = report
            .removed
            .iter()
            .map(|r| (r.id.to_string(), r.reason.as_str()))
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("2".to_string(), "Mismatch or outdated answer"),
                ("4".to_string(), "ASK result mismatch"),
                ("5".to_string(), "Query failed: HTTP 400: bad query"),
                ("6".to_string(), "Missing query or golden answer"),
                ("7".to_string(), "Unknown answer format"),
            ]
        );
        assert_eq!(report.removed[0].expected, Some(vec!["a".into(), "b".into()]));
        assert_eq!(report.removed[0].actual, Some(vec!["a".into()]));
    }

    #[tokio::test]
    async fn test_outputs_are_named_after_dataset() {
        let report = validate_dataset(&dataset(), &ScriptedGraph).await;
        let dir = tempfile::tempdir().unwrap();

        let (cleaned, log) = report
            .write(Path::new("/data/qald_9_plus_train.json"), dir.path())
            .unwrap();
        assert!(cleaned.ends_with("qald_9_plus_train_cleaned.json"));
        assert!(log.ends_with("qald_9_plus_train_removed_log.json"));

        let reloaded = QaldDataset::load(&cleaned).unwrap();
        assert_eq!(reloaded.questions.len(), 2);
        let removed: Vec<RemovedEntry> =
            serde_json::from_str(&std::fs::read_to_string(log).unwrap()).unwrap();
        assert_eq!(removed.len(), 5);
    }
}
