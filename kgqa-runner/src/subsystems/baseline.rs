//! Baseline subsystem: run each question's gold query once and store the result.

use std::path::Path;

use kgqa_core::models::{BatchFile, ErrorKind, ExecutionResult};
use kgqa_core::sparql::QueryExecutor;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BaselineStats {
    pub executed: usize,
    pub errors: usize,
    pub empty: usize,
}

pub async fn run_baseline(
    batch: &mut BatchFile,
    path: &Path,
    executor: &dyn QueryExecutor,
    force: bool,
) -> anyhow::Result<BaselineStats> {
    let mut stats = BaselineStats::default();

    for index in 0..batch.questions.len() {
        let record = &batch.questions[index];
        if record.baseline_result.is_some() && !force {
            continue;
        }

        let question_id = record.question.id.clone();
        let query = record.question.baseline_query.trim().to_string();
        let result = if query.is_empty() {
            ExecutionResult::error(ErrorKind::Parse, "question has no baseline query")
        } else {
            executor.execute(&query).await
        };

        match &result {
            ExecutionResult::Error(e) => {
                stats.errors += 1;
                tracing::warn!(question_id = %question_id, error = %e.message, "Baseline query failed");
            }
            ExecutionResult::Bindings(values) if values.is_empty() => {
                stats.empty += 1;
                tracing::info!(question_id = %question_id, "Baseline returned no values");
            }
            ExecutionResult::Bindings(values) => {
                tracing::info!(question_id = %question_id, values = values.len(), "Baseline executed");
            }
        }
        stats.executed += 1;

        let record = &mut batch.questions[index];
        record.baseline_result = Some(result);
        record.comparison = None;
        batch.save(path)?;
    }

    Ok(stats)
}
