use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::batch::QuestionRecord;
use super::comparison::ComparisonOutcome;

/// Aggregate view over a finished batch. Derived, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub generated_at: DateTime<Utc>,
    pub total_questions: usize,
    /// Questions that have a comparison, Invalid included.
    pub compared: usize,
    pub true_positive: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub invalid: usize,
    /// TP / (TP + FP + FN) × 100. Invalid questions are not in the denominator.
    pub execution_accuracy: f64,
    pub avg_precision: f64,
    pub avg_recall: f64,
    pub avg_f1: f64,
    pub succeeded: usize,
    pub exhausted: usize,
    pub logical_attempts: usize,
    pub transient_failures: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl RunSummary {
    pub fn from_records(records: &[QuestionRecord]) -> Self {
        let mut summary = RunSummary {
            generated_at: Utc::now(),
            total_questions: records.len(),
            compared: 0,
            true_positive: 0,
            false_positive: 0,
            false_negative: 0,
            invalid: 0,
            execution_accuracy: 0.0,
            avg_precision: 0.0,
            avg_recall: 0.0,
            avg_f1: 0.0,
            succeeded: 0,
            exhausted: 0,
            logical_attempts: 0,
            transient_failures: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
        };

        let (mut precision, mut recall, mut f1) = (0.0, 0.0, 0.0);

        for record in records {
            summary.logical_attempts += record.attempts.len();
            summary.transient_failures += record.transient_failures.len();
            summary.prompt_tokens += record.usage.prompt_tokens;
            summary.completion_tokens += record.usage.completion_tokens;

            match record.status {
                Some(status) if status.succeeded() => summary.succeeded += 1,
                Some(_) => summary.exhausted += 1,
                None => {}
            }

            let Some(comparison) = &record.comparison else {
                continue;
            };
            summary.compared += 1;
            match comparison.outcome {
                ComparisonOutcome::TruePositive => summary.true_positive += 1,
                ComparisonOutcome::FalsePositive => summary.false_positive += 1,
                ComparisonOutcome::FalseNegative => summary.false_negative += 1,
                ComparisonOutcome::Invalid => summary.invalid += 1,
            }
            if let Some(m) = comparison.metrics {
                precision += m.precision;
                recall += m.recall;
                f1 += m.f1;
            }
        }

        let scored = summary.true_positive + summary.false_positive + summary.false_negative;
        if scored > 0 {
            let n = scored as f64;
            summary.execution_accuracy = summary.true_positive as f64 / n * 100.0;
            summary.avg_precision = precision / n;
            summary.avg_recall = recall / n;
            summary.avg_f1 = f1 / n;
        }

        summary
    }

    /// Human-readable report block.
    pub fn render(&self) -> String {
        let scored = self.true_positive + self.false_positive + self.false_negative;
        format!(
            "SPARQL Comparison Results Overview\n\
             ----------------------------------\n\
             Total questions:        {}\n\
             Compared:               {}\n\
             \n\
             True positives:         {}\n\
             False positives:        {}\n\
             False negatives:        {}\n\
             Invalid baselines:      {}\n\
             \n\
             Execution accuracy:     {:.2}% ({}/{})\n\
             Average precision:      {:.4}\n\
             Average recall:         {:.4}\n\
             Average F1:             {:.4}\n\
             \n\
             Generation succeeded:   {}\n\
             Retries exhausted:      {}\n\
             Logical attempts:       {}\n\
             Transient LLM failures: {}\n\
             Prompt tokens:          {}\n\
             Completion tokens:      {}\n",
            self.total_questions,
            self.compared,
            self.true_positive,
            self.false_positive,
            self.false_negative,
            self.invalid,
            self.execution_accuracy,
            self.true_positive,
            scored,
            self.avg_precision,
            self.avg_recall,
            self.avg_f1,
            self.succeeded,
            self.exhausted,
            self.logical_attempts,
            self.transient_failures,
            self.prompt_tokens,
            self.completion_tokens,
        )
    }
}
