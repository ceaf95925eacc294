//! Verification subsystem: score each generated query against its baseline.

use std::path::Path;

use kgqa_core::judge::compare;
use kgqa_core::labels::LabelCache;
use kgqa_core::models::{BatchFile, ComparisonOutcome};
use kgqa_core::sparql::QueryExecutor;

/// Optional Wikidata label mapping applied to both sides before comparing.
pub struct LabelResolver<'a> {
    pub cache: &'a mut LabelCache,
    pub endpoint: &'a dyn QueryExecutor,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VerifyStats {
    pub compared: usize,
    pub true_positive: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub invalid: usize,
    /// No baseline result or no generation status yet.
    pub pending: usize,
}

pub async fn run_verify(
    batch: &mut BatchFile,
    path: &Path,
    mut labels: Option<LabelResolver<'_>>,
) -> anyhow::Result<VerifyStats> {
    let mut stats = VerifyStats::default();

    for index in 0..batch.questions.len() {
        let record = &batch.questions[index];
        let question_id = record.question.id.clone();

        let Some(baseline) = record.baseline_result.as_ref() else {
            stats.pending += 1;
            continue;
        };
        if !record.is_generated() {
            stats.pending += 1;
            continue;
        }

        let mut baseline_values = baseline.values().to_vec();
        let mut generated_values = record
            .final_attempt()
            .map(|a| a.result.values().to_vec())
            .unwrap_or_default();

        if let Some(resolver) = labels.as_mut() {
            baseline_values = resolver
                .cache
                .map_values(resolver.endpoint, &baseline_values)
                .await;
            generated_values = resolver
                .cache
                .map_values(resolver.endpoint, &generated_values)
                .await;
        }

        let comparison = compare(&baseline_values, &generated_values);
        match comparison.outcome {
            ComparisonOutcome::TruePositive => stats.true_positive += 1,
            ComparisonOutcome::FalsePositive => stats.false_positive += 1,
            ComparisonOutcome::FalseNegative => stats.false_negative += 1,
            ComparisonOutcome::Invalid => stats.invalid += 1,
        }
        stats.compared += 1;
        tracing::info!(
            question_id = %question_id,
            outcome = ?comparison.outcome,
            f1 = comparison.metrics.map(|m| m.f1).unwrap_or_default(),
            "Compared with baseline"
        );

        batch.questions[index].comparison = Some(comparison);
        batch.save(path)?;
    }

    if let Some(resolver) = &labels {
        tracing::info!(
            lookups = resolver.cache.lookups(),
            cached = resolver.cache.len(),
            "Label resolution finished"
        );
    }
    Ok(stats)
}
