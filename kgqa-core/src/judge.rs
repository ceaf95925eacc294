//! Result judging: the faulty-result predicate and the baseline comparator.

use std::collections::BTreeSet;

use crate::models::{Comparison, ComparisonOutcome, ExecutionResult, Metrics};

/// Placeholder values some endpoints return instead of a real answer.
pub const DEGENERATE_VALUES: [&str; 5] = ["0", "0.0", "", "null", "None"];

pub fn is_degenerate(value: &str) -> bool {
    DEGENERATE_VALUES.contains(&value.trim())
}

fn all_degenerate(values: &[String]) -> bool {
    values.iter().all(|v| is_degenerate(v))
}

/// Why a generated query's result should trigger a retry, or `None` when it is usable.
///
/// Errors, empty results and results made only of placeholders are all faulty.
pub fn faulty_reason(result: &ExecutionResult) -> Option<&'static str> {
    match result {
        ExecutionResult::Error(_) => Some("execution error"),
        ExecutionResult::Bindings(values) if values.is_empty() => Some("empty result"),
        ExecutionResult::Bindings(values) if all_degenerate(values) => {
            Some("only placeholder values")
        }
        ExecutionResult::Bindings(_) => None,
    }
}

pub fn is_faulty(result: &ExecutionResult) -> bool {
    faulty_reason(result).is_some()
}

/// Compare two executions. An error on either side counts as an empty set.
pub fn compare_results(baseline: &ExecutionResult, generated: &ExecutionResult) -> Comparison {
    compare(baseline.values(), generated.values())
}

pub fn compare(baseline: &[String], generated: &[String]) -> Comparison {
    let baseline_set: BTreeSet<&str> = baseline.iter().map(String::as_str).collect();
    let generated_set: BTreeSet<&str> = generated.iter().map(String::as_str).collect();
    let common: BTreeSet<&str> = baseline_set.intersection(&generated_set).copied().collect();

    let to_vec = |set: &BTreeSet<&str>| set.iter().map(|v| v.to_string()).collect::<Vec<_>>();

    if baseline_set.is_empty() {
        return Comparison {
            outcome: ComparisonOutcome::Invalid,
            metrics: None,
            baseline_values: Vec::new(),
            generated_values: to_vec(&generated_set),
            common_values: Vec::new(),
        };
    }

    let outcome = if baseline_set == generated_set {
        ComparisonOutcome::TruePositive
    } else if generated_set.is_empty() || generated_set.iter().all(|v| is_degenerate(v)) {
        ComparisonOutcome::FalseNegative
    } else {
        ComparisonOutcome::FalsePositive
    };

    let precision = ratio(common.len(), generated_set.len());
    let recall = ratio(common.len(), baseline_set.len());
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    Comparison {
        outcome,
        metrics: Some(Metrics {
            precision,
            recall,
            f1,
        }),
        baseline_values: to_vec(&baseline_set),
        generated_values: to_vec(&generated_set),
        common_values: to_vec(&common),
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
