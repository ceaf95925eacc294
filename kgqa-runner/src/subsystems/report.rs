//! Report subsystem: aggregate a batch into a [`RunSummary`].

use std::path::{Path, PathBuf};

use kgqa_core::models::{BatchFile, RunSummary};

/// `<batch stem>_summary.json` next to the batch file.
pub fn default_summary_path(batch_path: &Path) -> PathBuf {
    let stem = batch_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("batch");
    batch_path.with_file_name(format!("{stem}_summary.json"))
}

/// Compute, print and persist the summary.
pub fn write_report(
    batch: &BatchFile,
    batch_path: &Path,
    output: Option<&Path>,
) -> anyhow::Result<(RunSummary, PathBuf)> {
    let summary = RunSummary::from_records(&batch.questions);
    let out = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_summary_path(batch_path));

    println!("{}", summary.render());
    std::fs::write(&out, serde_json::to_string_pretty(&summary)? + "\n")?;

    tracing::info!(
        path = %out.display(),
        run_id = %batch.run_id,
        accuracy = summary.execution_accuracy,
        "Summary written"
    );
    Ok((summary, out))
}
