//! Run report artifacts.
//!
//! Two artifacts describe a finished run: a JSON object with the counters and
//! a tab-separated failed-reference table. Both are attached to the run's
//! status document; the admin binary can also drop them into a local reports
//! directory.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::stats::FixCounts;
use crate::{AppError, AppResult};

pub const STATS_ATTACHMENT: &str = "stats.json";
pub const FAILED_REFS_ATTACHMENT: &str = "failed-references.tsv";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsReport<'a> {
    generated_at: String,
    run_id: &'a str,
    successful_refs: u64,
    failed_refs: u64,
    successful_docs: u64,
    unchanged_docs: u64,
    failed_docs: u64,
}

pub fn stats_json(run_id: &str, counts: &FixCounts) -> AppResult<Vec<u8>> {
    let payload = StatsReport {
        generated_at: Utc::now().to_rfc3339(),
        run_id,
        successful_refs: counts.successful_refs,
        failed_refs: counts.failed_refs,
        successful_docs: counts.successful_docs,
        unchanged_docs: counts.unchanged_docs,
        failed_docs: counts.failed_docs,
    };
    serde_json::to_vec_pretty(&payload).map_err(AppError::from)
}

/// One `reference<TAB>count` row per failed reference, most frequent first.
pub fn failed_refs_tsv(counts: &FixCounts) -> Vec<u8> {
    let mut rows: Vec<(&String, &u64)> = counts.failed_references.iter().collect();
    rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    let mut out = String::new();
    for (reference, count) in rows {
        out.push_str(reference);
        out.push('\t');
        out.push_str(&count.to_string());
        out.push('\n');
    }
    out.into_bytes()
}

/// Writes both artifacts into `dir`, returning their paths.
pub fn write_report_files(
    dir: &Path,
    run_id: &str,
    counts: &FixCounts,
) -> AppResult<(PathBuf, PathBuf)> {
    fs::create_dir_all(dir).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "report_create_dir")
            .with_context("path", dir.display().to_string())
    })?;

    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let stats_path = dir.join(format!("fix-{stamp}-stats.json"));
    let refs_path = dir.join(format!("fix-{stamp}-failed-references.tsv"));

    fs::write(&stats_path, stats_json(run_id, counts)?).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "report_write_stats")
            .with_context("path", stats_path.display().to_string())
    })?;
    fs::write(&refs_path, failed_refs_tsv(counts)).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "report_write_failed_refs")
            .with_context("path", refs_path.display().to_string())
    })?;

    Ok((stats_path, refs_path))
}
