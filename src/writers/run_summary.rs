
use anyhow::Context;
use log::info;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

use crate::data_types::stage_node::NodeState;
use crate::graph_builder::REFERENCE_FOLDER;
use crate::pipeline::{PipelineReport, StageOutcome};
use crate::util::json_io::save_json;

/// File name of the per-stage summary table
pub const SUMMARY_TSV_FILENAME: &str = "run_summary.tsv";
/// File name of the full JSON report
pub const SUMMARY_JSON_FILENAME: &str = "run_summary.json";

/// Contains all the data written to each row of the summary table
#[derive(Serialize)]
struct SummaryRow<'a> {
    /// Run entry, or "reference" for shared stages
    entry_id: &'a str,
    /// Final status of the whole entry
    entry_status: String,
    /// Stage identifier, empty when the entry never resolved
    node_id: &'a str,
    /// Stage kind label
    stage: &'a str,
    state: String,
    attempts: usize,
    exit_code: Option<i32>,
    memoized: bool,
    elapsed_secs: String,
    /// Failure or skip reason
    message: &'a str
}

impl<'a> SummaryRow<'a> {
    fn new(entry_id: &'a str, entry_status: String, stage: &'a StageOutcome) -> Self {
        Self {
            entry_id,
            entry_status,
            node_id: stage.node_id.as_str(),
            stage: &stage.stage,
            state: stage.state.to_string(),
            attempts: stage.attempts,
            exit_code: stage.exit_code,
            memoized: stage.memoized,
            elapsed_secs: format!("{:.1}", stage.elapsed_secs),
            message: stage.message.as_deref().unwrap_or_default()
        }
    }
}

/// Writes one row per stage (and one per unresolved entry) to a TSV, or CSV if the filename ends in `.csv`
/// # Arguments
/// * `report` - the finished pipeline report
/// * `filename` - the output path
/// # Errors
/// * if the file cannot be created or written
pub fn write_stage_summary(report: &PipelineReport, filename: &Path) -> anyhow::Result<()> {
    let is_csv: bool = filename.extension().unwrap_or_default() == "csv";
    let delimiter: u8 = if is_csv { b',' } else { b'\t' };
    let mut csv_writer: csv::Writer<File> = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(filename)
        .with_context(|| format!("Error while creating {filename:?}:"))?;

    let reference_failed = report.reference_stages.iter().any(|s| s.state != NodeState::Succeeded);
    let reference_status = if reference_failed { "failed" } else { "succeeded" };
    for stage in report.reference_stages.iter() {
        csv_writer.serialize(SummaryRow::new(REFERENCE_FOLDER, reference_status.to_string(), stage))?;
    }

    for entry in report.entries.iter() {
        if let Some(resolution_error) = entry.resolution_error.as_deref() {
            csv_writer.serialize(SummaryRow {
                entry_id: &entry.entry_id,
                entry_status: entry.status.to_string(),
                node_id: "",
                stage: "resolve",
                state: "failed".to_string(),
                attempts: 0,
                exit_code: None,
                memoized: false,
                elapsed_secs: "0.0".to_string(),
                message: resolution_error
            })?;
        }
        for stage in entry.stages.iter() {
            csv_writer.serialize(SummaryRow::new(&entry.entry_id, entry.status.to_string(), stage))?;
        }
    }

    csv_writer.flush()
        .with_context(|| format!("Error while flushing {filename:?}:"))?;
    Ok(())
}

/// Writes the TSV summary and the JSON report into the output folder
/// # Arguments
/// * `report` - the finished pipeline report
/// * `dest_dir` - the output root
/// # Errors
/// * if either file cannot be written
pub fn write_run_summary(report: &PipelineReport, dest_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("Error while creating folder {dest_dir:?}:"))?;

    let tsv_filename = dest_dir.join(SUMMARY_TSV_FILENAME);
    info!("Saving stage summary to {tsv_filename:?}...");
    write_stage_summary(report, &tsv_filename)?;

    let json_filename = dest_dir.join(SUMMARY_JSON_FILENAME);
    info!("Saving run report to {json_filename:?}...");
    save_json(report, &json_filename)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::data_types::stage_node::NodeId;
    use crate::pipeline::{EntryOutcome, EntryStatus};
    use crate::util::json_io::load_json;

    fn stage(id: &str, state: NodeState, message: Option<&str>) -> StageOutcome {
        StageOutcome {
            node_id: NodeId::new(id),
            stage: "call.somatic_sv.manta".to_string(),
            state,
            attempts: 1,
            exit_code: None,
            memoized: false,
            elapsed_secs: 2.5,
            message: message.map(|m| m.to_string()),
            stderr_log: None
        }
    }

    fn report() -> PipelineReport {
        PipelineReport {
            vcline_version: "test".to_string(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            cancelled: false,
            reference_stages: vec![stage("reference/samtools_faidx", NodeState::Succeeded, None)],
            entries: vec![
                EntryOutcome {
                    entry_id: "T_vs_N".to_string(),
                    status: EntryStatus::Failed,
                    resolution_error: None,
                    stages: vec![stage("T_vs_N/somatic_sv.manta", NodeState::Skipped, Some("upstream stage X failed"))],
                    merged: vec![],
                    aggregation_errors: vec![]
                },
                EntryOutcome {
                    entry_id: "runs[1]".to_string(),
                    status: EntryStatus::Failed,
                    resolution_error: Some("tumor: neither fq nor cram is set".to_string()),
                    stages: vec![],
                    merged: vec![],
                    aggregation_errors: vec![]
                }
            ]
        }
    }

    #[test]
    fn test_write_run_summary() {
        let temp_dir = tempfile::tempdir().unwrap();
        let report = report();
        write_run_summary(&report, temp_dir.path()).unwrap();

        let content = std::fs::read_to_string(temp_dir.path().join(SUMMARY_TSV_FILENAME)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "entry_id\tentry_status\tnode_id\tstage\tstate\tattempts\texit_code\tmemoized\telapsed_secs\tmessage");
        assert!(lines[1].starts_with("reference\tsucceeded\treference/samtools_faidx\t"));
        assert_eq!(lines[2], "T_vs_N\tfailed\tT_vs_N/somatic_sv.manta\tcall.somatic_sv.manta\tskipped\t1\t\tfalse\t2.5\tupstream stage X failed");
        assert!(lines[3].starts_with("runs[1]\tfailed\t\tresolve\tfailed"));

        let loaded: PipelineReport = load_json(&temp_dir.path().join(SUMMARY_JSON_FILENAME)).unwrap();
        assert_eq!(loaded.entries.len(), 2);
        assert_eq!(loaded.failed_entries(), 2);
    }
}
