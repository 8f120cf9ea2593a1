/*!
# Pipeline
Drives one full run: resolve the run entries, build the stage graph, execute it, then aggregate the caller outputs of every entry.

Planning and execution are split so that configuration and graph problems are reported before any tool is started, and so that a dry run can stop after planning.
Failures are isolated per run entry; the returned [`PipelineReport`] lists the outcome of every stage of every entry.
*/
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::aggregator::{aggregate_caller_results, VariantSource};
use crate::cli::core::FULL_VERSION;
use crate::data_types::caller_result::{CallerResult, MergedCallSet};
use crate::data_types::callers::{AnalysisClass, Caller};
use crate::data_types::stage_node::{NodeId, NodeState, StageNode};
use crate::graph_builder::{build_stage_graph, GraphConfig, GraphError, StageGraph};
use crate::parsing::run_config::{ConfigError, RunConfig};
use crate::parsing::sample_resolver::{resolve_run_entries, ResolvedRuns};
use crate::scheduler::{run_stage_graph, ScheduleReport, SchedulerConfig};
use crate::tool_adapter::{CancelToken, ToolInvoker};
use crate::writers::merged_calls::write_merged_calls;

/// File name of the merged call table written into each analysis class folder
pub const MERGED_CALLS_FILENAME: &str = "merged_calls.tsv";

/// Errors that stop a run before anything is executed
#[derive(thiserror::Error, Debug)]
pub enum PlanError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Graph(#[from] GraphError)
}

/// Everything needed to execute a run
#[derive(Debug)]
pub struct PipelinePlan {
    /// Resolved entries and the ones that failed to resolve
    resolved: ResolvedRuns,
    /// The full stage graph
    graph: StageGraph,
    /// Output root
    dest_dir: PathBuf
}

impl PipelinePlan {
    // getters
    pub fn resolved(&self) -> &ResolvedRuns {
        &self.resolved
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }
}

/// Resolves the run entries and builds the stage graph.
/// # Arguments
/// * `run_config` - validated configuration
/// * `graph_config` - output layout and sizing
/// # Errors
/// * if two run entries collide
/// * if the graph cannot be built
pub fn plan_pipeline(run_config: &RunConfig, graph_config: &GraphConfig) -> Result<PipelinePlan, PlanError> {
    let reference_name = match run_config.reference_name() {
        "" => "unnamed reference",
        name => name
    };
    info!("Reference: {reference_name} ({})", run_config.reference_version());
    let classes: Vec<String> = run_config.enabled_classes().iter().map(|c| c.to_string()).collect();
    if classes.is_empty() {
        info!("No analysis classes enabled, only alignment and QC will run");
    } else {
        info!("Analysis classes: {}", classes.join(", "));
    }

    let resolved = resolve_run_entries(run_config.runs())?;
    for (index, e) in resolved.failures.iter() {
        error!("runs[{index}]: {e}");
    }
    info!("Resolved {} of {} run entries", resolved.entries.len(), run_config.runs().len());

    let graph = build_stage_graph(run_config, &resolved.entries, graph_config)?;
    info!("Stage graph contains {} stages", graph.len());
    Ok(PipelinePlan {
        resolved,
        graph,
        dest_dir: graph_config.dest_dir().to_path_buf()
    })
}

/// Final status of one run entry
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, strum_macros::Display)]
pub enum EntryStatus {
    #[strum(serialize = "succeeded")]
    Succeeded,
    #[strum(serialize = "failed")]
    Failed
}

/// Outcome of one stage
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StageOutcome {
    pub node_id: NodeId,
    /// Stage kind label, e.g. "call.somatic_sv.manta"
    pub stage: String,
    pub state: NodeState,
    pub attempts: usize,
    pub exit_code: Option<i32>,
    pub memoized: bool,
    pub elapsed_secs: f64,
    pub message: Option<String>,
    pub stderr_log: Option<PathBuf>
}

impl StageOutcome {
    fn new(node: &StageNode, schedule: &ScheduleReport) -> Self {
        let diagnostics = schedule.diagnostics(node.id()).cloned().unwrap_or_default();
        Self {
            node_id: node.id().clone(),
            stage: node.kind().label(),
            state: diagnostics.state,
            attempts: diagnostics.attempts,
            exit_code: diagnostics.exit_code,
            memoized: diagnostics.memoized,
            elapsed_secs: diagnostics.elapsed_secs,
            message: diagnostics.message,
            stderr_log: diagnostics.stderr_log
        }
    }
}

/// Short description of a merged call set
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergedSummary {
    pub analysis_class: AnalysisClass,
    pub contributing_callers: Vec<Caller>,
    pub missing_callers: Vec<Caller>,
    /// Unique signatures, or artifacts for segment classes
    pub records: usize,
    /// Table with the merged records
    pub merged_file: PathBuf
}

/// Everything that happened to one run entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntryOutcome {
    pub entry_id: String,
    pub status: EntryStatus,
    /// Set when the entry could not be resolved
    pub resolution_error: Option<String>,
    pub stages: Vec<StageOutcome>,
    pub merged: Vec<MergedSummary>,
    pub aggregation_errors: Vec<String>
}

impl EntryOutcome {
    /// Number of stages that did not succeed
    pub fn unfinished_stages(&self) -> usize {
        self.stages.iter().filter(|s| s.state != NodeState::Succeeded).count()
    }
}

/// Final report of a run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineReport {
    pub vcline_version: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub cancelled: bool,
    /// Shared reference preparation
    pub reference_stages: Vec<StageOutcome>,
    pub entries: Vec<EntryOutcome>
}

impl PipelineReport {
    /// True if any stage or entry did not finish cleanly
    pub fn has_failures(&self) -> bool {
        self.cancelled ||
            self.reference_stages.iter().any(|s| s.state != NodeState::Succeeded) ||
            self.entries.iter().any(|e| e.status == EntryStatus::Failed)
    }

    pub fn failed_entries(&self) -> usize {
        self.entries.iter().filter(|e| e.status == EntryStatus::Failed).count()
    }
}

/// Executes a plan, then aggregates and writes the merged call sets.
/// # Arguments
/// * `plan` - the output of [`plan_pipeline`]
/// * `scheduler_config` - worker, retry, and cleanup policy
/// * `invoker` - runs the external tools
/// * `source` - reads call artifacts for aggregation
/// * `cancel` - interrupts the run once fired
/// # Errors
/// * if the scheduler cannot start
/// * if a merged call table cannot be written
pub fn execute_pipeline(
    plan: &PipelinePlan, scheduler_config: SchedulerConfig,
    invoker: &dyn ToolInvoker, source: &dyn VariantSource, cancel: &CancelToken
) -> anyhow::Result<PipelineReport> {
    let start_time = Utc::now();
    let schedule = run_stage_graph(&plan.graph, scheduler_config, invoker, cancel)?;

    let reference_stages: Vec<StageOutcome> = plan.graph.nodes().values()
        .filter(|n| n.entry_id().is_none())
        .map(|n| StageOutcome::new(n, &schedule))
        .collect();

    // order entries by their configuration index, failed resolutions included
    let mut entries: BTreeMap<usize, EntryOutcome> = Default::default();
    for (index, e) in plan.resolved.failures.iter() {
        entries.insert(*index, EntryOutcome {
            entry_id: format!("runs[{index}]"),
            status: EntryStatus::Failed,
            resolution_error: Some(e.to_string()),
            stages: vec![],
            merged: vec![],
            aggregation_errors: vec![]
        });
    }

    let caller_results = collect_caller_results(&plan.graph, &schedule);
    for entry in plan.resolved.entries.iter() {
        let entry_id = entry.entry_id();
        let stages: Vec<StageOutcome> = plan.graph.entry_nodes(&entry_id)
            .map(|n| StageOutcome::new(n, &schedule))
            .collect();

        let mut merged = vec![];
        let mut aggregation_errors = vec![];
        if schedule.cancelled() {
            aggregation_errors.push("run was cancelled before aggregation".to_string());
        } else {
            for caller_result in caller_results.get(&entry_id).into_iter().flatten() {
                match aggregate_caller_results(caller_result, source) {
                    Ok(merged_set) => merged.push(save_merged_set(&merged_set, &plan.dest_dir)?),
                    Err(e) => {
                        error!("{entry_id}: {e}");
                        aggregation_errors.push(e.to_string());
                    }
                };
            }
        }

        let failed = stages.iter().any(|s| s.state != NodeState::Succeeded) || !aggregation_errors.is_empty();
        let status = if failed { EntryStatus::Failed } else { EntryStatus::Succeeded };
        if failed {
            warn!("{entry_id}: finished with failures");
        } else {
            info!("{entry_id}: all stages succeeded");
        }
        entries.insert(entry.index(), EntryOutcome {
            entry_id,
            status,
            resolution_error: None,
            stages,
            merged,
            aggregation_errors
        });
    }

    Ok(PipelineReport {
        vcline_version: FULL_VERSION.clone(),
        start_time,
        end_time: Utc::now(),
        cancelled: schedule.cancelled(),
        reference_stages,
        entries: entries.into_values().collect()
    })
}

/// Groups the caller targets of a finished schedule into per entry, per class results
/// # Arguments
/// * `graph` - the executed graph
/// * `schedule` - the scheduler report for that graph
pub fn collect_caller_results(graph: &StageGraph, schedule: &ScheduleReport) -> BTreeMap<String, Vec<CallerResult>> {
    let mut grouped: BTreeMap<String, BTreeMap<AnalysisClass, CallerResult>> = Default::default();
    for target in graph.caller_targets().iter() {
        let class = target.caller.analysis_class();
        let caller_result = grouped.entry(target.entry_id.clone()).or_default()
            .entry(class)
            .or_insert_with(|| CallerResult::new(target.entry_id.clone(), class));
        if schedule.state(&target.node) == Some(NodeState::Succeeded) {
            caller_result.add_success(target.caller, target.artifacts.clone());
        } else {
            caller_result.add_failure(target.caller);
        }
    }
    grouped.into_iter()
        .map(|(entry_id, classes)| (entry_id, classes.into_values().collect()))
        .collect()
}

/// Writes a merged call set into its class folder and summarizes it
fn save_merged_set(merged_set: &MergedCallSet, dest_dir: &Path) -> anyhow::Result<MergedSummary> {
    let merged_file = dest_dir
        .join(merged_set.entry_id())
        .join(merged_set.analysis_class().to_string())
        .join(MERGED_CALLS_FILENAME);
    write_merged_calls(merged_set, &merged_file)?;
    Ok(MergedSummary {
        analysis_class: merged_set.analysis_class(),
        contributing_callers: merged_set.contributing_callers().to_vec(),
        missing_callers: merged_set.missing_callers().to_vec(),
        records: merged_set.len(),
        merged_file
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::caller_result::VariantCall;
    use crate::data_types::stage_node::ToolInvocation;
    use crate::graph_builder::GraphConfigBuilder;
    use crate::parsing::run_config::parse_run_config;
    use crate::tool_adapter::{ToolError, ToolResult};
    use std::sync::Mutex;

    /// Creates every declared output, failing any node whose id contains `fail_pattern`
    #[derive(Default)]
    struct TouchInvoker {
        fail_pattern: Option<String>,
        calls: Mutex<usize>
    }

    impl ToolInvoker for TouchInvoker {
        fn invoke(&self, node_id: &NodeId, invocation: &ToolInvocation, _cancel: &CancelToken) -> Result<ToolResult, ToolError> {
            *self.calls.lock().unwrap() += 1;
            if let Some(pattern) = self.fail_pattern.as_deref() {
                if node_id.as_str().contains(pattern) {
                    return Err(ToolError::Exit {
                        program: invocation.program().to_string(),
                        exit_code: Some(2),
                        stderr_log: PathBuf::from("stderr.log"),
                        transient: false
                    });
                }
            }
            for output in invocation.outputs() {
                if let Some(parent) = output.parent() {
                    std::fs::create_dir_all(parent).unwrap();
                }
                std::fs::write(output, "").unwrap();
            }
            Ok(ToolResult {
                exit_code: 0,
                outputs: invocation.outputs().to_vec(),
                ..Default::default()
            })
        }
    }

    /// One SNV per artifact, at a position that depends on the file name
    struct FakeSource;

    impl VariantSource for FakeSource {
        fn load_calls(&self, path: &Path) -> anyhow::Result<Vec<VariantCall>> {
            let position = path.to_string_lossy().len() as u64;
            Ok(vec![VariantCall::new("chr1", position, "A".to_string(), "C".to_string(), None, true)])
        }
    }

    /// Two CRAM pairs plus one entry without tumor input, with Mutect2 and Strelka
    fn test_config(dir: &Path) -> RunConfig {
        for name in ["genome.fa", "gnomad.vcf.gz", "calling.interval_list", "T1.cram", "N1.cram", "T2.cram", "N2.cram"] {
            std::fs::write(dir.join(name), "").unwrap();
        }
        parse_run_config("
reference_version: hg38
callers:
  somatic_snv_indel:
    gatk: true
    strelka: true
resources:
  reference_fa: genome.fa
  gnomad_vcf: gnomad.vcf.gz
  evaluation_interval: calling.interval_list
runs:
  - tumor:
      cram: T1.cram
    normal:
      cram: N1.cram
  - tumor:
      sample_name: T3
    normal:
      cram: N1.cram
  - tumor:
      cram: T2.cram
    normal:
      cram: N2.cram
", Some(dir)).unwrap()
    }

    fn plan(dir: &Path) -> PipelinePlan {
        let run_config = test_config(dir);
        let graph_config = GraphConfigBuilder::default()
            .dest_dir(dir.join("out"))
            .threads(4)
            .workers(2)
            .build().unwrap();
        plan_pipeline(&run_config, &graph_config).unwrap()
    }

    #[test]
    fn test_full_pipeline() {
        let temp_dir = tempfile::tempdir().unwrap();
        let plan = plan(temp_dir.path());
        assert_eq!(plan.resolved().entries.len(), 2);
        assert_eq!(plan.resolved().failures.len(), 1);

        let invoker = TouchInvoker::default();
        let report = execute_pipeline(&plan, SchedulerConfig::default(), &invoker, &FakeSource, &CancelToken::new()).unwrap();
        assert_eq!(report.entries.len(), 3);
        assert!(report.has_failures());
        assert_eq!(report.failed_entries(), 1);

        // entries keep their configuration order
        assert_eq!(report.entries[0].entry_id, "T1_vs_N1");
        assert_eq!(report.entries[0].status, EntryStatus::Succeeded);
        assert_eq!(report.entries[1].entry_id, "runs[1]");
        assert!(report.entries[1].resolution_error.is_some());
        assert_eq!(report.entries[2].entry_id, "T2_vs_N2");

        let merged = &report.entries[0].merged;
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].contributing_callers.len(), 2);
        assert!(merged[0].merged_file.exists());
        assert!(merged[0].merged_file.ends_with("T1_vs_N1/somatic_snv_indel/merged_calls.tsv"));

        // a second run only re-aggregates
        let invoker = TouchInvoker::default();
        let report = execute_pipeline(&plan, SchedulerConfig::default(), &invoker, &FakeSource, &CancelToken::new()).unwrap();
        assert_eq!(*invoker.calls.lock().unwrap(), 0);
        assert!(report.entries[0].stages.iter().all(|s| s.memoized || s.stage.starts_with("canonicalize")));
    }

    #[test]
    fn test_failed_caller_is_isolated() {
        let temp_dir = tempfile::tempdir().unwrap();
        let plan = plan(temp_dir.path());

        // Strelka fails for one entry only
        let invoker = TouchInvoker {
            fail_pattern: Some("T1_vs_N1/somatic_snv_indel.strelka".to_string()),
            ..Default::default()
        };
        let report = execute_pipeline(&plan, SchedulerConfig::default(), &invoker, &FakeSource, &CancelToken::new()).unwrap();
        let first = &report.entries[0];
        assert_eq!(first.status, EntryStatus::Failed);
        assert!(first.unfinished_stages() > 0);
        // GATK still contributed
        assert_eq!(first.merged[0].contributing_callers, vec![Caller::SomaticSnvIndelGatk]);
        assert_eq!(first.merged[0].missing_callers, vec![Caller::SomaticSnvIndelStrelka]);

        assert_eq!(report.entries[2].status, EntryStatus::Succeeded);
    }

    #[test]
    fn test_cancelled_pipeline() {
        let temp_dir = tempfile::tempdir().unwrap();
        let plan = plan(temp_dir.path());
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = execute_pipeline(&plan, SchedulerConfig::default(), &TouchInvoker::default(), &FakeSource, &cancel).unwrap();
        assert!(report.cancelled);
        assert!(report.has_failures());
        assert!(report.entries.iter().all(|e| e.status == EntryStatus::Failed));
    }
}
