/*!
# Scheduler
Executes a [`StageGraph`] with a bounded worker pool.

The scheduler loop is the only owner of node state.
Ready nodes wait in a priority queue ordered by phase, workers from a dedicated rayon pool run them through a [`ToolInvoker`], and every completion comes back over a single channel.
A failed node marks all of its descendants as skipped while independent branches keep going.
Tool nodes whose outputs are already newer than their inputs are memoized without running anything.
*/
use derive_builder::Builder;
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use priority_queue::PriorityQueue;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cmp::Reverse;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Instant, SystemTime};

use crate::data_types::stage_node::{NodeId, NodeState, StageAction, StageNode, ToolInvocation};
use crate::graph_builder::StageGraph;
use crate::tool_adapter::{CancelToken, ToolError, ToolInvoker, ToolResult};
use crate::util::progress_bar::stage_progress_bar;

/// Controls how the graph is executed
#[derive(Builder, Clone, Copy, Debug)]
#[builder(default)]
pub struct SchedulerConfig {
    /// Maximum number of nodes running at once
    workers: usize,
    /// Extra attempts for failures with a transient signature
    max_retries: usize,
    /// If true, outputs of failed nodes are left on disk
    skip_cleaning: bool,
    /// If true, a progress bar is drawn
    show_progress: bool
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            max_retries: 2,
            skip_cleaning: false,
            show_progress: false
        }
    }
}

impl SchedulerConfig {
    // getters
    pub fn workers(&self) -> usize {
        self.workers.max(1)
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn skip_cleaning(&self) -> bool {
        self.skip_cleaning
    }
}

/// Everything we know about one node after a run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeDiagnostics {
    /// Final (or current) state
    pub state: NodeState,
    /// Number of times the tool was launched
    pub attempts: usize,
    /// Exit code of the last attempt, if the process exited
    pub exit_code: Option<i32>,
    /// stdout log of the last attempt
    pub stdout_log: Option<PathBuf>,
    /// stderr log of the last attempt
    pub stderr_log: Option<PathBuf>,
    /// True if the node was skipped as up to date
    pub memoized: bool,
    /// Human readable reason for failures and skips
    pub message: Option<String>,
    /// Wall time spent running the node
    pub elapsed_secs: f64
}

/// Result of running a stage graph
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScheduleReport {
    /// Per-node diagnostics, in graph order
    nodes: IndexMap<NodeId, NodeDiagnostics>,
    /// True if the run was cancelled
    cancelled: bool
}

impl ScheduleReport {
    pub fn state(&self, node_id: &NodeId) -> Option<NodeState> {
        self.nodes.get(node_id).map(|d| d.state)
    }

    pub fn diagnostics(&self, node_id: &NodeId) -> Option<&NodeDiagnostics> {
        self.nodes.get(node_id)
    }

    /// Number of nodes in the given state
    pub fn count(&self, state: NodeState) -> usize {
        self.nodes.values().filter(|d| d.state == state).count()
    }

    /// Total number of tool launches, including retries
    pub fn invocations(&self) -> usize {
        self.nodes.values().map(|d| d.attempts).sum()
    }

    pub fn all_succeeded(&self) -> bool {
        self.nodes.values().all(|d| d.state == NodeState::Succeeded)
    }

    // getters
    pub fn nodes(&self) -> &IndexMap<NodeId, NodeDiagnostics> {
        &self.nodes
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }
}

/// What a worker sends back
struct WorkerOutcome {
    result: Result<ToolResult, ToolError>,
    attempts: usize,
    elapsed_secs: f64
}

/// Runs every node of the graph, honoring dependencies, the worker limit, and cancellation.
/// # Arguments
/// * `graph` - the graph to execute; it is not modified
/// * `config` - worker count, retry and cleanup policy
/// * `invoker` - runs tool nodes
/// * `cancel` - stops dispatching new nodes and interrupts running ones once fired
/// # Errors
/// * if the graph is not a DAG
/// * if the worker pool cannot be created
pub fn run_stage_graph(graph: &StageGraph, config: SchedulerConfig, invoker: &dyn ToolInvoker, cancel: &CancelToken) -> anyhow::Result<ScheduleReport> {
    graph.check_acyclic()?;
    let start_time = Instant::now();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers())
        .thread_name(|i| format!("vcline-worker-{i}"))
        .build()?;

    let mut tracker = StateTracker::new(graph, config);
    let progress = stage_progress_bar(graph.len(), config.show_progress);

    pool.in_place_scope(|scope| {
        let (tx, rx) = mpsc::channel::<(&NodeId, WorkerOutcome)>();
        let mut running: usize = 0;

        loop {
            // hand out as much work as the pool can take
            while running < config.workers() && !cancel.is_cancelled() {
                let Some((node_id, _priority)) = tracker.ready.pop() else {
                    break;
                };
                let Some(node) = graph.get(node_id) else {
                    continue;
                };
                match node.action() {
                    StageAction::PassThrough { artifacts } => {
                        let missing: Vec<&PathBuf> = artifacts.iter().filter(|p| !p.exists()).collect();
                        if missing.is_empty() {
                            tracker.succeed(node_id, false);
                        } else {
                            tracker.fail(node_id, format!("supplied file(s) do not exist: {missing:?}"));
                        }
                        progress.set_position(tracker.terminal_count as u64);
                    },
                    StageAction::Tool(invocation) if is_up_to_date(invocation) => {
                        debug!("{node_id}: outputs are up to date, skipping");
                        tracker.succeed(node_id, true);
                        progress.set_position(tracker.terminal_count as u64);
                    },
                    StageAction::Tool(invocation) => {
                        tracker.set_running(node_id);
                        running += 1;
                        let tx = tx.clone();
                        scope.spawn(move |_| {
                            let start_time = Instant::now();
                            // the loop holds a sender too, so every worker must report or recv() never returns
                            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                                run_with_retries(node_id, invocation, invoker, cancel, config.max_retries())
                            })).unwrap_or_else(|payload| WorkerOutcome {
                                result: Err(ToolError::Panicked {
                                    program: invocation.program().to_string(),
                                    message: panic_message(payload.as_ref())
                                }),
                                attempts: 1,
                                elapsed_secs: start_time.elapsed().as_secs_f64()
                            });
                            let _ = tx.send((node_id, outcome));
                        });
                    }
                };
            }

            if running == 0 {
                break;
            }

            let (node_id, outcome) = match rx.recv() {
                Ok(r) => r,
                Err(e) => {
                    error!("Worker channel closed unexpectedly: {e}");
                    break;
                }
            };
            running -= 1;
            tracker.complete(node_id, outcome);
            progress.set_position(tracker.terminal_count as u64);
        }
    });
    progress.finish();

    if cancel.is_cancelled() {
        warn!("Run was cancelled, all remaining stages are skipped.");
    }
    let report = tracker.finish(cancel.is_cancelled());
    info!(
        "Stage graph finished in {:.1} seconds: {} succeeded, {} failed, {} skipped",
        start_time.elapsed().as_secs_f64(),
        report.count(NodeState::Succeeded),
        report.count(NodeState::Failed),
        report.count(NodeState::Skipped)
    );
    Ok(report)
}

/// Node state owned by the scheduler loop
struct StateTracker<'a> {
    graph: &'a StageGraph,
    config: SchedulerConfig,
    /// Diagnostics per node
    states: FxHashMap<&'a NodeId, NodeDiagnostics>,
    /// Number of upstream nodes that have not succeeded yet
    remaining: FxHashMap<&'a NodeId, usize>,
    /// Downstream adjacency
    children: FxHashMap<&'a NodeId, Vec<&'a NodeId>>,
    /// Ready nodes, highest phase priority first, then graph order
    ready: PriorityQueue<&'a NodeId, (u32, Reverse<usize>)>,
    /// Graph position, used to break priority ties
    order: FxHashMap<&'a NodeId, usize>,
    /// Number of nodes in a terminal state
    terminal_count: usize
}

impl<'a> StateTracker<'a> {
    fn new(graph: &'a StageGraph, config: SchedulerConfig) -> Self {
        let mut tracker = Self {
            graph,
            config,
            states: Default::default(),
            remaining: Default::default(),
            children: graph.children().into_iter().collect(),
            ready: PriorityQueue::new(),
            order: Default::default(),
            terminal_count: 0
        };
        for (index, (node_id, node)) in graph.nodes().iter().enumerate() {
            tracker.states.insert(node_id, NodeDiagnostics::default());
            tracker.remaining.insert(node_id, node.upstream().len());
            tracker.order.insert(node_id, index);
        }
        for (node_id, node) in graph.nodes().iter() {
            if node.upstream().is_empty() {
                tracker.mark_ready(node_id, node);
            }
        }
        tracker
    }

    fn mark_ready(&mut self, node_id: &'a NodeId, node: &StageNode) {
        if let Some(d) = self.states.get_mut(node_id) {
            d.state = NodeState::Ready;
        }
        let index = self.order.get(node_id).copied().unwrap_or(usize::MAX);
        self.ready.push(node_id, (node.priority(), Reverse(index)));
    }

    fn set_running(&mut self, node_id: &'a NodeId) {
        if let Some(d) = self.states.get_mut(node_id) {
            d.state = NodeState::Running;
        }
    }

    /// Applies a worker outcome
    fn complete(&mut self, node_id: &'a NodeId, outcome: WorkerOutcome) {
        if let Some(d) = self.states.get_mut(node_id) {
            d.attempts = outcome.attempts;
            d.elapsed_secs = outcome.elapsed_secs;
        }
        match outcome.result {
            Ok(result) => {
                if let Some(d) = self.states.get_mut(node_id) {
                    d.exit_code = Some(result.exit_code);
                    d.stdout_log = Some(result.stdout_log);
                    d.stderr_log = Some(result.stderr_log);
                }
                self.succeed(node_id, false);
            },
            Err(e) => {
                if let Some(d) = self.states.get_mut(node_id) {
                    d.exit_code = e.exit_code();
                    if let ToolError::Exit { stderr_log, .. } = &e {
                        d.stderr_log = Some(stderr_log.clone());
                    }
                }
                // nothing ran for setup errors, so whatever is on disk predates this node
                if e.ran_process() && !self.config.skip_cleaning() {
                    if let Some(node) = self.graph.get(node_id) {
                        remove_outputs(node.outputs());
                    }
                }
                self.fail(node_id, e.to_string());
            }
        };
    }

    /// Marks a node as succeeded and releases any children whose dependencies are now all met
    fn succeed(&mut self, node_id: &'a NodeId, memoized: bool) {
        if let Some(d) = self.states.get_mut(node_id) {
            d.state = NodeState::Succeeded;
            d.memoized = memoized;
        }
        self.terminal_count += 1;
        debug!("{node_id}: succeeded");

        let children = self.children.get(node_id).cloned().unwrap_or_default();
        for child_id in children {
            let Some(count) = self.remaining.get_mut(child_id) else {
                continue;
            };
            *count = count.saturating_sub(1);
            let is_pending = self.states.get(child_id).map(|d| d.state == NodeState::Pending).unwrap_or(false);
            if *count == 0 && is_pending {
                if let Some(child) = self.graph.get(child_id) {
                    self.mark_ready(child_id, child);
                }
            }
        }
    }

    /// Marks a node as failed and every transitive descendant as skipped
    fn fail(&mut self, node_id: &'a NodeId, message: String) {
        error!("{node_id}: {message}");
        if let Some(d) = self.states.get_mut(node_id) {
            d.state = NodeState::Failed;
            d.message = Some(message);
        }
        self.terminal_count += 1;

        let mut stack: Vec<&'a NodeId> = self.children.get(node_id).cloned().unwrap_or_default();
        while let Some(child_id) = stack.pop() {
            let Some(d) = self.states.get_mut(child_id) else {
                continue;
            };
            if d.state.is_terminal() {
                continue;
            }
            d.state = NodeState::Skipped;
            d.message = Some(format!("upstream stage {node_id} failed"));
            self.terminal_count += 1;
            self.ready.remove(child_id);
            stack.extend(self.children.get(child_id).cloned().unwrap_or_default());
        }
    }

    /// Converts anything left over into skipped nodes and builds the report
    fn finish(mut self, cancelled: bool) -> ScheduleReport {
        let mut nodes: IndexMap<NodeId, NodeDiagnostics> = IndexMap::with_capacity(self.graph.len());
        for node_id in self.graph.nodes().keys() {
            let mut diagnostics = self.states.remove(node_id).unwrap_or_default();
            if !diagnostics.state.is_terminal() {
                diagnostics.state = NodeState::Skipped;
                if diagnostics.message.is_none() {
                    diagnostics.message = Some(if cancelled { "run was cancelled".to_string() } else { "never became ready".to_string() });
                }
            }
            nodes.insert(node_id.clone(), diagnostics);
        }
        ScheduleReport {
            nodes,
            cancelled
        }
    }
}

/// Invokes a tool, retrying failures that carry a transient signature
fn run_with_retries(node_id: &NodeId, invocation: &ToolInvocation, invoker: &dyn ToolInvoker, cancel: &CancelToken, max_retries: usize) -> WorkerOutcome {
    let start_time = Instant::now();
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = invoker.invoke(node_id, invocation, cancel);
        match result {
            Err(e) if e.is_transient() && attempts <= max_retries && !cancel.is_cancelled() => {
                warn!("{node_id}: transient failure on attempt {attempts}, retrying: {e}");
            },
            result => {
                return WorkerOutcome {
                    result,
                    attempts,
                    elapsed_secs: start_time.elapsed().as_secs_f64()
                };
            }
        };
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A tool node is up to date when it declares outputs, they all exist, and none is older than any input
pub fn is_up_to_date(invocation: &ToolInvocation) -> bool {
    if invocation.outputs().is_empty() {
        return false;
    }
    let Some(oldest_output) = invocation.outputs().iter()
        .map(|p| modified_time(p))
        .collect::<Option<Vec<SystemTime>>>()
        .and_then(|times| times.into_iter().min()) else {
        return false;
    };

    let Some(input_times) = invocation.inputs().iter()
        .map(|p| modified_time(p))
        .collect::<Option<Vec<SystemTime>>>() else {
        // a missing input means the node cannot be considered complete
        return false;
    };
    input_times.into_iter().all(|t| t <= oldest_output)
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Removes whatever a failed node left behind
fn remove_outputs(outputs: &[PathBuf]) {
    for path in outputs.iter() {
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else if path.exists() {
            std::fs::remove_file(path)
        } else {
            continue;
        };
        match result {
            Ok(()) => debug!("Removed incomplete output {path:?}"),
            Err(e) => warn!("Error while removing incomplete output {path:?}: {e}")
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::data_types::stage_node::StageKind;

    /// Creates every declared output unless the node is scripted to fail
    #[derive(Default)]
    struct MockInvoker {
        /// node id -> queue of failures to return before succeeding
        failures: Mutex<FxHashMap<String, Vec<ToolError>>>,
        /// node id that fires the cancel token when it runs
        cancel_on: Option<String>,
        /// node id whose invocation panics
        panic_on: Option<String>,
        /// every invocation, in order
        calls: Mutex<Vec<String>>
    }

    impl MockInvoker {
        fn fail_with(self, node_id: &str, errors: Vec<ToolError>) -> Self {
            self.failures.lock().unwrap().insert(node_id.to_string(), errors);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ToolInvoker for MockInvoker {
        fn invoke(&self, node_id: &NodeId, invocation: &ToolInvocation, cancel: &CancelToken) -> Result<ToolResult, ToolError> {
            self.calls.lock().unwrap().push(node_id.to_string());
            if self.cancel_on.as_deref() == Some(node_id.as_str()) {
                cancel.cancel();
            }
            if self.panic_on.as_deref() == Some(node_id.as_str()) {
                panic!("mock invoker blew up on {node_id}");
            }
            if let Some(errors) = self.failures.lock().unwrap().get_mut(node_id.as_str()) {
                if !errors.is_empty() {
                    // leave a partial output behind like a real tool would
                    for output in invocation.outputs() {
                        std::fs::write(output, "partial").unwrap();
                    }
                    return Err(errors.remove(0));
                }
            }
            for output in invocation.outputs() {
                std::fs::write(output, node_id.as_str()).unwrap();
            }
            Ok(ToolResult {
                exit_code: 0,
                outputs: invocation.outputs().to_vec(),
                ..Default::default()
            })
        }
    }

    fn exit_error(transient: bool) -> ToolError {
        ToolError::Exit {
            program: "mock".to_string(),
            exit_code: Some(1),
            stderr_log: PathBuf::from("mock.stderr.log"),
            transient
        }
    }

    /// Adds a tool node that reads the outputs of its upstream nodes and writes `<id>.out`
    fn add_tool(graph: &mut StageGraph, dir: &Path, id: &str, upstream: &[&str]) {
        let mut invocation = ToolInvocation::new("mock");
        for u in upstream {
            invocation = invocation.input(&dir.join(format!("{u}.out")));
        }
        invocation = invocation.output(&dir.join(format!("{id}.out")));
        let node = StageNode::new(
            NodeId::new(id), Some("E".to_string()), StageKind::ReferencePrep,
            upstream.iter().map(|u| NodeId::new(*u)).collect(),
            StageAction::Tool(invocation)
        );
        graph.add_node(node).unwrap();
    }

    /// a -> b -> c, and an independent x -> y
    fn two_branches(dir: &Path) -> StageGraph {
        let mut graph = StageGraph::default();
        add_tool(&mut graph, dir, "a", &[]);
        add_tool(&mut graph, dir, "b", &["a"]);
        add_tool(&mut graph, dir, "c", &["b"]);
        add_tool(&mut graph, dir, "x", &[]);
        add_tool(&mut graph, dir, "y", &["x"]);
        graph
    }

    fn config(workers: usize, max_retries: usize) -> SchedulerConfig {
        SchedulerConfigBuilder::default()
            .workers(workers)
            .max_retries(max_retries)
            .build().unwrap()
    }

    fn state(report: &ScheduleReport, id: &str) -> NodeState {
        report.state(&NodeId::new(id)).unwrap()
    }

    #[test]
    fn test_full_run_and_idempotence() {
        let temp_dir = tempfile::tempdir().unwrap();
        let graph = two_branches(temp_dir.path());

        let invoker = MockInvoker::default();
        let report = run_stage_graph(&graph, config(3, 2), &invoker, &CancelToken::new()).unwrap();
        assert!(report.all_succeeded());
        assert_eq!(report.invocations(), 5);
        assert_eq!(invoker.calls().len(), 5);

        // dependencies were honored
        let calls = invoker.calls();
        let position = |id: &str| calls.iter().position(|c| c == id).unwrap();
        assert!(position("a") < position("b"));
        assert!(position("b") < position("c"));
        assert!(position("x") < position("y"));

        // everything is on disk now, so nothing runs a second time
        let invoker = MockInvoker::default();
        let report = run_stage_graph(&graph, config(3, 2), &invoker, &CancelToken::new()).unwrap();
        assert!(report.all_succeeded());
        assert!(invoker.calls().is_empty());
        assert!(report.nodes().values().all(|d| d.memoized));
    }

    #[test]
    fn test_failure_isolation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let graph = two_branches(temp_dir.path());

        let invoker = MockInvoker::default().fail_with("a", vec![exit_error(false)]);
        let report = run_stage_graph(&graph, config(2, 2), &invoker, &CancelToken::new()).unwrap();
        assert_eq!(state(&report, "a"), NodeState::Failed);
        assert_eq!(state(&report, "b"), NodeState::Skipped);
        assert_eq!(state(&report, "c"), NodeState::Skipped);
        assert_eq!(state(&report, "x"), NodeState::Succeeded);
        assert_eq!(state(&report, "y"), NodeState::Succeeded);

        // non-transient failures are not retried, and the partial output is gone
        let diagnostics = report.diagnostics(&NodeId::new("a")).unwrap();
        assert_eq!(diagnostics.attempts, 1);
        assert_eq!(diagnostics.exit_code, Some(1));
        assert!(!temp_dir.path().join("a.out").exists());
        assert!(!invoker.calls().contains(&"b".to_string()));
    }

    #[test]
    fn test_skip_cleaning() {
        let temp_dir = tempfile::tempdir().unwrap();
        let graph = two_branches(temp_dir.path());
        let invoker = MockInvoker::default().fail_with("x", vec![exit_error(false)]);
        let config = SchedulerConfigBuilder::default()
            .skip_cleaning(true)
            .build().unwrap();
        let report = run_stage_graph(&graph, config, &invoker, &CancelToken::new()).unwrap();
        assert_eq!(state(&report, "x"), NodeState::Failed);
        assert!(temp_dir.path().join("x.out").exists());
        // succeeded outputs are never touched
        assert!(temp_dir.path().join("c.out").exists());
    }

    #[test]
    fn test_setup_error_keeps_existing_outputs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let graph = two_branches(temp_dir.path());
        // an output from an earlier run that is stale because its input is missing
        let earlier = temp_dir.path().join("b.out");
        std::fs::write(&earlier, "earlier run").unwrap();
        let file = std::fs::File::options().write(true).open(&earlier).unwrap();
        file.set_modified(SystemTime::now() - std::time::Duration::from_secs(3600)).unwrap();

        let setup_error = ToolError::Invocation {
            program: "mock".to_string(),
            message: "executable not found on PATH".to_string()
        };
        let invoker = MockInvoker::default().fail_with("b", vec![setup_error]);
        let report = run_stage_graph(&graph, config(1, 2), &invoker, &CancelToken::new()).unwrap();
        assert_eq!(state(&report, "b"), NodeState::Failed);
        assert_eq!(state(&report, "c"), NodeState::Skipped);
        // the mock wrote "partial" before failing; a real setup error never touches the file
        assert!(temp_dir.path().join("b.out").exists());
        assert_eq!(report.diagnostics(&NodeId::new("b")).unwrap().exit_code, None);
    }

    #[test]
    fn test_worker_panic() {
        let temp_dir = tempfile::tempdir().unwrap();
        let graph = two_branches(temp_dir.path());
        let invoker = MockInvoker {
            panic_on: Some("a".to_string()),
            ..Default::default()
        };
        let report = run_stage_graph(&graph, config(2, 2), &invoker, &CancelToken::new()).unwrap();
        assert_eq!(state(&report, "a"), NodeState::Failed);
        assert_eq!(state(&report, "b"), NodeState::Skipped);
        assert_eq!(state(&report, "y"), NodeState::Succeeded);
        let message = report.diagnostics(&NodeId::new("a")).unwrap().message.clone().unwrap();
        assert!(message.contains("mock invoker blew up on a"));
    }

    #[test]
    fn test_transient_retries() {
        let temp_dir = tempfile::tempdir().unwrap();
        let graph = two_branches(temp_dir.path());

        // two transient failures fit in the default budget
        let invoker = MockInvoker::default().fail_with("b", vec![exit_error(true), exit_error(true)]);
        let report = run_stage_graph(&graph, config(1, 2), &invoker, &CancelToken::new()).unwrap();
        assert!(report.all_succeeded());
        assert_eq!(report.diagnostics(&NodeId::new("b")).unwrap().attempts, 3);

        // but not in a budget of one
        let temp_dir = tempfile::tempdir().unwrap();
        let graph = two_branches(temp_dir.path());
        let invoker = MockInvoker::default().fail_with("b", vec![exit_error(true), exit_error(true)]);
        let report = run_stage_graph(&graph, config(1, 1), &invoker, &CancelToken::new()).unwrap();
        assert_eq!(state(&report, "b"), NodeState::Failed);
        assert_eq!(report.diagnostics(&NodeId::new("b")).unwrap().attempts, 2);
        assert_eq!(state(&report, "c"), NodeState::Skipped);
    }

    #[test]
    fn test_cancellation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let graph = two_branches(temp_dir.path());

        // already cancelled: nothing runs
        let cancel = CancelToken::new();
        cancel.cancel();
        let invoker = MockInvoker::default();
        let report = run_stage_graph(&graph, config(2, 2), &invoker, &cancel).unwrap();
        assert!(report.cancelled());
        assert!(invoker.calls().is_empty());
        assert_eq!(report.count(NodeState::Skipped), 5);

        // cancelled while the first node runs: everything after it is skipped
        let invoker = MockInvoker {
            cancel_on: Some("a".to_string()),
            ..Default::default()
        };
        let report = run_stage_graph(&graph, config(1, 2), &invoker, &CancelToken::new()).unwrap();
        assert_eq!(invoker.calls(), vec!["a".to_string()]);
        assert_eq!(state(&report, "a"), NodeState::Succeeded);
        assert_eq!(state(&report, "b"), NodeState::Skipped);
        assert_eq!(state(&report, "x"), NodeState::Skipped);
        assert!(report.cancelled());
    }

    #[test]
    fn test_pass_through() {
        let temp_dir = tempfile::tempdir().unwrap();
        let supplied = temp_dir.path().join("n.cram");
        std::fs::write(&supplied, "cram").unwrap();

        let mut graph = StageGraph::default();
        for (id, path) in [("present", supplied.clone()), ("absent", temp_dir.path().join("t.cram"))] {
            graph.add_node(StageNode::new(
                NodeId::new(id), Some("E".to_string()), StageKind::ReferencePrep, vec![],
                StageAction::PassThrough { artifacts: vec![path] }
            )).unwrap();
        }
        add_tool(&mut graph, temp_dir.path(), "after_absent", &["absent"]);

        let invoker = MockInvoker::default();
        let report = run_stage_graph(&graph, SchedulerConfig::default(), &invoker, &CancelToken::new()).unwrap();
        assert_eq!(state(&report, "present"), NodeState::Succeeded);
        assert_eq!(state(&report, "absent"), NodeState::Failed);
        assert_eq!(state(&report, "after_absent"), NodeState::Skipped);
        assert!(invoker.calls().is_empty());
        // supplied files are never cleaned up
        assert!(supplied.exists());
    }

    #[test]
    fn test_up_to_date_checks() {
        let temp_dir = tempfile::tempdir().unwrap();
        let input = temp_dir.path().join("in.txt");
        let output = temp_dir.path().join("out.txt");
        let invocation = ToolInvocation::new("mock").input(&input).output(&output);

        // nothing exists
        assert!(!is_up_to_date(&invocation));

        std::fs::write(&input, "in").unwrap();
        std::fs::write(&output, "out").unwrap();
        assert!(is_up_to_date(&invocation));

        // an input newer than the output invalidates it
        let file = std::fs::File::options().write(true).open(&input).unwrap();
        file.set_modified(SystemTime::now() + std::time::Duration::from_secs(60)).unwrap();
        assert!(!is_up_to_date(&invocation));

        // no declared outputs means always run
        assert!(!is_up_to_date(&ToolInvocation::new("mock").input(&input)));
    }
}
