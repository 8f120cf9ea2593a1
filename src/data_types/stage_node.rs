
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::data_types::callers::{Annotator, Caller, MetricsCollector};
use crate::data_types::sample::SampleRole;

/// Stable identifier of a node in the stage graph, e.g. `T1_vs_N1/somatic_snv_indel.gatk`
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Converts the identifier into something that is safe to use as a filename
    pub fn to_file_stem(&self) -> String {
        self.0.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '.' })
            .collect()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The pipeline phase a node belongs to; phases only ever depend on earlier phases
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum StageKind {
    /// Shared reference indexing
    ReferencePrep,
    /// Adapter trimming of a FASTQ pair
    Trim { role: SampleRole },
    /// Any step that turns reads into the canonical alignment of a sample
    Canonicalize { role: SampleRole },
    /// Any step of a caller workflow; the last step is the one that produces the call artifacts
    Call { caller: Caller },
    /// QC collection
    Metrics { collector: MetricsCollector },
    /// Left-alignment and multi-allelic splitting of caller VCFs ahead of annotation
    Normalize { caller: Caller },
    /// Variant annotation
    Annotate { annotator: Annotator, caller: Caller }
}

impl StageKind {
    /// Scheduling priority, higher values are started first when several nodes are ready
    pub fn priority(&self) -> u32 {
        match self {
            StageKind::ReferencePrep => 50,
            StageKind::Trim { .. } |
            StageKind::Canonicalize { .. } => 40,
            StageKind::Call { .. } => 30,
            StageKind::Normalize { .. } => 25,
            StageKind::Annotate { .. } => 20,
            StageKind::Metrics { .. } => 10
        }
    }

    /// Short label for reports
    pub fn label(&self) -> String {
        match self {
            StageKind::ReferencePrep => "reference_prep".to_string(),
            StageKind::Trim { role } => format!("trim.{role}"),
            StageKind::Canonicalize { role } => format!("canonicalize.{role}"),
            StageKind::Call { caller } => format!("call.{caller}"),
            StageKind::Metrics { collector } => format!("metrics.{collector}"),
            StageKind::Normalize { caller } => format!("normalize.{caller}"),
            StageKind::Annotate { annotator, caller } => format!("annotate.{annotator}.{caller}")
        }
    }
}

/// Everything needed to run one external executable
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Executable name (resolved on PATH) or path
    program: String,
    /// Flat argument list
    args: Vec<String>,
    /// Files or folders that must exist before the tool starts
    inputs: Vec<PathBuf>,
    /// Files or folders the tool must create
    outputs: Vec<PathBuf>,
    /// Extra environment on top of the inherited one
    env: Vec<(String, String)>,
    /// Working directory, defaults to the current one
    work_dir: Option<PathBuf>,
    /// If set, stdout is written to this file instead of the node log
    stdout_file: Option<PathBuf>
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Appends one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends a path argument
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    /// Appends several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>
    {
        self.args.extend(args.into_iter().map(|a| a.into()));
        self
    }

    /// Declares a required input that is also passed as a path argument
    pub fn input_arg(self, path: &Path) -> Self {
        self.input(path).path_arg(path)
    }

    /// Declares a required input
    pub fn input(mut self, path: &Path) -> Self {
        self.inputs.push(path.to_path_buf());
        self
    }

    /// Declares an output that is also passed as a path argument
    pub fn output_arg(self, path: &Path) -> Self {
        self.output(path).path_arg(path)
    }

    /// Declares an output
    pub fn output(mut self, path: &Path) -> Self {
        self.outputs.push(path.to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn work_dir(mut self, path: &Path) -> Self {
        self.work_dir = Some(path.to_path_buf());
        self
    }

    /// Captures stdout into an output file, for tools that only write results to stdout
    pub fn stdout_to(mut self, path: &Path) -> Self {
        self.stdout_file = Some(path.to_path_buf());
        self.output(path)
    }

    /// Renders the command line for logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(|a| a.as_str()))
            .collect::<Vec<&str>>()
            .join(" ")
    }

    // getters
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    pub fn get_env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn get_work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    pub fn stdout_file(&self) -> Option<&Path> {
        self.stdout_file.as_deref()
    }
}

/// What a node does when it is scheduled
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum StageAction {
    /// Artifacts that already exist; the node succeeds if they are present
    PassThrough { artifacts: Vec<PathBuf> },
    /// An external tool call
    Tool(ToolInvocation)
}

/// A unit of work in the stage graph. Nodes are immutable once created; the scheduler tracks their state separately.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StageNode {
    /// Stable identifier
    id: NodeId,
    /// Owning run entry, None for shared nodes
    entry_id: Option<String>,
    /// Phase of the pipeline
    kind: StageKind,
    /// Nodes that must succeed first, in declaration order
    upstream: Vec<NodeId>,
    /// The work to do
    action: StageAction
}

impl StageNode {
    pub fn new(id: NodeId, entry_id: Option<String>, kind: StageKind, upstream: Vec<NodeId>, action: StageAction) -> Self {
        Self {
            id,
            entry_id,
            kind,
            upstream,
            action
        }
    }

    /// Declared output artifacts
    pub fn outputs(&self) -> &[PathBuf] {
        match &self.action {
            StageAction::PassThrough { artifacts } => artifacts,
            StageAction::Tool(invocation) => invocation.outputs()
        }
    }

    pub fn priority(&self) -> u32 {
        self.kind.priority()
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self.action, StageAction::PassThrough { .. })
    }

    // getters
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn entry_id(&self) -> Option<&str> {
        self.entry_id.as_deref()
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn upstream(&self) -> &[NodeId] {
        &self.upstream
    }

    pub fn action(&self) -> &StageAction {
        &self.action
    }
}

/// Lifecycle of a node inside one scheduler run
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize, strum_macros::Display)]
pub enum NodeState {
    #[default]
    #[strum(serialize = "pending")]
    Pending,
    #[strum(serialize = "ready")]
    Ready,
    #[strum(serialize = "running")]
    Running,
    #[strum(serialize = "succeeded")]
    Succeeded,
    #[strum(serialize = "failed")]
    Failed,
    #[strum(serialize = "skipped")]
    Skipped
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        match self {
            NodeState::Succeeded |
            NodeState::Failed |
            NodeState::Skipped => true,
            NodeState::Pending |
            NodeState::Ready |
            NodeState::Running => false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_builder() {
        let invocation = ToolInvocation::new("samtools")
            .arg("index")
            .input_arg(Path::new("/o/a.cram"))
            .output(Path::new("/o/a.cram.crai"))
            .env("REF_CACHE", ".ref_cache");
        assert_eq!(invocation.command_line(), "samtools index /o/a.cram");
        assert_eq!(invocation.inputs(), &[PathBuf::from("/o/a.cram")]);
        assert_eq!(invocation.outputs(), &[PathBuf::from("/o/a.cram.crai")]);
        assert_eq!(invocation.get_env().len(), 1);

        let redirected = ToolInvocation::new("bgzip").arg("-c").input_arg(Path::new("a.bed")).stdout_to(Path::new("a.bed.gz"));
        assert_eq!(redirected.stdout_file(), Some(Path::new("a.bed.gz")));
        assert_eq!(redirected.outputs(), &[PathBuf::from("a.bed.gz")]);
    }

    #[test]
    fn test_node_outputs() {
        let node = StageNode::new(
            NodeId::new("N1/canonicalize"), Some("N1".to_string()),
            StageKind::Canonicalize { role: SampleRole::Normal }, vec![],
            StageAction::PassThrough { artifacts: vec![PathBuf::from("/in/n.cram")] }
        );
        assert!(node.is_pass_through());
        assert_eq!(node.outputs(), &[PathBuf::from("/in/n.cram")]);
        assert_eq!(node.id().to_file_stem(), "N1.canonicalize");
        assert_eq!(node.kind().label(), "canonicalize.normal");
        assert_eq!(StageKind::Normalize { caller: Caller::SomaticSvDelly }.label(), "normalize.somatic_sv.delly");
    }

    #[test]
    fn test_terminal_states() {
        assert!(NodeState::Skipped.is_terminal());
        assert!(!NodeState::Running.is_terminal());
        assert_eq!(NodeState::default(), NodeState::Pending);
    }
}
