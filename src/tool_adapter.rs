/*!
# External tool adapter
Runs one external executable for a stage node.
Inputs are checked right before launch, stdout/stderr go to per-node log files, and declared outputs are verified after a zero exit.
The [`ToolInvoker`] trait is the seam the scheduler drives, so tests can substitute an in-memory invoker.
*/
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::data_types::stage_node::{NodeId, ToolInvocation};

/// Substrings of stderr that mark a failure as worth retrying
pub const TRANSIENT_SIGNATURES: [&str; 4] = [
    "Resource temporarily unavailable",
    "Temporary failure in name resolution",
    "Connection reset by peer",
    "Stale file handle"
];

/// How often a running child is checked for exit or cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Only the tail of stderr is scanned for transient signatures
const STDERR_SCAN_BYTES: usize = 65536;

#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    #[error("{program}: {message}")]
    Invocation { program: String, message: String },
    #[error("{program} exited with status {}, see {stderr_log:?}", status_label(.exit_code))]
    Exit { program: String, exit_code: Option<i32>, stderr_log: PathBuf, transient: bool },
    #[error("{program} exited successfully but did not produce {missing:?}")]
    MissingOutput { program: String, missing: Vec<PathBuf> },
    #[error("{program} was cancelled")]
    Cancelled { program: String },
    #[error("worker running {program} panicked: {message}")]
    Panicked { program: String, message: String }
}

fn status_label(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => code.to_string(),
        None => "<killed by signal>".to_string()
    }
}

impl ToolError {
    /// Returns true if retrying the same invocation might succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Exit { transient: true, .. })
    }

    /// Returns true if a process was actually started, i.e. outputs on disk may be partial
    pub fn ran_process(&self) -> bool {
        match self {
            ToolError::Invocation { .. } => false,
            ToolError::Exit { .. } |
            ToolError::MissingOutput { .. } |
            ToolError::Cancelled { .. } |
            ToolError::Panicked { .. } => true
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ToolError::Exit { exit_code, .. } => *exit_code,
            _ => None
        }
    }
}

/// Outcome of a successful invocation
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Process exit code, always 0 here
    pub exit_code: i32,
    /// Where stdout went
    pub stdout_log: PathBuf,
    /// Where stderr went
    pub stderr_log: PathBuf,
    /// The declared outputs, all verified to exist
    pub outputs: Vec<PathBuf>
}

/// Shared flag used to stop a run; clones observe the same flag
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Anything that can execute a tool invocation on behalf of a node
pub trait ToolInvoker: Send + Sync {
    /// Runs the invocation to completion.
    /// # Arguments
    /// * `node_id` - the node being run, used to name the log files
    /// * `invocation` - what to run
    /// * `cancel` - if it fires while the tool is running, the tool is stopped
    /// # Errors
    /// * see `ToolError`
    fn invoke(&self, node_id: &NodeId, invocation: &ToolInvocation, cancel: &CancelToken) -> Result<ToolResult, ToolError>;
}

/// Runs tools as child processes
#[derive(Clone, Debug)]
pub struct ProcessInvoker {
    /// Folder for `<node>.stdout.log` / `<node>.stderr.log`
    log_dir: PathBuf
}

impl ProcessInvoker {
    pub fn new(log_dir: PathBuf) -> Self {
        Self {
            log_dir
        }
    }

    /// The pair of log files used for a node
    pub fn log_paths(&self, node_id: &NodeId) -> (PathBuf, PathBuf) {
        let stem = node_id.to_file_stem();
        (
            self.log_dir.join(format!("{stem}.stdout.log")),
            self.log_dir.join(format!("{stem}.stderr.log"))
        )
    }
}

impl ToolInvoker for ProcessInvoker {
    fn invoke(&self, node_id: &NodeId, invocation: &ToolInvocation, cancel: &CancelToken) -> Result<ToolResult, ToolError> {
        let program = invocation.program().to_string();
        let invocation_error = |message: String| ToolError::Invocation { program: invocation.program().to_string(), message };

        // everything we need must be on disk right now
        if let Some(missing) = invocation.inputs().iter().find(|p| !p.exists()) {
            return Err(invocation_error(format!("required input {missing:?} does not exist")));
        }
        let executable = resolve_executable(invocation.program())
            .ok_or_else(|| invocation_error("executable not found on PATH".to_string()))?;

        // prep all the folders
        let mut folders: Vec<&Path> = vec![self.log_dir.as_path()];
        folders.extend(invocation.outputs().iter().filter_map(|p| p.parent()));
        folders.extend(invocation.get_work_dir());
        for folder in folders.into_iter().filter(|f| !f.as_os_str().is_empty()) {
            std::fs::create_dir_all(folder)
                .map_err(|e| invocation_error(format!("error while creating {folder:?}: {e}")))?;
        }

        let (stdout_log, stderr_log) = self.log_paths(node_id);
        let stdout_path = invocation.stdout_file()
            .map(|p| p.to_path_buf())
            .unwrap_or(stdout_log);
        let stdout_file = File::create(&stdout_path)
            .map_err(|e| invocation_error(format!("error while creating {stdout_path:?}: {e}")))?;
        let stderr_file = File::create(&stderr_log)
            .map_err(|e| invocation_error(format!("error while creating {stderr_log:?}: {e}")))?;

        let mut command = Command::new(&executable);
        command.args(invocation.get_args())
            .envs(invocation.get_env().iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file));
        if let Some(work_dir) = invocation.get_work_dir() {
            command.current_dir(work_dir);
        }

        debug!("{node_id}: {}", invocation.command_line());
        let mut child = command.spawn()
            .map_err(|e| invocation_error(format!("error while launching {executable:?}: {e}")))?;

        let status = loop {
            if cancel.is_cancelled() {
                debug!("{node_id}: cancelling {program}");
                // the child may have exited on its own in the meantime
                let _ = child.kill();
                let _ = child.wait();
                return Err(ToolError::Cancelled { program });
            }
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(invocation_error(format!("error while waiting on process: {e}")))
            };
        };
        trace!("{node_id}: {program} finished with {status}");

        if !status.success() {
            let transient = stderr_is_transient(&stderr_log);
            return Err(ToolError::Exit {
                program,
                exit_code: status.code(),
                stderr_log,
                transient
            });
        }

        let missing: Vec<PathBuf> = invocation.outputs().iter()
            .filter(|p| !p.exists())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ToolError::MissingOutput { program, missing });
        }

        Ok(ToolResult {
            exit_code: status.code().unwrap_or(0),
            stdout_log: stdout_path,
            stderr_log,
            outputs: invocation.outputs().to_vec()
        })
    }
}

/// Finds an executable; names containing a path separator are used as-is, others are searched on PATH
pub fn resolve_executable(program: &str) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return if candidate.is_file() { Some(candidate.to_path_buf()) } else { None };
    }
    let search_path = std::env::var_os("PATH")?;
    std::env::split_paths(&search_path)
        .map(|folder| folder.join(program))
        .find(|p| p.is_file())
}

/// Checks the end of a stderr log for any known transient failure message
fn stderr_is_transient(stderr_log: &Path) -> bool {
    let content = match std::fs::read(stderr_log) {
        Ok(c) => c,
        Err(_e) => return false
    };
    let start = content.len().saturating_sub(STDERR_SCAN_BYTES);
    let tail = String::from_utf8_lossy(&content[start..]);
    TRANSIENT_SIGNATURES.iter().any(|s| tail.contains(s))
}
