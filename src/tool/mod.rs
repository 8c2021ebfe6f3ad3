//! Invocation of the packed-distribution installer tool.
//!
//! Three interchangeable mechanisms sit behind [`ToolInvoker`]:
//!
//! - `in_process` - call the tool's entry point on the calling thread
//! - `spawned_process` - hand the call to a short-lived worker process
//! - `located_binary` - run a standalone tool executable found on `PATH`
//!
//! Call sites only ever hold an `Arc<dyn ToolInvoker>` built from
//! configuration by [`build_invoker`].

mod binary;
mod in_process;
mod process;
mod spawned;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ToolConfig;
use crate::error::{Error, Result};
use crate::runtime::Runtime;

pub use binary::LocatedBinaryInvoker;
pub use in_process::{InProcessInvoker, ToolEntryPoint};
pub use spawned::SpawnedProcessInvoker;

/// Default deadline for out-of-process invocations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Hidden subcommand the spawned worker runs.
pub const WORKER_SUBCOMMAND: &str = "tool-worker";

/// Exit status and captured output of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub status: i32,
    pub output: String,
}

impl ToolOutput {
    pub fn new(status: i32, output: impl Into<String>) -> Self {
        Self {
            status,
            output: output.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvokeOptions {
    /// Overrides the invoker's default deadline. Ignored in process.
    pub timeout: Option<Duration>,
    /// Extra environment for out-of-process invocations.
    pub env: Vec<(String, String)>,
}

/// Call sent to a spawned worker on stdin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub args: Vec<String>,
}

/// Worker reply on stdout.
pub type ToolResponse = ToolOutput;

#[cfg_attr(test, mockall::automock)]
pub trait ToolInvoker: Send + Sync {
    fn strategy(&self) -> ToolStrategy;

    /// Run the tool with `args`.
    ///
    /// A non-zero exit status is a successful invocation; only failing to
    /// reach the tool (timeout, missing, mismatched) is an error.
    fn invoke(&self, args: &[String], options: &InvokeOptions) -> Result<ToolOutput>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStrategy {
    #[default]
    InProcess,
    SpawnedProcess,
    LocatedBinary,
}

impl fmt::Display for ToolStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ToolStrategy::InProcess => "in_process",
            ToolStrategy::SpawnedProcess => "spawned_process",
            ToolStrategy::LocatedBinary => "located_binary",
        })
    }
}

impl FromStr for ToolStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "in_process" => Ok(ToolStrategy::InProcess),
            "spawned_process" => Ok(ToolStrategy::SpawnedProcess),
            "located_binary" => Ok(ToolStrategy::LocatedBinary),
            other => Err(format!(
                "unknown tool strategy '{}' (expected in_process, spawned_process or located_binary)",
                other
            )),
        }
    }
}

/// Build the invoker selected by `config.strategy`.
pub fn build_invoker(
    config: &ToolConfig,
    runtime: Arc<dyn Runtime>,
) -> Result<Arc<dyn ToolInvoker>> {
    let timeout = config.timeout();
    Ok(match config.strategy {
        ToolStrategy::InProcess => Arc::new(InProcessInvoker::default()),
        ToolStrategy::SpawnedProcess => {
            let program = match &config.worker_program {
                Some(program) => program.clone(),
                None => runtime
                    .current_exe()
                    .map_err(|e| Error::ExternalToolUnavailable(format!("{:#}", e)))?,
            };
            Arc::new(SpawnedProcessInvoker::new(
                program,
                config.worker_args.clone(),
                timeout,
            ))
        }
        ToolStrategy::LocatedBinary => Arc::new(
            LocatedBinaryInvoker::new(runtime, config.binary_names.clone())
                .binary(config.binary.clone())
                .leading_args(config.binary_args.clone())
                .required_version(config.required_version.clone())
                .timeout(timeout),
        ),
    })
}

/// Worker side of the spawned-process protocol: read one [`ToolRequest`]
/// from `input`, run it in process, write one [`ToolResponse`] to `output`.
pub fn serve_worker(
    entry: ToolEntryPoint,
    mut input: impl Read,
    mut output: impl Write,
) -> anyhow::Result<()> {
    let mut raw = String::new();
    input
        .read_to_string(&mut raw)
        .context("Failed to read tool request")?;
    let request: ToolRequest = serde_json::from_str(&raw).context("Malformed tool request")?;

    let response = InProcessInvoker::new(entry).call(&request.args);
    serde_json::to_writer(&mut output, &response).context("Failed to write tool response")?;
    output.flush()?;
    Ok(())
}
