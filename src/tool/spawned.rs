use log::debug;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use super::process::run_with_timeout;
use super::{InvokeOptions, ToolInvoker, ToolOutput, ToolRequest, ToolResponse, ToolStrategy};
use crate::error::Result;

/// Hands each call to a fresh worker process.
///
/// The worker receives a JSON [`ToolRequest`] on stdin and answers with a
/// JSON [`ToolResponse`] on stdout. A worker that dies without answering is
/// reported with its exit status and stderr.
pub struct SpawnedProcessInvoker {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl SpawnedProcessInvoker {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

impl ToolInvoker for SpawnedProcessInvoker {
    fn strategy(&self) -> ToolStrategy {
        ToolStrategy::SpawnedProcess
    }

    #[tracing::instrument(skip(self, options))]
    fn invoke(&self, args: &[String], options: &InvokeOptions) -> Result<ToolOutput> {
        let request = serde_json::to_vec(&ToolRequest {
            args: args.to_vec(),
        })
        .map_err(std::io::Error::other)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(options.env.iter().cloned());

        let timeout = options.timeout.unwrap_or(self.timeout);
        let done = run_with_timeout(command, Some(request.as_slice()), timeout)?;

        match serde_json::from_str::<ToolResponse>(done.stdout.trim()) {
            Ok(response) => Ok(response),
            Err(e) => {
                debug!("Worker gave no response ({}), exit status {}", e, done.status);
                let status = if done.status == 0 { 1 } else { done.status };
                Ok(ToolOutput::new(status, format!("{}{}", done.stdout, done.stderr)))
            }
        }
    }
}
