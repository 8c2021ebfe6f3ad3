use log::{debug, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::{InvokeOptions, ToolInvoker, ToolOutput, ToolStrategy};
use crate::error::Result;

/// Programmatic entry point of the tool.
pub type ToolEntryPoint = Arc<dyn Fn(&[String]) -> ToolOutput + Send + Sync>;

/// Exit status reported for a tool that panicked.
const PANIC_STATUS: i32 = 101;

/// Calls the tool on the calling thread.
///
/// A panic inside the tool is caught and reported as a failed run, but any
/// state the tool touched before panicking stays touched.
pub struct InProcessInvoker {
    entry: ToolEntryPoint,
}

impl Default for InProcessInvoker {
    fn default() -> Self {
        Self::new(Arc::new(crate::dist::tool_main))
    }
}

impl InProcessInvoker {
    pub fn new(entry: ToolEntryPoint) -> Self {
        Self { entry }
    }

    pub(crate) fn call(&self, args: &[String]) -> ToolOutput {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.entry)(args))) {
            Ok(output) => output,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "tool panicked".to_string());
                warn!("Tool panicked: {}", message);
                ToolOutput::new(PANIC_STATUS, message)
            }
        }
    }
}

impl ToolInvoker for InProcessInvoker {
    fn strategy(&self) -> ToolStrategy {
        ToolStrategy::InProcess
    }

    #[tracing::instrument(skip(self, options))]
    fn invoke(&self, args: &[String], options: &InvokeOptions) -> Result<ToolOutput> {
        if !options.env.is_empty() {
            debug!("Ignoring {} env overrides for in-process call", options.env.len());
        }
        Ok(self.call(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_invoke_passes_args_to_entry() {
        let invoker = InProcessInvoker::new(Arc::new(|args: &[String]| {
            ToolOutput::new(args.len() as i32, args.join(","))
        }));
        let out = invoker
            .invoke(&args(&["install", "x"]), &InvokeOptions::default())
            .unwrap();
        assert_eq!(out, ToolOutput::new(2, "install,x"));
    }

    #[test]
    fn test_panicking_tool_is_a_failed_run() {
        let invoker = InProcessInvoker::new(Arc::new(|_: &[String]| -> ToolOutput {
            panic!("tool exploded")
        }));
        let out = invoker.invoke(&[], &InvokeOptions::default()).unwrap();
        assert_eq!(out.status, 101);
        assert!(out.output.contains("tool exploded"));
    }

    #[test]
    fn test_default_entry_is_the_dist_tool() {
        let out = InProcessInvoker::default()
            .invoke(&args(&["--help"]), &InvokeOptions::default())
            .unwrap();
        assert!(out.success());
        assert!(out.output.contains("install"));
    }
}
