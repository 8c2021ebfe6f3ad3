use log::{debug, info};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use super::process::run_with_timeout;
use super::{DEFAULT_TIMEOUT, InvokeOptions, ToolInvoker, ToolOutput, ToolStrategy};
use crate::error::{Error, Result};
use crate::runtime::Runtime;

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs a standalone tool executable.
///
/// The executable is looked up on every call: at the configured path if one
/// is set, otherwise on `PATH` under each candidate name in turn.
pub struct LocatedBinaryInvoker {
    runtime: Arc<dyn Runtime>,
    names: Vec<String>,
    binary: Option<PathBuf>,
    leading_args: Vec<String>,
    required_version: Option<String>,
    timeout: Duration,
}

impl LocatedBinaryInvoker {
    pub fn new(runtime: Arc<dyn Runtime>, names: Vec<String>) -> Self {
        Self {
            runtime,
            names,
            binary: None,
            leading_args: Vec::new(),
            required_version: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Use this executable instead of searching `PATH`.
    pub fn binary(mut self, binary: Option<PathBuf>) -> Self {
        self.binary = binary;
        self
    }

    /// Arguments placed before every call's own arguments.
    pub fn leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    /// Version prefix the executable's `--version` output must carry.
    pub fn required_version(mut self, version: Option<String>) -> Self {
        self.required_version = version;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn locate(&self) -> Result<PathBuf> {
        if let Some(binary) = &self.binary {
            if self.runtime.is_file(binary) {
                return Ok(binary.clone());
            }
            return Err(Error::ExternalToolUnavailable(format!(
                "configured tool {:?} does not exist",
                binary
            )));
        }
        let search_path = self.runtime.env_var("PATH").ok();
        for name in &self.names {
            match which::which_in(name, search_path.as_deref(), Path::new(".")) {
                Ok(path) => {
                    debug!("Found tool {} at {:?}", name, path);
                    return Ok(path);
                }
                Err(e) => debug!("Tool {} not on PATH: {}", name, e),
            }
        }
        Err(Error::ExternalToolUnavailable(format!(
            "none of {:?} found on PATH",
            self.names
        )))
    }

    fn check_version(&self, path: &Path) -> Result<()> {
        let Some(expected) = &self.required_version else {
            return Ok(());
        };
        let mut command = Command::new(path);
        command.arg("--version");
        let done = run_with_timeout(command, None, VERSION_CHECK_TIMEOUT)?;

        let found = done
            .stdout
            .split_whitespace()
            .last()
            .unwrap_or_default()
            .to_string();
        let expected_bare = expected.trim_start_matches('v');
        if done.status == 0 && found.trim_start_matches('v').starts_with(expected_bare) {
            return Ok(());
        }
        Err(Error::ExternalToolMismatch {
            path: path.to_path_buf(),
            expected: expected.clone(),
            found,
        })
    }
}

impl ToolInvoker for LocatedBinaryInvoker {
    fn strategy(&self) -> ToolStrategy {
        ToolStrategy::LocatedBinary
    }

    #[tracing::instrument(skip(self, options))]
    fn invoke(&self, args: &[String], options: &InvokeOptions) -> Result<ToolOutput> {
        let path = self.locate()?;
        self.check_version(&path)?;
        info!("Running {:?} {}", path, args.join(" "));

        let mut command = Command::new(&path);
        command
            .args(&self.leading_args)
            .args(args)
            .envs(options.env.iter().cloned());
        let done = run_with_timeout(command, None, options.timeout.unwrap_or(self.timeout))?;
        Ok(ToolOutput::new(
            done.status,
            format!("{}{}", done.stdout, done.stderr),
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntime, RealRuntime};
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::{TempDir, tempdir};

    fn fake_tool(version: &str) -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("verimport");
        fs::write(
            &path,
            format!(
                "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then echo \"verimport {}\"; exit 0; fi\necho \"args: $*\"\nexit 2\n",
                version
            ),
        )
        .unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        (dir, path)
    }

    #[test]
    fn test_runs_configured_binary_with_leading_args() {
        let (_dir, path) = fake_tool("0.1.0");
        let invoker = LocatedBinaryInvoker::new(Arc::new(RealRuntime), vec![])
            .binary(Some(path))
            .leading_args(vec!["tool".into()]);

        let out = invoker
            .invoke(&["install".to_string()], &InvokeOptions::default())
            .unwrap();
        assert_eq!(out.status, 2);
        assert_eq!(out.output.trim(), "args: tool install");
    }

    #[test]
    fn test_version_prefix_accepted() {
        let (_dir, path) = fake_tool("0.1.0");
        let invoker = LocatedBinaryInvoker::new(Arc::new(RealRuntime), vec![])
            .binary(Some(path))
            .required_version(Some("0.1".into()));
        assert!(invoker.invoke(&[], &InvokeOptions::default()).is_ok());
    }

    #[test]
    fn test_version_mismatch() {
        let (_dir, path) = fake_tool("0.1.0");
        let invoker = LocatedBinaryInvoker::new(Arc::new(RealRuntime), vec![])
            .binary(Some(path))
            .required_version(Some("2.".into()));
        let err = invoker.invoke(&[], &InvokeOptions::default()).unwrap_err();
        assert!(matches!(err, Error::ExternalToolMismatch { ref found, .. } if found == "0.1.0"));
    }

    #[test]
    fn test_missing_configured_binary() {
        let invoker = LocatedBinaryInvoker::new(Arc::new(RealRuntime), vec![])
            .binary(Some(PathBuf::from("/nonexistent/verimport")));
        let err = invoker.invoke(&[], &InvokeOptions::default()).unwrap_err();
        assert!(matches!(err, Error::ExternalToolUnavailable(_)));
    }

    #[test]
    fn test_configured_binary_is_checked_through_runtime() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_is_file()
            .withf(|p| p == Path::new("/opt/tools/verimport"))
            .times(1)
            .returning(|_| false);
        let invoker = LocatedBinaryInvoker::new(Arc::new(runtime), vec![])
            .binary(Some(PathBuf::from("/opt/tools/verimport")));

        let err = invoker.invoke(&[], &InvokeOptions::default()).unwrap_err();
        assert!(matches!(err, Error::ExternalToolUnavailable(ref m) if m.contains("/opt/tools/verimport")));
    }

    #[test]
    fn test_path_search_uses_runtime_environment() {
        let (dir, _path) = fake_tool("0.1.0");
        let search = dir.path().to_string_lossy().into_owned();
        let mut runtime = MockRuntime::new();
        runtime
            .expect_env_var()
            .withf(|key| key == "PATH")
            .returning(move |_| Ok(search.clone()));
        let invoker = LocatedBinaryInvoker::new(Arc::new(runtime), vec!["verimport".into()]);

        let out = invoker
            .invoke(&["install".to_string()], &InvokeOptions::default())
            .unwrap();
        assert_eq!(out.output.trim(), "args: install");
    }

    #[test]
    fn test_nothing_on_path() {
        let invoker =
            LocatedBinaryInvoker::new(Arc::new(RealRuntime), vec!["verimport-no-such-tool-7f3a".into()]);
        let err = invoker.invoke(&[], &InvokeOptions::default()).unwrap_err();
        assert!(matches!(err, Error::ExternalToolUnavailable(ref m) if m.contains("verimport-no-such-tool-7f3a")));
    }

    #[test]
    fn test_finds_sh_on_path() {
        let invoker = LocatedBinaryInvoker::new(Arc::new(RealRuntime), vec!["sh".into()])
            .leading_args(vec!["-c".into()]);
        let out = invoker
            .invoke(&["echo found".to_string()], &InvokeOptions::default())
            .unwrap();
        assert!(out.success());
        assert_eq!(out.output.trim(), "found");
    }
}
