use clap::{Parser, Subcommand};
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::runtime::RealRuntime;
use crate::tool::ToolOutput;

/// Installer for packed distributions
#[derive(Parser, Debug)]
#[command(name = "verimport-dist", disable_version_flag = true)]
struct DistTool {
    #[command(subcommand)]
    command: DistCommand,
}

#[derive(Subcommand, Debug)]
enum DistCommand {
    /// Install distributions into a target directory
    Install {
        /// Directory receiving the payloads
        #[arg(long, value_name = "DIR")]
        target: PathBuf,

        /// Do not install declared dependencies
        #[arg(long)]
        no_deps: bool,

        /// Distribution files to install
        #[arg(required = true, value_name = "SOURCE")]
        sources: Vec<PathBuf>,
    },
}

/// Entry point of the packed-distribution tool.
///
/// `args` excludes the program name. Usage errors exit with status 2,
/// install errors with status 1.
pub fn tool_main(args: &[String]) -> ToolOutput {
    let argv = std::iter::once("verimport-dist".to_string()).chain(args.iter().cloned());
    let cli = match DistTool::try_parse_from(argv) {
        Ok(cli) => cli,
        Err(e) => {
            let status = if e.use_stderr() { 2 } else { 0 };
            return ToolOutput::new(status, e.to_string());
        }
    };

    match cli.command {
        DistCommand::Install {
            target,
            no_deps,
            sources,
        } => {
            let mut output = String::new();
            for source in &sources {
                match super::install(&RealRuntime, source, &target, !no_deps) {
                    Ok(installed) => {
                        for manifest in installed {
                            let _ = writeln!(output, "Installed {}-{}", manifest.name, manifest.version);
                        }
                    }
                    Err(e) => {
                        let _ = writeln!(output, "Error: {:#}", e);
                        return ToolOutput::new(1, output);
                    }
                }
            }
            ToolOutput::new(0, output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::test_dists;
    use tempfile::tempdir;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_install_reports_each_distribution() {
        let dir = tempdir().unwrap();
        let dist = test_dists::unit_dist(dir.path(), "custom", "1.0.0", &["helper"], "hi");
        test_dists::unit_dist(dir.path(), "helper", "2.0", &[], "help");
        let target = dir.path().join("target");

        let out = tool_main(&args(&[
            "install",
            "--target",
            target.to_str().unwrap(),
            dist.to_str().unwrap(),
        ]));

        assert_eq!(out.status, 0, "{}", out.output);
        assert_eq!(out.output, "Installed custom-1.0.0\nInstalled helper-2.0\n");
        assert!(target.join("helper.unit").exists());
    }

    #[test]
    fn test_no_deps_flag() {
        let dir = tempdir().unwrap();
        let dist = test_dists::unit_dist(dir.path(), "custom", "1.0.0", &["helper"], "hi");
        let target = dir.path().join("target");

        let out = tool_main(&args(&[
            "install",
            "--target",
            target.to_str().unwrap(),
            "--no-deps",
            dist.to_str().unwrap(),
        ]));

        assert!(out.success(), "{}", out.output);
        assert!(!target.join("helper.unit").exists());
    }

    #[test]
    fn test_install_error_is_status_one() {
        let dir = tempdir().unwrap();
        let out = tool_main(&args(&[
            "install",
            "--target",
            dir.path().to_str().unwrap(),
            dir.path().join("missing.dist").to_str().unwrap(),
        ]));
        assert_eq!(out.status, 1);
        assert!(out.output.starts_with("Error:"));
    }

    #[test]
    fn test_usage_error_is_status_two() {
        let out = tool_main(&args(&["install"]));
        assert_eq!(out.status, 2);
        assert!(tool_main(&args(&["frobnicate"])).status == 2);
    }
}
