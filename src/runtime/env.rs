//! Environment variables and well-known directories.

use anyhow::Context;
use std::env;
use std::path::PathBuf;

use super::RealRuntime;

impl RealRuntime {
    #[tracing::instrument(skip(self))]
    pub(crate) fn env_var_impl(&self, key: &str) -> Result<String, env::VarError> {
        env::var(key)
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn data_dir_impl(&self) -> Option<PathBuf> {
        dirs::data_dir()
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn temp_dir_impl(&self) -> PathBuf {
        env::temp_dir()
    }

    #[tracing::instrument(skip(self))]
    pub(crate) fn current_exe_impl(&self) -> anyhow::Result<PathBuf> {
        env::current_exe().context("Failed to locate the running executable")
    }
}

#[cfg(test)]
mod tests {
    use crate::runtime::{RealRuntime, Runtime};

    #[test]
    fn test_real_runtime_env_and_dirs() {
        let runtime = RealRuntime;

        // PATH should exist on all systems
        assert!(runtime.env_var("PATH").is_ok());
        assert!(
            runtime
                .env_var("VERIMPORT_SURELY_UNSET_VARIABLE_FOR_TEST")
                .is_err()
        );

        let temp = runtime.temp_dir();
        assert!(temp.is_absolute() || cfg!(windows));

        assert!(runtime.current_exe().unwrap().is_file());

        // CI might not have a data dir
        let _ = runtime.data_dir();
    }
}
