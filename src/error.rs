//! Typed failures surfaced by the install and load engine.
//!
//! Collaborator layers (runtime, archive, index) report `anyhow::Error` with
//! context; the engine wraps those into one of the variants below so callers
//! can match on the failure kind.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Boxed cause attached to wrapping variants.
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum Error {
    /// Name or version cannot form an alias.
    #[error("invalid package spec: {0}")]
    InvalidSpec(String),

    /// No installer strategy is registered for the artifact.
    #[error("no installer registered for artifact kind '{kind}' ({})", .path.display())]
    UnknownArtifactKind { kind: String, path: PathBuf },

    /// A strategy or the external tool failed. Partial content was removed.
    #[error("failed to install {alias}")]
    InstallFailure {
        alias: String,
        #[source]
        source: Cause,
    },

    /// The external tool did not answer before the deadline.
    #[error("external tool did not finish within {timeout:?}")]
    ExternalToolTimeout { timeout: Duration },

    /// The external tool cannot be started or located.
    #[error("external tool unavailable: {0}")]
    ExternalToolUnavailable(String),

    /// A tool binary was found but reports an incompatible version.
    #[error("external tool at {} reports version {found}, expected {expected}", .path.display())]
    ExternalToolMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    /// The native load of an installed artifact failed.
    #[error("failed to load {alias} from {}", .path.display())]
    LoadError {
        alias: String,
        path: PathBuf,
        #[source]
        source: Cause,
    },

    /// Delete or evict of an alias nothing knows about.
    #[error("{0} is not installed")]
    NotInstalled(String),

    /// Two different artifacts sanitize to the same alias.
    #[error("alias {alias} is already bound to {}", .existing.display())]
    AliasCollision { alias: String, existing: PathBuf },

    /// A loaded unit does not expose the requested export.
    #[error("unit {unit} has no export named '{export}'")]
    MissingExport { unit: String, export: String },

    /// A bare package name that matches no installed or importable artifact.
    #[error("cannot find package '{0}'")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn install(alias: impl Into<String>, source: anyhow::Error) -> Self {
        Error::InstallFailure {
            alias: alias.into(),
            source: source.into(),
        }
    }

    pub(crate) fn load(
        alias: impl Into<String>,
        path: impl Into<PathBuf>,
        source: anyhow::Error,
    ) -> Self {
        Error::LoadError {
            alias: alias.into(),
            path: path.into(),
            source: source.into(),
        }
    }

    /// True for the failure kinds owned by the external tool invokers.
    pub fn is_tool_failure(&self) -> bool {
        matches!(
            self,
            Error::ExternalToolTimeout { .. }
                | Error::ExternalToolUnavailable(_)
                | Error::ExternalToolMismatch { .. }
        )
    }
}
