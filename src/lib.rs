//! Install and load several versions of a same-named package side by side.
//!
//! Each `(name, version)` is installed into its own directory under the
//! install root and loaded under a version-qualified alias such as
//! `custom_1_0_0`, so `custom` 1.0.0 and `custom` 0.0.0 can both be resident
//! in one [`unit::UnitCache`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use verimport::{config::Config, loader::VersionedLoader, runtime::RealRuntime, unit::UnitCache};
//!
//! # fn main() -> verimport::Result<()> {
//! let runtime = Arc::new(RealRuntime);
//! let config = Config::default();
//! let mut loader = VersionedLoader::from_config(runtime, &config, UnitCache::new())?;
//! let custom = loader.import("./custom.unit", Some("1.0.0"), None)?;
//! assert_eq!(custom.call("run_custom")?, "hello custom1");
//! # Ok(())
//! # }
//! ```

pub mod alias;
pub mod archive;
pub mod cleanup;
pub mod config;
pub mod dist;
pub mod error;
pub mod http;
pub mod index;
pub mod installer;
pub mod loader;
pub mod package;
pub mod registry;
pub mod runtime;
pub mod tool;
pub mod unit;
pub mod version;

pub use error::{Error, Result};
