pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use adapters::{DefaultProbeProvider, LocalProcessRuntime, LocalVolumeStore};
pub use config::Settings;
pub use core::{DefinitionStore, Orchestrator, ProcessLauncher, ResolvedTopology, RunReport};
pub use utils::error::{ComposeError, Result};
