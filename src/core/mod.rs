pub mod graph;
pub mod health;
pub mod inheritance;
pub mod interpolate;
pub mod launcher;
pub mod orchestrator;
pub mod sidecar;
pub mod topology;
pub mod volumes;

pub use crate::domain::ports::{
    BuildCollaborator, HealthProbe, ProbeProvider, ProcessRuntime, RunningProcess, TopologyMirror,
    VolumeStore,
};
pub use crate::utils::error::Result;
pub use graph::{DependencyEdge, DependencyGraph};
pub use health::{GateOutcome, GateReport, HealthGate, StateBoard};
pub use interpolate::Ambient;
pub use launcher::{ProcessHandle, ProcessLauncher};
pub use orchestrator::{Orchestrator, OrchestratorOptions, RunReport, ServiceReport};
pub use topology::{DefinitionStore, ResolvedTopology};
pub use volumes::VolumeRegistry;
