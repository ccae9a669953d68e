// Adapters layer: concrete implementations of the domain ports for the local host

pub mod build;
pub mod mirror;
pub mod probe;
pub mod runtime;
pub mod storage;

pub use build::{CommandBuildCollaborator, DEFAULT_BUILD_COMMAND};
pub use mirror::FileMirror;
pub use probe::{CommandProbe, DefaultProbeProvider, HttpProbe};
pub use runtime::LocalProcessRuntime;
pub use storage::LocalVolumeStore;
