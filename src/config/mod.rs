#[cfg(feature = "cli")]
pub mod cli;
pub mod compose_file;
pub mod settings;

#[cfg(feature = "cli")]
pub use cli::{CliConfig, Command, LogFormat, ReportFormat};
pub use compose_file::{load_document, parse_document, DocumentFormat};
pub use settings::Settings;
