use thiserror::Error;

/// 啟動失敗的具體原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchFailure {
    #[error("artifact missing: {0}")]
    ArtifactMissing(String),

    #[error("host port {port} already published by '{owner}'")]
    PortConflict { port: u16, owner: String },

    #[error("attach target '{0}' has no network identity")]
    NetworkUnavailable(String),

    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("build failed: {0}")]
    Build(String),

    #[error("volume unavailable: {0}")]
    Volume(String),
}

#[derive(Error, Debug)]
pub enum ComposeError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Failed to parse '{file}': {message}")]
    ParseError { file: String, message: String },

    #[error("Service '{service}' extends unknown service '{parent}' in '{file}'")]
    UnknownParentService {
        service: String,
        parent: String,
        file: String,
    },

    #[error("Service '{service}': {reason}")]
    InvalidAttributeCombination { service: String, reason: String },

    #[error("Service '{service}' depends on undefined service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("Service '{service}' mounts undeclared named volume '{volume}'")]
    UnknownVolume { service: String, volume: String },

    #[error("Missing configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Dependency cycle detected: {}", .cycle.join(" -> "))]
    DependencyCycleError { cycle: Vec<String> },

    #[error("Failed to launch '{service}': {reason}")]
    LaunchError {
        service: String,
        reason: LaunchFailure,
    },

    #[error("Service '{service}' not started: dependency '{dependency}' is unhealthy")]
    DependencyUnhealthyError { service: String, dependency: String },

    #[error("Service '{service}' not started: dependency '{dependency}' failed to launch")]
    DependencyFailedError { service: String, dependency: String },

    #[error("Operation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Dependency,
    Launch,
    Health,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ComposeError {
    pub fn config(message: impl Into<String>) -> Self {
        ComposeError::ConfigError {
            message: message.into(),
        }
    }

    pub fn launch(service: impl Into<String>, reason: LaunchFailure) -> Self {
        ComposeError::LaunchError {
            service: service.into(),
            reason,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ComposeError::ConfigError { .. }
            | ComposeError::ParseError { .. }
            | ComposeError::UnknownParentService { .. }
            | ComposeError::InvalidAttributeCombination { .. }
            | ComposeError::UnknownDependency { .. }
            | ComposeError::UnknownVolume { .. }
            | ComposeError::MissingConfigError { .. }
            | ComposeError::InvalidConfigValueError { .. }
            | ComposeError::YamlError(_)
            | ComposeError::TomlError(_) => ErrorCategory::Configuration,
            ComposeError::DependencyCycleError { .. }
            | ComposeError::DependencyFailedError { .. } => ErrorCategory::Dependency,
            ComposeError::LaunchError { .. } => ErrorCategory::Launch,
            ComposeError::DependencyUnhealthyError { .. } | ComposeError::HttpError(_) => {
                ErrorCategory::Health
            }
            ComposeError::IoError(_)
            | ComposeError::SerializationError(_)
            | ComposeError::Cancelled => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ComposeError::Cancelled => ErrorSeverity::Low,
            ComposeError::DependencyUnhealthyError { .. }
            | ComposeError::DependencyFailedError { .. }
            | ComposeError::HttpError(_) => ErrorSeverity::Medium,
            ComposeError::LaunchError { .. } => ErrorSeverity::High,
            ComposeError::IoError(_) | ComposeError::SerializationError(_) => {
                ErrorSeverity::Critical
            }
            _ => match self.category() {
                ErrorCategory::Configuration | ErrorCategory::Dependency => ErrorSeverity::High,
                _ => ErrorSeverity::Critical,
            },
        }
    }

    /// 是否屬於解析階段即可判定的致命錯誤（任何程序啟動之前）
    pub fn is_fatal_before_launch(&self) -> bool {
        self.category() == ErrorCategory::Configuration
            || matches!(self, ComposeError::DependencyCycleError { .. })
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            ComposeError::UnknownParentService { parent, file, .. } => format!(
                "Check that '{}' is defined under `services` in '{}'",
                parent, file
            ),
            ComposeError::InvalidAttributeCombination { .. } => {
                "Remove the conflicting attribute; attached services inherit ports from their target"
                    .to_string()
            }
            ComposeError::UnknownDependency { dependency, .. } => format!(
                "Define '{}' or remove it from depends_on",
                dependency
            ),
            ComposeError::UnknownVolume { volume, .. } => {
                format!("Declare '{}' under the top-level `volumes` key", volume)
            }
            ComposeError::DependencyCycleError { .. } => {
                "Break the cycle by removing one of the depends_on edges".to_string()
            }
            ComposeError::LaunchError { reason, .. } => match reason {
                LaunchFailure::PortConflict { .. } => {
                    "Publish a different host port or stop the conflicting service".to_string()
                }
                LaunchFailure::ArtifactMissing(_) => {
                    "Declare a command or make sure the build produced an artifact".to_string()
                }
                LaunchFailure::Build(_) => "Inspect the build output and retry".to_string(),
                _ => "Check the service command and host resources".to_string(),
            },
            ComposeError::DependencyUnhealthyError { dependency, .. } => format!(
                "Inspect the health probe of '{}' and its logs",
                dependency
            ),
            ComposeError::DependencyFailedError { dependency, .. } => {
                format!("Fix the launch failure of '{}' first", dependency)
            }
            ComposeError::ParseError { .. }
            | ComposeError::YamlError(_)
            | ComposeError::TomlError(_) => {
                "Make sure the definition file is valid YAML or TOML".to_string()
            }
            ComposeError::MissingConfigError { field } => format!("Set '{}'", field),
            ComposeError::InvalidConfigValueError { field, .. } => {
                format!("Correct the value of '{}'", field)
            }
            ComposeError::HttpError(_) => "Check that the probe endpoint is reachable".to_string(),
            ComposeError::Cancelled => "No action needed".to_string(),
            _ => "Check the logs for details".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Invalid configuration: {}", self),
            ErrorCategory::Dependency => format!("Dependency problem: {}", self),
            ErrorCategory::Launch => format!("Launch failed: {}", self),
            ErrorCategory::Health => format!("Health check problem: {}", self),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, ComposeError>;
