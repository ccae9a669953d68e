use crate::adapters::DEFAULT_BUILD_COMMAND;
use crate::core::interpolate::Ambient;
use crate::core::orchestrator::OrchestratorOptions;
use crate::utils::duration;
use crate::utils::error::{ComposeError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_range, validate_url, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SETTINGS_FILE: &str = "small-compose.toml";

/// 編排器設定（`small-compose.toml`），所有段落皆可省略
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub orchestrator: OrchestratorSection,
    pub build: BuildSection,
    pub mirror: MirrorSection,
    pub probe: ProbeSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub restart_limit: u32,
    #[serde(with = "duration")]
    pub stop_grace_period: Duration,
    pub state_dir: Option<String>,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        let defaults = OrchestratorOptions::default();
        Self {
            restart_limit: defaults.restart_limit,
            stop_grace_period: defaults.stop_grace_period,
            state_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    /// 可用 `{dockerfile}`、`{target}`、`{tag}`、`{context}`
    pub command: String,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            command: DEFAULT_BUILD_COMMAND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorSection {
    /// 設定後，每次解析出的拓撲有變更就寫到此目錄
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    /// HTTP 探測連線的主機，預設為服務的網路位址
    pub host: Option<String>,
}

impl Settings {
    /// 從 TOML 檔案載入設定
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content, &Ambient::from_process())
    }

    /// 檔案存在才載入，否則使用預設值
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            tracing::debug!("Loading settings from {}", path.as_ref().display());
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// 從 TOML 字串解析設定，先展開 `${VAR}` 參照
    pub fn from_toml_str(content: &str, ambient: &Ambient) -> Result<Self> {
        let processed = ambient.substitute(content);
        let settings: Settings = toml::from_str(&processed)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            restart_limit: self.orchestrator.restart_limit,
            stop_grace_period: self.orchestrator.stop_grace_period,
        }
    }
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("build.command", &self.build.command)?;
        validate_range("orchestrator.restart_limit", self.orchestrator.restart_limit, 0, 100)?;

        if self.orchestrator.stop_grace_period == Duration::ZERO {
            return Err(ComposeError::InvalidConfigValueError {
                field: "orchestrator.stop_grace_period".to_string(),
                value: duration::format(self.orchestrator.stop_grace_period),
                reason: "must be greater than zero".to_string(),
            });
        }

        if let Some(dir) = &self.orchestrator.state_dir {
            validate_path("orchestrator.state_dir", dir)?;
        }
        if let Some(dir) = &self.mirror.dir {
            validate_path("mirror.dir", dir)?;
        }
        if let Some(host) = &self.probe.host {
            validate_non_empty_string("probe.host", host)?;
            validate_url("probe.host", &format!("http://{}", host))?;
        }
        Ok(())
    }
}
