use crate::config::settings::{Settings, DEFAULT_SETTINGS_FILE};
use crate::utils::error::{ComposeError, Result};
use crate::utils::validation::{validate_file_extensions, validate_service_name, Validate};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

pub const DEFAULT_STATE_DIR: &str = ".small-compose";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "small-compose")]
#[command(about = "Resolve and run a multi-service topology on a single host")]
pub struct CliConfig {
    /// 定義文件，可重複；後面的文件覆蓋前面的
    #[arg(short = 'f', long = "file", global = true, default_value = "compose.yaml")]
    pub files: Vec<PathBuf>,

    #[arg(short = 'p', long, global = true)]
    pub project_name: Option<String>,

    /// 狀態目錄（volume、服務工作目錄）
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_FILE)]
    pub settings: PathBuf,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    #[arg(long, global = true, help = "Log CPU and memory of launched services")]
    pub monitor: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// 啟動服務（未指定時全部），並依賴關係與健康狀態排序
    Up {
        /// 只啟動這些服務及其傳遞依賴
        services: Vec<String>,

        /// 所有服務到達終止狀態後立即停止並結束
        #[arg(long)]
        wait: bool,

        #[arg(long, value_enum, default_value_t = ReportFormat::Table)]
        report: ReportFormat,
    },
    /// 輸出解析後的拓撲（YAML）
    Config,
    /// 輸出啟動順序與依賴邊
    Order,
    /// 移除具名 volume；執行中的服務屬於 `up` 程序，以 Ctrl-C 停止
    Down {
        #[arg(long)]
        volumes: bool,
    },
}

impl CliConfig {
    /// 狀態目錄：命令列優先，其次設定檔，最後預設值
    pub fn state_dir(&self, settings: &Settings) -> PathBuf {
        self.state_dir
            .clone()
            .or_else(|| settings.orchestrator.state_dir.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
    }

    /// 第一個定義文件所在的目錄，建置指令在此執行
    pub fn project_dir(&self) -> PathBuf {
        self.files
            .first()
            .and_then(|file| file.parent())
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        let files: Vec<String> = self
            .files
            .iter()
            .map(|f| f.display().to_string())
            .collect();
        validate_file_extensions("file", &files, &["yaml", "yml", "toml"])?;

        if let Some(name) = &self.project_name {
            validate_service_name("project_name", name)?;
        }
        match &self.command {
            Command::Up { services, .. } => {
                for service in services {
                    validate_service_name("services", service)?;
                }
            }
            Command::Down { volumes: false } => {
                return Err(ComposeError::InvalidConfigValueError {
                    field: "down".to_string(),
                    value: "--volumes not set".to_string(),
                    reason: "down only removes named volumes, pass --volumes; running services are stopped with Ctrl-C in the `up` process".to_string(),
                });
            }
            _ => {}
        }
        Ok(())
    }
}
