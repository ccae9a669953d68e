use clap::Parser;
use small_compose::adapters::{
    CommandBuildCollaborator, DefaultProbeProvider, FileMirror, LocalProcessRuntime,
    LocalVolumeStore,
};
use small_compose::config::{CliConfig, Command, LogFormat, ReportFormat, Settings};
use small_compose::core::{
    DefinitionStore, Orchestrator, ProcessLauncher, ResolvedTopology, TopologyMirror,
};
use small_compose::utils::error::{ErrorSeverity, Result};
use small_compose::utils::monitor::ProcessMonitor;
use small_compose::utils::{logger, validation::Validate};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[tokio::main]
async fn main() {
    let config = CliConfig::parse();

    // 初始化日誌
    match config.log_format {
        LogFormat::Compact => logger::init_cli_logger(config.verbose),
        LogFormat::Json => logger::init_json_logger(config.verbose),
    }

    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    match run(config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(
                "❌ small-compose failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());

            // 根據錯誤嚴重程度決定退出碼
            let exit_code = match e.severity() {
                ErrorSeverity::Low => 0,
                ErrorSeverity::Medium => 2,
                ErrorSeverity::High => 1,
                ErrorSeverity::Critical => 3,
            };
            std::process::exit(exit_code);
        }
    }
}

async fn run(config: CliConfig) -> Result<i32> {
    let settings = Settings::load_or_default(&config.settings)?;

    let mut store = DefinitionStore::new();
    let mut topology = store.resolve(&config.files)?;
    if let Some(name) = &config.project_name {
        topology = topology.with_name(name.clone());
    }
    let topology = Arc::new(topology);
    tracing::info!(
        "📋 Resolved '{}': {} service(s), start order {}",
        topology.name(),
        topology.services().len(),
        topology.order().join(" → ")
    );

    let mirror_task = spawn_mirror(&settings, &topology);

    let code = match &config.command {
        Command::Config => {
            print!("{}", topology.render_yaml()?);
            0
        }
        Command::Order => {
            print_order(&topology);
            0
        }
        Command::Down { .. } => {
            // 未帶 --volumes 已在驗證階段拒絕
            let orchestrator = build_orchestrator(&config, &settings, topology.clone());
            let removed = orchestrator.remove_volumes().await?;
            tracing::info!("🗑️ Removed {} volume(s)", removed.len());
            0
        }
        Command::Up {
            services,
            wait,
            report,
        } => {
            let orchestrator = build_orchestrator(&config, &settings, topology.clone());
            run_up(&config, orchestrator, services, *wait, *report).await?
        }
    };

    if let Some(task) = mirror_task {
        let _ = task.await;
    }
    Ok(code)
}

fn build_orchestrator(
    config: &CliConfig,
    settings: &Settings,
    topology: Arc<ResolvedTopology>,
) -> Orchestrator<LocalProcessRuntime, LocalVolumeStore> {
    let project_state = config.state_dir(settings).join(topology.name());
    let builder = CommandBuildCollaborator::new(
        settings.build.command.clone(),
        topology.name(),
        config.project_dir(),
    );
    let launcher = ProcessLauncher::new(
        LocalProcessRuntime::new(&project_state),
        LocalVolumeStore::new(project_state.join("volumes")),
        topology.volumes().clone(),
    )
    .with_builder(Arc::new(builder));

    let probes = match &settings.probe.host {
        Some(host) => DefaultProbeProvider::new().with_host(host.clone()),
        None => DefaultProbeProvider::new(),
    };

    Orchestrator::new(
        topology,
        launcher,
        Arc::new(probes),
        settings.orchestrator_options(),
    )
}

async fn run_up(
    config: &CliConfig,
    orchestrator: Orchestrator<LocalProcessRuntime, LocalVolumeStore>,
    services: &[String],
    wait: bool,
    format: ReportFormat,
) -> Result<i32> {
    let monitor = ProcessMonitor::new(config.monitor);
    if monitor.is_enabled() {
        tracing::info!("🔍 System monitoring enabled");
    }

    let cancel = orchestrator.cancel_token();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("🛑 Interrupt received, tearing down");
                cancel.cancel();
            }
        });
    }

    let report = orchestrator.up(services).await?;
    match format {
        ReportFormat::Table => print!("{}", report.render_table()),
        ReportFormat::Json => println!("{}", report.to_json()?),
    }
    monitor.log_services("Settled", &orchestrator.pids());

    if !wait && !cancel.is_cancelled() {
        tracing::info!("💡 Services running, press Ctrl-C to stop");
        cancel.cancelled().await;
        monitor.log_services("Stopping", &orchestrator.pids());
    }

    let stopped = orchestrator.teardown().await;
    tracing::info!("✅ Stopped {} service(s): {}", stopped.len(), stopped.join(", "));
    Ok(report.exit_code())
}

fn print_order(topology: &ResolvedTopology) {
    for (level, services) in topology.graph().levels().iter().enumerate() {
        println!("{}: {}", level, services.join(", "));
    }
    for edge in topology.graph().edges() {
        let marker = if edge.implicit { " (network)" } else { "" };
        println!("{} -> {} [{}]{}", edge.from, edge.to, edge.condition, marker);
    }
}

/// 背景推送解析後的拓撲；失敗只記錄，不影響執行
fn spawn_mirror(settings: &Settings, topology: &ResolvedTopology) -> Option<JoinHandle<()>> {
    let dir = settings.mirror.dir.clone()?;
    let mirror = FileMirror::new(dir, topology.name());
    let rendered = match topology.render_yaml() {
        Ok(rendered) => rendered,
        Err(e) => {
            tracing::warn!("⚠️ Could not render topology for mirroring: {}", e);
            return None;
        }
    };
    Some(tokio::spawn(async move {
        if let Err(e) = mirror.publish(&rendered).await {
            tracing::warn!("⚠️ Topology mirror failed: {}", e);
        }
    }))
}
