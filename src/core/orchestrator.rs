use crate::core::health::{GateOutcome, HealthGate, StateBoard};
use crate::core::launcher::{ProcessHandle, ProcessLauncher};
use crate::core::topology::ResolvedTopology;
use crate::domain::model::{FinalState, ServiceState};
use crate::domain::ports::{ProbeProvider, ProcessRuntime, VolumeStore};
use crate::utils::error::{ComposeError, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// restart 政策未指定次數時的上限
    pub restart_limit: u32,
    pub stop_grace_period: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            restart_limit: 3,
            stop_grace_period: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    pub name: String,
    pub state: FinalState,
    pub restarts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 一次 `up` 的結果：每個選定服務的最終狀態
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub project: String,
    pub services: Vec<ServiceReport>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn service(&self, name: &str) -> Option<&ServiceReport> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ServiceReport> {
        self.services.iter().filter(|s| s.state != FinalState::Healthy)
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn render_table(&self) -> String {
        let width = self
            .services
            .iter()
            .map(|s| s.name.len())
            .max()
            .unwrap_or(0)
            .max("SERVICE".len());

        let mut out = String::new();
        let _ = writeln!(out, "{:<width$}  {:<12}  {:>8}  DETAIL", "SERVICE", "STATE", "RESTARTS");
        for service in &self.services {
            let _ = writeln!(
                out,
                "{:<width$}  {:<12}  {:>8}  {}",
                service.name,
                service.state.to_string(),
                service.restarts,
                service.error.as_deref().unwrap_or("")
            );
        }
        out
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct Supervisor<R: ProcessRuntime, S: VolumeStore> {
    topology: Arc<ResolvedTopology>,
    launcher: ProcessLauncher<R, S>,
    probes: Arc<dyn ProbeProvider>,
    board: StateBoard,
    handles: Mutex<IndexMap<String, Arc<ProcessHandle>>>,
    cancel: CancellationToken,
    options: OrchestratorOptions,
}

/// 監督者：每個服務一個並行任務，依邊的條件等待上游、啟動、健康檢查、重啟
pub struct Orchestrator<R: ProcessRuntime, S: VolumeStore> {
    inner: Arc<Supervisor<R, S>>,
}

impl<R, S> Orchestrator<R, S>
where
    R: ProcessRuntime + 'static,
    S: VolumeStore + 'static,
{
    pub fn new(
        topology: Arc<ResolvedTopology>,
        launcher: ProcessLauncher<R, S>,
        probes: Arc<dyn ProbeProvider>,
        options: OrchestratorOptions,
    ) -> Self {
        let board = StateBoard::new(topology.services().keys().cloned());
        Self {
            inner: Arc::new(Supervisor {
                topology,
                launcher,
                probes,
                board,
                handles: Mutex::new(IndexMap::new()),
                cancel: CancellationToken::new(),
                options,
            }),
        }
    }

    /// 取消所有等待與探測（teardown 訊號）
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub fn state_of(&self, service: &str) -> Option<ServiceState> {
        self.inner.board.get(service)
    }

    pub fn launcher(&self) -> &ProcessLauncher<R, S> {
        &self.inner.launcher
    }

    /// 已啟動服務的 PID
    pub fn pids(&self) -> Vec<(String, u32)> {
        lock(&self.inner.handles)
            .iter()
            .filter_map(|(name, handle)| handle.pid().map(|pid| (name.clone(), pid)))
            .collect()
    }

    /// 啟動選定的服務（含其傳遞依賴），等到每個服務都到達終止狀態後回報
    pub async fn up(&self, targets: &[String]) -> Result<RunReport> {
        let selection = self.inner.topology.select(targets)?;
        tracing::info!(
            "📦 Starting {} service(s) for '{}': {}",
            selection.len(),
            self.inner.topology.name(),
            selection.join(", ")
        );

        let mut tasks = JoinSet::new();
        for service in &selection {
            let inner = self.inner.clone();
            let service = service.clone();
            tasks.spawn(async move { inner.supervise(&service).await });
        }

        let mut reports: HashMap<String, ServiceReport> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    reports.insert(report.name.clone(), report);
                }
                Err(e) => tracing::error!("❌ Service task aborted: {}", e),
            }
        }

        let services = selection
            .iter()
            .map(|name| {
                reports.remove(name).unwrap_or_else(|| ServiceReport {
                    name: name.clone(),
                    state: self
                        .inner
                        .board
                        .get(name)
                        .map(FinalState::from)
                        .unwrap_or(FinalState::NotStarted),
                    restarts: 0,
                    pid: None,
                    error: Some("supervisor task aborted".to_string()),
                })
            })
            .collect();

        let report = RunReport {
            project: self.inner.topology.name().to_string(),
            services,
            finished_at: Utc::now(),
        };

        if report.is_success() {
            tracing::info!("✅ All {} service(s) healthy", report.services.len());
        } else {
            tracing::warn!(
                "⚠️ {} service(s) not healthy: {}",
                report.failures().count(),
                report
                    .failures()
                    .map(|s| format!("{} ({})", s.name, s.state))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        Ok(report)
    }

    /// 取消所有等待，依啟動順序的反向停止已啟動的服務；回傳實際停止的順序
    ///
    /// 可與進行中的 `up` 並行呼叫：此時才完成啟動的服務由其監督任務自行停止，不在回傳值內。
    pub async fn teardown(&self) -> Vec<String> {
        self.inner.cancel.cancel();
        let grace = self.inner.options.stop_grace_period;
        let mut stopped = Vec::new();

        for service in self.inner.topology.graph().teardown_order() {
            let handle = lock(&self.inner.handles).shift_remove(&service);
            let Some(handle) = handle else {
                continue;
            };
            tracing::info!("🛑 Stopping '{}'", service);
            if let Err(e) = handle.stop(grace).await {
                tracing::warn!("⚠️ Failed to stop '{}': {}", service, e);
            }
            self.inner.launcher.release_ports(&service);
            self.inner.board.set(&service, ServiceState::Stopped);
            stopped.push(service);
        }
        stopped
    }

    /// 移除非 external 的具名 volume
    pub async fn remove_volumes(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for (name, spec) in self.inner.topology.volumes() {
            if self.inner.launcher.volumes().remove(name, spec).await? {
                removed.push(name.clone());
            }
        }
        Ok(removed)
    }
}

impl<R, S> Supervisor<R, S>
where
    R: ProcessRuntime + 'static,
    S: VolumeStore + 'static,
{
    async fn supervise(&self, service: &str) -> ServiceReport {
        let mut report = ServiceReport {
            name: service.to_string(),
            state: FinalState::NotStarted,
            restarts: 0,
            pid: None,
            error: None,
        };

        let Some(def) = self.topology.service(service) else {
            report.error = Some(format!("unknown service '{}'", service));
            return report;
        };

        self.board.set(service, ServiceState::Waiting);
        for edge in self.topology.graph().dependencies_of(service) {
            tracing::debug!("'{}' waiting for '{}' ({})", service, edge.to, edge.condition);
            if let Err(e) = self
                .board
                .wait_for(service, &edge.to, edge.condition, &self.cancel)
                .await
            {
                if !matches!(e, ComposeError::Cancelled) {
                    tracing::warn!("❌ {}", e);
                    self.board.set(service, ServiceState::NotStarted);
                }
                report.error = Some(e.to_string());
                return report;
            }
        }

        let policy = def.restart_policy();
        loop {
            if self.cancel.is_cancelled() {
                report.error = Some(ComposeError::Cancelled.to_string());
                break;
            }

            self.board.set(service, ServiceState::Starting);
            let handle = match self.launcher.launch(def).await {
                Ok(handle) => Arc::new(handle),
                Err(e) => {
                    tracing::error!("❌ {}", e);
                    tracing::info!("💡 {}", e.recovery_suggestion());
                    self.board.set(service, ServiceState::LaunchFailed);
                    report.error = Some(e.to_string());
                    break;
                }
            };
            report.pid = handle.pid();
            lock(&self.handles).insert(service.to_string(), handle.clone());
            if self.cancel.is_cancelled() {
                // teardown 可能已掃過此服務；誰移除 handle 誰負責停止
                let orphan = lock(&self.handles).shift_remove(service);
                if let Some(handle) = orphan {
                    tracing::info!("🛑 Stopping '{}' launched during teardown", service);
                    if let Err(e) = handle.stop(self.options.stop_grace_period).await {
                        tracing::warn!("⚠️ Failed to stop '{}': {}", service, e);
                    }
                    self.launcher.release_ports(service);
                    self.board.set(service, ServiceState::Stopped);
                }
                report.error = Some(ComposeError::Cancelled.to_string());
                break;
            }
            self.board.set(service, ServiceState::Pending);

            let Some(check) = def.active_health_check() else {
                self.board.set(service, ServiceState::Healthy);
                break;
            };

            let probe = self
                .probes
                .probe_for(service, check, &handle.network.address);
            let gate = HealthGate::new(check.clone());
            let outcome = gate
                .run(service, probe.as_ref(), handle.launched_at, &self.cancel)
                .await;

            match outcome.outcome {
                GateOutcome::Healthy => {
                    tracing::info!("✅ '{}' is healthy", service);
                    self.board.set(service, ServiceState::Healthy);
                    break;
                }
                GateOutcome::Cancelled => {
                    report.error = Some(ComposeError::Cancelled.to_string());
                    break;
                }
                GateOutcome::Unhealthy => {
                    let reason = outcome.last_error.unwrap_or_default();
                    if policy.allows_restart(report.restarts, self.options.restart_limit) {
                        report.restarts += 1;
                        tracing::warn!(
                            "🔄 '{}' unhealthy ({}), restarting ({} so far, policy {})",
                            service,
                            reason,
                            report.restarts,
                            policy
                        );
                        if let Err(e) = handle.stop(self.options.stop_grace_period).await {
                            tracing::warn!("⚠️ Failed to stop '{}' before restart: {}", service, e);
                        }
                        lock(&self.handles).shift_remove(service);
                        continue;
                    }

                    tracing::error!(
                        "❌ '{}' unhealthy after {} counted failure(s): {}",
                        service,
                        outcome.counted_failures,
                        reason
                    );
                    self.board.set(service, ServiceState::Unhealthy);
                    report.error = Some(format!("health check failed: {}", reason));
                    break;
                }
            }
        }

        report.state = self
            .board
            .get(service)
            .map(FinalState::from)
            .unwrap_or(FinalState::NotStarted);
        report
    }
}
