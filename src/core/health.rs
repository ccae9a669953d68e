use crate::domain::model::{DependencyCondition, HealthCheckDescriptor, ServiceState};
use crate::domain::ports::HealthProbe;
use crate::utils::error::{ComposeError, Result};
use indexmap::IndexMap;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Healthy,
    Unhealthy,
    Cancelled,
}

/// 一次健康閘門執行的結果
#[derive(Debug, Clone)]
pub struct GateReport {
    pub outcome: GateOutcome,
    /// 實際執行的探測次數
    pub probes: u32,
    /// 計入 retries 的連續失敗次數
    pub counted_failures: u32,
    pub last_error: Option<String>,
}

/// 單一服務的健康閘門：Pending 期間每隔 interval 探測一次
///
/// 啟動後 `start_period` 內的失敗不計入；連續 `retries` 次失敗判定 Unhealthy；
/// 任一次成功即判定 Healthy。
pub struct HealthGate {
    descriptor: HealthCheckDescriptor,
}

impl HealthGate {
    pub fn new(descriptor: HealthCheckDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &HealthCheckDescriptor {
        &self.descriptor
    }

    pub async fn run(
        &self,
        service: &str,
        probe: &dyn HealthProbe,
        launched_at: Instant,
        cancel: &CancellationToken,
    ) -> GateReport {
        let retries = self.descriptor.retries.max(1);
        let mut report = GateReport {
            outcome: GateOutcome::Cancelled,
            probes: 0,
            counted_failures: 0,
            last_error: None,
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return report,
                _ = sleep(self.descriptor.interval) => {}
            }

            report.probes += 1;
            let result = tokio::select! {
                _ = cancel.cancelled() => return report,
                result = timeout(self.descriptor.timeout, probe.check()) => result,
            };

            let reason = match result {
                Ok(Ok(())) => {
                    tracing::debug!("Probe for '{}' succeeded after {} attempt(s)", service, report.probes);
                    report.counted_failures = 0;
                    report.outcome = GateOutcome::Healthy;
                    return report;
                }
                Ok(Err(reason)) => reason,
                Err(_) => format!("probe timed out after {:?}", self.descriptor.timeout),
            };

            if launched_at.elapsed() < self.descriptor.start_period {
                tracing::debug!(
                    "Probe for '{}' failed during start period (not counted): {}",
                    service,
                    reason
                );
                report.last_error = Some(reason);
                continue;
            }

            report.counted_failures += 1;
            tracing::debug!(
                "Probe for '{}' failed ({}/{}): {}",
                service,
                report.counted_failures,
                retries,
                reason
            );
            report.last_error = Some(reason);

            if report.counted_failures >= retries {
                report.outcome = GateOutcome::Unhealthy;
                return report;
            }
        }
    }
}

/// 所有服務的狀態看板；依賴者透過它等待上游的狀態轉換
pub struct StateBoard {
    channels: IndexMap<String, watch::Sender<ServiceState>>,
}

impl StateBoard {
    pub fn new<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: services
                .into_iter()
                .map(|name| (name.into(), watch::channel(ServiceState::Waiting).0))
                .collect(),
        }
    }

    fn channel(&self, service: &str) -> Result<&watch::Sender<ServiceState>> {
        self.channels
            .get(service)
            .ok_or_else(|| ComposeError::config(format!("unknown service '{}'", service)))
    }

    pub fn set(&self, service: &str, state: ServiceState) {
        if let Ok(channel) = self.channel(service) {
            let previous = channel.send_replace(state);
            if previous != state {
                tracing::debug!("'{}': {} → {}", service, previous, state);
            }
        }
    }

    pub fn get(&self, service: &str) -> Option<ServiceState> {
        self.channels.get(service).map(|c| *c.borrow())
    }

    pub fn snapshot(&self) -> IndexMap<String, ServiceState> {
        self.channels
            .iter()
            .map(|(name, channel)| (name.clone(), *channel.borrow()))
            .collect()
    }

    /// 掛起直到 `dependency` 滿足 `condition`
    ///
    /// 上游 Unhealthy（需要 healthy 時）或啟動失敗會立即回傳錯誤，不會無限等待。
    pub async fn wait_for(
        &self,
        service: &str,
        dependency: &str,
        condition: DependencyCondition,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut rx = self.channel(dependency)?.subscribe();
        let settled = |state: &ServiceState| match condition {
            DependencyCondition::Started => state.is_started() || state.is_terminal(),
            DependencyCondition::Healthy => state.is_terminal(),
        };

        let state = tokio::select! {
            _ = cancel.cancelled() => return Err(ComposeError::Cancelled),
            result = rx.wait_for(settled) => match result {
                Ok(state) => *state,
                Err(_) => return Err(ComposeError::Cancelled),
            },
        };

        match (condition, state) {
            (_, ServiceState::LaunchFailed)
            | (_, ServiceState::NotStarted)
            | (_, ServiceState::Stopped) => Err(ComposeError::DependencyFailedError {
                service: service.to_string(),
                dependency: dependency.to_string(),
            }),
            (DependencyCondition::Healthy, ServiceState::Unhealthy) => {
                Err(ComposeError::DependencyUnhealthyError {
                    service: service.to_string(),
                    dependency: dependency.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}
