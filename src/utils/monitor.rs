#[cfg(feature = "cli")]
use sysinfo::{Pid, ProcessesToUpdate, System};
#[cfg(feature = "cli")]
use std::sync::Mutex;
#[cfg(feature = "cli")]
use std::time::{Duration, Instant};

#[cfg(feature = "cli")]
#[derive(Debug, Clone)]
pub struct ServiceStats {
    pub service: String,
    pub pid: u32,
    pub cpu_usage: f32,
    pub memory_usage_mb: u64,
    pub memory_usage_percent: f32,
}

/// 已啟動服務的資源監看
#[cfg(feature = "cli")]
pub struct ProcessMonitor {
    system: Mutex<System>,
    start_time: Instant,
    enabled: bool,
}

#[cfg(feature = "cli")]
impl ProcessMonitor {
    pub fn new(enabled: bool) -> Self {
        let mut system = System::new();
        if enabled {
            system.refresh_memory();
        }

        Self {
            system: Mutex::new(system),
            start_time: Instant::now(),
            enabled,
        }
    }

    pub fn collect(&self, services: &[(String, u32)]) -> Vec<ServiceStats> {
        if !self.enabled || services.is_empty() {
            return Vec::new();
        }

        let Ok(mut system) = self.system.lock() else {
            return Vec::new();
        };
        let pids: Vec<Pid> = services.iter().map(|(_, pid)| Pid::from_u32(*pid)).collect();
        system.refresh_memory();
        system.refresh_processes(ProcessesToUpdate::Some(&pids), true);

        let total_memory = system.total_memory() / 1024 / 1024; // MB
        services
            .iter()
            .filter_map(|(service, pid)| {
                let process = system.process(Pid::from_u32(*pid))?;
                let memory_mb = process.memory() / 1024 / 1024;
                let memory_percent = if total_memory > 0 {
                    (memory_mb as f32 / total_memory as f32) * 100.0
                } else {
                    0.0
                };
                Some(ServiceStats {
                    service: service.clone(),
                    pid: *pid,
                    cpu_usage: process.cpu_usage(),
                    memory_usage_mb: memory_mb,
                    memory_usage_percent: memory_percent,
                })
            })
            .collect()
    }

    pub fn log_services(&self, phase: &str, services: &[(String, u32)]) {
        for stats in self.collect(services) {
            tracing::info!(
                "📊 {} - {} (pid {}): CPU {:.1}%, Memory {}MB ({:.1}%)",
                phase,
                stats.service,
                stats.pid,
                stats.cpu_usage,
                stats.memory_usage_mb,
                stats.memory_usage_percent
            );
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(feature = "cli")]
impl Default for ProcessMonitor {
    fn default() -> Self {
        Self::new(false)
    }
}

// 為非CLI環境提供空實現
#[cfg(not(feature = "cli"))]
pub struct ProcessMonitor;

#[cfg(not(feature = "cli"))]
impl ProcessMonitor {
    pub fn new(_enabled: bool) -> Self {
        Self
    }

    pub fn log_services(&self, _phase: &str, _services: &[(String, u32)]) {}

    pub fn is_enabled(&self) -> bool {
        false
    }
}
