#![allow(dead_code)]

use async_trait::async_trait;
use small_compose::config::{parse_document, DocumentFormat};
use small_compose::core::{
    Ambient, HealthProbe, Orchestrator, OrchestratorOptions, ProbeProvider, ProcessLauncher,
    ProcessRuntime, ResolvedTopology, RunningProcess, VolumeStore,
};
use small_compose::domain::model::{HealthCheckDescriptor, LaunchSpec, ResolvedMount};
use small_compose::utils::error::{ComposeError, LaunchFailure, Result};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Spawned(String),
    Terminated(String),
}

/// 記錄啟動與停止順序的記憶體 runtime
#[derive(Clone, Default)]
pub struct RecordingRuntime {
    events: Arc<Mutex<Vec<(Instant, Event)>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    mounts: Arc<Mutex<HashMap<String, Vec<ResolvedMount>>>>,
    next_pid: Arc<AtomicU32>,
}

impl RecordingRuntime {
    pub fn fail_spawn(&self, service: &str) {
        self.failing.lock().unwrap().insert(service.to_string());
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn spawned(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Spawned(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn terminated(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Terminated(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn mounts_of(&self, service: &str) -> Vec<ResolvedMount> {
        self.mounts
            .lock()
            .unwrap()
            .get(service)
            .cloned()
            .unwrap_or_default()
    }

    pub fn spawned_at(&self, service: &str) -> Option<Instant> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|(_, e)| *e == Event::Spawned(service.to_string()))
            .map(|(at, _)| *at)
    }
}

struct RecordedProcess {
    service: String,
    pid: u32,
    events: Arc<Mutex<Vec<(Instant, Event)>>>,
}

#[async_trait]
impl RunningProcess for RecordedProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn terminate(&mut self, _grace: Duration) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((Instant::now(), Event::Terminated(self.service.clone())));
        Ok(())
    }
}

#[async_trait]
impl ProcessRuntime for RecordingRuntime {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn RunningProcess>> {
        if self.failing.lock().unwrap().contains(&spec.service) {
            return Err(ComposeError::launch(
                &spec.service,
                LaunchFailure::ArtifactMissing(format!("no artifact for '{}'", spec.service)),
            ));
        }
        self.events
            .lock()
            .unwrap()
            .push((Instant::now(), Event::Spawned(spec.service.clone())));
        self.mounts
            .lock()
            .unwrap()
            .insert(spec.service.clone(), spec.mounts.clone());
        Ok(Box::new(RecordedProcess {
            service: spec.service.clone(),
            pid: 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst),
            events: self.events.clone(),
        }))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    created: Mutex<HashSet<String>>,
}

impl VolumeStore for MemoryStore {
    async fn create(&self, name: &str) -> Result<PathBuf> {
        self.created.lock().unwrap().insert(name.to_string());
        Ok(PathBuf::from("/memory").join(name))
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.created.lock().unwrap().remove(name);
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.created.lock().unwrap().contains(name))
    }
}

/// 每個服務的探測劇本
#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// 第 n 次探測開始成功
    HealthyAfter(u32),
    AlwaysFailing,
    /// 第一次啟動永遠失敗，之後的啟動立即健康
    FailsFirstLaunch,
}

#[derive(Default)]
pub struct ScriptedProbes {
    scripts: HashMap<String, Script>,
    launches: Mutex<HashMap<String, u32>>,
}

impl ScriptedProbes {
    pub fn with(mut self, service: &str, script: Script) -> Self {
        self.scripts.insert(service.to_string(), script);
        self
    }
}

struct ScriptedProbe {
    script: Script,
    launch: u32,
    attempts: AtomicU32,
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn check(&self) -> std::result::Result<(), String> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let healthy = match self.script {
            Script::HealthyAfter(n) => attempt >= n,
            Script::AlwaysFailing => false,
            Script::FailsFirstLaunch => self.launch > 1,
        };
        if healthy {
            Ok(())
        } else {
            Err(format!("attempt {} refused", attempt))
        }
    }
}

impl ProbeProvider for ScriptedProbes {
    fn probe_for(
        &self,
        service: &str,
        _descriptor: &HealthCheckDescriptor,
        _address: &str,
    ) -> Box<dyn HealthProbe> {
        let mut launches = self.launches.lock().unwrap();
        let launch = launches.entry(service.to_string()).or_insert(0);
        *launch += 1;
        Box::new(ScriptedProbe {
            script: self
                .scripts
                .get(service)
                .copied()
                .unwrap_or(Script::HealthyAfter(1)),
            launch: *launch,
            attempts: AtomicU32::new(0),
        })
    }
}

pub fn topology(yaml: &str) -> Result<ResolvedTopology> {
    let document = parse_document(yaml, DocumentFormat::Yaml, "compose.yaml")?;
    ResolvedTopology::new("review", document.services, document.volumes)
}

pub fn orchestrator(
    topology: ResolvedTopology,
    runtime: RecordingRuntime,
    probes: ScriptedProbes,
) -> Orchestrator<RecordingRuntime, MemoryStore> {
    let launcher = ProcessLauncher::new(runtime, MemoryStore::default(), topology.volumes().clone())
        .with_ambient(Ambient::default());
    Orchestrator::new(
        Arc::new(topology),
        launcher,
        Arc::new(probes),
        OrchestratorOptions {
            restart_limit: 3,
            stop_grace_period: Duration::from_secs(1),
        },
    )
}
