use crate::core::interpolate::Ambient;
use crate::core::volumes::VolumeRegistry;
use crate::domain::model::{
    ArtifactRef, LaunchSpec, MountSource, NamedVolumeSpec, NetworkIdentity, NetworkMode,
    PortMapping, ResolvedMount, ServiceDefinition,
};
use crate::domain::ports::{BuildCollaborator, ProcessRuntime, RunningProcess, VolumeStore};
use crate::utils::error::{ComposeError, LaunchFailure, Result};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// 已啟動服務的控制代碼，供健康閘門探測、orchestrator 停止或重啟
pub struct ProcessHandle {
    pub service: String,
    pub network: NetworkIdentity,
    pub launched_at: Instant,
    pid: Option<u32>,
    process: tokio::sync::Mutex<Box<dyn RunningProcess>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub async fn stop(&self, grace: Duration) -> Result<()> {
        let mut process = self.process.lock().await;
        process.terminate(grace).await
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("service", &self.service)
            .field("network", &self.network)
            .field("pid", &self.pid)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// 程序啟動器：將有效定義具體化為 `LaunchSpec` 後交給 runtime
///
/// 負責變數展開、volume 掛載、網路身分分配與主機埠佔用表。
/// 所有啟動可以並行，主機埠衝突在此偵測並回報為 `PortConflict`。
pub struct ProcessLauncher<R: ProcessRuntime, S: VolumeStore> {
    runtime: R,
    volumes: VolumeRegistry<S>,
    declared_volumes: IndexMap<String, NamedVolumeSpec>,
    builder: Option<Arc<dyn BuildCollaborator>>,
    ambient: Ambient,
    host: String,
    next_network: AtomicU32,
    networks: Mutex<HashMap<String, NetworkIdentity>>,
    host_ports: Mutex<HashMap<u16, String>>,
}

impl<R: ProcessRuntime, S: VolumeStore> ProcessLauncher<R, S> {
    pub fn new(runtime: R, store: S, declared_volumes: IndexMap<String, NamedVolumeSpec>) -> Self {
        Self {
            runtime,
            volumes: VolumeRegistry::new(store),
            declared_volumes,
            builder: None,
            ambient: Ambient::from_process(),
            host: "127.0.0.1".to_string(),
            next_network: AtomicU32::new(1),
            networks: Mutex::new(HashMap::new()),
            host_ports: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_builder(mut self, builder: Arc<dyn BuildCollaborator>) -> Self {
        self.builder = Some(builder);
        self
    }

    pub fn with_ambient(mut self, ambient: Ambient) -> Self {
        self.ambient = ambient;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn ambient(&self) -> &Ambient {
        &self.ambient
    }

    pub fn volumes(&self) -> &VolumeRegistry<S> {
        &self.volumes
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// 啟動單一服務；失敗時釋放本次保留的主機埠
    pub async fn launch(&self, def: &ServiceDefinition) -> Result<ProcessHandle> {
        let service = def.name.as_str();
        tracing::info!("🚀 Launching '{}'", service);

        let artifact = self.resolve_artifact(def).await?;
        let command = self.resolve_command(def, artifact.as_ref())?;
        let environment = self.ambient.substitute_map(&def.environment);
        let mounts = self.resolve_mounts(def).await?;

        let (network, published_ports) = match def.network_mode() {
            NetworkMode::Isolated => {
                self.reserve_ports(service, &def.ports)?;
                (self.isolated_network(service), def.ports.iter().cloned().collect())
            }
            NetworkMode::Attach(target) => {
                if !def.ports.is_empty() {
                    return Err(ComposeError::InvalidAttributeCombination {
                        service: service.to_string(),
                        reason: format!("attached to '{}' but declares its own ports", target),
                    });
                }
                (self.attached_network(service, &target)?, Vec::new())
            }
        };

        let spec = LaunchSpec {
            service: service.to_string(),
            artifact,
            command,
            environment,
            mounts,
            network: network.clone(),
            published_ports,
        };

        let process = match self.runtime.spawn(&spec).await {
            Ok(process) => process,
            Err(err) => {
                self.release_ports(service);
                return Err(match err {
                    err @ ComposeError::LaunchError { .. } => err,
                    other => ComposeError::launch(service, LaunchFailure::Spawn(other.to_string())),
                });
            }
        };

        let pid = process.pid();
        tracing::info!(
            "✅ '{}' started (pid {}, network #{} owned by '{}')",
            service,
            pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            network.id,
            network.owner
        );

        Ok(ProcessHandle {
            service: service.to_string(),
            network,
            launched_at: Instant::now(),
            pid,
            process: tokio::sync::Mutex::new(process),
        })
    }

    async fn resolve_artifact(&self, def: &ServiceDefinition) -> Result<Option<ArtifactRef>> {
        if let Some(image) = &def.image {
            return Ok(Some(ArtifactRef::Image(self.ambient.substitute(image))));
        }
        let Some(build) = &def.build else {
            return Ok(None);
        };
        let Some(builder) = &self.builder else {
            return Err(ComposeError::launch(
                &def.name,
                LaunchFailure::ArtifactMissing("no build collaborator configured".to_string()),
            ));
        };
        tracing::info!("🔨 Building '{}' from {}", def.name, build.context);
        match builder.build(&def.name, build).await {
            Ok(artifact) => Ok(Some(artifact)),
            Err(err @ ComposeError::LaunchError { .. }) => Err(err),
            Err(other) => Err(ComposeError::launch(
                &def.name,
                LaunchFailure::Build(other.to_string()),
            )),
        }
    }

    fn resolve_command(
        &self,
        def: &ServiceDefinition,
        artifact: Option<&ArtifactRef>,
    ) -> Result<Vec<String>> {
        if let Some(command) = def.command.as_ref().filter(|c| !c.is_empty()) {
            return Ok(self.ambient.substitute_all(command));
        }
        if let Some(sidecar) = &def.sidecar {
            return Ok(sidecar.startup_args(&self.ambient));
        }
        match artifact {
            Some(ArtifactRef::Executable(path)) => Ok(vec![path.clone()]),
            // 映像檔自帶入口，交由 runtime 決定
            Some(ArtifactRef::Image(_)) => Ok(Vec::new()),
            None => Err(ComposeError::launch(
                &def.name,
                LaunchFailure::ArtifactMissing("no image, build or command declared".to_string()),
            )),
        }
    }

    async fn resolve_mounts(&self, def: &ServiceDefinition) -> Result<Vec<ResolvedMount>> {
        let mut mounts = Vec::with_capacity(def.volumes.len());
        for mount in &def.volumes {
            let source = match &mount.source {
                MountSource::Named(name) => {
                    let spec = self.declared_volumes.get(name).ok_or_else(|| {
                        ComposeError::UnknownVolume {
                            service: def.name.clone(),
                            volume: name.clone(),
                        }
                    })?;
                    self.volumes.acquire(name, spec).await.map_err(|err| match err {
                        ComposeError::LaunchError { reason, .. } => {
                            ComposeError::launch(&def.name, reason)
                        }
                        other => ComposeError::launch(
                            &def.name,
                            LaunchFailure::Volume(other.to_string()),
                        ),
                    })?
                }
                MountSource::HostPath(path) => self.expand_host_path(path),
            };
            mounts.push(ResolvedMount {
                source,
                target: mount.target.clone(),
                read_only: mount.read_only,
            });
        }
        Ok(mounts)
    }

    /// 展開 `~/` 與變數；仍為相對路徑時以目前目錄補成絕對路徑，讓 runtime 的連結有確定的目標
    fn expand_host_path(&self, path: &str) -> PathBuf {
        let path = self.ambient.substitute(path);
        let expanded = match (path.strip_prefix("~/"), self.ambient.get("HOME")) {
            (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
            _ => PathBuf::from(path),
        };
        if expanded.is_relative() {
            return std::path::absolute(&expanded).unwrap_or(expanded);
        }
        expanded
    }

    /// 原子地保留所有主機埠；同一服務重啟時可重複保留自己的埠
    fn reserve_ports<'a, I>(&self, service: &str, ports: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a PortMapping>,
    {
        let mut table = lock(&self.host_ports);
        let ports: Vec<u16> = ports.into_iter().map(|p| p.host).collect();
        for port in &ports {
            if let Some(owner) = table.get(port).filter(|owner| owner.as_str() != service) {
                tracing::warn!("❌ Host port {} requested by '{}' is held by '{}'", port, service, owner);
                return Err(ComposeError::launch(
                    service,
                    LaunchFailure::PortConflict {
                        port: *port,
                        owner: owner.clone(),
                    },
                ));
            }
        }
        for port in ports {
            table.insert(port, service.to_string());
        }
        Ok(())
    }

    /// 釋放服務持有的主機埠
    pub fn release_ports(&self, service: &str) {
        lock(&self.host_ports).retain(|_, owner| owner != service);
    }

    fn isolated_network(&self, service: &str) -> NetworkIdentity {
        lock(&self.networks)
            .entry(service.to_string())
            .or_insert_with(|| NetworkIdentity {
                id: self.next_network.fetch_add(1, Ordering::SeqCst),
                owner: service.to_string(),
                address: self.host.clone(),
            })
            .clone()
    }

    fn attached_network(&self, service: &str, target: &str) -> Result<NetworkIdentity> {
        let mut networks = lock(&self.networks);
        let identity = networks.get(target).cloned().ok_or_else(|| {
            ComposeError::launch(service, LaunchFailure::NetworkUnavailable(target.to_string()))
        })?;
        networks.insert(service.to_string(), identity.clone());
        Ok(identity)
    }

    pub fn network_of(&self, service: &str) -> Option<NetworkIdentity> {
        lock(&self.networks).get(service).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{BuildSpec, SidecarSpec, VolumeMount};
    use async_trait::async_trait;
    use std::collections::BTreeSet;

    #[derive(Default)]
    struct StubStore;

    impl VolumeStore for StubStore {
        async fn create(&self, name: &str) -> Result<PathBuf> {
            Ok(PathBuf::from("/state/volumes").join(name))
        }

        async fn remove(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn exists(&self, _name: &str) -> Result<bool> {
            Ok(false)
        }
    }

    struct NoopProcess;

    #[async_trait]
    impl RunningProcess for NoopProcess {
        fn pid(&self) -> Option<u32> {
            Some(42)
        }

        async fn terminate(&mut self, _grace: Duration) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CapturingRuntime {
        specs: Mutex<Vec<LaunchSpec>>,
    }

    #[async_trait]
    impl ProcessRuntime for CapturingRuntime {
        async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn RunningProcess>> {
            self.specs.lock().unwrap().push(spec.clone());
            Ok(Box::new(NoopProcess))
        }
    }

    struct FixedBuilder;

    #[async_trait]
    impl BuildCollaborator for FixedBuilder {
        async fn build(&self, service: &str, _spec: &BuildSpec) -> Result<ArtifactRef> {
            Ok(ArtifactRef::Image(format!("{}:dev", service)))
        }
    }

    fn launcher() -> ProcessLauncher<CapturingRuntime, StubStore> {
        let mut volumes = IndexMap::new();
        volumes.insert("review-db-data".to_string(), NamedVolumeSpec::default());
        ProcessLauncher::new(CapturingRuntime::default(), StubStore, volumes).with_ambient(
            Ambient::from_pairs([("EXPERIMENT_CONFIG_SIDECAR_PORT", "50052"), ("HOME", "/home/dev")]),
        )
    }

    fn review() -> ServiceDefinition {
        let mut def = ServiceDefinition::new("review");
        def.command = Some(vec!["./review".to_string()]);
        def.ports = BTreeSet::from([PortMapping::new(8080, 8080)]);
        def.environment.insert(
            "MONGODB_URI".to_string(),
            "mongodb://${DB_HOST:-review-db}:27017".to_string(),
        );
        def
    }

    #[tokio::test]
    async fn test_launch_materializes_environment_and_ports() {
        let launcher = launcher();
        let handle = launcher.launch(&review()).await.unwrap();
        assert_eq!(handle.pid(), Some(42));
        assert_eq!(handle.network.owner, "review");

        let specs = launcher.runtime().specs.lock().unwrap();
        assert_eq!(specs[0].environment["MONGODB_URI"], "mongodb://review-db:27017");
        assert_eq!(specs[0].published_ports, vec![PortMapping::new(8080, 8080)]);
    }

    #[tokio::test]
    async fn test_attached_service_shares_network_and_uses_sidecar_args() {
        let launcher = launcher();
        let primary = launcher.launch(&review()).await.unwrap();

        let mut dapr = ServiceDefinition::new("review-dapr");
        dapr.image = Some("daprio/daprd:edge".to_string());
        dapr.network_mode = Some(NetworkMode::Attach("review".to_string()));
        dapr.sidecar = Some(SidecarSpec {
            program: "./daprd".to_string(),
            app_id: "review".to_string(),
            app_port_env: Some("EXPERIMENT_CONFIG_SIDECAR_PORT".to_string()),
            app_port: 50051,
            app_protocol: "grpc".to_string(),
            control_port: 50001,
            placement_address: "placement:50006".to_string(),
        });

        let sidecar = launcher.launch(&dapr).await.unwrap();
        assert_eq!(sidecar.network, primary.network);

        let specs = launcher.runtime().specs.lock().unwrap();
        let spec = &specs[1];
        assert!(spec.published_ports.is_empty());
        assert!(spec.command.windows(2).any(|w| w == ["-app-port", "50052"]));
    }

    #[tokio::test]
    async fn test_attach_before_target_has_no_network() {
        let launcher = launcher();
        let mut dapr = ServiceDefinition::new("review-dapr");
        dapr.command = Some(vec!["./daprd".to_string()]);
        dapr.network_mode = Some(NetworkMode::Attach("review".to_string()));

        assert!(matches!(
            launcher.launch(&dapr).await,
            Err(ComposeError::LaunchError {
                reason: LaunchFailure::NetworkUnavailable(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_host_port_conflict() {
        let launcher = launcher();
        launcher.launch(&review()).await.unwrap();

        let mut other = review();
        other.name = "review-copy".to_string();
        match launcher.launch(&other).await {
            Err(ComposeError::LaunchError {
                service,
                reason: LaunchFailure::PortConflict { port, owner },
            }) => {
                assert_eq!(service, "review-copy");
                assert_eq!(port, 8080);
                assert_eq!(owner, "review");
            }
            other => panic!("expected port conflict, got {:?}", other),
        }

        // 同一服務重啟可以重新保留自己的埠
        assert!(launcher.launch(&review()).await.is_ok());
        launcher.release_ports("review");
        assert!(launcher.launch(&other).await.is_ok());
    }

    #[tokio::test]
    async fn test_mounts_and_missing_artifact() {
        let launcher = launcher();
        let mut db = ServiceDefinition::new("review-db");
        db.image = Some("mongo:7".to_string());
        db.volumes = BTreeSet::from([
            VolumeMount::parse("review-db-data:/data/db").unwrap(),
            VolumeMount::parse("~/seed:/seed:ro").unwrap(),
            VolumeMount::parse("./schemas:/schemas:ro").unwrap(),
        ]);
        launcher.launch(&db).await.unwrap();

        {
            let specs = launcher.runtime().specs.lock().unwrap();
            let sources: Vec<_> = specs[0].mounts.iter().map(|m| m.source.clone()).collect();
            assert!(sources.contains(&PathBuf::from("/state/volumes/review-db-data")));
            assert!(sources.contains(&PathBuf::from("/home/dev/seed")));
            assert!(sources.iter().all(|source| source.is_absolute()));
            assert!(sources.iter().any(|source| source.ends_with("schemas")));
        }
        assert_eq!(launcher.volumes().acquired(), vec!["review-db-data".to_string()]);

        let bare = ServiceDefinition::new("bare");
        assert!(matches!(
            launcher.launch(&bare).await,
            Err(ComposeError::LaunchError {
                reason: LaunchFailure::ArtifactMissing(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_build_source_goes_through_collaborator() {
        let launcher = launcher().with_builder(Arc::new(FixedBuilder));
        let mut def = ServiceDefinition::new("review");
        def.build = Some(BuildSpec {
            context: ".".to_string(),
            dockerfile: "Dockerfile".to_string(),
            target: Some("runtime".to_string()),
        });
        launcher.launch(&def).await.unwrap();

        let specs = launcher.runtime().specs.lock().unwrap();
        assert_eq!(specs[0].artifact, Some(ArtifactRef::Image("review:dev".to_string())));
    }
}
