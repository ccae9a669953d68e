use crate::config::compose_file;
use crate::core::graph::DependencyGraph;
use crate::core::inheritance;
use crate::domain::model::{ComposeDocument, MountSource, NamedVolumeSpec, ServiceDefinition};
use crate::utils::error::{ComposeError, Result};
use crate::utils::validation::validate_service_name;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 原始定義文件的快取，以檔案路徑為鍵
///
/// `extends.file`、相對的主機掛載路徑與建置 context 都以宣告它們的文件所在目錄為基準；
/// 同一份文件只載入一次。
#[derive(Debug, Default)]
pub struct DefinitionStore {
    documents: HashMap<PathBuf, ComposeDocument>,
}

impl DefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接放入已解析的文件（不經檔案系統）
    pub fn insert(&mut self, path: impl Into<PathBuf>, mut document: ComposeDocument) {
        for (name, def) in document.services.iter_mut() {
            def.name = name.clone();
        }
        let key = normalize(&path.into());
        anchor_relative_paths(&mut document, &key);
        self.documents.insert(key, document);
    }

    pub fn load(&mut self, path: &Path) -> Result<&ComposeDocument> {
        let key = normalize(path);
        if !self.documents.contains_key(&key) {
            let mut document = compose_file::load_document(&key)?;
            anchor_relative_paths(&mut document, &key);
            self.documents.insert(key.clone(), document);
        }
        self.documents
            .get(&key)
            .ok_or_else(|| ComposeError::config(format!("document '{}' not loaded", key.display())))
    }

    /// 解析多個入口文件：各自展開 extends，後面的文件覆蓋前面同名的服務
    pub fn resolve(&mut self, files: &[PathBuf]) -> Result<ResolvedTopology> {
        if files.is_empty() {
            return Err(ComposeError::MissingConfigError {
                field: "file".to_string(),
            });
        }

        let mut services: IndexMap<String, ServiceDefinition> = IndexMap::new();
        let mut volumes: IndexMap<String, NamedVolumeSpec> = IndexMap::new();
        let mut name = None;

        for file in files {
            let file = normalize(file);
            let document = self.load(&file)?.clone();
            if document.name.is_some() {
                name = document.name.clone();
            }
            volumes.extend(document.volumes.clone());

            for service in document.services.keys() {
                let effective = self.effective(&file, service, &mut Vec::new())?;
                let merged = match services.get(service) {
                    Some(base) => {
                        tracing::debug!("Overlaying '{}' from '{}'", service, file.display());
                        inheritance::resolve(&effective, base)
                    }
                    None => effective,
                };
                services.insert(service.clone(), merged);
            }
        }

        let name = name.unwrap_or_else(|| project_name_from(&files[0]));
        ResolvedTopology::new(name, services, volumes)
    }

    /// 展開單一服務的 extends 鏈
    fn effective(
        &mut self,
        file: &Path,
        service: &str,
        chain: &mut Vec<(PathBuf, String)>,
    ) -> Result<ServiceDefinition> {
        let link = (file.to_path_buf(), service.to_string());
        if chain.contains(&link) {
            let mut names: Vec<String> = chain.iter().map(|(_, s)| s.clone()).collect();
            names.push(service.to_string());
            return Err(ComposeError::config(format!(
                "extends cycle: {}",
                names.join(" -> ")
            )));
        }

        let def = self
            .load(file)?
            .services
            .get(service)
            .cloned()
            .ok_or_else(|| ComposeError::config(format!(
                "service '{}' not found in '{}'",
                service,
                file.display()
            )))?;

        let Some(extends) = def.extends.clone() else {
            return Ok(def);
        };

        let parent_file = match &extends.file {
            Some(relative) => normalize(
                &file
                    .parent()
                    .map(|dir| dir.join(relative))
                    .unwrap_or_else(|| PathBuf::from(relative)),
            ),
            None => file.to_path_buf(),
        };

        if !self.load(&parent_file)?.services.contains_key(&extends.service) {
            return Err(ComposeError::UnknownParentService {
                service: service.to_string(),
                parent: extends.service,
                file: parent_file.display().to_string(),
            });
        }

        chain.push(link);
        let parent = self.effective(&parent_file, &extends.service, chain)?;
        chain.pop();

        let mut resolved = inheritance::resolve(&def, &parent);
        resolved.name = service.to_string();
        Ok(resolved)
    }
}

/// 把 `./`、`../` 開頭的主機路徑與相對的建置 context 改寫成以文件目錄為基準的路徑
fn anchor_relative_paths(document: &mut ComposeDocument, file: &Path) {
    let Some(dir) = file.parent() else {
        return;
    };

    for def in document.services.values_mut() {
        def.volumes = std::mem::take(&mut def.volumes)
            .into_iter()
            .map(|mut mount| {
                if let MountSource::HostPath(path) = &mount.source {
                    if path.starts_with('.') {
                        mount.source = MountSource::HostPath(anchor(dir, path));
                    }
                }
                mount
            })
            .collect();

        if let Some(build) = def.build.as_mut() {
            if !build.context.contains("://") && Path::new(&build.context).is_relative() {
                build.context = anchor(dir, &build.context);
            }
        }
    }
}

fn anchor(dir: &Path, relative: &str) -> String {
    dir.join(relative)
        .components()
        .collect::<PathBuf>()
        .display()
        .to_string()
}

fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn project_name_from(file: &Path) -> String {
    normalize(file)
        .parent()
        .and_then(|dir| dir.file_name())
        .and_then(|name| name.to_str())
        .map(|name| name.to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "default".to_string())
}

/// 解析結果：繼承已套用、無環、附帶計算好的啟動順序
///
/// 建立後不可變；定義變更需要重新解析。
#[derive(Debug, Clone)]
pub struct ResolvedTopology {
    name: String,
    services: IndexMap<String, ServiceDefinition>,
    volumes: IndexMap<String, NamedVolumeSpec>,
    graph: DependencyGraph,
}

impl ResolvedTopology {
    /// 驗證有效定義並建立依賴圖；任何錯誤都發生在啟動之前
    pub fn new(
        name: impl Into<String>,
        services: IndexMap<String, ServiceDefinition>,
        volumes: IndexMap<String, NamedVolumeSpec>,
    ) -> Result<Self> {
        for (name, def) in &services {
            validate_definition(name, def, &services, &volumes)?;
        }
        let graph = DependencyGraph::build(&services)?;
        tracing::debug!("Start order: {}", graph.order().join(", "));

        Ok(Self {
            name: name.into(),
            services,
            volumes,
            graph,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn services(&self) -> &IndexMap<String, ServiceDefinition> {
        &self.services
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.get(name)
    }

    pub fn volumes(&self) -> &IndexMap<String, NamedVolumeSpec> {
        &self.volumes
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn order(&self) -> &[String] {
        self.graph.order()
    }

    /// 要啟動的服務：指定服務加上其傳遞依賴；未指定則全部
    pub fn select(&self, targets: &[String]) -> Result<Vec<String>> {
        if targets.is_empty() {
            return Ok(self.order().to_vec());
        }
        if let Some(unknown) = targets.iter().find(|t| !self.services.contains_key(*t)) {
            return Err(ComposeError::config(format!("no such service: '{}'", unknown)));
        }
        Ok(self.graph.closure(targets))
    }

    pub fn to_document(&self) -> ComposeDocument {
        ComposeDocument {
            name: Some(self.name.clone()),
            services: self.services.clone(),
            volumes: self.volumes.clone(),
        }
    }

    /// 以 YAML 呈現解析後的拓撲（`config` 子命令與鏡像同步使用）
    pub fn render_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.to_document())?)
    }
}

fn validate_definition(
    name: &str,
    def: &ServiceDefinition,
    services: &IndexMap<String, ServiceDefinition>,
    volumes: &IndexMap<String, NamedVolumeSpec>,
) -> Result<()> {
    validate_service_name("services", name)?;

    let invalid = |reason: String| ComposeError::InvalidAttributeCombination {
        service: name.to_string(),
        reason,
    };

    if def.image.is_some() && def.build.is_some() {
        return Err(invalid("declares both image and build".to_string()));
    }

    if let Some(target) = def.network_mode().attached_to() {
        if target == name {
            return Err(invalid("cannot attach to its own network".to_string()));
        }
        if !services.contains_key(target) {
            return Err(ComposeError::UnknownDependency {
                service: name.to_string(),
                dependency: target.to_string(),
            });
        }
        if !def.ports.is_empty() {
            return Err(invalid(format!(
                "network_mode attach:{} cannot be combined with ports",
                target
            )));
        }
    }

    for port in &def.ports {
        if port.host == 0 || port.container == 0 {
            return Err(ComposeError::InvalidConfigValueError {
                field: format!("services.{}.ports", name),
                value: port.to_string(),
                reason: "port must be in 1..=65535".to_string(),
            });
        }
    }

    for mount in &def.volumes {
        if let Some(volume) = mount.volume_name() {
            if !volumes.contains_key(volume) {
                return Err(ComposeError::UnknownVolume {
                    service: name.to_string(),
                    volume: volume.to_string(),
                });
            }
        }
    }

    if let Some(check) = def.active_health_check() {
        let field = format!("services.{}.healthcheck", name);
        if check.retries == 0 {
            return Err(ComposeError::InvalidConfigValueError {
                field,
                value: "0".to_string(),
                reason: "retries must be at least 1".to_string(),
            });
        }
        for (label, value) in [("interval", check.interval), ("timeout", check.timeout)] {
            if value == Duration::ZERO {
                return Err(ComposeError::InvalidConfigValueError {
                    field: format!("{}.{}", field, label),
                    value: "0s".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::compose_file::{parse_document, DocumentFormat};
    use crate::domain::model::{DependencyCondition, PortMapping};
    use crate::utils::error::ErrorCategory;

    fn doc(yaml: &str) -> ComposeDocument {
        parse_document(yaml, DocumentFormat::Yaml, "test.yaml").unwrap()
    }

    fn store(files: &[(&str, &str)]) -> DefinitionStore {
        let mut store = DefinitionStore::new();
        for (path, yaml) in files {
            store.insert(*path, doc(yaml));
        }
        store
    }

    const BASE: &str = r#"
services:
  review:
    image: review:latest
    ports: ["8080:8080"]
    environment:
      MONGODB_URI: mongodb://review-db:27017
      LOG_LEVEL: info
    depends_on:
      review-db:
        condition: service_healthy
  review-db:
    image: mongo:7
    volumes: ["review-db-data:/data/db"]
    healthcheck:
      test: ["CMD", "mongosh", "--eval", "db.adminCommand('ping')"]
      interval: 10s
      retries: 3
volumes:
  review-db-data: {}
"#;

    #[test]
    fn test_overlay_merges_with_inheritance_rules() {
        let dev = r#"
services:
  review:
    ports: ["50051:50051"]
    environment:
      LOG_LEVEL: debug
  placement:
    image: daprio/dapr
    command: ["./placement", "-port", "50006"]
"#;
        let mut store = store(&[("/project/base.yaml", BASE), ("/project/dev.yaml", dev)]);
        let topology = store
            .resolve(&[PathBuf::from("/project/base.yaml"), PathBuf::from("/project/dev.yaml")])
            .unwrap();

        let review = topology.service("review").unwrap();
        assert_eq!(review.image.as_deref(), Some("review:latest"));
        assert_eq!(review.environment["LOG_LEVEL"], "debug");
        assert_eq!(review.environment["MONGODB_URI"], "mongodb://review-db:27017");
        assert!(review.ports.contains(&PortMapping::new(8080, 8080)));
        assert!(review.ports.contains(&PortMapping::new(50051, 50051)));
        assert_eq!(topology.order(), &["review-db", "review", "placement"]);
        assert_eq!(topology.name(), "project");
    }

    #[test]
    fn test_extends_from_other_file_and_chain() {
        let common = r#"
services:
  mongo-base:
    image: mongo:7
    healthcheck:
      test: ["CMD-SHELL", "mongosh --quiet --eval 1"]
  hardened:
    extends: mongo-base
    restart: always
"#;
        let local = r#"
services:
  review-db:
    extends:
      file: common.yaml
      service: hardened
    environment:
      MONGO_INITDB_DATABASE: review-database
"#;
        let mut store = store(&[("/project/common.yaml", common), ("/project/local.yaml", local)]);
        let topology = store.resolve(&[PathBuf::from("/project/local.yaml")]).unwrap();
        let db = topology.service("review-db").unwrap();
        assert_eq!(db.name, "review-db");
        assert_eq!(db.image.as_deref(), Some("mongo:7"));
        assert!(db.health_check.is_some());
        assert!(db.extends.is_none());
        assert_eq!(db.restart_policy.map(|p| p.to_string()).as_deref(), Some("always"));
    }

    #[test]
    fn test_relative_paths_follow_defining_document() {
        let common = r#"
services:
  mongo:
    image: mongo:7
    volumes: ["./init:/docker-entrypoint-initdb.d:ro", "/srv/seed:/seed"]
"#;
        let local = r#"
services:
  review:
    build:
      context: ./review
  review-db:
    extends:
      file: common/mongo.yaml
      service: mongo
    volumes: ["../backup:/backup"]
"#;
        let mut store = store(&[
            ("/project/common/mongo.yaml", common),
            ("/project/compose.yaml", local),
        ]);
        let topology = store.resolve(&[PathBuf::from("/project/compose.yaml")]).unwrap();

        let db = topology.service("review-db").unwrap();
        let sources: Vec<String> = db.volumes.iter().map(|m| m.to_string()).collect();
        assert!(sources.contains(&"/project/common/init:/docker-entrypoint-initdb.d:ro".to_string()));
        assert!(sources.contains(&"/project/../backup:/backup".to_string()));
        assert!(sources.contains(&"/srv/seed:/seed".to_string()));

        let review = topology.service("review").unwrap();
        assert_eq!(review.build.as_ref().map(|b| b.context.as_str()), Some("/project/review"));
    }

    #[test]
    fn test_overlay_can_replace_ports() {
        let dev = r#"
services:
  review:
    replace: [ports]
    ports: ["18080:8080"]
"#;
        let mut store = store(&[("/project/base.yaml", BASE), ("/project/dev.yaml", dev)]);
        let topology = store
            .resolve(&[PathBuf::from("/project/base.yaml"), PathBuf::from("/project/dev.yaml")])
            .unwrap();

        let review = topology.service("review").unwrap();
        let ports: Vec<_> = review.ports.iter().cloned().collect();
        assert_eq!(ports, vec![PortMapping::new(18080, 8080)]);
        assert_eq!(review.environment["LOG_LEVEL"], "info");
    }

    #[test]
    fn test_unknown_parent_service() {
        let local = r#"
services:
  review:
    extends:
      service: missing
"#;
        let mut store = store(&[("/project/local.yaml", local)]);
        match store.resolve(&[PathBuf::from("/project/local.yaml")]) {
            Err(ComposeError::UnknownParentService { service, parent, .. }) => {
                assert_eq!(service, "review");
                assert_eq!(parent, "missing");
            }
            other => panic!("expected UnknownParentService, got {:?}", other),
        }
    }

    #[test]
    fn test_extends_cycle() {
        let local = r#"
services:
  a:
    extends: b
  b:
    extends: a
"#;
        let mut store = store(&[("/project/local.yaml", local)]);
        let err = store.resolve(&[PathBuf::from("/project/local.yaml")]).unwrap_err();
        assert!(err.to_string().contains("extends cycle"));
    }

    #[test]
    fn test_attach_with_ports_is_rejected() {
        let yaml = r#"
services:
  review:
    image: review:latest
  review-dapr:
    image: daprio/daprd
    network_mode: "service:review"
    ports: ["50001:50001"]
"#;
        let mut store = store(&[("/project/compose.yaml", yaml)]);
        let err = store.resolve(&[PathBuf::from("/project/compose.yaml")]).unwrap_err();
        assert!(matches!(err, ComposeError::InvalidAttributeCombination { .. }));
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.is_fatal_before_launch());
    }

    #[test]
    fn test_other_validations() {
        let cases = [
            (
                "services:\n  a:\n    image: x\n    build: .\n",
                "InvalidAttributeCombination",
            ),
            (
                "services:\n  a:\n    image: x\n    network_mode: attach:a\n",
                "InvalidAttributeCombination",
            ),
            (
                "services:\n  a:\n    image: x\n    volumes: [\"data:/data\"]\n",
                "UnknownVolume",
            ),
            (
                "services:\n  a:\n    image: x\n    depends_on: [b]\n",
                "UnknownDependency",
            ),
            (
                "services:\n  a:\n    image: x\n    healthcheck:\n      test: [\"CMD\", \"true\"]\n      retries: 0\n",
                "InvalidConfigValueError",
            ),
        ];

        for (yaml, expected) in cases {
            let mut store = store(&[("/project/compose.yaml", yaml)]);
            let err = store
                .resolve(&[PathBuf::from("/project/compose.yaml")])
                .unwrap_err();
            assert!(
                format!("{:?}", err).starts_with(expected),
                "{} should fail with {}, got {:?}",
                yaml,
                expected,
                err
            );
        }
    }

    #[test]
    fn test_select_and_render() {
        let mut store = store(&[("/project/compose.yaml", BASE)]);
        let topology = store.resolve(&[PathBuf::from("/project/compose.yaml")]).unwrap();

        assert_eq!(
            topology.select(&["review".to_string()]).unwrap(),
            vec!["review-db", "review"]
        );
        assert!(topology.select(&["nope".to_string()]).is_err());

        let rendered = topology.render_yaml().unwrap();
        let reparsed = doc(&rendered);
        assert_eq!(reparsed.services.len(), 2);
        assert_eq!(
            reparsed.services["review"].dependencies().next(),
            Some((&"review-db".to_string(), &DependencyCondition::Healthy))
        );
        assert!(rendered.contains("service_healthy"));
    }
}
