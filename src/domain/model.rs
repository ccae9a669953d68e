use crate::utils::duration;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// 一份定義文件：服務名稱 → 服務定義，加上頂層具名 volume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub services: IndexMap<String, ServiceDefinition>,
    #[serde(
        default,
        deserialize_with = "de_volume_declarations",
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub volumes: IndexMap<String, NamedVolumeSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedVolumeSpec {
    /// 由外部管理，orchestrator 不建立也不刪除
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
}

fn de_volume_declarations<'de, D>(
    deserializer: D,
) -> Result<IndexMap<String, NamedVolumeSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = IndexMap::<String, Option<NamedVolumeSpec>>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(name, spec)| (name, spec.unwrap_or_default()))
        .collect())
}

/// 服務定義（原始或已解析的有效定義共用同一結構）
///
/// 所有屬性皆為選填：`None` 代表「未指定」，繼承時由父定義補上。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    #[serde(skip)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<ExtendsRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSpec>,
    #[serde(
        default,
        deserialize_with = "de_command",
        skip_serializing_if = "Option::is_none"
    )]
    pub command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ports: BTreeSet<PortMapping>,
    #[serde(
        default,
        deserialize_with = "de_environment",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub volumes: BTreeSet<VolumeMount>,
    /// 繼承時整個取代父定義、不做聯集的清單屬性，例如 `replace: [ports]`
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub replace: BTreeSet<ListAttribute>,
    #[serde(
        default,
        rename = "healthcheck",
        alias = "health_check",
        skip_serializing_if = "Option::is_none"
    )]
    pub health_check: Option<HealthCheckDescriptor>,
    #[serde(
        default,
        with = "depends_on",
        skip_serializing_if = "Option::is_none"
    )]
    pub depends_on: Option<IndexMap<String, DependencyCondition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<NetworkMode>,
    #[serde(
        default,
        rename = "restart",
        alias = "restart_policy",
        skip_serializing_if = "Option::is_none"
    )]
    pub restart_policy: Option<RestartPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidecar: Option<SidecarSpec>,
}

/// 可宣告為「取代」的清單屬性
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListAttribute {
    Ports,
    Volumes,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn network_mode(&self) -> NetworkMode {
        self.network_mode.clone().unwrap_or_default()
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        self.restart_policy.unwrap_or_default()
    }

    /// 有效的健康探測（`NONE` 或 `disable` 視為無探測）
    pub fn active_health_check(&self) -> Option<&HealthCheckDescriptor> {
        self.health_check
            .as_ref()
            .filter(|hc| !matches!(hc.probe, ProbeSpec::Disabled))
    }

    /// 宣告的依賴（未宣告時為空）
    pub fn dependencies(&self) -> impl Iterator<Item = (&String, &DependencyCondition)> {
        self.depends_on.iter().flat_map(|deps| deps.iter())
    }
}

/// `extends: { file, service }`，`file` 省略時指向同一份文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawExtends")]
pub struct ExtendsRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub service: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawExtends {
    Service(String),
    Full {
        #[serde(default)]
        file: Option<String>,
        service: String,
    },
}

impl From<RawExtends> for ExtendsRef {
    fn from(raw: RawExtends) -> Self {
        match raw {
            RawExtends::Service(service) => ExtendsRef {
                file: None,
                service,
            },
            RawExtends::Full { file, service } => ExtendsRef { file, service },
        }
    }
}

/// 建置來源描述：context + build file + 選填 target stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawBuild")]
pub struct BuildSpec {
    pub context: String,
    pub dockerfile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBuild {
    Context(String),
    Full {
        #[serde(default = "default_context")]
        context: String,
        #[serde(default = "default_dockerfile")]
        dockerfile: String,
        #[serde(default)]
        target: Option<String>,
    },
}

fn default_context() -> String {
    ".".to_string()
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

impl From<RawBuild> for BuildSpec {
    fn from(raw: RawBuild) -> Self {
        match raw {
            RawBuild::Context(context) => BuildSpec {
                context,
                dockerfile: default_dockerfile(),
                target: None,
            },
            RawBuild::Full {
                context,
                dockerfile,
                target,
            } => BuildSpec {
                context,
                dockerfile,
                target,
            },
        }
    }
}

/// host:container 埠對應
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPort", into = "String")]
pub struct PortMapping {
    pub host_ip: Option<String>,
    pub host: u16,
    pub container: u16,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(u16),
    Text(String),
}

impl TryFrom<RawPort> for PortMapping {
    type Error = String;

    fn try_from(raw: RawPort) -> Result<Self, Self::Error> {
        match raw {
            RawPort::Number(port) => PortMapping::parse(&port.to_string()),
            RawPort::Text(text) => PortMapping::parse(&text),
        }
    }
}

impl PortMapping {
    pub fn new(host: u16, container: u16) -> Self {
        Self {
            host_ip: None,
            host,
            container,
        }
    }

    pub fn parse(spec: &str) -> Result<Self, String> {
        let spec = spec.trim();
        // 去掉 "/tcp" 之類的協定後綴
        let spec = spec.split('/').next().unwrap_or(spec);
        let parts: Vec<&str> = spec.split(':').collect();
        let port = |value: &str| -> Result<u16, String> {
            match value.parse::<u16>() {
                Ok(0) | Err(_) => Err(format!("invalid port '{}' in '{}'", value, spec)),
                Ok(port) => Ok(port),
            }
        };

        match parts.as_slice() {
            [single] => {
                let p = port(single)?;
                Ok(PortMapping::new(p, p))
            }
            [host, container] => Ok(PortMapping::new(port(host)?, port(container)?)),
            [ip, host, container] => Ok(PortMapping {
                host_ip: Some(ip.to_string()),
                host: port(host)?,
                container: port(container)?,
            }),
            _ => Err(format!("invalid port mapping '{}'", spec)),
        }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host_ip {
            Some(ip) => write!(f, "{}:{}:{}", ip, self.host, self.container),
            None => write!(f, "{}:{}", self.host, self.container),
        }
    }
}

impl From<PortMapping> for String {
    fn from(port: PortMapping) -> Self {
        port.to_string()
    }
}

/// 掛載來源：具名 volume 或主機路徑
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MountSource {
    Named(String),
    HostPath(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VolumeMount {
    pub source: MountSource,
    pub target: String,
    pub read_only: bool,
}

impl VolumeMount {
    pub fn parse(spec: &str) -> Result<Self, String> {
        let parts: Vec<&str> = spec.trim().split(':').collect();
        let (source, target, mode) = match parts.as_slice() {
            [source, target] => (*source, *target, None),
            [source, target, mode] => (*source, *target, Some(*mode)),
            [_] => {
                return Err(format!(
                    "anonymous volume '{}' is not supported, name it or use a host path",
                    spec
                ))
            }
            _ => return Err(format!("invalid volume mount '{}'", spec)),
        };

        if source.is_empty() || target.is_empty() {
            return Err(format!("invalid volume mount '{}'", spec));
        }

        let read_only = match mode {
            None | Some("rw") => false,
            Some("ro") => true,
            Some(other) => return Err(format!("unknown mount mode '{}' in '{}'", other, spec)),
        };

        let source = if source.starts_with('/') || source.starts_with('.') || source.starts_with('~')
        {
            MountSource::HostPath(source.to_string())
        } else {
            MountSource::Named(source.to_string())
        };

        Ok(VolumeMount {
            source,
            target: target.to_string(),
            read_only,
        })
    }

    pub fn volume_name(&self) -> Option<&str> {
        match &self.source {
            MountSource::Named(name) => Some(name),
            MountSource::HostPath(_) => None,
        }
    }
}

impl TryFrom<String> for VolumeMount {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        VolumeMount::parse(&value)
    }
}

impl fmt::Display for VolumeMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            MountSource::Named(name) => name,
            MountSource::HostPath(path) => path,
        };
        write!(f, "{}:{}", source, self.target)?;
        if self.read_only {
            write!(f, ":ro")?;
        }
        Ok(())
    }
}

impl From<VolumeMount> for String {
    fn from(mount: VolumeMount) -> Self {
        mount.to_string()
    }
}

/// depends_on 邊的條件
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyCondition {
    #[default]
    #[serde(rename = "service_started")]
    Started,
    #[serde(rename = "service_healthy")]
    Healthy,
}

impl fmt::Display for DependencyCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyCondition::Started => write!(f, "service_started"),
            DependencyCondition::Healthy => write!(f, "service_healthy"),
        }
    }
}

/// depends_on 支援清單或對應表兩種寫法
mod depends_on {
    use super::DependencyCondition;
    use indexmap::IndexMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Entry {
        #[serde(default)]
        condition: DependencyCondition,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Map(IndexMap<String, Option<Entry>>),
    }

    pub fn serialize<S>(
        value: &Option<IndexMap<String, DependencyCondition>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(deps) => deps
                .iter()
                .map(|(name, condition)| {
                    (
                        name.clone(),
                        Entry {
                            condition: *condition,
                        },
                    )
                })
                .collect::<IndexMap<_, _>>()
                .serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<Option<IndexMap<String, DependencyCondition>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Raw>::deserialize(deserializer)?;
        Ok(raw.map(|raw| match raw {
            Raw::List(names) => names
                .into_iter()
                .map(|name| (name, DependencyCondition::Started))
                .collect(),
            Raw::Map(entries) => entries
                .into_iter()
                .map(|(name, entry)| (name, entry.map(|e| e.condition).unwrap_or_default()))
                .collect(),
        }))
    }
}

fn de_command<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Line(String),
        Args(Vec<String>),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Line(line) => line.split_whitespace().map(str::to_string).collect(),
        Raw::Args(args) => args,
    }))
}

/// environment 支援 `KEY: value` 對應表或 `KEY=value` 清單
fn de_environment<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Map(BTreeMap<String, Option<serde_json::Value>>),
        List(Vec<String>),
    }

    let raw = Option::<Raw>::deserialize(deserializer)?;
    let mut env = BTreeMap::new();
    match raw {
        None => {}
        Some(Raw::Map(map)) => {
            for (key, value) in map {
                let value = match value {
                    None | Some(serde_json::Value::Null) => String::new(),
                    Some(serde_json::Value::String(s)) => s,
                    Some(other) => other.to_string(),
                };
                env.insert(key, value);
            }
        }
        Some(Raw::List(items)) => {
            for item in items {
                match item.split_once('=') {
                    Some((key, value)) => env.insert(key.to_string(), value.to_string()),
                    None => env.insert(item, String::new()),
                };
            }
        }
    }
    Ok(env)
}

/// 網路模式：獨立網路身分，或附著到另一個服務的網路命名空間
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NetworkMode {
    #[default]
    Isolated,
    Attach(String),
}

impl NetworkMode {
    pub fn attached_to(&self) -> Option<&str> {
        match self {
            NetworkMode::Attach(target) => Some(target),
            NetworkMode::Isolated => None,
        }
    }
}

impl TryFrom<String> for NetworkMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let value = value.trim();
        if let Some(target) = value
            .strip_prefix("attach:")
            .or_else(|| value.strip_prefix("service:"))
        {
            if target.is_empty() {
                return Err(format!("network_mode '{}' names no service", value));
            }
            return Ok(NetworkMode::Attach(target.to_string()));
        }
        match value {
            "isolated" | "bridge" | "default" => Ok(NetworkMode::Isolated),
            other => Err(format!("unsupported network_mode '{}'", other)),
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Isolated => write!(f, "isolated"),
            NetworkMode::Attach(target) => write!(f, "attach:{}", target),
        }
    }
}

impl From<NetworkMode> for String {
    fn from(mode: NetworkMode) -> Self {
        mode.to_string()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
    OnFailure(Option<u32>),
    UnlessStopped,
}

impl RestartPolicy {
    /// 在已重啟 `restarts` 次之後是否還能再重啟
    pub fn allows_restart(&self, restarts: u32, restart_limit: u32) -> bool {
        match self {
            RestartPolicy::No => false,
            RestartPolicy::OnFailure(Some(max)) => restarts < *max,
            RestartPolicy::OnFailure(None) | RestartPolicy::Always | RestartPolicy::UnlessStopped => {
                restarts < restart_limit
            }
        }
    }
}

impl TryFrom<String> for RestartPolicy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim() {
            "no" | "" => Ok(RestartPolicy::No),
            "always" => Ok(RestartPolicy::Always),
            "unless-stopped" => Ok(RestartPolicy::UnlessStopped),
            "on-failure" => Ok(RestartPolicy::OnFailure(None)),
            other => match other.strip_prefix("on-failure:") {
                Some(max) => max
                    .parse::<u32>()
                    .map(|max| RestartPolicy::OnFailure(Some(max)))
                    .map_err(|_| format!("invalid restart count in '{}'", other)),
                None => Err(format!("unknown restart policy '{}'", other)),
            },
        }
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicy::No => write!(f, "no"),
            RestartPolicy::Always => write!(f, "always"),
            RestartPolicy::UnlessStopped => write!(f, "unless-stopped"),
            RestartPolicy::OnFailure(None) => write!(f, "on-failure"),
            RestartPolicy::OnFailure(Some(max)) => write!(f, "on-failure:{}", max),
        }
    }
}

impl From<RestartPolicy> for String {
    fn from(policy: RestartPolicy) -> Self {
        policy.to_string()
    }
}

/// 健康探測描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawHealthCheck", into = "RawHealthCheck")]
pub struct HealthCheckDescriptor {
    pub probe: ProbeSpec,
    pub interval: Duration,
    pub timeout: Duration,
    /// 連續失敗達此次數即判定為 Unhealthy
    pub retries: u32,
    /// 啟動後的寬限期，期間失敗不計入 retries
    pub start_period: Duration,
}

impl HealthCheckDescriptor {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_RETRIES: u32 = 3;

    pub fn new(probe: ProbeSpec) -> Self {
        Self {
            probe,
            interval: Self::DEFAULT_INTERVAL,
            timeout: Self::DEFAULT_TIMEOUT,
            retries: Self::DEFAULT_RETRIES,
            start_period: Duration::ZERO,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_start_period(mut self, start_period: Duration) -> Self {
        self.start_period = start_period;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeSpec {
    /// 直接執行的指令，exit 0 代表健康
    Command(Vec<String>),
    /// 經由 `sh -c` 執行
    Shell(String),
    /// HTTP GET，2xx 代表健康
    Http(HttpProbeSpec),
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpProbeSpec {
    pub path: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawTest {
    Line(String),
    Args(Vec<String>),
}

#[derive(Serialize, Deserialize)]
struct RawHealthCheck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    test: Option<RawTest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    http: Option<HttpProbeSpec>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    disable: bool,
    #[serde(default, with = "duration::option", skip_serializing_if = "Option::is_none")]
    interval: Option<Duration>,
    #[serde(default, with = "duration::option", skip_serializing_if = "Option::is_none")]
    timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retries: Option<u32>,
    #[serde(default, with = "duration::option", skip_serializing_if = "Option::is_none")]
    start_period: Option<Duration>,
}

impl TryFrom<RawHealthCheck> for HealthCheckDescriptor {
    type Error = String;

    fn try_from(raw: RawHealthCheck) -> Result<Self, Self::Error> {
        let probe = if raw.disable {
            ProbeSpec::Disabled
        } else {
            match (raw.test, raw.http) {
                (Some(_), Some(_)) => {
                    return Err("healthcheck declares both `test` and `http`".to_string())
                }
                (None, Some(http)) => ProbeSpec::Http(http),
                (Some(RawTest::Line(line)), None) => ProbeSpec::Shell(line),
                (Some(RawTest::Args(args)), None) => match args.split_first() {
                    Some((kind, rest)) if kind == "NONE" && rest.is_empty() => ProbeSpec::Disabled,
                    Some((kind, rest)) if kind == "CMD" && !rest.is_empty() => {
                        ProbeSpec::Command(rest.to_vec())
                    }
                    Some((kind, rest)) if kind == "CMD-SHELL" && rest.len() == 1 => {
                        ProbeSpec::Shell(rest[0].clone())
                    }
                    _ => return Err(format!("unsupported healthcheck test {:?}", args)),
                },
                (None, None) => return Err("healthcheck needs `test` or `http`".to_string()),
            }
        };

        Ok(HealthCheckDescriptor {
            probe,
            interval: raw.interval.unwrap_or(Self::DEFAULT_INTERVAL),
            timeout: raw.timeout.unwrap_or(Self::DEFAULT_TIMEOUT),
            retries: raw.retries.unwrap_or(Self::DEFAULT_RETRIES),
            start_period: raw.start_period.unwrap_or(Duration::ZERO),
        })
    }
}

impl From<HealthCheckDescriptor> for RawHealthCheck {
    fn from(hc: HealthCheckDescriptor) -> Self {
        let (test, http, disable) = match hc.probe {
            ProbeSpec::Command(args) => {
                let mut test = vec!["CMD".to_string()];
                test.extend(args);
                (Some(RawTest::Args(test)), None, false)
            }
            ProbeSpec::Shell(line) => (
                Some(RawTest::Args(vec!["CMD-SHELL".to_string(), line])),
                None,
                false,
            ),
            ProbeSpec::Http(http) => (None, Some(http), false),
            ProbeSpec::Disabled => (None, None, true),
        };
        RawHealthCheck {
            test,
            http,
            disable,
            interval: Some(hc.interval),
            timeout: Some(hc.timeout),
            retries: Some(hc.retries),
            start_period: Some(hc.start_period),
        }
    }
}

/// 附著式 sidecar 的啟動參數契約
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarSpec {
    #[serde(default = "default_sidecar_program")]
    pub program: String,
    pub app_id: String,
    /// 覆寫 app port 的環境變數名稱
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_port_env: Option<String>,
    pub app_port: u16,
    #[serde(default = "default_app_protocol")]
    pub app_protocol: String,
    pub control_port: u16,
    pub placement_address: String,
}

fn default_sidecar_program() -> String {
    "./daprd".to_string()
}

fn default_app_protocol() -> String {
    "grpc".to_string()
}

/// 單一服務在一次執行中的狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// 等待依賴條件
    Waiting,
    Starting,
    /// 程序已存在，等待健康探測
    Pending,
    Healthy,
    Unhealthy,
    LaunchFailed,
    /// 依賴失敗，從未啟動
    NotStarted,
    Stopped,
}

impl ServiceState {
    /// 程序是否已存在（滿足 service_started）
    pub fn is_started(&self) -> bool {
        matches!(
            self,
            ServiceState::Pending | ServiceState::Healthy | ServiceState::Unhealthy
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServiceState::Healthy
                | ServiceState::Unhealthy
                | ServiceState::LaunchFailed
                | ServiceState::NotStarted
                | ServiceState::Stopped
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ServiceState::Waiting => "Waiting",
            ServiceState::Starting => "Starting",
            ServiceState::Pending => "Pending",
            ServiceState::Healthy => "Healthy",
            ServiceState::Unhealthy => "Unhealthy",
            ServiceState::LaunchFailed => "LaunchFailed",
            ServiceState::NotStarted => "NotStarted",
            ServiceState::Stopped => "Stopped",
        };
        write!(f, "{}", label)
    }
}

/// 執行報告中的最終狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalState {
    Healthy,
    Unhealthy,
    NotStarted,
    LaunchFailed,
}

impl From<ServiceState> for FinalState {
    fn from(state: ServiceState) -> Self {
        match state {
            ServiceState::Healthy => FinalState::Healthy,
            ServiceState::LaunchFailed => FinalState::LaunchFailed,
            ServiceState::Waiting | ServiceState::NotStarted => FinalState::NotStarted,
            // 已啟動但從未達到 Healthy
            ServiceState::Starting
            | ServiceState::Pending
            | ServiceState::Unhealthy
            | ServiceState::Stopped => FinalState::Unhealthy,
        }
    }
}

impl fmt::Display for FinalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FinalState::Healthy => "Healthy",
            FinalState::Unhealthy => "Unhealthy",
            FinalState::NotStarted => "NotStarted",
            FinalState::LaunchFailed => "LaunchFailed",
        };
        write!(f, "{}", label)
    }
}

/// 建置協作者產出的 artifact 參照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRef {
    Image(String),
    Executable(String),
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactRef::Image(image) => write!(f, "image {}", image),
            ArtifactRef::Executable(path) => write!(f, "executable {}", path),
        }
    }
}

/// 服務的網路身分：獨立配置，或與附著目標共用
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkIdentity {
    pub id: u32,
    /// 擁有此網路身分的服務
    pub owner: String,
    pub address: String,
}

/// 已具體化的掛載（volume 已建立、路徑已展開）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMount {
    pub source: std::path::PathBuf,
    pub target: String,
    pub read_only: bool,
}

/// 交給 runtime 的啟動規格
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub service: String,
    pub artifact: Option<ArtifactRef>,
    pub command: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub mounts: Vec<ResolvedMount>,
    pub network: NetworkIdentity,
    /// 只有獨立網路的服務會發布埠
    pub published_ports: Vec<PortMapping>,
}
