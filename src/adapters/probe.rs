use crate::domain::model::{HealthCheckDescriptor, ProbeSpec};
use crate::domain::ports::{HealthProbe, ProbeProvider};
use async_trait::async_trait;
use reqwest::Client;
use std::process::Stdio;
use tokio::process::Command;
use url::Url;

/// HTTP GET 探測，2xx 代表健康
pub struct HttpProbe {
    client: Client,
    url: String,
}

impl HttpProbe {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn check(&self) -> Result<(), String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        tracing::debug!("Probe {} responded {}", self.url, response.status());
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("{} returned {}", self.url, response.status()))
        }
    }
}

/// 外部指令探測，exit 0 代表健康
pub struct CommandProbe {
    program: String,
    args: Vec<String>,
}

impl CommandProbe {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn shell(line: &str) -> Self {
        Self::new("sh", vec!["-c".to_string(), line.to_string()])
    }
}

#[async_trait]
impl HealthProbe for CommandProbe {
    async fn check(&self) -> Result<(), String> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| format!("failed to run '{}': {}", self.program, e))?;

        if status.success() {
            Ok(())
        } else {
            Err(format!("'{}' exited with {}", self.program, status))
        }
    }
}

/// 無法建立時每次都回報同一個原因
struct BrokenProbe(String);

#[async_trait]
impl HealthProbe for BrokenProbe {
    async fn check(&self) -> Result<(), String> {
        Err(self.0.clone())
    }
}

struct AlwaysHealthy;

#[async_trait]
impl HealthProbe for AlwaysHealthy {
    async fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// 依探測描述建立 HTTP 或指令探測器
#[derive(Debug, Clone, Default)]
pub struct DefaultProbeProvider {
    client: Client,
    host: Option<String>,
}

impl DefaultProbeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// 覆寫 HTTP 探測連線的主機（預設使用服務的網路位址）
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    fn http_url(&self, host: &str, port: u16, path: &str) -> Result<String, String> {
        let mut url = Url::parse(&format!("http://{}:{}", host, port))
            .map_err(|e| format!("invalid probe address {}:{}: {}", host, port, e))?;
        url.set_path(path);
        Ok(url.to_string())
    }
}

impl ProbeProvider for DefaultProbeProvider {
    fn probe_for(
        &self,
        service: &str,
        descriptor: &HealthCheckDescriptor,
        address: &str,
    ) -> Box<dyn HealthProbe> {
        match &descriptor.probe {
            ProbeSpec::Http(http) => {
                let host = http
                    .host
                    .as_deref()
                    .or(self.host.as_deref())
                    .unwrap_or(address);
                match self.http_url(host, http.port, &http.path) {
                    Ok(url) => {
                        tracing::debug!("HTTP probe for '{}': {}", service, url);
                        Box::new(HttpProbe::new(self.client.clone(), url))
                    }
                    Err(reason) => Box::new(BrokenProbe(reason)),
                }
            }
            ProbeSpec::Command(args) => match args.split_first() {
                Some((program, rest)) => Box::new(CommandProbe::new(program.clone(), rest.to_vec())),
                None => Box::new(BrokenProbe("empty probe command".to_string())),
            },
            ProbeSpec::Shell(line) => Box::new(CommandProbe::shell(line)),
            ProbeSpec::Disabled => Box::new(AlwaysHealthy),
        }
    }
}
