use crate::domain::model::{ArtifactRef, BuildSpec, HealthCheckDescriptor, LaunchSpec};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// 具名 volume 的實際儲存位置
pub trait VolumeStore: Send + Sync {
    fn create(&self, name: &str) -> impl std::future::Future<Output = Result<PathBuf>> + Send;
    fn remove(&self, name: &str) -> impl std::future::Future<Output = Result<()>> + Send;
    fn exists(&self, name: &str) -> impl std::future::Future<Output = Result<bool>> + Send;
}

/// 程序/容器執行的基礎能力
#[async_trait]
pub trait ProcessRuntime: Send + Sync {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn RunningProcess>>;
}

#[async_trait]
pub trait RunningProcess: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// 先溫和停止，超過 grace 後強制結束
    async fn terminate(&mut self, grace: Duration) -> Result<()>;
}

/// 單次健康探測，Err 內容為失敗原因
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> std::result::Result<(), String>;
}

/// 依服務定義與其網路位址建立探測器
pub trait ProbeProvider: Send + Sync {
    fn probe_for(
        &self,
        service: &str,
        descriptor: &HealthCheckDescriptor,
        address: &str,
    ) -> Box<dyn HealthProbe>;
}

/// 外部建置協作者：build 描述進，artifact 參照出
#[async_trait]
pub trait BuildCollaborator: Send + Sync {
    async fn build(&self, service: &str, spec: &BuildSpec) -> Result<ArtifactRef>;
}

/// 將解析後的拓撲推送到下游（非同步、最終一致，不回饋給執行期）
#[async_trait]
pub trait TopologyMirror: Send + Sync {
    /// 回傳內容是否有變更
    async fn publish(&self, rendered: &str) -> Result<bool>;
}
