use crate::domain::ports::TopologyMirror;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// 把解析後的拓撲寫到下游目錄；內容沒變就不寫
#[derive(Debug, Clone)]
pub struct FileMirror {
    path: PathBuf,
}

impl FileMirror {
    pub fn new(dir: impl Into<PathBuf>, project: &str) -> Self {
        Self {
            path: dir.into().join(format!("{}.topology.yaml", project)),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl TopologyMirror for FileMirror {
    async fn publish(&self, rendered: &str) -> Result<bool> {
        if let Ok(existing) = tokio::fs::read_to_string(&self.path).await {
            if existing == rendered {
                tracing::debug!("Mirror {} is up to date", self.path.display());
                return Ok(false);
            }
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, rendered).await?;
        tracing::info!("🪞 Mirrored topology to {}", self.path.display());
        Ok(true)
    }
}
