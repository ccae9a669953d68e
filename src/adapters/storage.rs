use crate::domain::ports::VolumeStore;
use crate::utils::error::Result;
use std::path::{Path, PathBuf};

/// 以本機目錄保存具名 volume：`<base_path>/<name>`
#[derive(Debug, Clone)]
pub struct LocalVolumeStore {
    base_path: PathBuf,
}

impl LocalVolumeStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.base_path.join(name)
    }
}

impl VolumeStore for LocalVolumeStore {
    async fn create(&self, name: &str) -> Result<PathBuf> {
        let path = self.path_of(name);
        tokio::fs::create_dir_all(&path).await?;
        Ok(path)
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let path = self.path_of(name);
        if tokio::fs::try_exists(&path).await? {
            tokio::fs::remove_dir_all(&path).await?;
        }
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path_of(name)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_is_idempotent_and_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalVolumeStore::new(temp_dir.path().join("volumes"));

        let path = store.create("review-db-data").await.unwrap();
        std::fs::write(path.join("marker"), b"kept").unwrap();

        let again = store.create("review-db-data").await.unwrap();
        assert_eq!(path, again);
        assert_eq!(std::fs::read(again.join("marker")).unwrap(), b"kept");
        assert!(store.exists("review-db-data").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalVolumeStore::new(temp_dir.path());

        store.create("data").await.unwrap();
        store.remove("data").await.unwrap();
        assert!(!store.exists("data").await.unwrap());
        // 不存在時移除不報錯
        store.remove("data").await.unwrap();
    }
}
