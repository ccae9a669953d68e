use crate::domain::model::NamedVolumeSpec;
use crate::domain::ports::VolumeStore;
use crate::utils::error::{ComposeError, LaunchFailure, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// 具名 volume 登錄表
///
/// 同一名稱第一次被引用時建立，之後共用；每個名稱各自一個 `OnceCell`，
/// 並行的存取者不會重複建立。
pub struct VolumeRegistry<S: VolumeStore> {
    store: S,
    entries: Mutex<HashMap<String, Arc<OnceCell<PathBuf>>>>,
}

impl<S: VolumeStore> VolumeRegistry<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn cell(&self, name: &str) -> Arc<OnceCell<PathBuf>> {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// 取得 volume 路徑，不存在則建立（冪等）
    pub async fn acquire(&self, name: &str, spec: &NamedVolumeSpec) -> Result<PathBuf> {
        let cell = self.cell(name);
        let path = cell
            .get_or_try_init(|| async {
                if spec.external {
                    if !self.store.exists(name).await? {
                        return Err(ComposeError::launch(
                            name,
                            LaunchFailure::Volume(format!("external volume '{}' does not exist", name)),
                        ));
                    }
                    tracing::debug!("Using external volume '{}'", name);
                } else {
                    tracing::info!("📦 Creating volume '{}'", name);
                }
                self.store.create(name).await
            })
            .await?;
        Ok(path.clone())
    }

    /// 本次執行中已取得的 volume
    pub fn acquired(&self) -> Vec<String> {
        let entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut names: Vec<String> = entries
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// 明確移除 volume；external 的不動
    pub async fn remove(&self, name: &str, spec: &NamedVolumeSpec) -> Result<bool> {
        if spec.external {
            tracing::debug!("Skipping external volume '{}'", name);
            return Ok(false);
        }
        {
            let mut entries = match self.entries.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            entries.remove(name);
        }
        if !self.store.exists(name).await? {
            return Ok(false);
        }
        self.store.remove(name).await?;
        tracing::info!("🗑️ Removed volume '{}'", name);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStore {
        creates: AtomicUsize,
        existing: Mutex<Vec<String>>,
    }

    impl VolumeStore for Arc<CountingStore> {
        async fn create(&self, name: &str) -> Result<PathBuf> {
            tokio::task::yield_now().await;
            self.creates.fetch_add(1, Ordering::SeqCst);
            self.existing.lock().unwrap().push(name.to_string());
            Ok(PathBuf::from(format!("/volumes/{}", name)))
        }

        async fn remove(&self, name: &str) -> Result<()> {
            self.existing.lock().unwrap().retain(|n| n != name);
            Ok(())
        }

        async fn exists(&self, name: &str) -> Result<bool> {
            Ok(self.existing.lock().unwrap().iter().any(|n| n == name))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_creates_once() {
        let store = Arc::new(CountingStore::default());
        let registry = Arc::new(VolumeRegistry::new(store.clone()));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry
                    .acquire("review-db-data", &NamedVolumeSpec::default())
                    .await
            }));
        }
        for task in tasks {
            let path = task.await.unwrap().unwrap();
            assert_eq!(path, PathBuf::from("/volumes/review-db-data"));
        }

        assert_eq!(store.creates.load(Ordering::SeqCst), 1);
        assert_eq!(registry.acquired(), vec!["review-db-data".to_string()]);
    }

    #[tokio::test]
    async fn test_external_volume_must_exist() {
        let store = Arc::new(CountingStore::default());
        let registry = VolumeRegistry::new(store.clone());
        let external = NamedVolumeSpec { external: true };

        assert!(registry.acquire("shared", &external).await.is_err());

        store.existing.lock().unwrap().push("shared".to_string());
        assert!(registry.acquire("shared", &external).await.is_ok());
        // external 不會被移除
        assert!(!registry.remove("shared", &external).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_then_recreate() {
        let store = Arc::new(CountingStore::default());
        let registry = VolumeRegistry::new(store.clone());
        let spec = NamedVolumeSpec::default();

        registry.acquire("data", &spec).await.unwrap();
        assert!(registry.remove("data", &spec).await.unwrap());
        assert!(!registry.remove("data", &spec).await.unwrap());
        registry.acquire("data", &spec).await.unwrap();
        assert_eq!(store.creates.load(Ordering::SeqCst), 2);
    }
}
