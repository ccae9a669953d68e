use crate::domain::model::{ArtifactRef, LaunchSpec};
use crate::domain::ports::{ProcessRuntime, RunningProcess};
use crate::utils::error::{ComposeError, LaunchFailure, Result};
use async_trait::async_trait;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

/// 在本機以子程序執行服務
///
/// 每個服務有自己的工作目錄 `<state_dir>/services/<name>`，掛載以符號連結
/// 放在工作目錄下對應的目標路徑。
#[derive(Debug, Clone)]
pub struct LocalProcessRuntime {
    state_dir: PathBuf,
}

impl LocalProcessRuntime {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    fn workdir(&self, service: &str) -> PathBuf {
        self.state_dir.join("services").join(service)
    }

    async fn prepare_workdir(&self, spec: &LaunchSpec) -> Result<PathBuf> {
        let workdir = self.workdir(&spec.service);
        tokio::fs::create_dir_all(&workdir).await?;

        for mount in &spec.mounts {
            let link = workdir.join(mount.target.trim_start_matches('/'));
            if let Some(parent) = link.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if tokio::fs::symlink_metadata(&link).await.is_ok() {
                tokio::fs::remove_file(&link).await?;
            }
            link_mount(&mount.source, &link)?;
        }
        Ok(workdir)
    }
}

#[cfg(unix)]
fn link_mount(source: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(source, link)?;
    Ok(())
}

#[cfg(not(unix))]
fn link_mount(source: &Path, link: &Path) -> Result<()> {
    tracing::warn!(
        "⚠️ Mounts are not supported on this platform, skipping {} -> {}",
        source.display(),
        link.display()
    );
    Ok(())
}

fn forward_output<R>(service: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::info!(target: "small_compose::service", service = %service, stream, "{}", line);
        }
    });
}

#[async_trait]
impl ProcessRuntime for LocalProcessRuntime {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn RunningProcess>> {
        let Some((program, args)) = spec.command.split_first() else {
            let reason = match &spec.artifact {
                Some(ArtifactRef::Image(image)) => {
                    format!("image '{}' has no command to run locally", image)
                }
                _ => "empty command".to_string(),
            };
            return Err(ComposeError::launch(&spec.service, LaunchFailure::ArtifactMissing(reason)));
        };

        let workdir = self.prepare_workdir(spec).await.map_err(|e| {
            ComposeError::launch(&spec.service, LaunchFailure::Volume(e.to_string()))
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&workdir)
            .envs(&spec.environment)
            .env("COMPOSE_SERVICE", &spec.service)
            .env("COMPOSE_NETWORK_ID", spec.network.id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            let reason = if e.kind() == std::io::ErrorKind::NotFound {
                LaunchFailure::ArtifactMissing(format!("'{}' not found", program))
            } else {
                LaunchFailure::Spawn(e.to_string())
            };
            ComposeError::launch(&spec.service, reason)
        })?;

        let pid = child.id().ok_or_else(|| {
            ComposeError::launch(
                &spec.service,
                LaunchFailure::Spawn("process exited before reporting a PID".to_string()),
            )
        })?;

        if let Some(stdout) = child.stdout.take() {
            forward_output(spec.service.clone(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(spec.service.clone(), "stderr", stderr);
        }

        Ok(Box::new(LocalProcess {
            service: spec.service.clone(),
            pid,
            child,
        }))
    }
}

/// 本機子程序
pub struct LocalProcess {
    service: String,
    pid: u32,
    child: Child,
}

impl LocalProcess {
    #[cfg(unix)]
    fn request_stop(&self) -> Result<()> {
        signal::kill(Pid::from_raw(self.pid as i32), Signal::SIGTERM)
            .map_err(std::io::Error::from)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn request_stop(&self) -> Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "graceful stop signal is not available on this platform",
        )
        .into())
    }
}

#[async_trait]
impl RunningProcess for LocalProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn terminate(&mut self, grace: Duration) -> Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }

        if let Err(e) = self.request_stop() {
            tracing::warn!(
                "⚠️ Could not send SIGTERM to '{}' (pid {}): {}, killing",
                self.service,
                self.pid,
                e
            );
            self.child.kill().await?;
            return Ok(());
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                tracing::debug!("'{}' exited with {}", self.service, status);
            }
            Err(_) => {
                tracing::warn!(
                    "⚠️ '{}' did not stop within {:?}, killing",
                    self.service,
                    grace
                );
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}
