use crate::domain::model::{ArtifactRef, BuildSpec};
use crate::domain::ports::BuildCollaborator;
use crate::utils::error::{ComposeError, LaunchFailure, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

pub const DEFAULT_BUILD_COMMAND: &str =
    "docker build --file {dockerfile} --target {target} --tag {tag} {context}";

/// 以外部建置指令產出映像檔；多階段建置細節屬於該指令
#[derive(Debug, Clone)]
pub struct CommandBuildCollaborator {
    template: String,
    project: String,
    workdir: PathBuf,
}

impl CommandBuildCollaborator {
    pub fn new(template: impl Into<String>, project: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            template: template.into(),
            project: project.into(),
            workdir: workdir.into(),
        }
    }

    pub fn tag_for(&self, service: &str) -> String {
        format!("{}-{}:latest", self.project, service)
    }

    /// 展開樣板；先以空白切出參數再代入值，含空白的路徑仍是單一參數
    ///
    /// 沒有 target 時連同前面的旗標一起省略。
    pub fn render(&self, service: &str, spec: &BuildSpec) -> Vec<String> {
        let tag = self.tag_for(service);
        let mut args: Vec<String> = Vec::new();

        for token in self.template.split_whitespace() {
            if token.contains("{target}") && spec.target.is_none() {
                if args.last().is_some_and(|flag| flag.starts_with('-')) {
                    args.pop();
                }
                continue;
            }
            args.push(
                token
                    .replace("{dockerfile}", &spec.dockerfile)
                    .replace("{target}", spec.target.as_deref().unwrap_or_default())
                    .replace("{tag}", &tag)
                    .replace("{context}", &spec.context),
            );
        }
        args
    }
}

#[async_trait]
impl BuildCollaborator for CommandBuildCollaborator {
    async fn build(&self, service: &str, spec: &BuildSpec) -> Result<ArtifactRef> {
        let args = self.render(service, spec);
        let Some((program, rest)) = args.split_first() else {
            return Err(ComposeError::launch(
                service,
                LaunchFailure::Build("empty build command".to_string()),
            ));
        };

        tracing::debug!("Build command for '{}': {}", service, args.join(" "));
        let output = Command::new(program)
            .args(rest)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ComposeError::launch(service, LaunchFailure::Build(e.to_string())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last_line = stderr.lines().last().unwrap_or_default().to_string();
            return Err(ComposeError::launch(
                service,
                LaunchFailure::Build(format!("{} ({})", output.status, last_line)),
            ));
        }

        let tag = self.tag_for(service);
        tracing::info!("✅ Built '{}' as {}", service, tag);
        Ok(ArtifactRef::Image(tag))
    }
}
