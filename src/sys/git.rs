use std::path::PathBuf;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use crate::sys::request::{Origin, RepositoryData};
use crate::sys::secrets::scrub_credentials;
use crate::sys::traits::{CollaboratorError, OriginProvider};

static URL_USERINFO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(://)[^@/\s]+@").expect("static userinfo regex"));

/// Reads origin metadata from a local git checkout plus CI-supplied build data.
pub struct GitOriginProvider {
    pub repo_dir: PathBuf,
    pub build_url: String,
    pub build_settings_file: Option<PathBuf>,
    /// CI systems often check out a detached HEAD and report the branch separately.
    pub branch_override: Option<String>,
}

impl GitOriginProvider {
    /// Drops `user:token@` from https remotes so the token never leaves the build.
    fn strip_userinfo(url: &str) -> String {
        URL_USERINFO.replace(url, "$1").into_owned()
    }

    async fn git(&self, args: &[&str]) -> Result<String, CollaboratorError> {
        // 🛡️ Hooks disabled, never prompt for credentials.
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_dir)
            .arg("-c")
            .arg("core.hooksPath=/dev/null")
            .env("GIT_TERMINAL_PROMPT", "0")
            .args(args)
            .output()
            .await
            .map_err(|e| CollaboratorError::Failed(format!("git spawn error: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollaboratorError::NotFound(format!(
                "git {} failed: {}",
                args.join(" "),
                scrub_credentials(stderr.trim())
            )));
        }

        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if value.is_empty() {
            return Err(CollaboratorError::NotFound(format!(
                "git {} returned nothing",
                args.join(" ")
            )));
        }
        Ok(value)
    }
}

#[async_trait]
impl OriginProvider for GitOriginProvider {
    async fn retrieve_origin(&self) -> Result<Origin, CollaboratorError> {
        let remote = self.git(&["config", "--get", "remote.origin.url"]).await?;
        let repository_url = Self::strip_userinfo(&remote);
        let commit_id = self.git(&["rev-parse", "HEAD"]).await?;
        let branch_name = match &self.branch_override {
            Some(branch) => branch.clone(),
            None => self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?,
        };

        let build_settings = match &self.build_settings_file {
            Some(path) => tokio::fs::read(path).await.map_err(|e| {
                CollaboratorError::NotFound(format!(
                    "build settings file {}: {e}",
                    path.display()
                ))
            })?,
            None => Vec::new(),
        };

        debug!(%repository_url, %branch_name, %commit_id, "origin retrieved");
        Ok(Origin {
            repository: RepositoryData {
                source_control_kind: "git".to_string(),
                repository_url,
                branch_name,
                commit_id,
            },
            build_url: self.build_url.clone(),
            build_settings,
        })
    }
}
