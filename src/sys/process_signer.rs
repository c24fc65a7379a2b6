// src/sys/process_signer.rs
//
// Signing facade that drives the remote signer through a local interpreter
// (by default the SignPath PowerShell module). Every value is handed to the
// script through its environment; see `sys::command`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ApiConfiguration;
use crate::error::{OperationError, SigningResult};
use crate::sys::command::{CommandBuilder, Table};
use crate::sys::extract::extract_request_id;
use crate::sys::request::{Origin, SignedArtifact, SigningRequest};
use crate::sys::secrets::Credentials;
use crate::sys::traits::{CommandExecutor, ExecutionResult, LogSink, SigningFacade};

/// The structural text each operation starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCommands {
    pub submit: String,
    pub download: String,
}

impl ScriptCommands {
    /// Cmdlets of the SignPath PowerShell module, with terminating errors enabled.
    pub fn signpath_module() -> Self {
        Self {
            submit: "$ErrorActionPreference = 'Stop'; Submit-SigningRequest".to_string(),
            download: "$ErrorActionPreference = 'Stop'; Get-SignedArtifact".to_string(),
        }
    }
}

impl Default for ScriptCommands {
    fn default() -> Self {
        Self::signpath_module()
    }
}

pub struct ProcessSigningFacade {
    api_url: String,
    timeouts: ApiConfiguration,
    executor: Box<dyn CommandExecutor>,
    commands: ScriptCommands,
    sink: Arc<dyn LogSink>,
}

/// Whole seconds, rounded up so a sub-second budget never becomes zero.
fn whole_seconds(duration: Duration) -> String {
    let extra = u64::from(duration.subsec_nanos() > 0);
    (duration.as_secs() + extra).to_string()
}

fn path_value(path: &Path) -> Result<String, OperationError> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| OperationError::Io(format!("non UTF-8 scratch path {}", path.display())))
}

fn origin_table(origin: &Origin, settings_path: &Path) -> Result<Table, OperationError> {
    let repository = &origin.repository;
    Ok(Table::new()
        .nested(
            "RepositoryData",
            Table::new()
                .entry("SourceControlManagementType", repository.source_control_kind.as_str())
                .entry("RepositoryUrl", repository.repository_url.as_str())
                .entry("BranchName", repository.branch_name.as_str())
                .entry("CommitId", repository.commit_id.as_str()),
        )
        .nested(
            "BuildData",
            Table::new()
                .entry("Url", origin.build_url.as_str())
                // The module reads file-valued entries from `@<path>`.
                .entry("BuildSettingsFile", format!("@{}", path_value(settings_path)?)),
        ))
}

/// Per-call scratch space; removed when dropped.
///
/// Every file lives in its own fixed subdirectory, so a caller-chosen artifact
/// name never collides with a file the facade writes itself.
struct Scratch {
    dir: TempDir,
}

impl Scratch {
    const INPUT: &'static str = "input";
    const ORIGIN: &'static str = "origin";
    const SIGNED: &'static str = "signed";

    fn new() -> Result<Self, OperationError> {
        let dir = tempfile::Builder::new().prefix("sign-relay-").tempdir()?;
        Ok(Self { dir })
    }

    /// Creates `<scratch>/<area>` and returns the path of `file_name` inside it.
    async fn file(&self, area: &str, file_name: &str) -> Result<PathBuf, OperationError> {
        let dir = self.dir.path().join(area);
        tokio::fs::create_dir(&dir).await?;
        Ok(dir.join(file_name))
    }

    async fn write(
        &self,
        area: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, OperationError> {
        let path = self.file(area, file_name).await?;
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

impl ProcessSigningFacade {
    /// The timeout budget was validated when `timeouts` was constructed.
    pub fn new(
        api_url: impl Into<String>,
        timeouts: ApiConfiguration,
        executor: Box<dyn CommandExecutor>,
        commands: ScriptCommands,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            timeouts,
            executor,
            commands,
            sink,
        }
    }

    fn start(
        &self,
        template: &str,
        credentials: &Credentials,
        organization_id: Uuid,
    ) -> CommandBuilder {
        let mut builder = CommandBuilder::start(self.executor.dialect(), template);
        builder
            .append_parameter("ApiUrl", self.api_url.as_str())
            // 🛡️ The combined bearer value reaches the script only via its environment.
            .append_parameter("ApiToken", credentials.bearer())
            .append_parameter("OrganizationId", organization_id.to_string())
            .append_parameter(
                "ServiceUnavailableTimeoutInSeconds",
                whole_seconds(self.timeouts.service_unavailable()),
            )
            .append_parameter(
                "UploadAndDownloadRequestTimeoutInSeconds",
                whole_seconds(self.timeouts.upload_download()),
            );
        builder
    }

    async fn run(&self, builder: CommandBuilder) -> Result<String, OperationError> {
        let command = builder.build().map_err(|e| {
            OperationError::CommandExecution(format!("Failed to build signing command: {e}"))
        })?;

        match self
            .executor
            .execute(command, self.timeouts.process(), self.sink.as_ref())
            .await
        {
            ExecutionResult::Success { output } => Ok(output),
            ExecutionResult::Error { description } => {
                warn!(%description, "signing script failed");
                Err(OperationError::CommandExecution(description))
            }
        }
    }

    async fn read_artifact(path: &Path, request_id: Uuid) -> Result<Vec<u8>, OperationError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(OperationError::UnexpectedOutput(format!(
                    "Signing script finished for request {request_id} but produced no signed artifact"
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn submit(
        &self,
        credentials: &Credentials,
        request: &SigningRequest,
        wait: bool,
    ) -> Result<(Uuid, Option<Vec<u8>>), OperationError> {
        let scratch = Scratch::new()?;
        let input_path = scratch
            .write(Scratch::INPUT, &request.artifact.file_name, &request.artifact.bytes)
            .await?;
        let settings_path = scratch
            .write(Scratch::ORIGIN, "build-settings", &request.origin.build_settings)
            .await?;

        let mut builder = self.start(&self.commands.submit, credentials, request.organization_id);
        builder
            .append_parameter("ProjectSlug", request.project_slug.as_str())
            .append_parameter("SigningPolicySlug", request.signing_policy_slug.as_str())
            .append_optional_parameter(
                "ArtifactConfigurationSlug",
                request.artifact_configuration_slug.as_ref().map(|slug| slug.as_str()),
            )
            .append_optional_parameter("Description", request.description.as_deref())
            .append_parameter("InputArtifactPath", path_value(&input_path)?)
            .append_table("Origin", origin_table(&request.origin, &settings_path)?);

        let parameters = request
            .parameters
            .iter()
            .fold(Table::new(), |table, (name, value)| {
                table.bound_entry(name.as_str(), value.as_str())
            });
        if !parameters.is_empty() {
            builder.append_table("Parameters", parameters);
        }

        let output_path = if wait {
            let path = scratch.file(Scratch::SIGNED, &request.artifact.file_name).await?;
            builder
                .append_flag("WaitForCompletion")
                .append_parameter("OutputArtifactPath", path_value(&path)?)
                .append_parameter(
                    "WaitForCompletionTimeoutInSeconds",
                    whole_seconds(self.timeouts.wait_for_completion()),
                );
            Some(path)
        } else {
            None
        };

        let output = self.run(builder).await?;
        let request_id = extract_request_id(&output)?;

        let bytes = match output_path {
            Some(path) => Some(Self::read_artifact(&path, request_id).await?),
            None => None,
        };
        Ok((request_id, bytes))
    }
}

#[async_trait]
impl SigningFacade for ProcessSigningFacade {
    async fn submit_and_wait(
        &self,
        credentials: &Credentials,
        request: &SigningRequest,
    ) -> SigningResult<SignedArtifact> {
        request.validate()?;
        info!(
            project = %request.project_slug,
            policy = %request.signing_policy_slug,
            "submitting signing request and waiting for completion"
        );

        let (request_id, bytes) = self.submit(credentials, request, true).await?;
        let bytes = bytes.ok_or_else(|| {
            OperationError::UnexpectedOutput(format!(
                "Signing request {request_id} completed without an artifact"
            ))
        })?;

        info!(%request_id, bytes = bytes.len(), "signed artifact received");
        Ok(SignedArtifact { request_id, bytes })
    }

    async fn submit_async(
        &self,
        credentials: &Credentials,
        request: &SigningRequest,
    ) -> SigningResult<Uuid> {
        request.validate()?;
        info!(
            project = %request.project_slug,
            policy = %request.signing_policy_slug,
            "submitting signing request"
        );

        let (request_id, _) = self.submit(credentials, request, false).await?;
        info!(%request_id, "signing request submitted");
        Ok(request_id)
    }

    async fn download(
        &self,
        credentials: &Credentials,
        organization_id: Uuid,
        request_id: Uuid,
    ) -> SigningResult<SignedArtifact> {
        info!(%organization_id, %request_id, "downloading signed artifact");

        let scratch = Scratch::new()?;
        let output_path = scratch.file(Scratch::SIGNED, "artifact").await?;

        let mut builder = self.start(&self.commands.download, credentials, organization_id);
        builder
            .append_parameter("SigningRequestId", request_id.to_string())
            .append_parameter("OutputArtifactPath", path_value(&output_path)?)
            .append_parameter(
                "WaitForCompletionTimeoutInSeconds",
                whole_seconds(self.timeouts.wait_for_completion()),
            );

        self.run(builder).await?;
        let bytes = Self::read_artifact(&output_path, request_id).await?;

        info!(%request_id, bytes = bytes.len(), "signed artifact received");
        Ok(SignedArtifact { request_id, bytes })
    }
}
