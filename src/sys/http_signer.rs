//! Signing facade that talks to the signing service REST API directly.
//!
//! Submission is a multipart `POST` whose `Location` header names the new
//! request; completion is detected by polling the request status; the signed
//! artifact is fetched from the link the final status carries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, LOCATION};
use reqwest::multipart::{Form, Part};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{format_duration, ApiConfiguration};
use crate::error::{ConfigError, OperationError, SigningResult};
use crate::sys::request::{SignedArtifact, SigningRequest};
use crate::sys::secrets::{scrub_credentials, Credentials};
use crate::sys::traits::SigningFacade;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_ERROR_BODY: usize = 512;

/// Status document returned for a signing request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SigningRequestStatus {
    status: String,
    is_final_status: bool,
    #[serde(default)]
    signed_artifact_link: Option<String>,
}

impl SigningRequestStatus {
    fn is_completed(&self) -> bool {
        self.is_final_status && self.status.eq_ignore_ascii_case("Completed")
    }
}

pub struct HttpSigningFacade {
    api_url: String,
    timeouts: ApiConfiguration,
    poll_interval: Duration,
    client: reqwest::Client,
}

impl HttpSigningFacade {
    /// Create a REST facade for `api_url` (e.g. `https://app.signpath.io/Api`).
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(
        api_url: impl Into<String>,
        timeouts: ApiConfiguration,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.service_unavailable())
            .user_agent(concat!("sign-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::InvalidSetting {
                name: "http client".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            timeouts,
            poll_interval: DEFAULT_POLL_INTERVAL,
            client,
        })
    }

    /// Set the delay between two status polls.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn authorization(credentials: &Credentials) -> Result<HeaderValue, OperationError> {
        let header = credentials.authorization_header();
        let mut value = HeaderValue::from_str(header.expose_secret()).map_err(|_| {
            OperationError::TransportCall(
                "Credentials contain characters that cannot be sent in a header".to_string(),
            )
        })?;
        value.set_sensitive(true);
        Ok(value)
    }

    fn request_url(&self, organization_id: Uuid, request_id: Option<Uuid>) -> String {
        match request_id {
            Some(id) => format!("{}/v1/{organization_id}/SigningRequests/{id}", self.api_url),
            None => format!("{}/v1/{organization_id}/SigningRequests", self.api_url),
        }
    }

    async fn send(
        &self,
        action: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, OperationError> {
        let response = builder.send().await.map_err(|e| {
            // A connect timeout also reports `is_timeout`; it ran on its own budget.
            if e.is_connect() && e.is_timeout() {
                OperationError::TransportCall(format!(
                    "{action} could not reach the signing service within {}",
                    format_duration(self.timeouts.service_unavailable())
                ))
            } else if e.is_timeout() {
                OperationError::TransportCall(format!(
                    "{action} timed out after {}",
                    format_duration(self.timeouts.upload_download())
                ))
            } else {
                OperationError::TransportCall(format!(
                    "{action} failed: {}",
                    scrub_credentials(&e.to_string())
                ))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(OperationError::TransportCall(format!(
            "{action} failed: HTTP {status}: {}",
            scrub_credentials(body.trim())
        )))
    }

    async fn submit(
        &self,
        credentials: &Credentials,
        request: &SigningRequest,
    ) -> Result<Uuid, OperationError> {
        let repository = &request.origin.repository;
        let mut form = Form::new()
            .text("ProjectSlug", request.project_slug.to_string())
            .text("SigningPolicySlug", request.signing_policy_slug.to_string());

        // Absent optional fields are omitted, never sent empty.
        if let Some(slug) = &request.artifact_configuration_slug {
            form = form.text("ArtifactConfigurationSlug", slug.to_string());
        }
        if let Some(description) = &request.description {
            form = form.text("Description", description.clone());
        }

        form = form
            .text(
                "Origin.RepositoryData.SourceControlManagementType",
                repository.source_control_kind.clone(),
            )
            .text("Origin.RepositoryData.RepositoryUrl", repository.repository_url.clone())
            .text("Origin.RepositoryData.BranchName", repository.branch_name.clone())
            .text("Origin.RepositoryData.CommitId", repository.commit_id.clone())
            .text("Origin.BuildData.Url", request.origin.build_url.clone())
            .part(
                "Origin.BuildData.BuildSettingsFile",
                Part::bytes(request.origin.build_settings.clone()).file_name("build-settings"),
            )
            .part(
                "Artifact",
                Part::bytes(request.artifact.bytes.clone())
                    .file_name(request.artifact.file_name.clone()),
            );

        for (name, value) in &request.parameters {
            form = form.text(format!("Parameters[{name}]"), value.clone());
        }

        let response = self
            .send(
                "Submitting signing request",
                self.client
                    .post(self.request_url(request.organization_id, None))
                    .header(AUTHORIZATION, Self::authorization(credentials)?)
                    .timeout(self.timeouts.upload_download())
                    .multipart(form),
            )
            .await?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        let id = location
            .split(['?', '#'])
            .next()
            .and_then(|path| path.trim_end_matches('/').rsplit('/').next())
            .and_then(|segment| Uuid::parse_str(segment).ok());

        id.ok_or_else(|| {
            OperationError::TransportCall(format!(
                "Submitting signing request returned no valid signing-request id (Location: '{location}')"
            ))
        })
    }

    async fn fetch_status(
        &self,
        credentials: &Credentials,
        organization_id: Uuid,
        request_id: Uuid,
    ) -> Result<SigningRequestStatus, OperationError> {
        let response = self
            .send(
                "Querying signing request status",
                self.client
                    .get(self.request_url(organization_id, Some(request_id)))
                    .header(AUTHORIZATION, Self::authorization(credentials)?)
                    .timeout(self.timeouts.upload_download()),
            )
            .await?;

        response.json().await.map_err(|e| {
            OperationError::TransportCall(format!("Unreadable signing request status: {e}"))
        })
    }

    async fn poll_until_final(
        &self,
        credentials: &Credentials,
        organization_id: Uuid,
        request_id: Uuid,
    ) -> Result<SigningRequestStatus, OperationError> {
        loop {
            let status = self
                .fetch_status(credentials, organization_id, request_id)
                .await?;
            if status.is_final_status {
                return Ok(status);
            }
            debug!(%request_id, status = %status.status, "signing request not final yet");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Waits for a final status and returns the signed artifact link.
    ///
    /// A final status other than completed is a failure; no final status within
    /// the wait-for-completion budget is a timeout.
    async fn wait_for_completion(
        &self,
        credentials: &Credentials,
        organization_id: Uuid,
        request_id: Uuid,
    ) -> Result<String, OperationError> {
        let budget = self.timeouts.wait_for_completion();
        let status = tokio::time::timeout(
            budget,
            self.poll_until_final(credentials, organization_id, request_id),
        )
        .await
        .map_err(|_| {
            OperationError::UpstreamTimeout(format!(
                "Signing request {request_id} did not reach a final status within {}",
                format_duration(budget)
            ))
        })??;

        if !status.is_completed() {
            return Err(OperationError::TransportCall(format!(
                "Signing request {request_id} finished with status {}",
                status.status
            )));
        }

        status.signed_artifact_link.ok_or_else(|| {
            OperationError::TransportCall(format!(
                "Signing request {request_id} completed without a signed artifact link"
            ))
        })
    }

    async fn fetch_artifact(
        &self,
        credentials: &Credentials,
        link: &str,
    ) -> Result<Vec<u8>, OperationError> {
        let response = self
            .send(
                "Downloading signed artifact",
                self.client
                    .get(link)
                    .header(AUTHORIZATION, Self::authorization(credentials)?)
                    .timeout(self.timeouts.upload_download()),
            )
            .await?;

        let bytes = response.bytes().await.map_err(|e| {
            OperationError::TransportCall(format!("Downloading signed artifact failed: {e}"))
        })?;
        Ok(bytes.to_vec())
    }

    async fn complete(
        &self,
        credentials: &Credentials,
        organization_id: Uuid,
        request_id: Uuid,
    ) -> Result<SignedArtifact, OperationError> {
        let link = self
            .wait_for_completion(credentials, organization_id, request_id)
            .await?;
        let bytes = self.fetch_artifact(credentials, &link).await?;
        info!(%request_id, bytes = bytes.len(), "signed artifact received");
        Ok(SignedArtifact { request_id, bytes })
    }
}

#[async_trait]
impl SigningFacade for HttpSigningFacade {
    async fn submit_and_wait(
        &self,
        credentials: &Credentials,
        request: &SigningRequest,
    ) -> SigningResult<SignedArtifact> {
        request.validate()?;
        let request_id = self.submit(credentials, request).await?;
        info!(%request_id, "signing request submitted, waiting for completion");
        Ok(self
            .complete(credentials, request.organization_id, request_id)
            .await?)
    }

    async fn submit_async(
        &self,
        credentials: &Credentials,
        request: &SigningRequest,
    ) -> SigningResult<Uuid> {
        request.validate()?;
        let request_id = self.submit(credentials, request).await?;
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
        Ok(self.complete(credentials, organization_id, request_id).await?)
    }
}
