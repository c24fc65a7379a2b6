// src/sys/request.rs

use std::collections::BTreeMap;
use std::fmt;

use uuid::Uuid;

use crate::error::ConfigError;

const MAX_SLUG_LEN: usize = 128;

/// A short identifier naming a project, signing policy, or artifact configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Slug(String);

impl Slug {
    /// # Errors
    /// Rejects empty slugs, slugs longer than 128 characters, and anything outside
    /// `[A-Za-z0-9._-]`.
    pub fn new(raw: impl Into<String>) -> Result<Self, ConfigError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ConfigError::InvalidInput("slug cannot be empty".to_string()));
        }
        if raw.len() > MAX_SLUG_LEN {
            return Err(ConfigError::InvalidInput(format!(
                "slug '{raw}' exceeds {MAX_SLUG_LEN} characters"
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
        {
            return Err(ConfigError::InvalidInput(format!(
                "slug '{raw}' contains illegal characters"
            )));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source-control provenance of the artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryData {
    pub source_control_kind: String,
    pub repository_url: String,
    pub branch_name: String,
    pub commit_id: String,
}

/// Provenance metadata attached to a signing request for audit purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub repository: RepositoryData,
    pub build_url: String,
    /// Snapshot of the build configuration, forwarded as an opaque file.
    pub build_settings: Vec<u8>,
}

/// The unsigned artifact plus the file name the signer should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SigningRequest {
    pub organization_id: Uuid,
    pub project_slug: Slug,
    pub signing_policy_slug: Slug,
    pub artifact_configuration_slug: Option<Slug>,
    pub description: Option<String>,
    pub origin: Origin,
    pub artifact: Artifact,
    /// User-defined parameters, forwarded opaquely to the remote signer.
    pub parameters: BTreeMap<String, String>,
}

impl SigningRequest {
    /// Checks the parts of the request that the type system cannot.
    ///
    /// # Errors
    /// Rejects empty origin fields, an empty artifact file name, and parameter
    /// names that are empty or contain control characters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let repository = &self.origin.repository;
        for (name, value) in [
            ("source control kind", &repository.source_control_kind),
            ("repository URL", &repository.repository_url),
            ("branch name", &repository.branch_name),
            ("commit id", &repository.commit_id),
            ("build URL", &self.origin.build_url),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidInput(format!("origin {name} is required")));
            }
        }

        if self.artifact.file_name.is_empty()
            || self.artifact.file_name.contains(['/', '\\'])
            || self.artifact.file_name == ".."
        {
            return Err(ConfigError::InvalidInput(format!(
                "invalid artifact file name '{}'",
                self.artifact.file_name
            )));
        }

        for name in self.parameters.keys() {
            if name.is_empty() || name.chars().any(char::is_control) {
                return Err(ConfigError::InvalidInput(format!(
                    "invalid user parameter name {name:?}"
                )));
            }
        }
        Ok(())
    }
}

/// The result of a successful submit-and-wait or download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedArtifact {
    pub request_id: Uuid,
    pub bytes: Vec<u8>,
}
