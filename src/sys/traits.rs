// src/sys/traits.rs
//
// Global contracts. Facades, executors, and the external collaborators the
// facades rely on are all reached through these traits.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::error::SigningResult;
use crate::sys::command::{Command, Dialect};
use crate::sys::request::{Origin, SignedArtifact, SigningRequest};
use crate::sys::secrets::{Credentials, SecretToken};

// ==============================================================================
// 1. Signing Facade (Transport-Agnostic)
// ==============================================================================

/// The three signing operations, identical in contract for every transport.
///
/// Requests are validated before anything is spawned or sent; a rejected
/// request surfaces as [`SigningError::Configuration`](crate::error::SigningError),
/// every later failure as `SigningError::Failed`.
#[async_trait]
pub trait SigningFacade: Send + Sync {
    /// Submits the request and waits for the signed artifact.
    async fn submit_and_wait(
        &self,
        credentials: &Credentials,
        request: &SigningRequest,
    ) -> SigningResult<SignedArtifact>;

    /// Submits the request and returns as soon as its id is known.
    async fn submit_async(
        &self,
        credentials: &Credentials,
        request: &SigningRequest,
    ) -> SigningResult<Uuid>;

    /// Waits for a previously submitted request to complete and fetches its artifact.
    async fn download(
        &self,
        credentials: &Credentials,
        organization_id: Uuid,
        request_id: Uuid,
    ) -> SigningResult<SignedArtifact>;
}

// ==============================================================================
// 2. Process Execution (Telemetry-Aware)
// ==============================================================================

/// Receives every output line of a running command as it arrives.
pub trait LogSink: Send + Sync {
    fn line(&self, line: &str);
}

/// The tagged outcome of one command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Success { output: String },
    Error { description: String },
}

impl ExecutionResult {
    pub fn error(description: impl Into<String>) -> Self {
        ExecutionResult::Error {
            description: description.into(),
        }
    }
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// The dialect commands for this executor must be built in.
    fn dialect(&self) -> Dialect;

    /// Runs `command` once, streaming output to `sink`, bounded by `timeout`.
    async fn execute(
        &self,
        command: Command,
        timeout: Duration,
        sink: &dyn LogSink,
    ) -> ExecutionResult;
}

// ==============================================================================
// 3. External Collaborators
// ==============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Failed(String),
}

/// The build server's own file store.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn retrieve(&self, path: &Path) -> Result<Vec<u8>, CollaboratorError>;
    async fn store(&self, bytes: &[u8], path: &Path) -> Result<(), CollaboratorError>;
}

/// A credential vault. Retrieved tokens live no longer than one operation.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn retrieve(&self, id: &str) -> Result<SecretToken, CollaboratorError>;
}

/// Version-control and build metadata for the current pipeline run.
#[async_trait]
pub trait OriginProvider: Send + Sync {
    async fn retrieve_origin(&self) -> Result<Origin, CollaboratorError>;
}
