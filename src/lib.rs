//! Dispatch of signing requests to a remote signer.
//!
//! A caller builds a [`SigningRequest`], picks a [`SigningFacade`] (a local
//! interpreter transport or the direct REST transport), and gets back the
//! signed artifact or the id of the pending request. Timeout budgets are
//! validated by [`ApiConfiguration`] before any facade exists.

pub mod config;
pub mod error;
pub mod sys;

pub use config::{ApiConfiguration, RelayConfig, TransportKind};
pub use error::{ConfigError, FailureKind, OperationError, SigningError, SigningResult};
pub use sys::command::{Command, CommandBuilder, Dialect, Table, Value};
pub use sys::exec::{Interpreter, InterpreterExecutor, TracingLogSink};
pub use sys::extract::extract_request_id;
pub use sys::http_signer::HttpSigningFacade;
pub use sys::process_signer::{ProcessSigningFacade, ScriptCommands};
pub use sys::request::{Artifact, Origin, RepositoryData, SignedArtifact, SigningRequest, Slug};
pub use sys::secrets::{Credentials, SecretToken};
pub use sys::traits::{CommandExecutor, ExecutionResult, LogSink, SigningFacade};
