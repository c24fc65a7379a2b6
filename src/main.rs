// src/main.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sign_relay::sys::git::GitOriginProvider;
use sign_relay::sys::store::{EnvSecretStore, LocalArtifactStore};
use sign_relay::sys::traits::{ArtifactStore, OriginProvider, SecretStore};
use sign_relay::{
    Artifact, Credentials, HttpSigningFacade, Interpreter, InterpreterExecutor,
    ProcessSigningFacade, RelayConfig, ScriptCommands, SigningFacade, SigningRequest, Slug,
    TracingLogSink, TransportKind,
};

#[derive(Parser, Debug)]
#[command(name = "sign-relay", version, about = "Submit artifacts to a remote signing service")]
struct Cli {
    /// Directory that artifact paths are relative to.
    #[arg(long, env = "SIGN_RELAY_WORKSPACE", default_value = ".")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Operation,
}

#[derive(Subcommand, Debug)]
enum Operation {
    /// Submit and wait for the signed artifact.
    Submit {
        #[command(flatten)]
        request: RequestArgs,
        /// Where to store the signed artifact, relative to the workspace.
        #[arg(long)]
        output: PathBuf,
    },
    /// Submit and print the request id without waiting.
    SubmitAsync {
        #[command(flatten)]
        request: RequestArgs,
    },
    /// Download the artifact of an earlier request.
    Download {
        #[arg(long)]
        organization_id: Uuid,
        #[arg(long)]
        request_id: Uuid,
        #[arg(long)]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RequestArgs {
    #[arg(long)]
    organization_id: Uuid,
    #[arg(long)]
    project: String,
    #[arg(long)]
    policy: String,
    #[arg(long)]
    artifact_configuration: Option<String>,
    #[arg(long)]
    description: Option<String>,
    /// Unsigned artifact, relative to the workspace.
    #[arg(long)]
    input: PathBuf,
    #[arg(long, env = "BUILD_URL")]
    build_url: String,
    #[arg(long)]
    build_settings: Option<PathBuf>,
    #[arg(long, env = "SIGN_RELAY_BRANCH")]
    branch: Option<String>,
    #[arg(long, default_value = ".")]
    repo_dir: PathBuf,
    /// User-defined parameter forwarded to the signer, `name=value`.
    #[arg(long = "parameter", value_parser = parse_parameter)]
    parameters: Vec<(String, String)>,
}

fn parse_parameter(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if std::env::var("SIGN_RELAY_LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_request(
    args: RequestArgs,
    store: &dyn ArtifactStore,
) -> Result<SigningRequest, Box<dyn std::error::Error>> {
    let origin = GitOriginProvider {
        repo_dir: args.repo_dir,
        build_url: args.build_url,
        build_settings_file: args.build_settings,
        branch_override: args.branch,
    }
    .retrieve_origin()
    .await?;

    let file_name = args
        .input
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or("input path has no file name")?
        .to_string();
    let bytes = store.retrieve(&args.input).await?;

    Ok(SigningRequest {
        organization_id: args.organization_id,
        project_slug: Slug::new(args.project)?,
        signing_policy_slug: Slug::new(args.policy)?,
        artifact_configuration_slug: args.artifact_configuration.map(Slug::new).transpose()?,
        description: args.description,
        origin,
        artifact: Artifact { file_name, bytes },
        parameters: args.parameters.into_iter().collect::<BTreeMap<_, _>>(),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ==============================================================================
    // 1. Configuration & Environment
    // ==============================================================================

    init_tracing();
    let cli = Cli::parse();

    // Fails on an inconsistent timeout budget before anything is contacted.
    let config = RelayConfig::load()?;
    let store = LocalArtifactStore::new(cli.workspace.clone());

    // ==============================================================================
    // 2. Transport Selection
    // ==============================================================================

    let facade: Box<dyn SigningFacade> = match config.transport {
        TransportKind::Process => Box::new(ProcessSigningFacade::new(
            config.api_url.clone(),
            config.timeouts,
            Box::new(InterpreterExecutor::new(Interpreter::powershell(
                config.interpreter.clone(),
            ))),
            ScriptCommands::default(),
            Arc::new(TracingLogSink),
        )),
        TransportKind::Http => Box::new(
            HttpSigningFacade::new(config.api_url.clone(), config.timeouts)?
                .with_poll_interval(config.poll_interval),
        ),
    };
    tracing::info!(transport = %config.transport, api_url = %config.api_url, "sign-relay starting");

    // 🛡️ Tokens are resolved per invocation and dropped (zeroized) on exit.
    let credentials = Credentials::new(
        EnvSecretStore.retrieve(&config.user_token_id).await?,
        EnvSecretStore.retrieve(&config.trusted_token_id).await?,
    );

    // ==============================================================================
    // 3. Operation
    // ==============================================================================

    let request_id = match cli.command {
        Operation::Submit { request, output } => {
            let request = build_request(request, &store).await?;
            let signed = facade.submit_and_wait(&credentials, &request).await?;
            store.store(&signed.bytes, &output).await?;
            signed.request_id
        }
        Operation::SubmitAsync { request } => {
            let request = build_request(request, &store).await?;
            facade.submit_async(&credentials, &request).await?
        }
        Operation::Download {
            organization_id,
            request_id,
            output,
        } => {
            let signed = facade
                .download(&credentials, organization_id, request_id)
                .await?;
            store.store(&signed.bytes, &output).await?;
            signed.request_id
        }
    };

    println!("{request_id}");
    Ok(())
}
