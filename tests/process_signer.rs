//! Process-transport facade tests.
//!
//! Most tests drive the facade with a recording executor so the exact command
//! handed to the interpreter can be inspected. The last group runs a fake
//! signer script through a real `sh`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sign_relay::{
    ApiConfiguration, Command, CommandExecutor, Dialect, ExecutionResult, FailureKind, Interpreter,
    InterpreterExecutor, LogSink, ProcessSigningFacade, ScriptCommands, SigningFacade, Slug,
    TracingLogSink,
};
use tokio::sync::mpsc;

mod common;

#[derive(Debug, Clone)]
struct Recorded {
    text: String,
    variables: BTreeMap<String, (String, bool)>,
    timeout: Duration,
    /// Contents of the staged input artifact while the script runs.
    input: Option<Vec<u8>>,
    /// Contents of the staged build settings file while the script runs.
    build_settings: Option<Vec<u8>>,
}

impl Recorded {
    fn value(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(|(value, _)| value.as_str())
    }
}

struct RecordingExecutor {
    outcome: ExecutionResult,
    write_output: bool,
    calls: Arc<Mutex<Vec<Recorded>>>,
}

#[async_trait]
impl CommandExecutor for RecordingExecutor {
    fn dialect(&self) -> Dialect {
        Dialect::PowerShell
    }

    async fn execute(
        &self,
        command: Command,
        timeout: Duration,
        sink: &dyn LogSink,
    ) -> ExecutionResult {
        let variables: BTreeMap<String, (String, bool)> = command
            .expose_environment()
            .map(|(name, value)| {
                let secret = command.variable(name).map(|v| v.is_secret()).unwrap_or(false);
                (name.to_string(), (value.to_string(), secret))
            })
            .collect();

        let input = variables
            .get("SIGN_RELAY_INPUTARTIFACTPATH")
            .map(|(path, _)| std::fs::read(path).unwrap());
        let build_settings = variables
            .get("SIGN_RELAY_ORIGIN_BUILDDATA_BUILDSETTINGSFILE")
            .map(|(value, _)| std::fs::read(value.trim_start_matches('@')).unwrap());

        if self.write_output {
            if let Some((path, _)) = variables.get("SIGN_RELAY_OUTPUTARTIFACTPATH") {
                std::fs::write(path, b"signed-bytes").unwrap();
            }
        }
        sink.line("progress from the script");

        self.calls.lock().unwrap().push(Recorded {
            text: command.text().to_string(),
            variables,
            timeout,
            input,
            build_settings,
        });
        self.outcome.clone()
    }
}

fn timeouts() -> ApiConfiguration {
    ApiConfiguration::from_secs(10, 20, 30, 100).unwrap()
}

fn facade(
    outcome: ExecutionResult,
    write_output: bool,
) -> (ProcessSigningFacade, Arc<Mutex<Vec<Recorded>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let executor = RecordingExecutor {
        outcome,
        write_output,
        calls: Arc::clone(&calls),
    };
    let facade = ProcessSigningFacade::new(
        "https://signer.example/Api",
        timeouts(),
        Box::new(executor),
        ScriptCommands::default(),
        Arc::new(TracingLogSink),
    );
    (facade, calls)
}

fn success() -> ExecutionResult {
    ExecutionResult::Success {
        output: format!("Uploading artifact\nWaiting for completion\n{}\n", common::REQUEST_ID),
    }
}

fn single_call(calls: &Arc<Mutex<Vec<Recorded>>>) -> Recorded {
    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    calls[0].clone()
}

#[tokio::test]
async fn submit_and_wait_returns_fresh_artifact() {
    let (facade, calls) = facade(success(), true);

    let signed = facade
        .submit_and_wait(&common::credentials(), &common::request())
        .await
        .unwrap();

    assert_eq!(signed.request_id, common::request_id());
    assert_eq!(signed.bytes, b"signed-bytes");

    let call = single_call(&calls);
    assert!(call
        .text
        .starts_with("$ErrorActionPreference = 'Stop'; Submit-SigningRequest -ApiUrl"));
    assert!(call.text.contains(" -WaitForCompletion"));
    assert_eq!(call.value("SIGN_RELAY_WAITFORCOMPLETIONTIMEOUTINSECONDS"), Some("30"));
    assert_eq!(call.value("SIGN_RELAY_SERVICEUNAVAILABLETIMEOUTINSECONDS"), Some("10"));
    assert_eq!(call.value("SIGN_RELAY_UPLOADANDDOWNLOADREQUESTTIMEOUTINSECONDS"), Some("20"));
    assert_eq!(call.timeout, Duration::from_secs(100));

    // The scratch directory is gone once the call returns.
    let output_path = call.value("SIGN_RELAY_OUTPUTARTIFACTPATH").unwrap();
    assert!(!std::path::Path::new(output_path).exists());
}

#[tokio::test]
async fn absent_artifact_configuration_is_not_bound() {
    let (facade, calls) = facade(success(), true);
    facade
        .submit_and_wait(&common::credentials(), &common::request())
        .await
        .unwrap();

    let call = single_call(&calls);
    assert!(!call.text.contains("ArtifactConfigurationSlug"));
    assert!(!call.text.contains("Description"));
    assert!(call.value("SIGN_RELAY_ARTIFACTCONFIGURATIONSLUG").is_none());
    assert!(call.value("SIGN_RELAY_DESCRIPTION").is_none());
}

#[tokio::test]
async fn present_artifact_configuration_is_bound_verbatim() {
    let (facade, calls) = facade(success(), true);
    let mut request = common::request();
    request.artifact_configuration_slug = Some(Slug::new("x64-installer").unwrap());
    request.description = Some("Release \"2.0\" `$(whoami)`".to_string());

    facade
        .submit_and_wait(&common::credentials(), &request)
        .await
        .unwrap();

    let call = single_call(&calls);
    assert_eq!(call.value("SIGN_RELAY_ARTIFACTCONFIGURATIONSLUG"), Some("x64-installer"));
    assert_eq!(
        call.value("SIGN_RELAY_DESCRIPTION"),
        Some("Release \"2.0\" `$(whoami)`")
    );
    assert!(!call.text.contains("whoami"));
    assert!(!call.text.contains("x64-installer"));
}

#[tokio::test]
async fn credentials_travel_as_one_secret_variable() {
    let (facade, calls) = facade(success(), true);
    facade
        .submit_and_wait(&common::credentials(), &common::request())
        .await
        .unwrap();

    let call = single_call(&calls);
    assert_eq!(
        call.variables.get("SIGN_RELAY_APITOKEN"),
        Some(&("user-token:trusted-token".to_string(), true))
    );
    assert!(!call.text.contains("user-token"));
    assert!(!call.text.contains("trusted-token"));
}

#[tokio::test]
async fn origin_and_parameters_are_bound_through_placeholders() {
    let (facade, calls) = facade(success(), true);
    let mut request = common::request();
    request
        .parameters
        .insert("version'; Remove-Item -Recurse C:\\".to_string(), "1.2.3".to_string());

    facade
        .submit_and_wait(&common::credentials(), &request)
        .await
        .unwrap();

    let call = single_call(&calls);
    assert!(call.text.contains("-Origin @{ 'RepositoryData' = @{"));
    assert!(call.text.contains(
        "-Parameters @{ ($env:SIGN_RELAY_PARAMETERS_KEY_0) = $env:SIGN_RELAY_PARAMETERS_VALUE_0 }"
    ));
    assert!(!call.text.contains("Remove-Item"));
    assert_eq!(
        call.value("SIGN_RELAY_ORIGIN_REPOSITORYDATA_BRANCHNAME"),
        Some("main")
    );
    assert!(call
        .value("SIGN_RELAY_ORIGIN_BUILDDATA_BUILDSETTINGSFILE")
        .unwrap()
        .starts_with('@'));
    assert_eq!(
        call.value("SIGN_RELAY_PARAMETERS_KEY_0"),
        Some("version'; Remove-Item -Recurse C:\\")
    );
    assert_eq!(call.value("SIGN_RELAY_PARAMETERS_VALUE_0"), Some("1.2.3"));
}

#[tokio::test]
async fn artifact_named_like_build_settings_keeps_its_own_bytes() {
    let (facade, calls) = facade(success(), false);
    let mut request = common::request();
    request.artifact.file_name = "build-settings".to_string();

    facade
        .submit_async(&common::credentials(), &request)
        .await
        .unwrap();

    let call = single_call(&calls);
    assert_eq!(call.input.as_deref(), Some(&b"unsigned"[..]));
    assert_eq!(call.build_settings.as_deref(), Some(&b"<pipeline/>"[..]));
    let input_path = call.value("SIGN_RELAY_INPUTARTIFACTPATH").unwrap();
    assert!(input_path.ends_with("/input/build-settings"));
}

#[tokio::test]
async fn artifact_named_like_the_output_area_still_signs() {
    let (facade, calls) = facade(success(), true);
    let mut request = common::request();
    request.artifact.file_name = "signed".to_string();

    let signed = facade
        .submit_and_wait(&common::credentials(), &request)
        .await
        .unwrap();
    assert_eq!(signed.bytes, b"signed-bytes");

    let call = single_call(&calls);
    assert_eq!(call.input.as_deref(), Some(&b"unsigned"[..]));
    let output_path = call.value("SIGN_RELAY_OUTPUTARTIFACTPATH").unwrap();
    assert!(output_path.ends_with("/signed/signed"));
    assert_ne!(Some(output_path), call.value("SIGN_RELAY_INPUTARTIFACTPATH"));
}

#[tokio::test]
async fn submit_async_omits_wait_parameters() {
    let (facade, calls) = facade(success(), false);

    let id = facade
        .submit_async(&common::credentials(), &common::request())
        .await
        .unwrap();
    assert_eq!(id, common::request_id());

    let call = single_call(&calls);
    assert!(!call.text.contains("WaitForCompletion"));
    assert!(call.value("SIGN_RELAY_OUTPUTARTIFACTPATH").is_none());
    assert!(call.value("SIGN_RELAY_WAITFORCOMPLETIONTIMEOUTINSECONDS").is_none());
}

#[tokio::test]
async fn execution_error_is_surfaced_verbatim() {
    let (facade, _calls) = facade(
        ExecutionResult::error("pwsh did not complete within 100 seconds"),
        false,
    );

    let err = facade
        .submit_and_wait(&common::credentials(), &common::request())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(FailureKind::CommandExecution));
    assert_eq!(err.description(), "pwsh did not complete within 100 seconds");
    assert_eq!(
        err.to_string(),
        "Signing operation failed: pwsh did not complete within 100 seconds"
    );
}

#[tokio::test]
async fn non_id_last_line_is_unexpected_output() {
    let (facade, _calls) = facade(
        ExecutionResult::Success {
            output: format!("{}\nWARNING: something odd\n", common::REQUEST_ID),
        },
        true,
    );

    let err = facade
        .submit_async(&common::credentials(), &common::request())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(FailureKind::UnexpectedOutput));
}

#[tokio::test]
async fn missing_output_file_is_not_reported_as_success() {
    let (facade, _calls) = facade(success(), false);

    let err = facade
        .submit_and_wait(&common::credentials(), &common::request())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(FailureKind::UnexpectedOutput));
    assert!(err.description().contains("produced no signed artifact"));
}

#[tokio::test]
async fn invalid_request_fails_before_running_anything() {
    let (facade, calls) = facade(success(), true);
    let mut request = common::request();
    request.origin.repository.repository_url.clear();

    let err = facade
        .submit_and_wait(&common::credentials(), &request)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), None);
    assert_eq!(
        err.to_string(),
        "Signing operation failed: Invalid input: origin repository URL is required"
    );
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn download_binds_both_ids() {
    let (facade, calls) = facade(ExecutionResult::Success { output: String::new() }, true);

    let signed = facade
        .download(&common::credentials(), common::organization_id(), common::request_id())
        .await
        .unwrap();
    assert_eq!(signed.request_id, common::request_id());
    assert_eq!(signed.bytes, b"signed-bytes");

    let call = single_call(&calls);
    assert!(call.text.starts_with("$ErrorActionPreference = 'Stop'; Get-SignedArtifact"));
    assert_eq!(call.value("SIGN_RELAY_ORGANIZATIONID"), Some(common::ORGANIZATION_ID));
    assert_eq!(call.value("SIGN_RELAY_SIGNINGREQUESTID"), Some(common::REQUEST_ID));
    assert_eq!(call.value("SIGN_RELAY_WAITFORCOMPLETIONTIMEOUTINSECONDS"), Some("30"));
}

// ==============================================================================
// Real interpreter, fake signer script
// ==============================================================================

const FAKE_SIGNER: &str = r#"#!/bin/sh
wait=0
while [ $# -gt 0 ]; do
  case "$1" in
    --WaitForCompletion) wait=1; shift ;;
    --InputArtifactPath) input="$2"; shift 2 ;;
    --OutputArtifactPath) output="$2"; shift 2 ;;
    --ArtifactConfigurationSlug) echo "artifact configuration: $2"; shift 2 ;;
    --ApiToken) echo "token: $2"; shift 2 ;;
    --Description) echo "description: $2"; shift 2 ;;
    *) shift 2 ;;
  esac
done
echo "uploading $(basename "$input")"
echo "diagnostic on stderr" >&2
if [ "$wait" = 1 ]; then
  { cat "$input"; printf ' +signature'; } > "$output"
fi
echo "0f4a2b7e-3c1d-4e5f-8a9b-0c1d2e3f4a5b"
"#;

fn script_facade(
    dir: &tempfile::TempDir,
    script: &str,
) -> (ProcessSigningFacade, mpsc::UnboundedReceiver<String>) {
    let path = dir.path().join("fake-signer.sh");
    std::fs::write(&path, script).unwrap();

    let invocation = format!("sh '{}'", path.display());
    let (tx, rx) = mpsc::unbounded_channel();
    let facade = ProcessSigningFacade::new(
        "https://signer.example/Api",
        timeouts(),
        Box::new(InterpreterExecutor::new(Interpreter::posix())),
        ScriptCommands {
            submit: invocation.clone(),
            download: invocation,
        },
        Arc::new(tx),
    );
    (facade, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(line) = rx.try_recv() {
        lines.push(line);
    }
    lines
}

#[tokio::test]
async fn posix_script_signs_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let (facade, mut rx) = script_facade(&dir, FAKE_SIGNER);
    let mut request = common::request();
    request.description = Some("it's \"quoted\" $(echo injected)".to_string());

    let signed = facade
        .submit_and_wait(&common::credentials(), &request)
        .await
        .unwrap();

    assert_eq!(signed.request_id, common::request_id());
    assert_eq!(signed.bytes, b"unsigned +signature");

    let lines = drain(&mut rx);
    assert!(lines.contains(&"token: user-token:trusted-token".to_string()));
    assert!(lines.contains(&"description: it's \"quoted\" $(echo injected)".to_string()));
    assert!(lines.contains(&"uploading app.exe".to_string()));
    assert!(lines.contains(&"diagnostic on stderr".to_string()));
    assert!(!lines.iter().any(|line| line.starts_with("artifact configuration")));
}

#[tokio::test]
async fn posix_script_receives_artifact_configuration_when_present() {
    let dir = tempfile::tempdir().unwrap();
    let (facade, mut rx) = script_facade(&dir, FAKE_SIGNER);
    let mut request = common::request();
    request.artifact_configuration_slug = Some(Slug::new("msi").unwrap());

    let id = facade
        .submit_async(&common::credentials(), &request)
        .await
        .unwrap();
    assert_eq!(id, common::request_id());
    assert!(drain(&mut rx).contains(&"artifact configuration: msi".to_string()));
}

#[tokio::test]
async fn posix_script_failure_keeps_partial_output_in_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let (facade, mut rx) = script_facade(
        &dir,
        "#!/bin/sh\necho 'Signing request was denied'\nexit 4\n",
    );

    let err = facade
        .submit_and_wait(&common::credentials(), &common::request())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(FailureKind::CommandExecution));
    assert_eq!(err.description(), "sh did not complete successfully (exit code 4)");
    assert!(drain(&mut rx).contains(&"Signing request was denied".to_string()));
}
