// src/sys/extract.rs

use uuid::Uuid;
use uuid::fmt::Hyphenated;

use crate::error::OperationError;

/// Interprets the last non-empty line of `output` as the signing-request id.
///
/// Every earlier line is progress chatter and is ignored. Only the hyphenated
/// form is accepted; braced, `urn:uuid:` and bare-hex ids are rejected.
pub fn extract_request_id(output: &str) -> Result<Uuid, OperationError> {
    let last_line = output
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| !line.is_empty());

    match last_line {
        Some(line) if line.len() == Hyphenated::LENGTH => {
            Uuid::try_parse(line).map_err(|_| unexpected(output))
        }
        Some(_) | None => Err(unexpected(output)),
    }
}

fn unexpected(output: &str) -> OperationError {
    OperationError::UnexpectedOutput(format!(
        "Unexpected output from the signing script, did not find a valid signing-request id: '{}'",
        output.trim()
    ))
}
