// src/config.rs

use std::env;
use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_API_URL: &str = "https://app.signpath.io/Api";

const DEFAULT_SERVICE_UNAVAILABLE_SECS: u64 = 600;
const DEFAULT_UPLOAD_DOWNLOAD_SECS: u64 = 300;
const DEFAULT_WAIT_FOR_COMPLETION_SECS: u64 = 600;
const DEFAULT_PROCESS_SECS: u64 = 1800;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

// ==============================================================================
// 1. Timeout Budget
// ==============================================================================

/// The four phase timeouts of a signing workflow.
///
/// Only constructible through [`ApiConfiguration::new`], so a value of this type
/// always satisfies `process > service_unavailable + upload_download + wait_for_completion`.
/// The interpreter performs the three inner phases one after another and must be
/// given strictly more wall-clock time than their sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiConfiguration {
    service_unavailable: Duration,
    upload_download: Duration,
    wait_for_completion: Duration,
    process: Duration,
}

impl ApiConfiguration {
    /// Validates the timeout budget.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidTimeouts`] if any timeout is zero or the
    /// process timeout does not exceed the sum of the other three.
    pub fn new(
        service_unavailable: Duration,
        upload_download: Duration,
        wait_for_completion: Duration,
        process: Duration,
    ) -> Result<Self, ConfigError> {
        for (name, value) in [
            ("service unavailable", service_unavailable),
            ("upload/download", upload_download),
            ("wait for completion", wait_for_completion),
            ("process", process),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidTimeouts(format!(
                    "{name} timeout must be positive"
                )));
            }
        }

        let others = service_unavailable
            .checked_add(upload_download)
            .and_then(|sum| sum.checked_add(wait_for_completion))
            .ok_or_else(|| {
                ConfigError::InvalidTimeouts("sum of phase timeouts overflows".to_string())
            })?;

        if process <= others {
            return Err(ConfigError::InvalidTimeouts(format!(
                "process timeout ({}) must be greater than the sum of the other timeouts ({})",
                format_duration(process),
                format_duration(others)
            )));
        }

        Ok(Self {
            service_unavailable,
            upload_download,
            wait_for_completion,
            process,
        })
    }

    /// Same as [`ApiConfiguration::new`] with whole seconds.
    ///
    /// # Errors
    /// See [`ApiConfiguration::new`].
    pub fn from_secs(
        service_unavailable: u64,
        upload_download: u64,
        wait_for_completion: u64,
        process: u64,
    ) -> Result<Self, ConfigError> {
        Self::new(
            Duration::from_secs(service_unavailable),
            Duration::from_secs(upload_download),
            Duration::from_secs(wait_for_completion),
            Duration::from_secs(process),
        )
    }

    pub fn service_unavailable(&self) -> Duration {
        self.service_unavailable
    }

    pub fn upload_download(&self) -> Duration {
        self.upload_download
    }

    pub fn wait_for_completion(&self) -> Duration {
        self.wait_for_completion
    }

    pub fn process(&self) -> Duration {
        self.process
    }
}

impl Default for ApiConfiguration {
    fn default() -> Self {
        Self {
            service_unavailable: Duration::from_secs(DEFAULT_SERVICE_UNAVAILABLE_SECS),
            upload_download: Duration::from_secs(DEFAULT_UPLOAD_DOWNLOAD_SECS),
            wait_for_completion: Duration::from_secs(DEFAULT_WAIT_FOR_COMPLETION_SECS),
            process: Duration::from_secs(DEFAULT_PROCESS_SECS),
        }
    }
}

/// Renders a duration as whole seconds when it has no fractional part, milliseconds otherwise.
pub fn format_duration(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        format!("{} seconds", duration.as_secs())
    } else {
        format!("{} milliseconds", duration.as_millis())
    }
}

// ==============================================================================
// 2. Relay Settings (Environment)
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Drive the signing module through a local interpreter.
    Process,
    /// Talk to the signing service REST API directly.
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Process => f.write_str("process"),
            TransportKind::Http => f.write_str("http"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub api_url: String,
    pub transport: TransportKind,
    pub interpreter: String,
    pub timeouts: ApiConfiguration,
    pub poll_interval: Duration,

    // Identifiers handed to the secret store, never the tokens themselves.
    pub user_token_id: String,
    pub trusted_token_id: String,
}

impl RelayConfig {
    /// Reads the relay settings from the process environment.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] for malformed numbers, an unknown transport, or an
    /// inconsistent timeout budget.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(|key| env::var(key).ok())
    }

    /// Reads the relay settings through an arbitrary lookup.
    ///
    /// # Errors
    /// See [`RelayConfig::load`].
    pub fn load_from<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let seconds = |key: &str, default: u64| -> Result<u64, ConfigError> {
            match lookup(key) {
                None => Ok(default),
                Some(raw) => raw.trim().parse::<u64>().map_err(|_| ConfigError::InvalidSetting {
                    name: key.to_string(),
                    reason: format!("'{raw}' is not a whole number of seconds"),
                }),
            }
        };

        let transport = match lookup("SIGN_RELAY_TRANSPORT").as_deref().map(str::trim) {
            None | Some("process") => TransportKind::Process,
            Some("http") => TransportKind::Http,
            Some(other) => {
                return Err(ConfigError::InvalidSetting {
                    name: "SIGN_RELAY_TRANSPORT".to_string(),
                    reason: format!("unknown transport '{other}', expected 'process' or 'http'"),
                });
            }
        };

        // 🛡️ Fail closed: the budget is checked here, before any facade exists.
        let timeouts = ApiConfiguration::from_secs(
            seconds("SIGN_RELAY_SERVICE_UNAVAILABLE_TIMEOUT", DEFAULT_SERVICE_UNAVAILABLE_SECS)?,
            seconds("SIGN_RELAY_UPLOAD_DOWNLOAD_TIMEOUT", DEFAULT_UPLOAD_DOWNLOAD_SECS)?,
            seconds("SIGN_RELAY_WAIT_FOR_COMPLETION_TIMEOUT", DEFAULT_WAIT_FOR_COMPLETION_SECS)?,
            seconds("SIGN_RELAY_PROCESS_TIMEOUT", DEFAULT_PROCESS_SECS)?,
        )?;

        let poll_interval = seconds("SIGN_RELAY_POLL_INTERVAL", DEFAULT_POLL_INTERVAL_SECS)?;
        if poll_interval == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "SIGN_RELAY_POLL_INTERVAL".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            api_url: lookup("SIGN_RELAY_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            transport,
            interpreter: lookup("SIGN_RELAY_INTERPRETER").unwrap_or_else(|| "pwsh".to_string()),
            timeouts,
            poll_interval: Duration::from_secs(poll_interval),
            user_token_id: lookup("SIGN_RELAY_USER_TOKEN_ID")
                .unwrap_or_else(|| "SIGN_RELAY_USER_TOKEN".to_string()),
            trusted_token_id: lookup("SIGN_RELAY_TRUSTED_TOKEN_ID")
                .unwrap_or_else(|| "SIGN_RELAY_TRUSTED_TOKEN".to_string()),
        })
    }
}
