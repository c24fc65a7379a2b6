// src/sys/secrets.rs

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use secrecy::{ExposeSecret, Secret, SecretString};
use zeroize::Zeroizing;

// Redacts credentials in https://[TOKEN]@host or git@[TOKEN]:repo formats.
static URL_CREDENTIALS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(://|git@)([^@/\s]+)@").expect("static credential regex"));

static BEARER_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(bearer\s+)\S+").expect("static bearer regex"));

/// 🛡️ Scrubber for diagnostics that may echo URLs or authorization headers.
pub fn scrub_credentials(input: &str) -> String {
    let scrubbed = URL_CREDENTIALS.replace_all(input, "$1[REDACTED]@");
    BEARER_VALUE.replace_all(&scrubbed, "$1[REDACTED]").into_owned()
}

/// SecretToken is an ephemeral, memory-safe wrapper for an API token.
///
/// 1. It cannot be accidentally logged (`{:?}` prints `[REDACTED]`).
/// 2. When it goes out of scope the heap allocation is zeroized.
pub struct SecretToken {
    token: SecretString,
}

impl SecretToken {
    /// Takes ownership of the plaintext so no second copy is left behind.
    pub fn new(raw_token: String) -> Self {
        Self {
            token: Secret::new(raw_token),
        }
    }

    /// Exposes the token for the duration of `action` only.
    pub fn use_secret<F, R>(&self, action: F) -> R
    where
        F: FnOnce(&str) -> R,
    {
        action(self.token.expose_secret())
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken([REDACTED])")
    }
}

/// The two tokens that authenticate a signing request.
///
/// They are only ever combined at the point of transport authentication, into a
/// fresh secret that the transport owns.
#[derive(Debug)]
pub struct Credentials {
    user_token: SecretToken,
    trusted_token: SecretToken,
}

impl Credentials {
    pub fn new(user_token: SecretToken, trusted_token: SecretToken) -> Self {
        Self {
            user_token,
            trusted_token,
        }
    }

    /// The logical bearer value `<userToken>:<trustedToken>`.
    pub fn bearer(&self) -> SecretString {
        let combined = self.user_token.use_secret(|user| {
            self.trusted_token.use_secret(|trusted| {
                let mut buffer =
                    Zeroizing::new(String::with_capacity(user.len() + trusted.len() + 1));
                buffer.push_str(user);
                buffer.push(':');
                buffer.push_str(trusted);
                buffer
            })
        });
        // Moves a copy into the Secret; the scratch buffer is scrubbed on drop.
        Secret::new(combined.as_str().to_owned())
    }

    /// The `Authorization` header value for HTTP transports.
    pub fn authorization_header(&self) -> SecretString {
        let bearer = self.bearer();
        Secret::new(format!("Bearer {}", bearer.expose_secret()))
    }
}
