//! Shared-secret authentication for webhook requests
//!
//! A gateway is configured with one shared secret. Callers pass it as the
//! `secret` query parameter. An empty secret is an explicit "no
//! authentication" deployment, not a misconfiguration.
//!
//! # Example
//!
//! ```
//! use ghoko_common::auth::AuthGate;
//!
//! let gate = AuthGate::new("s3cr3t");
//! assert!(gate.requires_auth());
//! assert!(gate.validate_secret("s3cr3t"));
//! assert!(!gate.validate_secret("guess"));
//!
//! let open = AuthGate::new("");
//! assert!(!open.requires_auth());
//! ```

use crate::params::Params;
use std::fmt;

/// Name of the query parameter carrying the caller's token.
pub const SECRET_PARAM: &str = "secret";

/// Compares the configured secret against request-supplied tokens.
#[derive(Clone, Debug, Default)]
pub struct AuthGate {
    secret: Option<String>,
}

impl AuthGate {
    /// Creates a gate for `secret`. An empty string disables authentication.
    pub fn new(secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if secret.is_empty() {
            Self::disabled()
        } else {
            Self { secret: Some(secret) }
        }
    }

    /// Creates a gate that lets every request through.
    pub fn disabled() -> Self {
        Self { secret: None }
    }

    pub fn requires_auth(&self) -> bool {
        self.secret.is_some()
    }

    /// The configured secret, or `""` when authentication is disabled.
    ///
    /// This is the value exposed to scripts as the `Secret` binding.
    pub fn secret(&self) -> &str {
        self.secret.as_deref().unwrap_or("")
    }

    /// Checks a raw token. Always `true` when authentication is disabled.
    pub fn validate_secret(&self, provided: &str) -> bool {
        match &self.secret {
            Some(expected) => constant_time_eq(expected, provided),
            None => true,
        }
    }

    /// Checks the `secret` entry of a request's query parameters.
    ///
    /// A missing entry is treated as an empty token.
    pub fn verify(&self, params: &Params) -> bool {
        self.validate_secret(params.get_str(SECRET_PARAM).unwrap_or(""))
    }
}

impl fmt::Display for AuthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.secret {
            Some(_) => write!(f, "Secret(*****)"),
            None => write!(f, "Disabled"),
        }
    }
}

/// Compares two strings without short-circuiting on the first mismatch.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}
