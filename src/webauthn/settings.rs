//! `WebAuthn` relying-party settings
//!
//! These settings are independent of the HTTP layer; the application
//! settings embed them as the `[webauthn]` section.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use url::Url;

use super::errors::ConfigError;
use super::types::UserVerification;

/// Upper bound applied to the configured challenge lifetime (one day)
const MAX_CHALLENGE_TTL_SECONDS: u64 = 86_400;

/// `WebAuthn` settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebAuthnSettings {
    /// Relying Party ID (usually the domain)
    pub rp_id: String,
    /// Relying Party name (displayed to user)
    pub rp_name: String,
    /// Origins allowed to run ceremonies, compared by exact string match
    pub allowed_origins: Vec<String>,
    /// How long an issued challenge stays valid
    pub challenge_ttl_seconds: u64,
    /// Timeout in seconds passed to the browser
    pub timeout_seconds: u64,
    pub user_verification: UserVerification,
    /// Optional authenticator attachment ("platform", "cross-platform")
    pub authenticator_attachment: Option<String>,
}

impl Default for WebAuthnSettings {
    fn default() -> Self {
        Self {
            rp_id: "localhost".to_string(),
            rp_name: "SwingIn App".to_string(),
            allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
                "http://localhost:5174".to_string(),
            ],
            challenge_ttl_seconds: 60,
            timeout_seconds: 60,
            user_verification: UserVerification::Required,
            authenticator_attachment: Some("platform".to_string()),
        }
    }
}

impl WebAuthnSettings {
    /// Check the settings are usable by a relying party
    ///
    /// # Errors
    /// Returns a [`ConfigError`] for an empty RP ID, an empty allow-list, a
    /// zero challenge lifetime, or an allowed origin that is not a bare
    /// `scheme://host[:port]` origin. Plain `http` is only allowed for
    /// loopback hosts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rp_id.trim().is_empty() {
            return Err(ConfigError::EmptyRpId);
        }
        if self.allowed_origins.is_empty() {
            return Err(ConfigError::NoAllowedOrigins);
        }
        if self.challenge_ttl_seconds == 0 {
            return Err(ConfigError::ZeroChallengeTtl);
        }
        for origin in &self.allowed_origins {
            validate_origin(origin)?;
        }
        Ok(())
    }

    /// Challenge lifetime, capped at one day
    #[must_use]
    pub fn challenge_ttl(&self) -> Duration {
        let seconds = self.challenge_ttl_seconds.min(MAX_CHALLENGE_TTL_SECONDS);
        Duration::seconds(i64::try_from(seconds).unwrap_or(0))
    }

    /// Browser-side ceremony timeout in milliseconds
    ///
    /// Never longer than the challenge lifetime, so the browser gives up
    /// before the challenge it is answering expires.
    #[must_use]
    pub fn timeout_millis(&self) -> u32 {
        let seconds = self
            .timeout_seconds
            .min(self.challenge_ttl_seconds.min(MAX_CHALLENGE_TTL_SECONDS));
        u32::try_from(seconds.saturating_mul(1000)).unwrap_or(u32::MAX)
    }
}

fn validate_origin(origin: &str) -> Result<(), ConfigError> {
    let url = Url::parse(origin).map_err(|_| ConfigError::InvalidOrigin(origin.to_string()))?;

    // Origins are compared verbatim, so the configured string must already
    // be in serialized origin form (no path, no trailing slash)
    if url.origin().ascii_serialization() != origin {
        return Err(ConfigError::InvalidOrigin(origin.to_string()));
    }

    match url.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(url.host_str().unwrap_or_default()) => Ok(()),
        _ => Err(ConfigError::InsecureOrigin(origin.to_string())),
    }
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}
