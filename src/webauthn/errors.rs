//! `WebAuthn` error types
//!
//! Every ceremony step fails closed: the first failing check aborts the
//! ceremony and is reported through one of these enums. The fine-grained
//! variants are internal diagnostics; transports map them to a generic
//! denial (see [`RegistrationError::reason_code`] and
//! [`AuthError::reason_code`] for the loggable form).

use thiserror::Error;

/// Challenge lifecycle failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChallengeError {
    /// No challenge is pending for this identity and purpose
    #[error("no pending challenge")]
    NotFound,
    /// The presented challenge differs from the pending one
    #[error("challenge mismatch")]
    Mismatch,
    /// The pending challenge was past its validity window
    #[error("challenge expired")]
    Expired,
    /// The system random source failed while issuing a challenge
    #[error("random source unavailable")]
    EntropyUnavailable,
}

/// Origin / relying-party binding failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    #[error("origin {0:?} is not allowed")]
    OriginMismatch(String),
    #[error("relying party ID hash mismatch")]
    RpIdMismatch,
    #[error("ceremony type {found:?} where {expected:?} was expected")]
    CeremonyTypeMismatch {
        expected: &'static str,
        found: String,
    },
}

/// Credential insertion failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("a credential is already registered for this user or credential ID")]
    AlreadyExists,
}

/// Signature counter advancement failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CounterError {
    #[error("signature counter {presented} does not advance past {stored}")]
    ReplaySuspected { stored: u32, presented: u32 },
    #[error("unknown credential")]
    UnknownCredential,
}

/// Registration ceremony failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("malformed registration response: {0}")]
    MalformedResponse(&'static str),
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error(transparent)]
    Challenge(#[from] ChallengeError),
    #[error("authenticator did not verify the user")]
    UserNotVerified,
    #[error("attestation verification failed: {0}")]
    AttestationVerificationFailed(&'static str),
    #[error("unsupported public key algorithm {0}")]
    InvalidPublicKeyAlgorithm(i64),
    #[error("credential already exists")]
    AlreadyExists,
}

impl From<RepositoryError> for RegistrationError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::AlreadyExists => Self::AlreadyExists,
        }
    }
}

impl RegistrationError {
    /// Stable identifier for logs and metrics; never shown to clients
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::MalformedResponse(_) => "malformed_response",
            Self::Binding(e) => e.reason_code(),
            Self::Challenge(e) => e.reason_code(),
            Self::UserNotVerified => "user_not_verified",
            Self::AttestationVerificationFailed(_) => "attestation_verification_failed",
            Self::InvalidPublicKeyAlgorithm(_) => "invalid_public_key_algorithm",
            Self::AlreadyExists => "already_exists",
        }
    }
}

/// Authentication ceremony failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no credential registered for this user")]
    NoCredentialRegistered,
    #[error("malformed authentication response: {0}")]
    MalformedResponse(&'static str),
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error(transparent)]
    Challenge(#[from] ChallengeError),
    #[error("unknown credential")]
    UnknownCredential,
    #[error("signature verification failed")]
    SignatureVerificationFailed,
    #[error("authenticator did not verify the user")]
    UserNotVerified,
    #[error("signature counter did not advance")]
    ReplaySuspected,
}

impl From<CounterError> for AuthError {
    fn from(error: CounterError) -> Self {
        match error {
            CounterError::ReplaySuspected { .. } => Self::ReplaySuspected,
            CounterError::UnknownCredential => Self::UnknownCredential,
        }
    }
}

impl AuthError {
    /// Stable identifier for logs and metrics; never shown to clients
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::NoCredentialRegistered => "no_credential_registered",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Binding(e) => e.reason_code(),
            Self::Challenge(e) => e.reason_code(),
            Self::UnknownCredential => "unknown_credential",
            Self::SignatureVerificationFailed => "signature_verification_failed",
            Self::UserNotVerified => "user_not_verified",
            Self::ReplaySuspected => "replay_suspected",
        }
    }
}

impl ChallengeError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::NotFound => "challenge_not_found",
            Self::Mismatch => "challenge_mismatch",
            Self::Expired => "challenge_expired",
            Self::EntropyUnavailable => "entropy_unavailable",
        }
    }
}

impl BindingError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::OriginMismatch(_) => "origin_mismatch",
            Self::RpIdMismatch => "rp_id_mismatch",
            Self::CeremonyTypeMismatch { .. } => "ceremony_type_mismatch",
        }
    }
}

/// Invalid relying-party configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("relying party ID cannot be empty")]
    EmptyRpId,
    #[error("at least one allowed origin is required")]
    NoAllowedOrigins,
    #[error("allowed origin {0:?} is not a valid URL origin")]
    InvalidOrigin(String),
    #[error("allowed origin {0:?} must be https:// except for localhost")]
    InsecureOrigin(String),
    #[error("challenge TTL must be greater than zero")]
    ZeroChallengeTtl,
}
