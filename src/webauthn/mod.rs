//! `WebAuthn` relying-party core
//!
//! This module implements the registration and authentication ceremonies
//! independent of any transport: challenge lifecycle, origin/RP binding,
//! attestation and assertion verification, and signature-counter replay
//! protection. Cryptography is delegated to `ring`.

mod authentication;
pub mod binding;
pub mod cbor;
pub mod challenge;
pub mod crypto;
pub mod encoding;
mod errors;
mod registration;
pub mod repository;
mod service;
mod settings;
mod types;

// Re-exports for public use
pub use authentication::AuthenticationEngine;
pub use binding::OriginBindingValidator;
pub use challenge::ChallengeStore;
pub use errors::{
    AuthError, BindingError, ChallengeError, ConfigError, CounterError, RegistrationError,
    RepositoryError,
};
pub use registration::RegistrationEngine;
pub use repository::{counter_advances, CredentialRepository, InMemoryCredentialRepository};
pub use service::{CeremonyContext, RelyingParty};
pub use settings::WebAuthnSettings;
pub use types::*;
