//! `WebAuthn` relying-party service
//!
//! [`RelyingParty`] wires the challenge store, credential repository and
//! binding validator into the two ceremony engines and is the only type the
//! transport layer talks to.

use std::sync::Arc;

use super::authentication::AuthenticationEngine;
use super::binding::OriginBindingValidator;
use super::cbor::AuthenticatorData;
use super::challenge::ChallengeStore;
use super::errors::{AuthError, ConfigError, RegistrationError};
use super::registration::RegistrationEngine;
use super::repository::{CredentialRepository, InMemoryCredentialRepository};
use super::settings::WebAuthnSettings;
use super::types::{
    AuthenticationOptions, AuthenticationResponse, CeremonyPurpose, CeremonyState, Credential,
    RegistrationOptions, RegistrationResponse, UserVerification,
};

/// Shared state the ceremony engines orchestrate
#[derive(Clone)]
pub struct CeremonyContext {
    pub settings: Arc<WebAuthnSettings>,
    pub challenges: Arc<ChallengeStore>,
    pub credentials: Arc<dyn CredentialRepository>,
    pub binding: Arc<OriginBindingValidator>,
}

impl CeremonyContext {
    #[must_use]
    pub fn new(settings: WebAuthnSettings, credentials: Arc<dyn CredentialRepository>) -> Self {
        let binding = OriginBindingValidator::new(&settings.rp_id, settings.allowed_origins.clone());
        Self {
            challenges: Arc::new(ChallengeStore::new(settings.challenge_ttl())),
            binding: Arc::new(binding),
            settings: Arc::new(settings),
            credentials,
        }
    }

    /// User presence is always required; verification when configured as required
    #[must_use]
    pub fn user_checks_pass(&self, auth_data: &AuthenticatorData) -> bool {
        auth_data.user_present()
            && (self.settings.user_verification != UserVerification::Required
                || auth_data.user_verified())
    }
}

pub(crate) fn log_transition(
    purpose: CeremonyPurpose,
    identity: &str,
    from: CeremonyState,
    to: CeremonyState,
) {
    log::debug!("{purpose} ceremony for {identity}: {from:?} -> {to:?}");
}

/// `WebAuthn` relying party
pub struct RelyingParty {
    context: CeremonyContext,
    registration: RegistrationEngine,
    authentication: AuthenticationEngine,
}

impl RelyingParty {
    /// Create a relying party backed by the in-memory credential repository
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the settings do not validate.
    pub fn new(settings: WebAuthnSettings) -> Result<Self, ConfigError> {
        Self::with_repository(settings, Arc::new(InMemoryCredentialRepository::new()))
    }

    /// Create a relying party over an existing credential repository
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the settings do not validate.
    pub fn with_repository(
        settings: WebAuthnSettings,
        credentials: Arc<dyn CredentialRepository>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        let context = CeremonyContext::new(settings, credentials);
        Ok(Self {
            registration: RegistrationEngine::new(context.clone()),
            authentication: AuthenticationEngine::new(context.clone()),
            context,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &WebAuthnSettings {
        &self.context.settings
    }

    /// Whether `origin` is on the configured allow-list
    #[must_use]
    pub fn is_allowed_origin(&self, origin: &str) -> bool {
        self.context.binding.is_allowed_origin(origin)
    }

    /// The credential registered to `user_identity`, if any
    #[must_use]
    pub fn credential(&self, user_identity: &str) -> Option<Credential> {
        self.context.credentials.get(user_identity)
    }

    /// Challenges issued and not yet consumed or swept
    #[must_use]
    pub fn pending_challenges(&self) -> usize {
        self.context.challenges.pending_count()
    }

    /// Drop challenges that expired without being consumed
    pub fn purge_expired_challenges(&self) {
        self.context.challenges.purge_expired();
    }

    /// See [`RegistrationEngine::begin_registration`]
    ///
    /// # Errors
    /// Fails only if no challenge could be issued.
    pub fn begin_registration(
        &self,
        user_identity: &str,
    ) -> Result<RegistrationOptions, RegistrationError> {
        self.registration.begin_registration(user_identity)
    }

    /// See [`RegistrationEngine::complete_registration`]
    ///
    /// # Errors
    /// Returns the [`RegistrationError`] of the first failing check.
    pub fn complete_registration(
        &self,
        user_identity: &str,
        response: &RegistrationResponse,
    ) -> Result<Credential, RegistrationError> {
        self.registration.complete_registration(user_identity, response)
    }

    /// See [`RegistrationEngine::complete_registration_from`]
    ///
    /// # Errors
    /// Returns the [`RegistrationError`] of the first failing check.
    pub fn complete_registration_from(
        &self,
        user_identity: &str,
        request_origin: &str,
        response: &RegistrationResponse,
    ) -> Result<Credential, RegistrationError> {
        self.registration
            .complete_registration_from(user_identity, Some(request_origin), response)
    }

    /// See [`AuthenticationEngine::begin_authentication`]
    ///
    /// # Errors
    /// Returns [`AuthError::NoCredentialRegistered`] for users without a credential.
    pub fn begin_authentication(
        &self,
        user_identity: &str,
    ) -> Result<AuthenticationOptions, AuthError> {
        self.authentication.begin_authentication(user_identity)
    }

    /// See [`AuthenticationEngine::complete_authentication`]
    ///
    /// # Errors
    /// Returns the [`AuthError`] of the first failing check.
    pub fn complete_authentication(
        &self,
        user_identity: &str,
        response: &AuthenticationResponse,
    ) -> Result<(), AuthError> {
        self.authentication.complete_authentication(user_identity, response)
    }

    /// See [`AuthenticationEngine::complete_authentication_from`]
    ///
    /// # Errors
    /// Returns the [`AuthError`] of the first failing check.
    pub fn complete_authentication_from(
        &self,
        user_identity: &str,
        request_origin: &str,
        response: &AuthenticationResponse,
    ) -> Result<(), AuthError> {
        self.authentication
            .complete_authentication_from(user_identity, Some(request_origin), response)
    }
}

impl std::fmt::Debug for RelyingParty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelyingParty")
            .field("rp_id", &self.context.settings.rp_id)
            .field("challenges", &self.context.challenges)
            .finish_non_exhaustive()
    }
}
