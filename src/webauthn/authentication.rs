//! Authentication ceremony engine
//!
//! Mirrors registration: `AwaitingOptions -> OptionsIssued -> Verifying ->
//! {Accepted | Rejected}`. The counter is advanced only after the signature
//! verifies, and a counter that fails to advance rejects the assertion.

use super::cbor;
use super::crypto;
use super::encoding;
use super::errors::AuthError;
use super::service::{log_transition, CeremonyContext};
use super::types::{
    AuthenticationOptions, AuthenticationResponse, CeremonyPurpose, CeremonyState,
    DecodedClientData, PublicKeyCredentialDescriptor,
};

const PURPOSE: CeremonyPurpose = CeremonyPurpose::Authentication;

pub struct AuthenticationEngine {
    context: CeremonyContext,
}

impl AuthenticationEngine {
    #[must_use]
    pub fn new(context: CeremonyContext) -> Self {
        Self { context }
    }

    /// Issue an authentication challenge naming the user's credential
    ///
    /// # Errors
    /// - [`AuthError::NoCredentialRegistered`] if `user_identity` has no credential
    /// - [`AuthError::Challenge`] if no challenge could be issued
    pub fn begin_authentication(
        &self,
        user_identity: &str,
    ) -> Result<AuthenticationOptions, AuthError> {
        let Some(credential) = self.context.credentials.get(user_identity) else {
            log::debug!("No credential registered for {user_identity}");
            return Err(AuthError::NoCredentialRegistered);
        };

        let challenge = self.context.challenges.issue(user_identity, PURPOSE)?;
        let settings = &self.context.settings;
        let options = AuthenticationOptions {
            challenge: challenge.encoded(),
            timeout: settings.timeout_millis(),
            rp_id: settings.rp_id.clone(),
            allow_credentials: vec![PublicKeyCredentialDescriptor::platform(
                &credential.credential_id,
            )],
            user_verification: settings.user_verification,
        };

        log_transition(
            PURPOSE,
            user_identity,
            CeremonyState::AwaitingOptions,
            CeremonyState::OptionsIssued,
        );
        Ok(options)
    }

    /// Verify an assertion from `user_identity` and advance the credential counter
    ///
    /// # Errors
    /// Returns the [`AuthError`] of the first failing check. The stored
    /// counter is untouched unless every check passes.
    pub fn complete_authentication(
        &self,
        user_identity: &str,
        response: &AuthenticationResponse,
    ) -> Result<(), AuthError> {
        self.complete_authentication_from(user_identity, None, response)
    }

    /// [`Self::complete_authentication`] for a request that arrived from
    /// `request_origin`; the client data must name the same origin
    ///
    /// # Errors
    /// Returns the [`AuthError`] of the first failing check.
    pub fn complete_authentication_from(
        &self,
        user_identity: &str,
        request_origin: Option<&str>,
        response: &AuthenticationResponse,
    ) -> Result<(), AuthError> {
        log_transition(
            PURPOSE,
            user_identity,
            CeremonyState::OptionsIssued,
            CeremonyState::Verifying,
        );

        match self.verify(user_identity, request_origin, response) {
            Ok(()) => {
                log_transition(
                    PURPOSE,
                    user_identity,
                    CeremonyState::Verifying,
                    CeremonyState::Accepted,
                );
                log::info!("Authenticated {user_identity}");
                Ok(())
            }
            Err(error) => {
                log_transition(
                    PURPOSE,
                    user_identity,
                    CeremonyState::Verifying,
                    CeremonyState::Rejected,
                );
                log::warn!(
                    "Authentication rejected for {user_identity}: {} ({error})",
                    error.reason_code()
                );
                Err(error)
            }
        }
    }

    fn verify(
        &self,
        user_identity: &str,
        request_origin: Option<&str>,
        response: &AuthenticationResponse,
    ) -> Result<(), AuthError> {
        // 1. Decode
        let client_data = DecodedClientData::decode(&response.response.client_data_json)
            .map_err(AuthError::MalformedResponse)?;
        let auth_data_bytes = encoding::decode(&response.response.authenticator_data)
            .map_err(|_| AuthError::MalformedResponse("authenticatorData is not base64url"))?;
        let auth_data = cbor::parse_authenticator_data(&auth_data_bytes)
            .map_err(|e| AuthError::MalformedResponse(e.0))?;
        let signature = encoding::decode(&response.response.signature)
            .map_err(|_| AuthError::MalformedResponse("signature is not base64url"))?;
        let credential_id = encoding::decode(&response.raw_id)
            .map_err(|_| AuthError::MalformedResponse("rawId is not base64url"))?;

        // 2. Origin, RP and ceremony type
        self.context.binding.validate_for_request(
            &client_data.parsed,
            &auth_data.rp_id_hash,
            PURPOSE,
            request_origin,
        )?;

        // 3. One-shot challenge
        self.context
            .challenges
            .consume(user_identity, PURPOSE, &client_data.challenge)?;

        // 4. The credential must exist and belong to this user
        let credential = self
            .context
            .credentials
            .find_by_id(&credential_id)
            .filter(|credential| credential.owner_identity == user_identity)
            .ok_or(AuthError::UnknownCredential)?;

        // 5. Signature over authData || SHA-256(clientDataJSON)
        let message = crypto::signed_message(&auth_data_bytes, &client_data.raw);
        crypto::verify_signature(&credential.public_key, &message, &signature)
            .map_err(|_| AuthError::SignatureVerificationFailed)?;

        if !self.context.user_checks_pass(&auth_data) {
            return Err(AuthError::UserNotVerified);
        }

        // 6. Anti-replay
        self.context
            .credentials
            .advance_counter(&credential_id, auth_data.sign_count)?;
        Ok(())
    }
}
