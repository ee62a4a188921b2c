//! Client-side sign-in policy
//!
//! Browsers using this relying party try to sign in first and register a
//! passkey only when that fails. The policy lives here, on the caller's side
//! of the engines: each ceremony runs independently through the public
//! [`RelyingParty`] API and the engines never chain one into the other.

use thiserror::Error;

use crate::webauthn::{
    AuthError, AuthenticationOptions, AuthenticationResponse, Credential, RegistrationError,
    RegistrationOptions, RegistrationResponse, RelyingParty,
};

/// Failures reported by an authenticator before the relying party sees a response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthenticatorError {
    #[error("no credential on this authenticator matches the request")]
    NoMatchingCredential,
    #[error("this authenticator already holds an excluded credential")]
    CredentialExcluded,
    #[error("none of the requested algorithms is supported")]
    UnsupportedAlgorithm,
    #[error("authenticator failure: {0}")]
    Failed(String),
}

/// The platform capability that creates and exercises credentials
/// (`navigator.credentials` in a browser)
pub trait PlatformAuthenticator {
    /// Create a credential for the given creation options
    ///
    /// # Errors
    /// Returns an [`AuthenticatorError`] if no credential was created.
    fn create(
        &mut self,
        options: &RegistrationOptions,
    ) -> Result<RegistrationResponse, AuthenticatorError>;

    /// Produce an assertion for the given request options
    ///
    /// # Errors
    /// Returns an [`AuthenticatorError`] if no assertion was produced.
    fn get(
        &mut self,
        options: &AuthenticationOptions,
    ) -> Result<AuthenticationResponse, AuthenticatorError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInOutcome {
    /// An existing credential was accepted
    SignedIn,
    /// Sign-in was unavailable and a new credential was registered
    Registered(Credential),
}

#[derive(Debug, Error)]
pub enum SignInError {
    #[error("registration failed: {0}")]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Authenticator(#[from] AuthenticatorError),
}

/// Why the sign-in attempt did not succeed
#[derive(Debug, Error)]
enum SignInAttemptError {
    #[error(transparent)]
    RelyingParty(#[from] AuthError),
    #[error(transparent)]
    Authenticator(#[from] AuthenticatorError),
}

/// Sign `username` in, falling back to registration when sign-in fails
///
/// # Errors
/// Returns [`SignInError`] when sign-in failed and registration failed too.
/// A user whose existing credential was rejected cannot register a second
/// one, so that case surfaces as a registration failure.
pub fn sign_in_or_register<A>(
    rp: &RelyingParty,
    authenticator: &mut A,
    username: &str,
) -> Result<SignInOutcome, SignInError>
where
    A: PlatformAuthenticator + ?Sized,
{
    match sign_in(rp, authenticator, username) {
        Ok(()) => return Ok(SignInOutcome::SignedIn),
        Err(reason) => {
            log::debug!("Sign-in unavailable for {username} ({reason}), trying registration");
        }
    }

    let options = rp.begin_registration(username)?;
    let response = authenticator.create(&options)?;
    let credential = rp.complete_registration(username, &response)?;
    Ok(SignInOutcome::Registered(credential))
}

fn sign_in<A>(
    rp: &RelyingParty,
    authenticator: &mut A,
    username: &str,
) -> Result<(), SignInAttemptError>
where
    A: PlatformAuthenticator + ?Sized,
{
    let options = rp.begin_authentication(username)?;
    let response = authenticator.get(&options)?;
    rp.complete_authentication(username, &response)?;
    Ok(())
}
