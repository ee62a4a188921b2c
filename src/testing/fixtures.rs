//! Test fixtures providing pre-built settings and relying parties

use std::sync::Arc;

use crate::settings::RpSettings;
use crate::webauthn::{CeremonyContext, InMemoryCredentialRepository, RelyingParty, WebAuthnSettings};

use super::{TEST_ORIGIN, TEST_RP_ID};

/// Central fixture provider for all test data
pub struct TestFixtures;

impl TestFixtures {
    /// `WebAuthn` settings allowing only [`TEST_ORIGIN`]
    #[must_use]
    pub fn webauthn_settings() -> WebAuthnSettings {
        WebAuthnSettings {
            rp_id: TEST_RP_ID.to_string(),
            allowed_origins: vec![TEST_ORIGIN.to_string()],
            ..WebAuthnSettings::default()
        }
    }

    /// Application settings wrapping [`Self::webauthn_settings`]
    #[must_use]
    pub fn rp_settings() -> RpSettings {
        RpSettings {
            webauthn: Self::webauthn_settings(),
            ..RpSettings::default()
        }
    }

    /// Engine context over a fresh in-memory repository
    #[must_use]
    pub fn ceremony_context() -> CeremonyContext {
        CeremonyContext::new(
            Self::webauthn_settings(),
            Arc::new(InMemoryCredentialRepository::new()),
        )
    }

    /// Relying party over a fresh in-memory repository
    ///
    /// # Panics
    /// Panics if the test settings fail validation.
    #[must_use]
    pub fn relying_party() -> RelyingParty {
        RelyingParty::new(Self::webauthn_settings()).expect("test settings are valid")
    }
}
