//! Origin and relying-party binding checks
//!
//! A response is only acceptable if it was produced for this relying party,
//! from an allow-listed origin, for the ceremony actually being performed.

use std::collections::HashSet;

use super::crypto;
use super::errors::BindingError;
use super::types::{CeremonyPurpose, CollectedClientData};

#[derive(Debug, Clone)]
pub struct OriginBindingValidator {
    rp_id_hash: [u8; 32],
    allowed_origins: HashSet<String>,
}

impl OriginBindingValidator {
    #[must_use]
    pub fn new<I, S>(rp_id: &str, allowed_origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rp_id_hash: crypto::sha256(rp_id.as_bytes()),
            allowed_origins: allowed_origins.into_iter().map(Into::into).collect(),
        }
    }

    /// Exact string membership; no prefix or suffix matching
    #[must_use]
    pub fn is_allowed_origin(&self, origin: &str) -> bool {
        self.allowed_origins.contains(origin)
    }

    /// Check origin, RP ID hash and ceremony type, in that order
    ///
    /// # Errors
    /// Returns the [`BindingError`] for the first check that fails.
    pub fn validate(
        &self,
        client_data: &CollectedClientData,
        rp_id_hash: &[u8; 32],
        ceremony: CeremonyPurpose,
    ) -> Result<(), BindingError> {
        self.validate_for_request(client_data, rp_id_hash, ceremony, None)
    }

    /// Like [`Self::validate`], and when the transport saw the request's
    /// origin, the client data must name that same origin
    ///
    /// # Errors
    /// Returns the [`BindingError`] for the first check that fails.
    pub fn validate_for_request(
        &self,
        client_data: &CollectedClientData,
        rp_id_hash: &[u8; 32],
        ceremony: CeremonyPurpose,
        request_origin: Option<&str>,
    ) -> Result<(), BindingError> {
        if !self.is_allowed_origin(&client_data.origin) {
            return Err(BindingError::OriginMismatch(client_data.origin.clone()));
        }
        if request_origin.is_some_and(|origin| origin != client_data.origin) {
            return Err(BindingError::OriginMismatch(client_data.origin.clone()));
        }

        if rp_id_hash != &self.rp_id_hash {
            return Err(BindingError::RpIdMismatch);
        }

        let expected = ceremony.client_data_type();
        if client_data.r#type != expected {
            return Err(BindingError::CeremonyTypeMismatch {
                expected,
                found: client_data.r#type.clone(),
            });
        }

        Ok(())
    }
}
