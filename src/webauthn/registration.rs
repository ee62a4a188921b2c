//! Registration ceremony engine
//!
//! `AwaitingOptions -> OptionsIssued -> Verifying -> {Committed | Rejected}`.
//! The engine holds no state of its own: the pending challenge lives in the
//! challenge store and the result is committed to the credential repository.

use super::cbor::{self, AttestationObject, AttestationStatement, KeyError};
use super::crypto;
use super::encoding;
use super::errors::RegistrationError;
use super::service::{log_transition, CeremonyContext};
use super::types::{
    AuthenticatorSelectionCriteria, CeremonyPurpose, CeremonyState, CoseAlgorithm, Credential,
    CredentialPublicKey, DecodedClientData, PublicKeyCredentialDescriptor,
    PublicKeyCredentialParameters, RegistrationOptions, RegistrationResponse, RelyingPartyEntity,
    UserEntity,
};

const PURPOSE: CeremonyPurpose = CeremonyPurpose::Registration;

pub struct RegistrationEngine {
    context: CeremonyContext,
}

impl RegistrationEngine {
    #[must_use]
    pub fn new(context: CeremonyContext) -> Self {
        Self { context }
    }

    /// Issue a registration challenge and build creation options for `user_identity`
    ///
    /// Any unconsumed registration challenge for the same user is replaced.
    ///
    /// # Errors
    /// Returns [`RegistrationError::Challenge`] if no challenge could be issued.
    pub fn begin_registration(
        &self,
        user_identity: &str,
    ) -> Result<RegistrationOptions, RegistrationError> {
        let settings = &self.context.settings;
        let challenge = self.context.challenges.issue(user_identity, PURPOSE)?;

        // One credential per user; tell the authenticator not to create a
        // second one if it already holds it
        let exclude_credentials = self
            .context
            .credentials
            .get(user_identity)
            .map(|credential| {
                vec![PublicKeyCredentialDescriptor::platform(
                    &credential.credential_id,
                )]
            })
            .unwrap_or_default();

        let options = RegistrationOptions {
            challenge: challenge.encoded(),
            rp: RelyingPartyEntity {
                id: settings.rp_id.clone(),
                name: settings.rp_name.clone(),
            },
            user: UserEntity {
                id: encoding::encode(crypto::generate_user_handle()),
                name: user_identity.to_string(),
                display_name: user_identity.to_string(),
            },
            pub_key_cred_params: CoseAlgorithm::SUPPORTED
                .iter()
                .map(|alg| PublicKeyCredentialParameters {
                    r#type: "public-key".to_string(),
                    alg: alg.id(),
                })
                .collect(),
            timeout: settings.timeout_millis(),
            attestation: "none".to_string(),
            exclude_credentials,
            authenticator_selection: AuthenticatorSelectionCriteria {
                authenticator_attachment: settings.authenticator_attachment.clone(),
                resident_key: "preferred".to_string(),
                user_verification: settings.user_verification,
            },
        };

        log_transition(
            PURPOSE,
            user_identity,
            CeremonyState::AwaitingOptions,
            CeremonyState::OptionsIssued,
        );
        Ok(options)
    }

    /// Verify a registration response and store the new credential for `user_identity`
    ///
    /// Checks run in a fixed order and the first failure rejects the whole
    /// ceremony; nothing is stored unless every check passes.
    ///
    /// # Errors
    /// Returns the [`RegistrationError`] of the first failing check.
    pub fn complete_registration(
        &self,
        user_identity: &str,
        response: &RegistrationResponse,
    ) -> Result<Credential, RegistrationError> {
        self.complete_registration_from(user_identity, None, response)
    }

    /// [`Self::complete_registration`] for a request that arrived from
    /// `request_origin`; the client data must name the same origin
    ///
    /// # Errors
    /// Returns the [`RegistrationError`] of the first failing check.
    pub fn complete_registration_from(
        &self,
        user_identity: &str,
        request_origin: Option<&str>,
        response: &RegistrationResponse,
    ) -> Result<Credential, RegistrationError> {
        log_transition(
            PURPOSE,
            user_identity,
            CeremonyState::OptionsIssued,
            CeremonyState::Verifying,
        );

        match self.verify_and_commit(user_identity, request_origin, response) {
            Ok(credential) => {
                log_transition(
                    PURPOSE,
                    user_identity,
                    CeremonyState::Verifying,
                    CeremonyState::Committed,
                );
                log::info!(
                    "Registered credential {} for {user_identity}",
                    encoding::encode(&credential.credential_id)
                );
                Ok(credential)
            }
            Err(error) => {
                log_transition(
                    PURPOSE,
                    user_identity,
                    CeremonyState::Verifying,
                    CeremonyState::Rejected,
                );
                log::warn!(
                    "Registration rejected for {user_identity}: {} ({error})",
                    error.reason_code()
                );
                Err(error)
            }
        }
    }

    fn verify_and_commit(
        &self,
        user_identity: &str,
        request_origin: Option<&str>,
        response: &RegistrationResponse,
    ) -> Result<Credential, RegistrationError> {
        // 1. Decode
        let client_data = DecodedClientData::decode(&response.response.client_data_json)
            .map_err(RegistrationError::MalformedResponse)?;
        let attestation_bytes = encoding::decode(&response.response.attestation_object)
            .map_err(|_| RegistrationError::MalformedResponse("attestationObject is not base64url"))?;
        let attestation = cbor::parse_attestation_object(&attestation_bytes)
            .map_err(|e| RegistrationError::MalformedResponse(e.0))?;
        let attested = attestation
            .auth_data
            .attested_credential
            .as_ref()
            .ok_or(RegistrationError::MalformedResponse("no attested credential data"))?;
        let raw_id = encoding::decode(&response.raw_id)
            .map_err(|_| RegistrationError::MalformedResponse("rawId is not base64url"))?;
        if raw_id != attested.credential_id {
            return Err(RegistrationError::MalformedResponse(
                "rawId does not match the attested credential ID",
            ));
        }

        // 2. Origin, RP and ceremony type
        self.context.binding.validate_for_request(
            &client_data.parsed,
            &attestation.auth_data.rp_id_hash,
            PURPOSE,
            request_origin,
        )?;

        // 3. One-shot challenge
        self.context
            .challenges
            .consume(user_identity, PURPOSE, &client_data.challenge)?;

        if !self.context.user_checks_pass(&attestation.auth_data) {
            return Err(RegistrationError::UserNotVerified);
        }

        // 4. Attestation statement
        let public_key = attested.public_key.to_public_key();
        verify_attestation(&attestation, &client_data.raw, public_key.as_ref())?;

        // 5. Credential key, supported algorithms and usable material only;
        // a stored key that can never verify would lock the user out
        let public_key = public_key.map_err(key_error)?;
        crypto::check_public_key(&public_key).map_err(RegistrationError::MalformedResponse)?;

        // 6. Commit
        let credential = self.context.credentials.put(
            user_identity,
            attested.credential_id.clone(),
            public_key,
            attestation.auth_data.sign_count,
        )?;
        Ok(credential)
    }
}

/// Check the attestation statement; certificate-chain trust is not evaluated
fn verify_attestation(
    attestation: &AttestationObject,
    client_data_json: &[u8],
    public_key: Result<&CredentialPublicKey, &KeyError>,
) -> Result<(), RegistrationError> {
    match &attestation.statement {
        AttestationStatement::None => Ok(()),
        AttestationStatement::PackedSelf { alg, sig } => {
            let public_key = public_key.map_err(|e| key_error(e.clone()))?;
            if *alg != public_key.algorithm.id() {
                return Err(RegistrationError::AttestationVerificationFailed(
                    "self attestation algorithm differs from the credential key",
                ));
            }
            let message = crypto::signed_message(&attestation.auth_data_bytes, client_data_json);
            crypto::verify_signature(public_key, &message, sig).map_err(|_| {
                RegistrationError::AttestationVerificationFailed("invalid self attestation signature")
            })
        }
        AttestationStatement::Unsupported(fmt) => {
            log::debug!("Unsupported attestation format {fmt}");
            Err(RegistrationError::AttestationVerificationFailed(
                "unsupported attestation format",
            ))
        }
    }
}

fn key_error(error: KeyError) -> RegistrationError {
    match error {
        KeyError::Unsupported(alg) => RegistrationError::InvalidPublicKeyAlgorithm(alg),
        KeyError::Malformed(reason) => RegistrationError::MalformedResponse(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{AttestationMode, SoftAuthenticator, TestFixtures, TEST_ORIGIN};
    use crate::webauthn::errors::{BindingError, ChallengeError};
    use crate::webauthn::types::{PublicKeyMaterial, UserVerification};
    use ciborium::value::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine() -> (RegistrationEngine, CeremonyContext) {
        let context = TestFixtures::ceremony_context();
        (RegistrationEngine::new(context.clone()), context)
    }

    fn register(
        engine: &RegistrationEngine,
        authenticator: &mut SoftAuthenticator,
        user: &str,
    ) -> Result<Credential, RegistrationError> {
        let options = engine.begin_registration(user).unwrap();
        let response = authenticator.create(&options).unwrap();
        engine.complete_registration(user, &response)
    }

    /// Re-encode an attestation object after editing its CBOR map
    fn edit_attestation(
        response: &mut RegistrationResponse,
        edit: impl FnOnce(&mut Vec<(Value, Value)>),
    ) {
        let bytes = encoding::decode(&response.response.attestation_object).unwrap();
        let mut value: Value = ciborium::de::from_reader(bytes.as_slice()).unwrap();
        let Value::Map(entries) = &mut value else {
            panic!("attestation object is not a map");
        };
        edit(entries);
        let mut out = Vec::new();
        ciborium::ser::into_writer(&value, &mut out).unwrap();
        response.response.attestation_object = encoding::encode(out);
    }

    #[test]
    fn test_begin_registration_options() {
        let (engine, context) = engine();
        let options = engine.begin_registration("alice").unwrap();

        assert_eq!(options.rp.id, "localhost");
        assert_eq!(options.user.name, "alice");
        assert_eq!(encoding::decode(&options.user.id).unwrap().len(), 16);
        assert_eq!(encoding::decode(&options.challenge).unwrap().len(), crypto::CHALLENGE_LEN);
        let algs: Vec<i64> = options.pub_key_cred_params.iter().map(|p| p.alg).collect();
        assert_eq!(algs, vec![-7, -257]);
        assert_eq!(options.attestation, "none");
        assert_eq!(
            options.authenticator_selection.user_verification,
            UserVerification::Required
        );
        assert!(options.exclude_credentials.is_empty());
        assert_eq!(context.challenges.pending_count(), 1);
    }

    #[test]
    fn test_registration_round_trip() {
        let (engine, context) = engine();
        let mut authenticator = SoftAuthenticator::new(TEST_ORIGIN);

        let credential = register(&engine, &mut authenticator, "alice").unwrap();
        assert_eq!(credential.owner_identity, "alice");
        assert_eq!(credential.credential_id, authenticator.credential_id());
        assert_eq!(&credential.public_key, authenticator.public_key());
        assert_eq!(context.credentials.get("alice"), Some(credential));
        assert_eq!(context.challenges.pending_count(), 0);
    }

    #[test]
    fn test_packed_self_attestation_is_verified() {
        let (engine, _) = engine();
        let mut authenticator =
            SoftAuthenticator::new(TEST_ORIGIN).with_attestation(AttestationMode::PackedSelf);
        assert!(register(&engine, &mut authenticator, "alice").is_ok());

        let mut other =
            SoftAuthenticator::new(TEST_ORIGIN).with_attestation(AttestationMode::PackedSelf);
        let options = engine.begin_registration("bob").unwrap();
        let mut response = other.create(&options).unwrap();
        edit_attestation(&mut response, |entries| {
            for (key, value) in entries.iter_mut() {
                if key.as_text() == Some("attStmt") {
                    if let Value::Map(stmt) = value {
                        for (k, v) in stmt.iter_mut() {
                            if k.as_text() == Some("sig") {
                                if let Value::Bytes(sig) = v {
                                    let last = sig.len() - 1;
                                    sig[last] ^= 0x01;
                                }
                            }
                        }
                    }
                }
            }
        });
        assert_eq!(
            engine.complete_registration("bob", &response),
            Err(RegistrationError::AttestationVerificationFailed(
                "invalid self attestation signature"
            ))
        );
    }

    #[test]
    fn test_certificate_attestation_is_not_trusted() {
        let (engine, context) = engine();
        let mut authenticator = SoftAuthenticator::new(TEST_ORIGIN);
        let options = engine.begin_registration("alice").unwrap();
        let mut response = authenticator.create(&options).unwrap();
        edit_attestation(&mut response, |entries| {
            for (key, value) in entries.iter_mut() {
                if key.as_text() == Some("fmt") {
                    *value = Value::Text("fido-u2f".into());
                }
                if key.as_text() == Some("attStmt") {
                    *value = Value::Map(vec![(
                        Value::Text("x5c".into()),
                        Value::Array(vec![Value::Bytes(vec![0x30])]),
                    )]);
                }
            }
        });

        assert_eq!(
            engine.complete_registration("alice", &response),
            Err(RegistrationError::AttestationVerificationFailed(
                "unsupported attestation format"
            ))
        );
        assert!(context.credentials.get("alice").is_none());
    }

    #[test]
    fn test_consumed_challenge_cannot_be_reused() {
        let (engine, _) = engine();
        let mut authenticator = SoftAuthenticator::new(TEST_ORIGIN);

        let options = engine.begin_registration("alice").unwrap();
        let first = authenticator.create(&options).unwrap();
        assert!(engine.complete_registration("alice", &first).is_ok());

        engine.begin_registration("alice").unwrap();
        assert_eq!(
            engine.complete_registration("alice", &first),
            Err(RegistrationError::Challenge(ChallengeError::NotFound))
        );
    }

    #[test]
    fn test_second_credential_for_same_user_is_rejected() {
        let (engine, _) = engine();
        register(&engine, &mut SoftAuthenticator::new(TEST_ORIGIN), "alice").unwrap();

        let options = engine.begin_registration("alice").unwrap();
        assert_eq!(options.exclude_credentials.len(), 1);

        let response = SoftAuthenticator::new(TEST_ORIGIN).create(&options).unwrap();
        assert_eq!(
            engine.complete_registration("alice", &response),
            Err(RegistrationError::AlreadyExists)
        );
    }

    #[test]
    fn test_foreign_origin_is_rejected_before_the_challenge_is_used() {
        let (engine, context) = engine();
        let options = engine.begin_registration("alice").unwrap();

        let evil = SoftAuthenticator::new("http://evil.example")
            .create(&options)
            .map(|response| engine.complete_registration("alice", &response));
        assert_eq!(
            evil.unwrap(),
            Err(RegistrationError::Binding(BindingError::OriginMismatch(
                "http://evil.example".to_string()
            )))
        );

        // Binding failures mutate nothing; the legitimate client can still finish
        assert_eq!(context.challenges.pending_count(), 1);
        let response = SoftAuthenticator::new(TEST_ORIGIN).create(&options).unwrap();
        assert!(engine.complete_registration("alice", &response).is_ok());
    }

    #[test]
    fn test_rp_id_and_ceremony_type_binding() {
        let (engine, _) = engine();
        let options = engine.begin_registration("alice").unwrap();

        let response = SoftAuthenticator::new(TEST_ORIGIN)
            .with_rp_id("example.com")
            .create(&options)
            .unwrap();
        assert_eq!(
            engine.complete_registration("alice", &response),
            Err(RegistrationError::Binding(BindingError::RpIdMismatch))
        );

        let response = SoftAuthenticator::new(TEST_ORIGIN)
            .with_client_data_type("webauthn.get")
            .create(&options)
            .unwrap();
        assert!(matches!(
            engine.complete_registration("alice", &response),
            Err(RegistrationError::Binding(BindingError::CeremonyTypeMismatch { .. }))
        ));
    }

    #[test]
    fn test_user_verification_is_required() {
        let (engine, context) = engine();
        let mut authenticator = SoftAuthenticator::new(TEST_ORIGIN).without_user_verification();
        assert_eq!(
            register(&engine, &mut authenticator, "alice"),
            Err(RegistrationError::UserNotVerified)
        );
        assert!(context.credentials.get("alice").is_none());
    }

    #[test]
    fn test_unsupported_key_algorithm() {
        let (engine, _) = engine();
        let mut authenticator = SoftAuthenticator::new(TEST_ORIGIN);
        let options = engine.begin_registration("alice").unwrap();
        let mut response = authenticator.create(&options).unwrap();

        // The ES256 COSE key closes authData: a5 01 02 03 26 ... (77 bytes);
        // rewrite its alg value from ES256 (-7, 0x26) to EdDSA (-8, 0x27)
        edit_attestation(&mut response, |entries| {
            for (key, value) in entries.iter_mut() {
                if key.as_text() == Some("authData") {
                    if let Value::Bytes(auth_data) = value {
                        let at = auth_data.len() - 77 + 4;
                        assert_eq!(auth_data[at], 0x26);
                        auth_data[at] = 0x27;
                    }
                }
            }
        });
        assert_eq!(
            engine.complete_registration("alice", &response),
            Err(RegistrationError::InvalidPublicKeyAlgorithm(-8))
        );
    }

    #[test]
    fn test_unusable_key_material_is_not_committed() {
        let (engine, context) = engine();
        let off_curve = CredentialPublicKey {
            algorithm: CoseAlgorithm::Es256,
            material: PublicKeyMaterial::Ec2 {
                x: vec![1; 32],
                y: vec![2; 32],
            },
        };
        let short_rsa = CredentialPublicKey {
            algorithm: CoseAlgorithm::Rs256,
            material: PublicKeyMaterial::Rsa {
                n: vec![0xC3; 128],
                e: vec![0x01, 0x00, 0x01],
            },
        };

        for key in [off_curve, short_rsa] {
            let mut authenticator = SoftAuthenticator::new(TEST_ORIGIN).with_advertised_key(key);
            assert!(matches!(
                register(&engine, &mut authenticator, "alice"),
                Err(RegistrationError::MalformedResponse(_))
            ));
            assert!(context.credentials.get("alice").is_none());
        }

        // The user's real authenticator can still register
        let mut genuine = SoftAuthenticator::new(TEST_ORIGIN);
        assert!(register(&engine, &mut genuine, "alice").is_ok());
    }

    #[test]
    fn test_malformed_responses() {
        let (engine, context) = engine();
        let options = engine.begin_registration("alice").unwrap();
        let valid = SoftAuthenticator::new(TEST_ORIGIN).create(&options).unwrap();

        let mut response = valid.clone();
        response.response.client_data_json = "%%%".to_string();
        assert!(matches!(
            engine.complete_registration("alice", &response),
            Err(RegistrationError::MalformedResponse(_))
        ));

        let mut response = valid.clone();
        response.response.attestation_object = encoding::encode(b"not cbor");
        assert!(matches!(
            engine.complete_registration("alice", &response),
            Err(RegistrationError::MalformedResponse(_))
        ));

        let mut response = valid.clone();
        response.raw_id = encoding::encode(b"someone else");
        assert_eq!(
            engine.complete_registration("alice", &response),
            Err(RegistrationError::MalformedResponse(
                "rawId does not match the attested credential ID"
            ))
        );

        // None of the above consumed the challenge
        assert_eq!(context.challenges.pending_count(), 1);
        assert!(engine.complete_registration("alice", &valid).is_ok());
    }

    #[test]
    fn test_concurrent_completions_commit_once() {
        let (engine, context) = engine();
        let options = engine.begin_registration("alice").unwrap();
        let response = SoftAuthenticator::new(TEST_ORIGIN).create(&options).unwrap();
        let successes = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    match engine.complete_registration("alice", &response) {
                        Ok(_) => {
                            successes.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(error) => assert_eq!(
                            error,
                            RegistrationError::Challenge(ChallengeError::NotFound)
                        ),
                    }
                });
            }
        });

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert!(context.credentials.get("alice").is_some());
    }
}
