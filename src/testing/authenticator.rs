//! Software platform authenticator
//!
//! Holds one ES256 credential and answers creation and request options the
//! way a browser plus platform authenticator would, producing wire-format
//! responses. Builder methods bend its behaviour for negative tests.

use ciborium::value::{Integer, Value};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};

use crate::sequencing::{AuthenticatorError, PlatformAuthenticator};
use crate::webauthn::cbor::{self, FLAG_AT, FLAG_UP, FLAG_UV};
use crate::webauthn::{
    crypto, encoding, AuthenticationOptions, AuthenticationResponse,
    AuthenticatorAssertionResponse, AuthenticatorAttestationResponse, CollectedClientData,
    CoseAlgorithm, CredentialPublicKey, PublicKeyMaterial, RegistrationOptions,
    RegistrationResponse,
};

const CREDENTIAL_ID_LEN: u16 = 32;

/// Attestation statement attached to created credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationMode {
    /// `fmt: "none"` with an empty statement
    None,
    /// `fmt: "packed"` signed by the credential key itself
    PackedSelf,
}

#[derive(Debug)]
pub struct SoftAuthenticator {
    key_pair: EcdsaKeyPair,
    public_key: CredentialPublicKey,
    advertised_key: Option<CredentialPublicKey>,
    credential_id: Vec<u8>,
    origin: String,
    rp_id: Option<String>,
    client_data_type: Option<String>,
    sign_count: u32,
    counter_step: u32,
    attestation: AttestationMode,
    user_verified: bool,
}

impl SoftAuthenticator {
    /// New authenticator whose client reports `origin`
    ///
    /// # Panics
    /// Panics if the system random source fails.
    #[must_use]
    pub fn new(origin: &str) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .expect("generate P-256 key");
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
            .expect("load generated P-256 key");

        // Uncompressed SEC1 point: 0x04 || x || y
        let point = key_pair.public_key().as_ref();
        let public_key = CredentialPublicKey {
            algorithm: CoseAlgorithm::Es256,
            material: PublicKeyMaterial::Ec2 {
                x: point[1..33].to_vec(),
                y: point[33..65].to_vec(),
            },
        };

        Self {
            key_pair,
            public_key,
            advertised_key: None,
            credential_id: crypto::random_bytes(usize::from(CREDENTIAL_ID_LEN))
                .expect("random credential ID"),
            origin: origin.to_string(),
            rp_id: None,
            client_data_type: None,
            sign_count: 0,
            counter_step: 1,
            attestation: AttestationMode::None,
            user_verified: true,
        }
    }

    /// Report a different origin in client data
    #[must_use]
    pub fn with_origin(mut self, origin: &str) -> Self {
        self.origin = origin.to_string();
        self
    }

    /// Scope credentials to this RP ID instead of the one in the options
    #[must_use]
    pub fn with_rp_id(mut self, rp_id: &str) -> Self {
        self.rp_id = Some(rp_id.to_string());
        self
    }

    /// Put this `type` in client data regardless of the ceremony
    #[must_use]
    pub fn with_client_data_type(mut self, client_data_type: &str) -> Self {
        self.client_data_type = Some(client_data_type.to_string());
        self
    }

    /// Advertise this public key in attested credential data instead of
    /// the one the authenticator signs with
    #[must_use]
    pub fn with_advertised_key(mut self, key: CredentialPublicKey) -> Self {
        self.advertised_key = Some(key);
        self
    }

    #[must_use]
    pub fn with_attestation(mut self, attestation: AttestationMode) -> Self {
        self.attestation = attestation;
        self
    }

    #[must_use]
    pub fn with_sign_count(mut self, sign_count: u32) -> Self {
        self.sign_count = sign_count;
        self
    }

    /// Amount the counter grows per assertion; zero mimics authenticators
    /// without a counter
    #[must_use]
    pub fn with_counter_step(mut self, step: u32) -> Self {
        self.counter_step = step;
        self
    }

    /// Report user presence without user verification
    #[must_use]
    pub fn without_user_verification(mut self) -> Self {
        self.user_verified = false;
        self
    }

    pub fn set_sign_count(&mut self, sign_count: u32) {
        self.sign_count = sign_count;
    }

    #[must_use]
    pub fn credential_id(&self) -> &[u8] {
        &self.credential_id
    }

    #[must_use]
    pub fn public_key(&self) -> &CredentialPublicKey {
        &self.public_key
    }

    /// Answer `navigator.credentials.create()`
    ///
    /// # Errors
    /// Fails if ES256 is not offered, this credential is excluded, or
    /// encoding or signing fails.
    pub fn create(
        &mut self,
        options: &RegistrationOptions,
    ) -> Result<RegistrationResponse, AuthenticatorError> {
        let es256 = CoseAlgorithm::Es256.id();
        if !options.pub_key_cred_params.iter().any(|p| p.alg == es256) {
            return Err(AuthenticatorError::UnsupportedAlgorithm);
        }
        let own_id = encoding::encode(&self.credential_id);
        if options.exclude_credentials.iter().any(|d| d.id == own_id) {
            return Err(AuthenticatorError::CredentialExcluded);
        }

        let rp_id = self.rp_id.clone().unwrap_or_else(|| options.rp.id.clone());
        let client_data = self.client_data("webauthn.create", &options.challenge)?;
        let advertised = self.advertised_key.as_ref().unwrap_or(&self.public_key);
        let cose_key = cbor::encode_cose_key(advertised)
            .map_err(|e| AuthenticatorError::Failed(e.to_string()))?;
        let auth_data = self.authenticator_data(&rp_id, Some(&cose_key));

        let att_stmt = match self.attestation {
            AttestationMode::None => Vec::new(),
            AttestationMode::PackedSelf => vec![
                (Value::Text("alg".into()), Value::Integer(Integer::from(es256))),
                (
                    Value::Text("sig".into()),
                    Value::Bytes(self.sign(&auth_data, &client_data)?),
                ),
            ],
        };
        let fmt = match self.attestation {
            AttestationMode::None => "none",
            AttestationMode::PackedSelf => "packed",
        };
        let object = Value::Map(vec![
            (Value::Text("fmt".into()), Value::Text(fmt.into())),
            (Value::Text("attStmt".into()), Value::Map(att_stmt)),
            (Value::Text("authData".into()), Value::Bytes(auth_data)),
        ]);
        let mut attestation_object = Vec::new();
        ciborium::ser::into_writer(&object, &mut attestation_object)
            .map_err(|e| AuthenticatorError::Failed(e.to_string()))?;

        Ok(RegistrationResponse {
            id: own_id.clone(),
            raw_id: own_id,
            response: AuthenticatorAttestationResponse {
                client_data_json: encoding::encode(&client_data),
                attestation_object: encoding::encode(&attestation_object),
            },
            r#type: "public-key".to_string(),
        })
    }

    /// Answer `navigator.credentials.get()`, advancing the counter first
    ///
    /// # Errors
    /// Fails with [`AuthenticatorError::NoMatchingCredential`] unless the
    /// options allow this authenticator's credential.
    pub fn get(
        &mut self,
        options: &AuthenticationOptions,
    ) -> Result<AuthenticationResponse, AuthenticatorError> {
        let own_id = encoding::encode(&self.credential_id);
        if !options.allow_credentials.iter().any(|d| d.id == own_id) {
            return Err(AuthenticatorError::NoMatchingCredential);
        }

        self.sign_count = self.sign_count.saturating_add(self.counter_step);
        let rp_id = self.rp_id.clone().unwrap_or_else(|| options.rp_id.clone());
        let client_data = self.client_data("webauthn.get", &options.challenge)?;
        let auth_data = self.authenticator_data(&rp_id, None);
        let signature = self.sign(&auth_data, &client_data)?;

        Ok(AuthenticationResponse {
            id: own_id.clone(),
            raw_id: own_id,
            response: AuthenticatorAssertionResponse {
                client_data_json: encoding::encode(&client_data),
                authenticator_data: encoding::encode(&auth_data),
                signature: encoding::encode(&signature),
                user_handle: None,
            },
            r#type: "public-key".to_string(),
        })
    }

    fn client_data(&self, ceremony: &str, challenge: &str) -> Result<Vec<u8>, AuthenticatorError> {
        let client_data = CollectedClientData {
            r#type: self
                .client_data_type
                .clone()
                .unwrap_or_else(|| ceremony.to_string()),
            challenge: challenge.to_string(),
            origin: self.origin.clone(),
            cross_origin: Some(false),
        };
        serde_json::to_vec(&client_data).map_err(|e| AuthenticatorError::Failed(e.to_string()))
    }

    fn authenticator_data(&self, rp_id: &str, cose_key: Option<&[u8]>) -> Vec<u8> {
        let mut flags = FLAG_UP;
        if self.user_verified {
            flags |= FLAG_UV;
        }
        if cose_key.is_some() {
            flags |= FLAG_AT;
        }

        let mut data = crypto::sha256(rp_id.as_bytes()).to_vec();
        data.push(flags);
        data.extend_from_slice(&self.sign_count.to_be_bytes());
        if let Some(cose_key) = cose_key {
            data.extend_from_slice(&[0u8; 16]); // AAGUID
            data.extend_from_slice(&CREDENTIAL_ID_LEN.to_be_bytes());
            data.extend_from_slice(&self.credential_id);
            data.extend_from_slice(cose_key);
        }
        data
    }

    fn sign(&self, auth_data: &[u8], client_data: &[u8]) -> Result<Vec<u8>, AuthenticatorError> {
        let message = crypto::signed_message(auth_data, client_data);
        self.key_pair
            .sign(&SystemRandom::new(), &message)
            .map(|signature| signature.as_ref().to_vec())
            .map_err(|_| AuthenticatorError::Failed("signing failed".to_string()))
    }
}

impl PlatformAuthenticator for SoftAuthenticator {
    fn create(
        &mut self,
        options: &RegistrationOptions,
    ) -> Result<RegistrationResponse, AuthenticatorError> {
        Self::create(self, options)
    }

    fn get(
        &mut self,
        options: &AuthenticationOptions,
    ) -> Result<AuthenticationResponse, AuthenticatorError> {
        Self::get(self, options)
    }
}
