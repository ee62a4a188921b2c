//! `WebAuthn` core types
//!
//! Data model shared by the challenge store, the credential repository and
//! the ceremony engines, plus the JSON shapes exchanged with the browser.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::encoding;

/// Which ceremony a challenge (or client data) belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CeremonyPurpose {
    Registration,
    Authentication,
}

impl CeremonyPurpose {
    /// The `type` member browsers put in client data for this ceremony
    #[must_use]
    pub fn client_data_type(self) -> &'static str {
        match self {
            Self::Registration => "webauthn.create",
            Self::Authentication => "webauthn.get",
        }
    }
}

impl fmt::Display for CeremonyPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registration => f.write_str("registration"),
            Self::Authentication => f.write_str("authentication"),
        }
    }
}

/// Ceremony progress, shared by both engines
///
/// `AwaitingOptions -> OptionsIssued -> Verifying -> {Committed | Accepted | Rejected}`.
/// `Committed` ends a registration, `Accepted` an authentication. `Rejected`
/// is terminal: the caller must request fresh options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyState {
    AwaitingOptions,
    OptionsIssued,
    Verifying,
    Committed,
    Accepted,
    Rejected,
}

/// A one-time challenge issued for a single ceremony
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub value: Vec<u8>,
    pub purpose: CeremonyPurpose,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Challenge {
    /// Base64URL form sent to the browser and echoed back in client data
    #[must_use]
    pub fn encoded(&self) -> String {
        encoding::encode(&self.value)
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// COSE algorithm identifiers this relying party accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoseAlgorithm {
    /// ECDSA P-256 with SHA-256
    Es256,
    /// RSASSA-PKCS1-v1_5 with SHA-256
    Rs256,
}

impl CoseAlgorithm {
    pub const SUPPORTED: [Self; 2] = [Self::Es256, Self::Rs256];

    #[must_use]
    pub fn id(self) -> i64 {
        match self {
            Self::Es256 => -7,
            Self::Rs256 => -257,
        }
    }

    #[must_use]
    pub fn from_id(id: i64) -> Option<Self> {
        Self::SUPPORTED.into_iter().find(|alg| alg.id() == id)
    }
}

/// Raw key components, as carried in the COSE key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublicKeyMaterial {
    /// P-256 affine coordinates
    Ec2 { x: Vec<u8>, y: Vec<u8> },
    /// RSA modulus and public exponent, big-endian
    Rsa { n: Vec<u8>, e: Vec<u8> },
}

/// A credential public key; only ever used to verify signatures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPublicKey {
    pub algorithm: CoseAlgorithm,
    pub material: PublicKeyMaterial,
}

/// A registered credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub credential_id: Vec<u8>,
    pub owner_identity: String,
    pub public_key: CredentialPublicKey,
    pub signature_counter: u32,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

/// User verification requirement passed to the authenticator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerification {
    #[default]
    Required,
    Preferred,
    Discouraged,
}

/// `PublicKeyCredentialCreationOptions` sent to the client
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOptions {
    pub challenge: String, // Base64URL-encoded random challenge
    pub rp: RelyingPartyEntity,
    pub user: UserEntity,
    pub pub_key_cred_params: Vec<PublicKeyCredentialParameters>,
    pub timeout: u32, // Milliseconds
    pub attestation: String,
    pub exclude_credentials: Vec<PublicKeyCredentialDescriptor>,
    pub authenticator_selection: AuthenticatorSelectionCriteria,
}

/// `PublicKeyCredentialRequestOptions` sent to the client
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationOptions {
    pub challenge: String,
    pub timeout: u32,
    pub rp_id: String,
    pub allow_credentials: Vec<PublicKeyCredentialDescriptor>,
    pub user_verification: UserVerification,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RelyingPartyEntity {
    pub id: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    pub id: String, // Base64URL-encoded user handle
    pub name: String,
    pub display_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PublicKeyCredentialParameters {
    pub r#type: String, // Always "public-key"
    pub alg: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelectionCriteria {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticator_attachment: Option<String>,
    pub resident_key: String,
    pub user_verification: UserVerification,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PublicKeyCredentialDescriptor {
    pub r#type: String,
    pub id: String, // Base64URL-encoded credential ID
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transports: Vec<String>,
}

impl PublicKeyCredentialDescriptor {
    /// Descriptor for a platform credential held on this device
    #[must_use]
    pub fn platform(credential_id: &[u8]) -> Self {
        Self {
            r#type: "public-key".to_string(),
            id: encoding::encode(credential_id),
            transports: vec!["internal".to_string()],
        }
    }
}

/// Registration response from the browser (`navigator.credentials.create`)
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub id: String,
    pub raw_id: String,
    pub response: AuthenticatorAttestationResponse,
    pub r#type: String,
}

/// Authentication response from the browser (`navigator.credentials.get`)
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResponse {
    pub id: String,
    pub raw_id: String,
    pub response: AuthenticatorAssertionResponse,
    pub r#type: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorAttestationResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    pub attestation_object: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorAssertionResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    pub authenticator_data: String,
    pub signature: String,
    #[serde(default)]
    pub user_handle: Option<String>,
}

/// Parsed `clientDataJSON`
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CollectedClientData {
    pub r#type: String,
    pub challenge: String,
    pub origin: String,
    #[serde(default)]
    pub cross_origin: Option<bool>,
}

impl CollectedClientData {
    /// Parse the raw client data bytes
    ///
    /// # Errors
    /// Returns an error if the bytes are not a JSON object with string
    /// `type`, `challenge` and `origin` members.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Client data as received: the raw bytes signatures cover, the parsed
/// members, and the challenge decoded back to bytes
#[derive(Debug, Clone)]
pub struct DecodedClientData {
    pub raw: Vec<u8>,
    pub parsed: CollectedClientData,
    pub challenge: Vec<u8>,
}

impl DecodedClientData {
    /// Decode the base64url `clientDataJSON` field of a response
    ///
    /// # Errors
    /// Returns a short description of the first decoding step that failed.
    pub fn decode(client_data_json: &str) -> Result<Self, &'static str> {
        let raw = encoding::decode(client_data_json).map_err(|_| "clientDataJSON is not base64url")?;
        let parsed = CollectedClientData::from_slice(&raw)
            .map_err(|_| "clientDataJSON is not a client data object")?;
        let challenge = encoding::decode(&parsed.challenge)
            .map_err(|_| "client data challenge is not base64url")?;
        Ok(Self {
            raw,
            parsed,
            challenge,
        })
    }
}
