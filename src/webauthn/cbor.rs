//! CBOR processing for `WebAuthn`
//!
//! Parses the binary structures authenticators produce: the attestation
//! object, authenticator data (with its attested credential data) and COSE
//! public keys.

use std::io::Cursor;

use ciborium::value::{Integer, Value};
use thiserror::Error;

use super::types::{CoseAlgorithm, CredentialPublicKey, PublicKeyMaterial};

/// User present
pub const FLAG_UP: u8 = 0x01;
/// User verified
pub const FLAG_UV: u8 = 0x04;
/// Attested credential data included
pub const FLAG_AT: u8 = 0x40;
/// Extension data included
pub const FLAG_ED: u8 = 0x80;

// COSE key labels and values (RFC 9052 / RFC 9053)
const COSE_KTY: i64 = 1;
const COSE_ALG: i64 = 3;
const COSE_KTY_EC2: i64 = 2;
const COSE_KTY_RSA: i64 = 3;
const COSE_EC2_CRV: i64 = -1;
const COSE_EC2_X: i64 = -2;
const COSE_EC2_Y: i64 = -3;
const COSE_CRV_P256: i64 = 1;
const COSE_RSA_N: i64 = -1;
const COSE_RSA_E: i64 = -2;

/// Fixed-size prefix of authenticator data: rpIdHash, flags, signCount
const AUTH_DATA_MIN_LEN: usize = 37;

/// A binary structure could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ParseError(pub &'static str);

/// A COSE key could not be turned into a usable public key
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("unsupported COSE algorithm {0}")]
    Unsupported(i64),
    #[error("malformed COSE key: {0}")]
    Malformed(&'static str),
}

/// Decoded authenticator data
#[derive(Debug, Clone)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub attested_credential: Option<AttestedCredentialData>,
}

impl AuthenticatorData {
    #[must_use]
    pub fn user_present(&self) -> bool {
        self.flags & FLAG_UP != 0
    }

    #[must_use]
    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_UV != 0
    }
}

#[derive(Debug, Clone)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    pub public_key: CoseKey,
}

/// A COSE_Key map with its type and algorithm pulled out
#[derive(Debug, Clone)]
pub struct CoseKey {
    pub kty: i64,
    pub alg: i64,
    params: Vec<(Value, Value)>,
}

/// Attestation statement, classified by what this relying party can check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttestationStatement {
    /// `fmt: "none"`
    None,
    /// `fmt: "packed"` without a certificate chain: signed by the credential key
    PackedSelf { alg: i64, sig: Vec<u8> },
    /// Any statement that needs certificate-chain processing
    Unsupported(String),
}

/// Decoded attestation object
#[derive(Debug, Clone)]
pub struct AttestationObject {
    pub statement: AttestationStatement,
    pub auth_data_bytes: Vec<u8>,
    pub auth_data: AuthenticatorData,
}

/// Parse a CBOR attestation object (`fmt`, `attStmt`, `authData`)
///
/// # Errors
/// Returns a [`ParseError`] if the bytes are not a CBOR map with the three
/// members, if the statement does not fit its format, or if the embedded
/// authenticator data is malformed or lacks attested credential data.
pub fn parse_attestation_object(bytes: &[u8]) -> Result<AttestationObject, ParseError> {
    let attestation: Value = ciborium::de::from_reader(bytes)
        .map_err(|_| ParseError("invalid CBOR attestation object"))?;
    let map = attestation
        .as_map()
        .ok_or(ParseError("attestation object is not a map"))?;

    let fmt = text_member(map, "fmt")
        .and_then(Value::as_text)
        .ok_or(ParseError("missing fmt in attestation object"))?;
    let att_stmt = text_member(map, "attStmt")
        .and_then(Value::as_map)
        .ok_or(ParseError("missing attStmt in attestation object"))?;
    let auth_data_bytes = text_member(map, "authData")
        .and_then(Value::as_bytes)
        .ok_or(ParseError("missing authData in attestation object"))?
        .clone();

    let statement = classify_statement(fmt, att_stmt)?;
    let auth_data = parse_authenticator_data(&auth_data_bytes)?;
    if auth_data.attested_credential.is_none() {
        return Err(ParseError("no attested credential data"));
    }

    Ok(AttestationObject {
        statement,
        auth_data_bytes,
        auth_data,
    })
}

fn classify_statement(
    fmt: &str,
    att_stmt: &[(Value, Value)],
) -> Result<AttestationStatement, ParseError> {
    match fmt {
        "none" if att_stmt.is_empty() => Ok(AttestationStatement::None),
        "none" => Err(ParseError("none attestation with a non-empty statement")),
        "packed" if text_member(att_stmt, "x5c").is_some() => {
            Ok(AttestationStatement::Unsupported("packed (x5c)".to_string()))
        }
        "packed" => {
            let alg = text_member(att_stmt, "alg")
                .and_then(value_as_i64)
                .ok_or(ParseError("packed attestation without alg"))?;
            let sig = text_member(att_stmt, "sig")
                .and_then(Value::as_bytes)
                .ok_or(ParseError("packed attestation without sig"))?
                .clone();
            Ok(AttestationStatement::PackedSelf { alg, sig })
        }
        other => Ok(AttestationStatement::Unsupported(other.to_string())),
    }
}

/// Parse raw authenticator data
///
/// Layout:
/// - 32 bytes: RP ID hash
/// - 1 byte: flags
/// - 4 bytes: signature counter (big-endian)
/// - if AT: 16 bytes AAGUID, 2 bytes credential ID length L, L bytes
///   credential ID, CBOR COSE public key
/// - if ED: CBOR extensions map
///
/// # Errors
/// Returns a [`ParseError`] if the data is truncated, a CBOR item is
/// invalid, or bytes are left over after the flagged sections.
pub fn parse_authenticator_data(bytes: &[u8]) -> Result<AuthenticatorData, ParseError> {
    if bytes.len() < AUTH_DATA_MIN_LEN {
        return Err(ParseError("authenticator data too short"));
    }

    let mut rp_id_hash = [0u8; 32];
    rp_id_hash.copy_from_slice(&bytes[..32]);
    let flags = bytes[32];
    let sign_count = u32::from_be_bytes([bytes[33], bytes[34], bytes[35], bytes[36]]);

    let mut rest = &bytes[AUTH_DATA_MIN_LEN..];

    let attested_credential = if flags & FLAG_AT == 0 {
        None
    } else {
        if rest.len() < 18 {
            return Err(ParseError("authenticator data too short for credential data"));
        }
        let mut aaguid = [0u8; 16];
        aaguid.copy_from_slice(&rest[..16]);
        let id_len = usize::from(u16::from_be_bytes([rest[16], rest[17]]));
        rest = &rest[18..];

        if rest.len() < id_len {
            return Err(ParseError("authenticator data too short for credential ID"));
        }
        let credential_id = rest[..id_len].to_vec();
        rest = &rest[id_len..];

        let (key_value, consumed) = read_cbor_item(rest)?;
        rest = &rest[consumed..];

        Some(AttestedCredentialData {
            aaguid,
            credential_id,
            public_key: CoseKey::from_value(key_value)?,
        })
    };

    if flags & FLAG_ED != 0 {
        let (_extensions, consumed) = read_cbor_item(rest)?;
        rest = &rest[consumed..];
    }

    if !rest.is_empty() {
        return Err(ParseError("trailing bytes in authenticator data"));
    }

    Ok(AuthenticatorData {
        rp_id_hash,
        flags,
        sign_count,
        attested_credential,
    })
}

/// Decode one CBOR item from the front of `bytes`, returning how many bytes it used
fn read_cbor_item(bytes: &[u8]) -> Result<(Value, usize), ParseError> {
    let mut cursor = Cursor::new(bytes);
    let value: Value = ciborium::de::from_reader(&mut cursor)
        .map_err(|_| ParseError("invalid CBOR in authenticator data"))?;
    let consumed = usize::try_from(cursor.position())
        .map_err(|_| ParseError("CBOR item too large"))?;
    Ok((value, consumed))
}

impl CoseKey {
    fn from_value(value: Value) -> Result<Self, ParseError> {
        let Value::Map(params) = value else {
            return Err(ParseError("COSE key is not a map"));
        };
        let kty = int_member(&params, COSE_KTY)
            .and_then(value_as_i64)
            .ok_or(ParseError("COSE key without kty"))?;
        let alg = int_member(&params, COSE_ALG)
            .and_then(value_as_i64)
            .ok_or(ParseError("COSE key without alg"))?;
        Ok(Self { kty, alg, params })
    }

    /// Convert to a verification key, accepting only supported algorithms
    ///
    /// # Errors
    /// Returns [`KeyError::Unsupported`] for algorithms outside
    /// [`CoseAlgorithm::SUPPORTED`], and [`KeyError::Malformed`] when the key
    /// parameters do not match the algorithm.
    pub fn to_public_key(&self) -> Result<CredentialPublicKey, KeyError> {
        let algorithm = CoseAlgorithm::from_id(self.alg).ok_or(KeyError::Unsupported(self.alg))?;

        let material = match algorithm {
            CoseAlgorithm::Es256 => {
                if self.kty != COSE_KTY_EC2 {
                    return Err(KeyError::Malformed("ES256 key is not EC2"));
                }
                if self.int_param(COSE_EC2_CRV) != Some(COSE_CRV_P256) {
                    return Err(KeyError::Malformed("ES256 key is not on P-256"));
                }
                let x = self.bytes_param(COSE_EC2_X, "missing or invalid x coordinate")?;
                let y = self.bytes_param(COSE_EC2_Y, "missing or invalid y coordinate")?;
                if x.len() != 32 || y.len() != 32 {
                    return Err(KeyError::Malformed("P-256 coordinates must be 32 bytes"));
                }
                PublicKeyMaterial::Ec2 { x, y }
            }
            CoseAlgorithm::Rs256 => {
                if self.kty != COSE_KTY_RSA {
                    return Err(KeyError::Malformed("RS256 key is not RSA"));
                }
                let n = self.bytes_param(COSE_RSA_N, "missing or invalid RSA modulus")?;
                let e = self.bytes_param(COSE_RSA_E, "missing or invalid RSA exponent")?;
                PublicKeyMaterial::Rsa { n, e }
            }
        };

        Ok(CredentialPublicKey {
            algorithm,
            material,
        })
    }

    fn int_param(&self, label: i64) -> Option<i64> {
        int_member(&self.params, label).and_then(value_as_i64)
    }

    fn bytes_param(&self, label: i64, missing: &'static str) -> Result<Vec<u8>, KeyError> {
        int_member(&self.params, label)
            .and_then(Value::as_bytes)
            .cloned()
            .ok_or(KeyError::Malformed(missing))
    }
}

/// Encode a public key as a COSE_Key map
///
/// # Errors
/// Returns an error only if CBOR serialization fails.
pub fn encode_cose_key(key: &CredentialPublicKey) -> Result<Vec<u8>, ParseError> {
    let int = |i: i64| Value::Integer(Integer::from(i));
    let entries = match &key.material {
        PublicKeyMaterial::Ec2 { x, y } => vec![
            (int(COSE_KTY), int(COSE_KTY_EC2)),
            (int(COSE_ALG), int(key.algorithm.id())),
            (int(COSE_EC2_CRV), int(COSE_CRV_P256)),
            (int(COSE_EC2_X), Value::Bytes(x.clone())),
            (int(COSE_EC2_Y), Value::Bytes(y.clone())),
        ],
        PublicKeyMaterial::Rsa { n, e } => vec![
            (int(COSE_KTY), int(COSE_KTY_RSA)),
            (int(COSE_ALG), int(key.algorithm.id())),
            (int(COSE_RSA_N), Value::Bytes(n.clone())),
            (int(COSE_RSA_E), Value::Bytes(e.clone())),
        ],
    };

    let mut out = Vec::new();
    ciborium::ser::into_writer(&Value::Map(entries), &mut out)
        .map_err(|_| ParseError("failed to encode COSE key"))?;
    Ok(out)
}

fn text_member<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

fn int_member(map: &[(Value, Value)], label: i64) -> Option<&Value> {
    map.iter()
        .find(|(k, _)| k.as_integer().and_then(|i| i64::try_from(i).ok()) == Some(label))
        .map(|(_, v)| v)
}

fn value_as_i64(value: &Value) -> Option<i64> {
    value.as_integer().and_then(|i| i64::try_from(i).ok())
}
