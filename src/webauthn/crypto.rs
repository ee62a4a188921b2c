//! `WebAuthn` cryptography operations
//!
//! Thin wrappers over `ring`: random values, SHA-256, and signature
//! verification dispatched on the credential's COSE algorithm. The
//! primitives themselves are treated as correct black boxes.

use ring::digest;
use ring::error::Unspecified;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{self, RsaPublicKeyComponents, UnparsedPublicKey};
use uuid::Uuid;

use super::types::{CredentialPublicKey, PublicKeyMaterial};

/// Challenge length in bytes (256 bits)
pub const CHALLENGE_LEN: usize = 32;

/// Fill a fresh buffer with `len` bytes from the system CSPRNG
///
/// # Errors
/// Returns an error if the operating system random source fails.
pub fn random_bytes(len: usize) -> Result<Vec<u8>, Unspecified> {
    let mut bytes = vec![0u8; len];
    SystemRandom::new().fill(&mut bytes)?;
    Ok(bytes)
}

/// Generate a user handle: 16 random bytes in the shape of a v4 UUID
#[must_use]
pub fn generate_user_handle() -> Vec<u8> {
    Uuid::new_v4().as_bytes().to_vec()
}

/// Hash data using SHA-256
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(digest::digest(&digest::SHA256, data).as_ref());
    out
}

/// Concatenate authenticator data with the SHA-256 of client data
///
/// This is the message both assertion signatures and packed self
/// attestation signatures cover.
#[must_use]
pub fn signed_message(auth_data: &[u8], client_data_json: &[u8]) -> Vec<u8> {
    let client_data_hash = sha256(client_data_json);
    let mut message = Vec::with_capacity(auth_data.len() + client_data_hash.len());
    message.extend_from_slice(auth_data);
    message.extend_from_slice(&client_data_hash);
    message
}

/// RSA modulus sizes `ring` verifies RS256 signatures with
const RSA_MODULUS_BITS: std::ops::RangeInclusive<usize> = 2048..=8192;

/// Largest RSA public exponent `ring` accepts (2^33 - 1)
const RSA_MAX_EXPONENT: u64 = (1 << 33) - 1;

/// Check that a public key could ever verify a signature
///
/// P-256 points must lie on the curve; RSA keys must fall within the
/// modulus and exponent bounds of [`verify_signature`].
///
/// # Errors
/// Returns a short reason when the key material is unusable.
pub fn check_public_key(public_key: &CredentialPublicKey) -> Result<(), &'static str> {
    match &public_key.material {
        PublicKeyMaterial::Ec2 { x, y } => {
            let point = sec1_point(x, y);
            p256::PublicKey::from_sec1_bytes(&point)
                .map(|_| ())
                .map_err(|_| "P-256 point is not on the curve")
        }
        PublicKeyMaterial::Rsa { n, e } => {
            if !RSA_MODULUS_BITS.contains(&bit_length(n)) {
                return Err("RSA modulus must be 2048 to 8192 bits");
            }
            let e = strip_leading_zeros(e);
            if e.len() > 8 {
                return Err("RSA exponent out of range");
            }
            let exponent = e.iter().fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
            if !(3..=RSA_MAX_EXPONENT).contains(&exponent) || exponent & 1 == 0 {
                return Err("RSA exponent out of range");
            }
            Ok(())
        }
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn bit_length(bytes: &[u8]) -> usize {
    match strip_leading_zeros(bytes) {
        [] => 0,
        [first, rest @ ..] => {
            rest.len() * 8 + usize::try_from(u8::BITS - first.leading_zeros()).unwrap_or(0)
        }
    }
}

/// Uncompressed SEC1 point: 0x04 || x || y
fn sec1_point(x: &[u8], y: &[u8]) -> Vec<u8> {
    let mut point = Vec::with_capacity(1 + x.len() + y.len());
    point.push(0x04);
    point.extend_from_slice(x);
    point.extend_from_slice(y);
    point
}

/// Verify `signature` over `message` with a credential public key
///
/// ES256 signatures are ASN.1 DER encoded, as authenticators emit them.
///
/// # Errors
/// Returns an error if the key is unusable or the signature does not verify.
pub fn verify_signature(
    public_key: &CredentialPublicKey,
    message: &[u8],
    signature: &[u8],
) -> Result<(), Unspecified> {
    match &public_key.material {
        PublicKeyMaterial::Ec2 { x, y } => {
            UnparsedPublicKey::new(&signature::ECDSA_P256_SHA256_ASN1, &sec1_point(x, y))
                .verify(message, signature)
        }
        PublicKeyMaterial::Rsa { n, e } => RsaPublicKeyComponents {
            n: n.as_slice(),
            e: e.as_slice(),
        }
        .verify(&signature::RSA_PKCS1_2048_8192_SHA256, message, signature),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webauthn::types::CoseAlgorithm;
    use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};

    fn key_pair() -> (EcdsaKeyPair, CredentialPublicKey) {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng).unwrap();
        let pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng).unwrap();
        let point = pair.public_key().as_ref();
        let key = CredentialPublicKey {
            algorithm: CoseAlgorithm::Es256,
            material: PublicKeyMaterial::Ec2 {
                x: point[1..33].to_vec(),
                y: point[33..65].to_vec(),
            },
        };
        (pair, key)
    }

    #[test]
    fn test_random_bytes_are_fresh() {
        let a = random_bytes(CHALLENGE_LEN).unwrap();
        let b = random_bytes(CHALLENGE_LEN).unwrap();
        assert_eq!(a.len(), CHALLENGE_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn test_user_handle_is_16_bytes() {
        assert_eq!(generate_user_handle().len(), 16);
        assert_ne!(generate_user_handle(), generate_user_handle());
    }

    #[test]
    fn test_sha256_known_vector() {
        let hash = sha256(b"abc");
        assert_eq!(hash[..4], [0xba, 0x78, 0x16, 0xbf]);
    }

    #[test]
    fn test_es256_verification() {
        let (pair, key) = key_pair();
        let message = signed_message(b"authenticator-data", b"{\"type\":\"webauthn.get\"}");
        let sig = pair.sign(&SystemRandom::new(), &message).unwrap();

        assert!(verify_signature(&key, &message, sig.as_ref()).is_ok());

        let mut tampered = sig.as_ref().to_vec();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(verify_signature(&key, &message, &tampered).is_err());

        let mut other_message = message.clone();
        other_message[0] ^= 0x80;
        assert!(verify_signature(&key, &other_message, sig.as_ref()).is_err());
    }

    #[test]
    fn test_rsa_garbage_key_fails_closed() {
        let key = CredentialPublicKey {
            algorithm: CoseAlgorithm::Rs256,
            material: PublicKeyMaterial::Rsa {
                n: vec![0x01; 8],
                e: vec![0x03],
            },
        };
        assert!(verify_signature(&key, b"message", &[0u8; 8]).is_err());
    }

    #[test]
    fn test_generated_p256_key_is_usable() {
        let (_, key) = key_pair();
        assert_eq!(check_public_key(&key), Ok(()));
    }

    #[test]
    fn test_off_curve_point_is_unusable() {
        let key = CredentialPublicKey {
            algorithm: CoseAlgorithm::Es256,
            material: PublicKeyMaterial::Ec2 {
                x: vec![1; 32],
                y: vec![2; 32],
            },
        };
        assert!(check_public_key(&key).is_err());
    }

    #[test]
    fn test_rsa_key_bounds() {
        let rsa = |n: Vec<u8>, e: Vec<u8>| CredentialPublicKey {
            algorithm: CoseAlgorithm::Rs256,
            material: PublicKeyMaterial::Rsa { n, e },
        };
        let mut n2048 = vec![0xC3; 256];
        assert_eq!(check_public_key(&rsa(n2048.clone(), vec![1, 0, 1])), Ok(()));

        // Leading zero bytes do not count towards the modulus size
        n2048.insert(0, 0);
        assert_eq!(check_public_key(&rsa(n2048.clone(), vec![1, 0, 1])), Ok(()));

        assert!(check_public_key(&rsa(vec![0xC3; 128], vec![1, 0, 1])).is_err());
        assert!(check_public_key(&rsa(vec![0xC3; 1025], vec![1, 0, 1])).is_err());
        assert!(check_public_key(&rsa(n2048.clone(), vec![1])).is_err());
        assert!(check_public_key(&rsa(n2048.clone(), vec![1, 0, 0])).is_err());
        assert!(check_public_key(&rsa(n2048, vec![4, 0, 0, 0, 1])).is_err());
    }

    #[test]
    fn test_bit_length() {
        assert_eq!(bit_length(&[]), 0);
        assert_eq!(bit_length(&[0, 0]), 0);
        assert_eq!(bit_length(&[0, 1]), 1);
        assert_eq!(bit_length(&[0x80, 0]), 16);
    }
}
