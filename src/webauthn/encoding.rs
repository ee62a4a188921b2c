//! Base64URL boundary adapter
//!
//! Every binary field that crosses the transport boundary (challenges,
//! credential IDs, authenticator data, signatures) is carried as base64url
//! without padding, the same encoding browser `WebAuthn` APIs produce.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::{DecodeError, Engine};

/// URL-safe engine that never emits padding but tolerates it on input,
/// since some clients pad their base64url strings anyway.
const BASE64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode raw bytes as unpadded base64url
#[must_use]
pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    BASE64URL.encode(bytes)
}

/// Decode a base64url string (padded or not) into raw bytes
///
/// # Errors
/// Returns an error if the input contains characters outside the URL-safe
/// alphabet or has an impossible length.
pub fn decode(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    BASE64URL.decode(encoded)
}
