use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::SignatureError;

/// Header carrying the hex HMAC-SHA256 of the raw webhook body.
pub const SIGNATURE_HEADER: &str = "x-pinnacle-signature";

#[cfg(test)]
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("hmac key");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of `signature_hex` against the body. An empty secret rejects everything.
pub fn verify(secret: &[u8], body: &[u8], signature_hex: Option<&str>) -> Result<(), SignatureError> {
    let signature_hex = signature_hex
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::Missing)?;
    let signature = hex::decode(signature_hex).map_err(|_| SignatureError::Malformed)?;
    if secret.is_empty() {
        return Err(SignatureError::Mismatch);
    }

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret) else {
        return Err(SignatureError::Mismatch);
    };
    mac.update(body);
    mac.verify_slice(&signature)
        .map_err(|_| SignatureError::Mismatch)
}

const TOKEN_KEY: &[u8] = b"outreach-bearer-token";

/// Constant-time token equality. Both sides are MACed to a fixed width first, so the
/// comparison time does not depend on where or whether their lengths differ.
pub fn tokens_match(expected: &str, presented: &str) -> bool {
    let tag = |token: &str| {
        Hmac::<Sha256>::new_from_slice(TOKEN_KEY).map(|mut mac| {
            mac.update(token.as_bytes());
            mac
        })
    };
    let (Ok(expected), Ok(presented)) = (tag(expected), tag(presented)) else {
        return false;
    };
    presented
        .verify_slice(&expected.finalize().into_bytes())
        .is_ok()
}
