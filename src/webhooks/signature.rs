use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Lowercase hex HMAC-SHA256 of `body` keyed with `secret`.
pub fn sign(body: &[u8], secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a provider signature against the raw request bytes.
///
/// Empty secrets and empty signatures never verify. The comparison runs in
/// constant time once the lengths agree.
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    if secret.is_empty() || signature.is_empty() {
        return false;
    }
    let Some(expected) = sign(body, secret) else {
        return false;
    };
    let provided = signature.as_bytes();
    if provided.len() != expected.len() {
        return false;
    }
    expected.as_bytes().ct_eq(provided).into()
}
