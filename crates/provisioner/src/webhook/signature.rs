use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_PREFIX: &str = "sha1=";

/// Checks an `X-Hub-Signature` value (`sha1=<hex>`) against the HMAC-SHA1 of the raw body.
///
/// A missing or malformed header, or an empty secret, never verifies. The digest comparison is
/// constant time.
#[must_use]
pub fn verify_signature(signature_header: Option<&str>, secret: &str, body: &[u8]) -> bool {
    if secret.is_empty() {
        return false;
    }

    let Some(provided) = signature_header
        .map(str::trim)
        .and_then(|header| header.strip_prefix(SIGNATURE_PREFIX))
    else {
        return false;
    };

    let Ok(provided) = hex::decode(provided) else {
        return false;
    };

    let Ok(mut mac) = HmacSha1::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

#[cfg(test)]
pub(crate) fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).expect("hmac init");
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}
