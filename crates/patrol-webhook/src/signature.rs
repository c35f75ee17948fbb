//! `X-Hub-Signature-256` verification.

use hmac::{Hmac, Mac};
use patrol_core::PatrolError;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header GitHub signs deliveries with.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

const PREFIX: &str = "sha256=";

/// Compute the header value GitHub would send for `body`.
///
/// # Examples
///
/// ```
/// use patrol_webhook::signature::{sign, verify_signature};
///
/// let header = sign("secret", b"{}").unwrap();
/// assert!(header.starts_with("sha256="));
/// assert!(verify_signature("secret", b"{}", Some(&header)).is_ok());
/// ```
///
/// # Errors
///
/// Returns [`PatrolError::Signature`] if the key is rejected.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, PatrolError> {
    let mut mac = new_mac(secret)?;
    mac.update(body);
    Ok(format!(
        "{PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Check `header` against HMAC-SHA256(`secret`, `body`) in constant time.
///
/// # Errors
///
/// Returns [`PatrolError::Signature`] when the header is missing, malformed
/// or does not match.
pub fn verify_signature(
    secret: &str,
    body: &[u8],
    header: Option<&str>,
) -> Result<(), PatrolError> {
    let header = header.ok_or_else(|| PatrolError::Signature("missing signature".into()))?;
    let digest = header
        .trim()
        .strip_prefix(PREFIX)
        .ok_or_else(|| PatrolError::Signature("unsupported signature scheme".into()))?;
    let expected = hex::decode(digest)
        .map_err(|_| PatrolError::Signature("signature is not valid hex".into()))?;

    let mut mac = new_mac(secret)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| PatrolError::Signature("signature mismatch".into()))
}

fn new_mac(secret: &str) -> Result<HmacSha256, PatrolError> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PatrolError::Signature(format!("invalid webhook secret: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Example delivery from GitHub's webhook validation docs.
    #[test]
    fn matches_documented_digest() {
        let header = sign("It's a Secret to Everybody", b"Hello, World!").unwrap();
        assert_eq!(
            header,
            "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17"
        );
    }

    #[test]
    fn rejects_missing_header() {
        let err = verify_signature("s", b"body", None).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn rejects_tampered_body() {
        let header = sign("s", b"body").unwrap();
        assert!(verify_signature("s", b"bodY", Some(&header)).is_err());
    }

    #[test]
    fn rejects_wrong_secret() {
        let header = sign("right", b"body").unwrap();
        assert!(verify_signature("wrong", b"body", Some(&header)).is_err());
    }

    #[test]
    fn rejects_sha1_and_garbage() {
        assert!(verify_signature("s", b"b", Some("sha1=abcd")).is_err());
        assert!(verify_signature("s", b"b", Some("sha256=zz")).is_err());
        assert!(verify_signature("s", b"b", Some("sha256=abcd")).is_err());
    }
}
