//! Webhook signature check: hex HMAC-SHA512 of the raw request body, keyed
//! with the gateway secret.

use crate::errors::ServiceError;
use hmac::{Hmac, Mac};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

pub fn sign(secret: &str, body: &[u8]) -> Result<String, ServiceError> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("invalid HMAC key: {}", e)))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time comparison of `signature` against the expected MAC.
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(provided) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

/// Rejects with `InvalidSignature` unless the header matches the body.
pub fn ensure_valid(
    secret: Option<&str>,
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), ServiceError> {
    match (secret, signature) {
        (Some(secret), Some(signature)) if verify(secret, body, signature) => Ok(()),
        _ => Err(ServiceError::InvalidSignature),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "sk_test_secret";
    const BODY: &[u8] = br#"{"event":"charge.success","data":{"reference":"r1","amount":15000}}"#;

    #[test]
    fn accepts_matching_signature() {
        let signature = sign(SECRET, BODY).unwrap();
        assert_eq!(signature.len(), 128);
        assert!(verify(SECRET, BODY, &signature));
        assert!(verify(SECRET, BODY, &signature.to_uppercase()));
    }

    #[test]
    fn rejects_tampered_body() {
        let signature = sign(SECRET, BODY).unwrap();
        let tampered = br#"{"event":"charge.success","data":{"reference":"r1","amount":1}}"#;
        assert!(!verify(SECRET, tampered, &signature));
    }

    #[test]
    fn rejects_wrong_secret_and_garbage() {
        let signature = sign("another", BODY).unwrap();
        assert!(!verify(SECRET, BODY, &signature));
        assert!(!verify(SECRET, BODY, "not-hex"));
        assert!(!verify(SECRET, BODY, ""));
    }

    #[test]
    fn missing_secret_fails_closed() {
        let signature = sign(SECRET, BODY).unwrap();
        assert!(matches!(
            ensure_valid(None, BODY, Some(&signature)),
            Err(ServiceError::InvalidSignature)
        ));
        assert!(matches!(
            ensure_valid(Some(SECRET), BODY, None),
            Err(ServiceError::InvalidSignature)
        ));
        assert!(ensure_valid(Some(SECRET), BODY, Some(&signature)).is_ok());
    }
}
