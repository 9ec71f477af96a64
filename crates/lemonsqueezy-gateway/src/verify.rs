//! Webhook Signature Verification
//!
//! LemonSqueezy signs the raw request body with HMAC-SHA256 using the
//! webhook secret and sends the hex digest in the `X-Signature` header.
//! Always hash the bytes as received; re-serialized JSON will not match.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::settings::GatewaySettings;
use crate::webhook_log::Verification;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Check `signature` against HMAC-SHA256(`secret`, `body`) in constant time.
///
/// A mismatch is a normal outcome, so this never errors.
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> Verification {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return Verification::Invalid;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return Verification::Invalid;
    };
    mac.update(body);

    // verify_slice compares in constant time
    if mac.verify_slice(&expected).is_ok() {
        Verification::Valid
    } else {
        Verification::Invalid
    }
}

/// Hex HMAC-SHA256 digest of `body`, as the provider would send it
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// First enabled gateway whose webhook secret validates the signature
pub fn select_gateway<'a>(
    gateways: &'a [GatewaySettings],
    body: &[u8],
    signature: &str,
) -> Option<&'a GatewaySettings> {
    gateways
        .iter()
        .filter(|g| g.enabled)
        .find(|g| {
            g.webhook_secret()
                .is_some_and(|secret| verify_signature(body, signature, secret).is_valid())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"event":"order_created","order_id":"PR-001"}"#;

    #[test]
    fn test_valid_signature() {
        let signature = sign(BODY, SECRET);
        assert_eq!(signature.len(), 64);
        assert_eq!(verify_signature(BODY, &signature, SECRET), Verification::Valid);
    }

    #[test]
    fn test_uppercase_hex_is_accepted() {
        let signature = sign(BODY, SECRET).to_uppercase();
        assert_eq!(verify_signature(BODY, &signature, SECRET), Verification::Valid);
    }

    #[test]
    fn test_any_flipped_body_byte_is_invalid() {
        let signature = sign(BODY, SECRET);
        for i in 0..BODY.len() {
            let mut tampered = BODY.to_vec();
            tampered[i] ^= 0x01;
            assert_eq!(
                verify_signature(&tampered, &signature, SECRET),
                Verification::Invalid,
                "byte {i}"
            );
        }
    }

    #[test]
    fn test_any_flipped_signature_byte_is_invalid() {
        let signature = hex::decode(sign(BODY, SECRET)).unwrap();
        for i in 0..signature.len() {
            let mut tampered = signature.clone();
            tampered[i] ^= 0x80;
            assert_eq!(
                verify_signature(BODY, &hex::encode(&tampered), SECRET),
                Verification::Invalid,
                "byte {i}"
            );
        }
    }

    #[test]
    fn test_reserialized_json_does_not_verify() {
        let signature = sign(BODY, SECRET);
        let value: serde_json::Value = serde_json::from_slice(BODY).unwrap();
        let pretty = serde_json::to_vec_pretty(&value).unwrap();
        assert_eq!(verify_signature(&pretty, &signature, SECRET), Verification::Invalid);
    }

    #[test]
    fn test_garbage_signatures() {
        assert_eq!(verify_signature(BODY, "", SECRET), Verification::Invalid);
        assert_eq!(verify_signature(BODY, "not-hex", SECRET), Verification::Invalid);
        assert_eq!(verify_signature(BODY, "abcd", SECRET), Verification::Invalid);
        assert_eq!(
            verify_signature(BODY, &sign(BODY, "other"), SECRET),
            Verification::Invalid
        );
    }

    #[test]
    fn test_select_gateway_skips_disabled_and_mismatched() {
        let gateways = vec![
            GatewaySettings::new("off", "key", "1", SECRET).disabled(),
            GatewaySettings::new("other", "key", "2", "whsec_other"),
            GatewaySettings::new("blank", "key", "3", ""),
            GatewaySettings::new("main", "key", "4", SECRET),
        ];
        let signature = sign(BODY, SECRET);

        let selected = select_gateway(&gateways, BODY, &signature).unwrap();
        assert_eq!(selected.gateway_name, "main");

        assert!(select_gateway(&gateways, BODY, "00").is_none());
    }
}
