//! Inbound request authenticity.
//!
//! Discord signs every interactions webhook with the application's Ed25519
//! key over `timestamp || body`; Telegram instead echoes back a shared secret
//! header. Both checks are booleans to the rest of the crate — a failed check
//! rejects the request before any command processing happens.

use ring::signature::{UnparsedPublicKey, ED25519};

/// Verify a Discord interactions signature.
///
/// `public_key_hex` is the application public key from the developer portal;
/// `signature_hex` comes from `X-Signature-Ed25519` and `timestamp` from
/// `X-Signature-Timestamp`. Any decode failure is simply "not authentic".
pub fn verify_signature(
    public_key_hex: &str,
    body: &[u8],
    signature_hex: &str,
    timestamp: &str,
) -> bool {
    let Ok(public_key) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };

    let mut message = Vec::with_capacity(timestamp.len() + body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(body);

    UnparsedPublicKey::new(&ED25519, public_key)
        .verify(&message, &signature)
        .is_ok()
}

/// Constant-time string comparison to prevent timing attacks.
///
/// Does not short-circuit on length mismatch — always iterates over the
/// longer input to avoid leaking length information via timing.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();

    let len_diff = a.len() ^ b.len();

    let max_len = a.len().max(b.len());
    let mut byte_diff = 0u8;
    for i in 0..max_len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        byte_diff |= x ^ y;
    }

    len_diff == 0 && byte_diff == 0
}
