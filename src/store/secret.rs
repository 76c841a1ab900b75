//! Channel secret hashing
//!
//! PBKDF2-HMAC-SHA256 with a per-secret random salt, encoded as
//! `pbkdf2$<iterations>$<salt-b64>$<hash-b64>`.

use base64::Engine;
use ring::pbkdf2;
use std::num::NonZeroU32;

const ALGORITHM: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;
const ITERATIONS: NonZeroU32 = match NonZeroU32::new(100_000) {
    Some(n) => n,
    None => unreachable!(),
};
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

fn b64() -> base64::engine::general_purpose::GeneralPurpose {
    base64::engine::general_purpose::STANDARD_NO_PAD
}

/// Hash a channel secret for storage
pub fn hash_secret(secret: &str) -> String {
    let salt: [u8; SALT_LEN] = rand::random();
    let mut hash = [0u8; HASH_LEN];
    pbkdf2::derive(ALGORITHM, ITERATIONS, &salt, secret.as_bytes(), &mut hash);
    format!(
        "pbkdf2${}${}${}",
        ITERATIONS,
        b64().encode(salt),
        b64().encode(hash)
    )
}

/// Constant-time compare of a candidate secret against a stored hash.
/// A malformed hash never matches.
pub fn verify_secret(stored_hash: &str, candidate: &str) -> bool {
    let mut parts = stored_hash.split('$');
    let (scheme, iterations, salt, hash) = match (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) {
        (Some(s), Some(i), Some(salt), Some(hash)) => (s, i, salt, hash),
        _ => return false,
    };
    if scheme != "pbkdf2" {
        return false;
    }
    let iterations = match iterations.parse::<u32>().ok().and_then(NonZeroU32::new) {
        Some(n) => n,
        None => return false,
    };
    let salt = match b64().decode(salt) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let hash = match b64().decode(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };

    pbkdf2::verify(ALGORITHM, iterations, &salt, candidate.as_bytes(), &hash).is_ok()
}
