//! PIN hashing, per `spec.md` §4.3.
//!
//! `scrypt` with N=2^14, r=8, p=1, a 16-byte random salt and a 64-byte
//! derived key, stored as `scrypt$<salt_b64>$<hash_b64>`. Verification
//! recomputes the hash and compares in constant time.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use rand::RngCore;
use scrypt::Params;

use crate::errors::{CoreError, CoreResult};

/// Constant-time byte comparison; avoids leaking PIN length-dependent
/// timing through early-exit equality checks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

const SCHEME: &str = "scrypt";
const LOG_N: u8 = 14;
const R: u32 = 8;
const P: u32 = 1;
const KEY_LEN: usize = 64;
const SALT_LEN: usize = 16;

fn params() -> Params {
    Params::new(LOG_N, R, P, KEY_LEN).expect("static scrypt params are valid")
}

/// Hashes a PIN, returning `scheme$salt_b64$hash_b64`.
pub fn hash_pin(pin: &str) -> CoreResult<String> {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    let mut out = [0u8; KEY_LEN];
    scrypt::scrypt(pin.as_bytes(), &salt, &params(), &mut out)
        .map_err(|e| CoreError::external(format!("pin hashing failed: {e}")))?;
    Ok(format!(
        "{SCHEME}${}${}",
        B64.encode(salt),
        B64.encode(out)
    ))
}

/// Verifies `pin` against a stored `scheme$salt_b64$hash_b64` string.
///
/// Returns `Ok(false)` (not an error) for a plain mismatch; only
/// malformed stored hashes or an unsupported scheme raise
/// [`CoreError::Auth`].
pub fn verify_pin(pin: &str, stored: &str) -> CoreResult<bool> {
    let mut parts = stored.splitn(3, '$');
    let scheme = parts.next().unwrap_or_default();
    let salt_b64 = parts.next().unwrap_or_default();
    let hash_b64 = parts.next().unwrap_or_default();
    if scheme != SCHEME || salt_b64.is_empty() || hash_b64.is_empty() {
        return Err(CoreError::auth("unrecognized pin hash format"));
    }
    let salt = B64
        .decode(salt_b64)
        .map_err(|_| CoreError::auth("corrupt pin hash salt"))?;
    let expected = B64
        .decode(hash_b64)
        .map_err(|_| CoreError::auth("corrupt pin hash digest"))?;

    let mut actual = vec![0u8; expected.len().max(1)];
    scrypt::scrypt(pin.as_bytes(), &salt, &params(), &mut actual)
        .map_err(|e| CoreError::external(format!("pin hashing failed: {e}")))?;

    Ok(constant_time_eq(&actual, &expected))
}
