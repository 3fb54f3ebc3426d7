//! `Idempotency-Key` header validation, `spec.md` §6 "Request headers".

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{CoreError, CoreResult};

static IDEMPOTENCY_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-:.]{8,128}$").expect("static regex is valid"));

/// Validates an `Idempotency-Key` header value: 8-128 chars matching
/// `[A-Za-z0-9_\-:.]+`.
pub fn validate_idempotency_key(key: &str) -> CoreResult<()> {
    if IDEMPOTENCY_KEY_RE.is_match(key) {
        Ok(())
    } else {
        Err(CoreError::validation(
            "Idempotency-Key must be 8-128 chars of letters, digits, '_', '-', ':', '.'",
        ))
    }
}
