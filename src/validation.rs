//! Input validation for initiate-endpoint targets, `spec.md` §4.6 step 2.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::{CoreError, CoreResult};

static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^254[17][0-9]{8}$").expect("static regex is valid"));
static SHORTCODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{5,8}$").expect("static regex is valid"));

pub fn validate_phone(msisdn: &str) -> CoreResult<()> {
    if PHONE_RE.is_match(msisdn) {
        Ok(())
    } else {
        Err(CoreError::validation("phone must match 254[7|1]XXXXXXXX"))
    }
}

pub fn validate_shortcode(code: &str) -> CoreResult<()> {
    if SHORTCODE_RE.is_match(code) {
        Ok(())
    } else {
        Err(CoreError::validation("paybill/till number must be 5-8 digits"))
    }
}

pub fn validate_account_reference(reference: &str) -> CoreResult<()> {
    let len = reference.chars().count();
    if (2..=20).contains(&len) {
        Ok(())
    } else {
        Err(CoreError::validation("account reference must be 2-20 characters"))
    }
}

/// A PIN must be exactly `min_length` digits once surrounding whitespace
/// is stripped; anything else (letters, wrong length, stray symbols) is
/// rejected before it ever reaches `scrypt`.
pub fn validate_pin_format(pin: &str, min_length: usize) -> CoreResult<()> {
    let trimmed = pin.trim();
    if trimmed.len() == min_length && trimmed.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(CoreError::validation(format!(
            "pin must be exactly {min_length} digits"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_phone_prefixes() {
        assert!(validate_phone("254712345678").is_ok());
        assert!(validate_phone("254112345678").is_ok());
    }

    #[test]
    fn rejects_invalid_phone_prefix() {
        assert!(validate_phone("254212345678").is_err());
    }

    #[test]
    fn rejects_wrong_length_phone() {
        assert!(validate_phone("25471234567").is_err());
    }

    #[test]
    fn validates_shortcode_digit_length() {
        assert!(validate_shortcode("600000").is_ok());
        assert!(validate_shortcode("123").is_err());
        assert!(validate_shortcode("123456789").is_err());
    }

    #[test]
    fn validates_account_reference_length() {
        assert!(validate_account_reference("ok").is_ok());
        assert!(validate_account_reference("x").is_err());
        assert!(validate_account_reference(&"a".repeat(21)).is_err());
    }

    #[test]
    fn accepts_six_digit_pin_with_surrounding_whitespace() {
        assert!(validate_pin_format(" 123456 ", 6).is_ok());
    }

    #[test]
    fn rejects_pin_with_non_digit_characters() {
        assert!(validate_pin_format("12a456", 6).is_err());
    }

    #[test]
    fn rejects_pin_of_wrong_length() {
        assert!(validate_pin_format("12345", 6).is_err());
        assert!(validate_pin_format("1234567", 6).is_err());
    }
}
